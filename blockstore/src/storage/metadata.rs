//! Image metadata record.
//!
//! The metadata occupies block 0 and names the image and the files it stores,
//! in the order their file control blocks appear in the file table.
//!
//! Layout: `i32 name_len`, name bytes, `i32 file_count`, then per file
//! `i32 name_len` and name bytes. The remainder of the block is zero.

use crate::storage::block::{BLOCK_SIZE, Block};
use crate::storage::codec::{CodecError, Reader, Writer};

/// The image's self-description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Name the image was created under.
    pub db_name: String,
    /// Stored file names, in file-table order.
    pub file_names: Vec<String>,
}

impl Metadata {
    /// Create metadata for a fresh image with no files.
    #[must_use]
    pub fn new(db_name: &str) -> Self {
        Self {
            db_name: db_name.to_owned(),
            file_names: Vec::new(),
        }
    }

    /// Encode the metadata record.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.put_str(&self.db_name);
        writer.put_len(self.file_names.len());
        for name in &self.file_names {
            writer.put_str(name);
        }
        writer.into_bytes()
    }

    /// Whether the encoded record fits in the metadata block.
    #[must_use]
    pub fn fits_in_block(&self) -> bool {
        self.to_bytes().len() <= BLOCK_SIZE
    }

    /// Serialize to the metadata block.
    ///
    /// Returns `None` if the record does not fit in one block.
    #[must_use]
    pub fn to_block(&self) -> Option<Block> {
        let bytes = self.to_bytes();
        if bytes.len() > BLOCK_SIZE {
            return None;
        }
        Some(Block::from_slice(&bytes))
    }

    /// Deserialize from the metadata block.
    ///
    /// Any length prefix that would run past the block is an error.
    pub fn from_block(block: &Block) -> Result<Self, CodecError> {
        let mut reader = Reader::new(block.as_bytes());

        let db_name = reader.get_string()?;
        let file_count = reader.get_len()?;
        // Each name needs at least its 4-byte prefix.
        if file_count > reader.remaining() / 4 {
            return Err(CodecError::Truncated {
                needed: file_count.saturating_mul(4),
                remaining: reader.remaining(),
            });
        }

        let mut file_names = Vec::with_capacity(file_count);
        for _ in 0..file_count {
            file_names.push(reader.get_string()?);
        }

        Ok(Self {
            db_name,
            file_names,
        })
    }
}
