//! File control blocks and the file table.
//!
//! An FCB binds a stored file name to the blocks holding its serialized index
//! and the blocks holding its records, and carries the live index tree.
//!
//! Record layout: `i32 name_len`, name bytes, `i32 index_block_count` and that
//! many `i32` block ids, `i32 data_block_count` and that many `i32` block ids,
//! `i32 min_degree` of the index tree, then `i32 tree_len` and that many bytes
//! of serialized tree.
//!
//! FCBs are packed back to back into the reserved file table, in the same
//! order as the metadata's file names. Table records carry an empty tree
//! section; the tree is read back from the FCB's own index blocks, which hold
//! `i32 tree_len` followed by the serialized tree.

// Block ids are below BLOCK_COUNT.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use crate::storage::block::{
    BLOCK_SIZE, Block, BlockId, FILE_TABLE_BLOCKS, FIRST_FILE_TABLE_BLOCK, NO_BLOCK,
    blocks_for_len, concat_payloads,
};
use crate::storage::btree::BTree;
use crate::storage::codec::{CodecError, I32_SIZE, Reader, Writer};

/// Bytes available to the packed file table.
pub const FILE_TABLE_SIZE: usize = FILE_TABLE_BLOCKS * BLOCK_SIZE;

/// Where an encoded FCB keeps its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSection {
    /// Serialized tree follows the block lists.
    Inline,
    /// Empty tree section; the tree lives in the index blocks.
    InIndexBlocks,
}

/// A stored file's control block.
#[derive(Debug)]
pub struct Fcb {
    pub file_name: String,
    pub index_blocks: Vec<BlockId>,
    pub data_blocks: Vec<BlockId>,
    pub index_tree: BTree,
}

impl Fcb {
    /// Encode this FCB.
    pub fn encode(&self, writer: &mut Writer, tree_section: TreeSection) {
        writer.put_str(&self.file_name);
        writer.put_i32_list(self.index_blocks.iter().map(|&id| id as i32));
        writer.put_i32_list(self.data_blocks.iter().map(|&id| id as i32));
        writer.put_len(self.index_tree.min_degree());
        match tree_section {
            TreeSection::Inline => writer.put_bytes(&self.index_tree.to_bytes()),
            TreeSection::InIndexBlocks => writer.put_len(0),
        }
    }

    /// Encode this FCB as a standalone record with its tree inline.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.encode(&mut writer, TreeSection::Inline);
        writer.into_bytes()
    }

    /// Decode one FCB.
    ///
    /// The tree is rebuilt with the minimum degree recorded alongside it. An
    /// empty tree section is resolved by reading the index stream out of
    /// `blocks` at the FCB's index block ids.
    pub fn decode(reader: &mut Reader<'_>, blocks: &[Block]) -> Result<Self, FcbError> {
        let file_name = reader.get_string()?;
        let index_blocks = decode_block_ids(reader, blocks.len())?;
        let data_blocks = decode_block_ids(reader, blocks.len())?;
        let raw_degree = reader.get_i32()?;
        let min_degree = usize::try_from(raw_degree)
            .ok()
            .filter(|&t| t >= 2)
            .ok_or(FcbError::InvalidMinDegree(raw_degree))?;
        let tree_bytes = reader.get_bytes()?;

        let index_tree = if tree_bytes.is_empty() {
            read_index_stream(blocks, &index_blocks, min_degree)?
        } else {
            BTree::from_bytes(tree_bytes, min_degree)?
        };

        Ok(Self {
            file_name,
            index_blocks,
            data_blocks,
            index_tree,
        })
    }

    /// Size of this FCB's file table record.
    #[must_use]
    pub fn table_record_len(&self) -> usize {
        table_record_len(
            &self.file_name,
            self.index_blocks.len(),
            self.data_blocks.len(),
        )
    }

    /// Chain this file's data blocks through their in-memory successor links.
    ///
    /// The last block's successor is `NO_BLOCK`.
    pub fn link_data_blocks(&self, blocks: &mut [Block]) {
        let successors = self
            .data_blocks
            .iter()
            .skip(1)
            .copied()
            .chain(std::iter::once(NO_BLOCK));
        for (&id, next) in self.data_blocks.iter().zip(successors) {
            blocks[id as usize].set_next_block(next);
        }
    }

    /// Every block this file occupies, index blocks first.
    pub fn owned_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.index_blocks
            .iter()
            .chain(self.data_blocks.iter())
            .copied()
    }
}

/// Size of a file table record with the given shape.
#[must_use]
pub const fn table_record_len(file_name: &str, index_blocks: usize, data_blocks: usize) -> usize {
    // name prefix, index count, data count, min degree, empty tree prefix
    5 * I32_SIZE + file_name.len() + (index_blocks + data_blocks) * I32_SIZE
}

/// Encode a tree as the index stream stored in its index blocks.
#[must_use]
pub fn index_stream(tree: &BTree) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.put_bytes(&tree.to_bytes());
    writer.into_bytes()
}

/// Number of index blocks a tree occupies.
#[must_use]
pub fn index_blocks_for(tree: &BTree) -> usize {
    blocks_for_len(I32_SIZE + tree.to_bytes().len())
}

/// Write `stream` across `index_blocks`, zero-padding the last one.
pub fn write_index_stream(blocks: &mut [Block], index_blocks: &[BlockId], stream: &[u8]) {
    let mut chunks = stream.chunks(BLOCK_SIZE);
    for &id in index_blocks {
        let chunk = chunks.next().unwrap_or_default();
        blocks[id as usize] = Block::from_slice(chunk);
    }
}

/// Rebuild a tree from the index stream held in `index_blocks`.
pub fn read_index_stream(
    blocks: &[Block],
    index_blocks: &[BlockId],
    min_degree: usize,
) -> Result<BTree, CodecError> {
    let stream = concat_payloads(blocks, index_blocks);
    let mut reader = Reader::new(&stream);
    let tree_bytes = reader.get_bytes()?;
    BTree::from_bytes(tree_bytes, min_degree)
}

/// Pack FCBs into file table blocks.
///
/// Returns `None` if the records do not fit in the reserved table.
#[must_use]
pub fn encode_file_table(fcbs: &[Fcb]) -> Option<Vec<Block>> {
    let mut writer = Writer::new();
    for fcb in fcbs {
        fcb.encode(&mut writer, TreeSection::InIndexBlocks);
    }
    let bytes = writer.into_bytes();
    if bytes.len() > FILE_TABLE_SIZE {
        return None;
    }

    let mut table: Vec<Block> = bytes.chunks(BLOCK_SIZE).map(Block::from_slice).collect();
    table.resize_with(FILE_TABLE_BLOCKS, Block::new);
    Some(table)
}

/// Decode the file table of a loaded image.
///
/// Reads one FCB per entry of `file_names`, in order, and fails if any
/// decoded name differs from the expected one.
pub fn decode_file_table(blocks: &[Block], file_names: &[String]) -> Result<Vec<Fcb>, FcbError> {
    let first = FIRST_FILE_TABLE_BLOCK;
    let table_ids: Vec<BlockId> = (first..first + FILE_TABLE_BLOCKS as BlockId).collect();
    let table = concat_payloads(blocks, &table_ids);

    let mut reader = Reader::new(&table);
    let mut fcbs = Vec::with_capacity(file_names.len());
    for expected in file_names {
        let fcb = Fcb::decode(&mut reader, blocks)?;
        if fcb.file_name != *expected {
            return Err(FcbError::NameMismatch {
                expected: expected.to_owned(),
                found: fcb.file_name,
            });
        }
        fcbs.push(fcb);
    }
    Ok(fcbs)
}

fn decode_block_ids(reader: &mut Reader<'_>, block_count: usize) -> Result<Vec<BlockId>, FcbError> {
    reader
        .get_i32_list()?
        .into_iter()
        .map(|raw| {
            BlockId::try_from(raw)
                .ok()
                .filter(|&id| id != NO_BLOCK && (id as usize) < block_count)
                .ok_or(FcbError::BlockOutOfRange(raw))
        })
        .collect()
}

/// Errors that can occur while decoding file control blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FcbError {
    /// A field or the index tree failed to decode.
    Codec(CodecError),
    /// A decoded file name differs from the one the metadata lists.
    NameMismatch { expected: String, found: String },
    /// A block id is negative, zero, or past the end of the image.
    BlockOutOfRange(i32),
    /// A recorded index minimum degree is below 2.
    InvalidMinDegree(i32),
}

impl std::fmt::Display for FcbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::NameMismatch { expected, found } => {
                write!(f, "file table lists '{found}' where metadata expects '{expected}'")
            }
            Self::BlockOutOfRange(id) => write!(f, "block id {id} is out of range"),
            Self::InvalidMinDegree(t) => write!(f, "index minimum degree {t} is below 2"),
        }
    }
}

impl std::error::Error for FcbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::NameMismatch { .. } | Self::BlockOutOfRange(_) | Self::InvalidMinDegree(_) => {
                None
            }
        }
    }
}

impl From<CodecError> for FcbError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}
