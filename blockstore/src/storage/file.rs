//! Image file I/O.
//!
//! An image is persisted as one flat file of exactly `IMAGE_SIZE` bytes: every
//! block of the segment, in order. Reads and writes always cover the whole
//! image.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::storage::block::{BLOCK_SIZE, Block, IMAGE_SIZE};

/// Read a whole image and split it into blocks.
///
/// Fails if the file is not exactly `IMAGE_SIZE` bytes.
pub fn read_image(path: &Path) -> Result<Vec<Block>, FileError> {
    let mut file = File::open(path)?;

    let actual = file.metadata()?.len();
    if actual != IMAGE_SIZE as u64 {
        return Err(FileError::WrongSize {
            expected: IMAGE_SIZE as u64,
            actual,
        });
    }

    let mut bytes = Vec::with_capacity(IMAGE_SIZE);
    file.read_to_end(&mut bytes)?;
    if bytes.len() != IMAGE_SIZE {
        return Err(FileError::WrongSize {
            expected: IMAGE_SIZE as u64,
            actual: bytes.len() as u64,
        });
    }

    Ok(bytes.chunks_exact(BLOCK_SIZE).map(Block::from_slice).collect())
}

/// Write every block to `path`, replacing any previous image, and sync.
pub fn write_image(path: &Path, blocks: &[Block]) -> Result<(), FileError> {
    let mut bytes = Vec::with_capacity(blocks.len() * BLOCK_SIZE);
    for block in blocks {
        bytes.extend_from_slice(block.as_bytes());
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Errors that can occur during image file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// The image file does not have the size of one segment.
    WrongSize { expected: u64, actual: u64 },
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::WrongSize { expected, actual } => {
                write!(f, "image is {actual} bytes (expected {expected})")
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::WrongSize { .. } => None,
        }
    }
}

impl From<std::io::Error> for FileError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
