//! Block types and image geometry constants.
//!
//! A segment image is a flat array of fixed-size blocks. The head of the
//! array describes the image itself:
//!
//! - Block 0: metadata (image name and stored file names)
//! - Blocks 1-2: allocation bitmap
//! - Blocks 3-66: file table (packed file control blocks)
//! - Remaining blocks: file data and serialized indexes
//!
//! The reserved head is 67 blocks, not just the metadata and bitmap blocks
//! with one control block per block after them: a control block carrying its
//! file's index outgrows a single block, so control blocks are packed into a
//! fixed file table and each index lives in blocks of its own.

/// Block size in bytes.
pub const BLOCK_SIZE: usize = 256;

/// Number of blocks in one segment image.
pub const BLOCK_COUNT: usize = 4096;

/// Number of blocks holding the metadata record.
pub const METADATA_BLOCKS: usize = 1;

/// Number of blocks holding the allocation bitmap.
pub const BITMAP_BLOCKS: usize = 2;

/// Number of blocks reserved for the file table.
pub const FILE_TABLE_BLOCKS: usize = 64;

/// First block of the allocation bitmap.
pub const FIRST_BITMAP_BLOCK: BlockId = METADATA_BLOCKS as BlockId;

/// First block of the file table.
pub const FIRST_FILE_TABLE_BLOCK: BlockId = (METADATA_BLOCKS + BITMAP_BLOCKS) as BlockId;

/// Number of blocks that are permanently occupied by the image's own structures.
pub const RESERVED_BLOCKS: usize = METADATA_BLOCKS + BITMAP_BLOCKS + FILE_TABLE_BLOCKS;

/// Size of a full segment image in bytes.
pub const IMAGE_SIZE: usize = BLOCK_COUNT * BLOCK_SIZE;

/// A block identifier (0-indexed position in the image).
///
/// Stored on disk as a little-endian 32-bit integer.
pub type BlockId = u32;

/// Sentinel successor meaning "no next block".
pub const NO_BLOCK: BlockId = 0;

/// A raw block buffer plus its in-memory successor link.
///
/// The successor is not part of the 256-byte payload; it is rebuilt from the
/// owning file's block list whenever an image is loaded.
#[derive(Clone)]
pub struct Block {
    data: Box<[u8; BLOCK_SIZE]>,
    next_block: BlockId,
}

impl Block {
    /// Create a new zeroed block with no successor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; BLOCK_SIZE]),
            next_block: NO_BLOCK,
        }
    }

    /// Create a block from a raw payload slice.
    ///
    /// Short slices are zero-padded; bytes beyond `BLOCK_SIZE` are ignored.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut block = Self::new();
        let len = bytes.len().min(BLOCK_SIZE);
        block.data[..len].copy_from_slice(&bytes[..len]);
        block
    }

    /// Get the raw block data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a big-endian i32 at the given offset.
    #[must_use]
    pub fn read_i32_be(&self, offset: usize) -> i32 {
        i32::from_be_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Write a big-endian i32 at the given offset.
    pub fn write_i32_be(&mut self, offset: usize, value: i32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Zero the payload and drop the successor link.
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.next_block = NO_BLOCK;
    }

    /// The in-memory successor of this block, `NO_BLOCK` if none.
    #[must_use]
    pub const fn next_block(&self) -> BlockId {
        self.next_block
    }

    /// Set the in-memory successor of this block.
    pub const fn set_next_block(&mut self, next: BlockId) {
        self.next_block = next;
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("first_16_bytes", &&self.data[..16])
            .field("next_block", &self.next_block)
            .finish_non_exhaustive()
    }
}

/// Number of blocks needed to hold `len` bytes.
#[must_use]
pub const fn blocks_for_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE)
}

/// Concatenate the payloads of the given blocks, in order.
#[must_use]
pub fn concat_payloads(blocks: &[Block], ids: &[BlockId]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ids.len() * BLOCK_SIZE);
    for &id in ids {
        bytes.extend_from_slice(blocks[id as usize].as_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry() {
        assert_eq!(IMAGE_SIZE, 1024 * 1024);
        assert_eq!(FIRST_BITMAP_BLOCK, 1);
        assert_eq!(FIRST_FILE_TABLE_BLOCK, 3);
        assert_eq!(RESERVED_BLOCKS, 67);
        // The file table runs to the end of the reserved head.
        assert_eq!(FIRST_FILE_TABLE_BLOCK as usize + FILE_TABLE_BLOCKS, RESERVED_BLOCKS);
        // Two bitmap blocks cover every block in the image.
        assert_eq!(BITMAP_BLOCKS * BLOCK_SIZE * 8, BLOCK_COUNT);
    }

    #[test]
    fn test_block_read_write() {
        let mut block = Block::new();

        block.write_i32_be(0, 0x0102_0304);
        assert_eq!(block.read_bytes(0, 4), &[1, 2, 3, 4]);
        assert_eq!(block.read_i32_be(0), 0x0102_0304);

        block.write_i32_be(100, -7);
        assert_eq!(block.read_i32_be(100), -7);

        block.write_bytes(200, b"hello");
        assert_eq!(block.read_bytes(200, 5), b"hello");
    }

    #[test]
    fn test_from_slice_pads_and_truncates() {
        let short = Block::from_slice(b"abc");
        assert_eq!(short.read_bytes(0, 4), b"abc\0");

        let long = Block::from_slice(&[7u8; BLOCK_SIZE + 10]);
        assert!(long.as_bytes().iter().all(|&b| b == 7));
    }

    #[test]
    fn test_clear_resets_successor() {
        let mut block = Block::from_slice(b"data");
        block.set_next_block(42);
        block.clear();
        assert_eq!(block.next_block(), NO_BLOCK);
        assert!(block.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_blocks_for_len() {
        assert_eq!(blocks_for_len(0), 0);
        assert_eq!(blocks_for_len(1), 1);
        assert_eq!(blocks_for_len(BLOCK_SIZE), 1);
        assert_eq!(blocks_for_len(BLOCK_SIZE + 1), 2);
    }
}
