//! Block allocator using a bitmap to track free/occupied blocks.
//!
//! The bitmap is stored in the two blocks after the metadata block. Each bit
//! represents one block: 0 = free, 1 = occupied. Bit `i` lives in byte
//! `i / 8` of the concatenated bitmap blocks at bit position `i % 8`
//! (LSB first), so blocks below 2048 are tracked by the first bitmap block and
//! the rest by the second.

// Block counts are bounded by BLOCK_COUNT (4096), well within u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::{BITMAP_BLOCKS, BLOCK_SIZE, Block, BlockId};

/// Number of bits per byte.
const BITS_PER_BYTE: usize = 8;

/// A block allocation bitmap.
///
/// Allocation is lowest-index-first. The first `reserved_blocks` entries belong
/// to the image's own metadata and can never be freed.
#[derive(Debug, Clone)]
pub struct BlockAllocator {
    /// The bitmap data (in-memory representation).
    bitmap: Vec<u8>,
    /// Total number of blocks being tracked.
    total_blocks: usize,
    /// Number of leading blocks that are permanently occupied.
    reserved_blocks: usize,
    /// Number of free blocks.
    free_count: usize,
    /// No block below this index is free.
    next_search_hint: usize,
}

impl BlockAllocator {
    /// Create a new allocator for a fresh image.
    ///
    /// Marks the reserved blocks as occupied and everything else as free.
    #[must_use]
    pub fn new(total_blocks: usize, reserved_blocks: usize) -> Self {
        let reserved_blocks = reserved_blocks.min(total_blocks);
        let mut bitmap = vec![0u8; total_blocks.div_ceil(BITS_PER_BYTE)];

        for index in 0..reserved_blocks {
            set_bit(&mut bitmap, index);
        }

        Self {
            bitmap,
            total_blocks,
            reserved_blocks,
            free_count: total_blocks - reserved_blocks,
            next_search_hint: reserved_blocks,
        }
    }

    /// Load an allocator from its encoded bitmap bytes.
    ///
    /// Returns `None` if `bytes` is too short to cover `total_blocks` or if a
    /// reserved block reads free.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], total_blocks: usize, reserved_blocks: usize) -> Option<Self> {
        let bitmap_bytes = total_blocks.div_ceil(BITS_PER_BYTE);
        if bytes.len() < bitmap_bytes || reserved_blocks > total_blocks {
            return None;
        }
        let bitmap = bytes[..bitmap_bytes].to_vec();

        if (0..reserved_blocks).any(|index| !get_bit(&bitmap, index)) {
            return None;
        }

        let used_count = (0..total_blocks)
            .filter(|&index| get_bit(&bitmap, index))
            .count();
        let next_search_hint = (0..total_blocks)
            .find(|&index| !get_bit(&bitmap, index))
            .unwrap_or(total_blocks);

        Some(Self {
            bitmap,
            total_blocks,
            reserved_blocks,
            free_count: total_blocks - used_count,
            next_search_hint,
        })
    }

    /// Load an allocator from the bitmap blocks of an image.
    #[must_use]
    pub fn from_blocks(blocks: &[Block], total_blocks: usize, reserved_blocks: usize) -> Option<Self> {
        let mut bytes = Vec::with_capacity(blocks.len() * BLOCK_SIZE);
        for block in blocks {
            bytes.extend_from_slice(block.as_bytes());
        }
        Self::from_bytes(&bytes, total_blocks, reserved_blocks)
    }

    /// Serialize the bitmap into `BITMAP_BLOCKS` blocks.
    #[must_use]
    pub fn to_blocks(&self) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(BITMAP_BLOCKS);
        let mut offset = 0;
        for _ in 0..BITMAP_BLOCKS {
            let end = (offset + BLOCK_SIZE).min(self.bitmap.len());
            let chunk = if offset < end { &self.bitmap[offset..end] } else { &[][..] };
            blocks.push(Block::from_slice(chunk));
            offset += BLOCK_SIZE;
        }
        blocks
    }

    /// Allocate a single free block.
    ///
    /// Returns `None` if no free blocks are available.
    pub fn allocate(&mut self) -> Option<BlockId> {
        if self.free_count == 0 {
            return None;
        }

        for index in self.next_search_hint..self.total_blocks {
            if !get_bit(&self.bitmap, index) {
                set_bit(&mut self.bitmap, index);
                self.free_count -= 1;
                self.next_search_hint = index + 1;
                return Some(index as BlockId);
            }
        }

        None
    }

    /// Allocate `count` blocks, lowest indices first.
    ///
    /// Either every block is allocated or none is: returns `None` without
    /// touching the bitmap if fewer than `count` blocks are free.
    pub fn allocate_many(&mut self, count: usize) -> Option<Vec<BlockId>> {
        if count > self.free_count {
            return None;
        }

        let mut allocated = Vec::with_capacity(count);
        for _ in 0..count {
            allocated.push(self.allocate()?);
        }
        Some(allocated)
    }

    /// Free a previously allocated block.
    ///
    /// Reserved and out-of-range blocks are ignored. Ownership is not checked:
    /// callers must not free a block that a live file still references.
    pub fn free(&mut self, block_id: BlockId) {
        let index = block_id as usize;
        if index >= self.total_blocks || index < self.reserved_blocks {
            return;
        }

        if get_bit(&self.bitmap, index) {
            clear_bit(&mut self.bitmap, index);
            self.free_count += 1;

            if index < self.next_search_hint {
                self.next_search_hint = index;
            }
        }
    }

    /// Check if a block is allocated.
    #[must_use]
    pub fn is_allocated(&self, block_id: BlockId) -> bool {
        let index = block_id as usize;
        if index >= self.total_blocks {
            return false;
        }
        get_bit(&self.bitmap, index)
    }

    /// Get the number of free blocks.
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free_count
    }
}

/// Get a bit from the bitmap.
fn get_bit(bitmap: &[u8], index: usize) -> bool {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index >= bitmap.len() {
        return false;
    }

    (bitmap[byte_index] & (1 << bit_index)) != 0
}

/// Set a bit in the bitmap (mark as occupied).
fn set_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] |= 1 << bit_index;
    }
}

/// Clear a bit in the bitmap (mark as free).
fn clear_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] &= !(1 << bit_index);
    }
}
