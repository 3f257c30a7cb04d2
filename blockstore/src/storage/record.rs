//! Fixed-stride data records.
//!
//! A stored file is split at newline boundaries into records keyed by their
//! zero-based line number. Each record occupies `RECORD_SIZE` bytes of a data
//! block: a 4-byte big-endian key followed by a 40-byte value, zero-padded.
//! Five records fit in a 256-byte block; the last 36 bytes are unused.

// Line numbers are bounded by the number of records an image can hold.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use crate::storage::block::{BLOCK_SIZE, Block};

/// Maximum stored value length; longer lines are truncated.
pub const MAX_VALUE_SIZE: usize = 40;

/// Size of the big-endian record key.
pub const RECORD_KEY_SIZE: usize = 4;

/// Bytes per record slot.
pub const RECORD_SIZE: usize = RECORD_KEY_SIZE + MAX_VALUE_SIZE;

/// Record slots per data block.
pub const RECORDS_PER_BLOCK: usize = BLOCK_SIZE / RECORD_SIZE;

/// One line of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: i32,
    pub value: Vec<u8>,
}

impl Record {
    /// Create a record, truncating the value to `MAX_VALUE_SIZE` bytes.
    #[must_use]
    pub fn new(key: i32, value: &[u8]) -> Self {
        let len = value.len().min(MAX_VALUE_SIZE);
        Self {
            key,
            value: value[..len].to_vec(),
        }
    }

    /// Write this record into `slot` of `block`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= RECORDS_PER_BLOCK`.
    pub fn write_to_block(&self, block: &mut Block, slot: usize) {
        assert!(slot < RECORDS_PER_BLOCK, "record slot {slot} out of range");
        let offset = slot * RECORD_SIZE;

        let mut padded = [0u8; MAX_VALUE_SIZE];
        padded[..self.value.len()].copy_from_slice(&self.value);

        block.write_i32_be(offset, self.key);
        block.write_bytes(offset + RECORD_KEY_SIZE, &padded);
    }

    /// Read the record in `slot` of `block`.
    ///
    /// Trailing zero padding is stripped from the value.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= RECORDS_PER_BLOCK`.
    #[must_use]
    pub fn read_from_block(block: &Block, slot: usize) -> Self {
        assert!(slot < RECORDS_PER_BLOCK, "record slot {slot} out of range");
        let offset = slot * RECORD_SIZE;

        let key = block.read_i32_be(offset);
        let raw = block.read_bytes(offset + RECORD_KEY_SIZE, MAX_VALUE_SIZE);
        let len = raw.iter().rposition(|&b| b != 0).map_or(0, |last| last + 1);

        Self {
            key,
            value: raw[..len].to_vec(),
        }
    }
}

/// Split file contents into records, one per line.
///
/// Splits on every `\n`, so a trailing newline yields a final empty record and
/// joining the values with `\n` reproduces the input (modulo truncation).
#[must_use]
pub fn split_records(contents: &[u8]) -> Vec<Record> {
    contents
        .split(|&b| b == b'\n')
        .enumerate()
        .map(|(line, value)| Record::new(line as i32, value))
        .collect()
}

/// Number of data blocks needed for `record_count` records.
#[must_use]
pub const fn data_blocks_for(record_count: usize) -> usize {
    record_count.div_ceil(RECORDS_PER_BLOCK)
}

/// Join record values with `\n`.
#[must_use]
pub fn join_values<'a>(values: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        out.extend_from_slice(value);
    }
    out
}
