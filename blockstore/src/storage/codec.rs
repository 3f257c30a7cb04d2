//! Little-endian, length-prefixed encoding shared by the on-disk records.
//!
//! Every integer is a little-endian `i32`. Variable-length fields (strings,
//! block lists, nested byte strings) are preceded by their `i32` length. The
//! reader never reads past its buffer: any length that would overrun the
//! remaining bytes is an error, not a truncation.

// Lengths written here are bounded by the image size (1 MiB).
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

/// Size of an encoded `i32`.
pub const I32_SIZE: usize = 4;

/// Append-only encoder.
#[derive(Debug, Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Write a little-endian `i32`.
    pub fn put_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length as a little-endian `i32`.
    pub fn put_len(&mut self, len: usize) {
        self.put_i32(len as i32);
    }

    /// Write raw bytes with no prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Write a length-prefixed byte string.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_len(bytes.len());
        self.put_raw(bytes);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    /// Write a count-prefixed list of `i32`s.
    pub fn put_i32_list(&mut self, values: impl ExactSizeIterator<Item = i32>) {
        self.put_len(values.len());
        for value in values {
            self.put_i32(value);
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been written.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::is_empty() is not const-stable
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume the writer and return the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Bounds-checked decoder over a byte slice.
#[derive(Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader positioned at the start of `bytes`.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Number of bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Read a little-endian `i32`.
    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        let raw = self.take(I32_SIZE)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Read a length prefix.
    ///
    /// Rejects negative lengths. The returned length is not yet checked
    /// against the remaining bytes; `take` does that.
    pub fn get_len(&mut self) -> Result<usize, CodecError> {
        let len = self.get_i32()?;
        usize::try_from(len).map_err(|_| CodecError::NegativeLength(len))
    }

    /// Read `len` raw bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Read a length-prefixed byte string.
    pub fn get_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.get_len()?;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Read a count-prefixed list of `i32`s.
    pub fn get_i32_list(&mut self) -> Result<Vec<i32>, CodecError> {
        let count = self.get_len()?;
        // Check the whole list fits before allocating for it.
        let byte_len = count.checked_mul(I32_SIZE).ok_or(CodecError::Truncated {
            needed: usize::MAX,
            remaining: self.remaining(),
        })?;
        if byte_len > self.remaining() {
            return Err(CodecError::Truncated {
                needed: byte_len,
                remaining: self.remaining(),
            });
        }
        (0..count).map(|_| self.get_i32()).collect()
    }

    /// Fail unless every byte has been consumed.
    pub const fn finish(&self) -> Result<(), CodecError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes(self.remaining()))
        }
    }
}

/// Errors that can occur while decoding on-disk records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A field would read past the end of the buffer.
    Truncated { needed: usize, remaining: usize },
    /// A length prefix was negative.
    NegativeLength(i32),
    /// A B-tree node type was neither leaf (1) nor internal (0).
    InvalidNodeType(i32),
    /// A B-tree node holds more keys than its minimum degree allows.
    NodeOverflow { keys: usize, max: usize },
    /// A non-root B-tree node holds fewer keys than its minimum degree requires.
    NodeUnderflow { keys: usize, min: usize },
    /// B-tree keys are out of order within a node or fall outside the
    /// parent's separator keys.
    KeysOutOfOrder,
    /// B-tree leaves sit at different depths.
    UnevenLeaves,
    /// A nested record left unread bytes behind.
    TrailingBytes(usize),
    /// B-tree nesting exceeds any height a real image can produce.
    TooDeep,
    /// A string field is not valid UTF-8.
    InvalidUtf8,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, remaining } => {
                write!(f, "field needs {needed} bytes but only {remaining} remain")
            }
            Self::NegativeLength(len) => write!(f, "negative length prefix: {len}"),
            Self::InvalidNodeType(v) => write!(f, "invalid node type: {v}"),
            Self::NodeOverflow { keys, max } => {
                write!(f, "node holds {keys} keys (max {max})")
            }
            Self::NodeUnderflow { keys, min } => {
                write!(f, "non-root node holds {keys} keys (min {min})")
            }
            Self::KeysOutOfOrder => write!(f, "index keys are out of order"),
            Self::UnevenLeaves => write!(f, "leaves are not all at the same depth"),
            Self::TrailingBytes(n) => write!(f, "{n} unread trailing bytes"),
            Self::TooDeep => write!(f, "index nesting too deep"),
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_little_endian_and_length_prefixed() {
        let mut writer = Writer::new();
        writer.put_str("ab");
        writer.put_i32(-2);

        assert_eq!(
            writer.into_bytes(),
            vec![2, 0, 0, 0, b'a', b'b', 0xFE, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_reader_reads_back_fields() {
        let mut writer = Writer::new();
        writer.put_str("movies.csv");
        writer.put_i32_list([7, 8, 9].into_iter());
        writer.put_bytes(b"\x01\x02");
        let bytes = writer.into_bytes();

        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.get_string().expect("name"), "movies.csv");
        assert_eq!(reader.get_i32_list().expect("list"), vec![7, 8, 9]);
        assert_eq!(reader.get_bytes().expect("bytes"), b"\x01\x02");
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_overrunning_length_is_rejected() {
        // Claims 100 bytes, provides 3.
        let bytes = [100, 0, 0, 0, b'a', b'b', b'c'];
        let mut reader = Reader::new(&bytes);

        assert_eq!(
            reader.get_bytes(),
            Err(CodecError::Truncated {
                needed: 100,
                remaining: 3
            })
        );
    }

    #[test]
    fn test_negative_length_is_rejected() {
        let bytes = (-1i32).to_le_bytes();
        let mut reader = Reader::new(&bytes);

        assert_eq!(reader.get_string(), Err(CodecError::NegativeLength(-1)));
    }

    #[test]
    fn test_oversized_list_count_is_rejected_before_allocating() {
        let bytes = i32::MAX.to_le_bytes();
        let mut reader = Reader::new(&bytes);

        assert!(matches!(
            reader.get_i32_list(),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_short_integer_is_rejected() {
        let mut reader = Reader::new(&[1, 2]);
        assert!(matches!(reader.get_i32(), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_finish_reports_trailing_bytes() {
        let bytes = [0u8; 6];
        let mut reader = Reader::new(&bytes);
        reader.get_i32().expect("read");
        assert_eq!(reader.finish(), Err(CodecError::TrailingBytes(2)));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let bytes = [1, 0, 0, 0, 0xFF];
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.get_string(), Err(CodecError::InvalidUtf8));
    }
}
