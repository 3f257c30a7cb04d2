//! Database image.
//!
//! A `Database` holds one segment image fully in memory: the allocation
//! bitmap, every block, and the control block of every stored file. Each
//! mutating operation rewrites the whole image to disk before returning.
//!
//! Stored files are split into newline-delimited records keyed by line number.
//! Records are packed five to a data block and indexed by a B-tree that maps
//! each key to the data block holding it.

// Block ids, record ordinals and line numbers are all bounded by the image
// size, far below i32::MAX.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::storage::allocator::BlockAllocator;
use crate::storage::block::{
    BITMAP_BLOCKS, BLOCK_COUNT, Block, BlockId, FIRST_BITMAP_BLOCK, FIRST_FILE_TABLE_BLOCK,
    NO_BLOCK, RESERVED_BLOCKS,
};
use crate::storage::btree::BTree;
use crate::storage::codec::CodecError;
use crate::storage::fcb::{
    self, FILE_TABLE_SIZE, Fcb, FcbError, index_blocks_for, index_stream, write_index_stream,
};
use crate::storage::file::{self, FileError};
use crate::storage::metadata::Metadata;
use crate::storage::record::{
    RECORDS_PER_BLOCK, Record, data_blocks_for, join_values, split_records,
};

/// Outcome of a successful `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutSummary {
    pub records: usize,
    pub data_blocks: usize,
    pub index_blocks: usize,
}

/// Outcome of a successful `find`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResult {
    /// The record's value with its padding stripped.
    pub value: Vec<u8>,
    /// Data blocks inspected, counting the one holding the record.
    pub blocks_accessed: usize,
}

/// A single-segment database image.
pub struct Database {
    name: String,
    path: PathBuf,
    min_degree: usize,
    allocator: BlockAllocator,
    blocks: Vec<Block>,
    files: Vec<Fcb>,
}

impl Database {
    /// Create a fresh image at `path` and persist it.
    ///
    /// Any existing file at `path` is overwritten.
    pub fn create(path: &Path, name: &str, min_degree: usize) -> Result<Self, DatabaseError> {
        let mut db = Self {
            name: name.to_owned(),
            path: path.to_path_buf(),
            min_degree,
            allocator: BlockAllocator::new(BLOCK_COUNT, RESERVED_BLOCKS),
            blocks: (0..BLOCK_COUNT).map(|_| Block::new()).collect(),
            files: Vec::new(),
        };
        db.flush()?;

        tracing::info!("Created image '{}' at {}", name, path.display());
        Ok(db)
    }

    /// Load an existing image from `path`.
    ///
    /// Decodes the bitmap, then the metadata, then one file control block
    /// per file the metadata lists, and checks that every block a file
    /// references is marked occupied and claimed by no other file.
    ///
    /// Stored indexes keep the minimum degree they were written with;
    /// `min_degree` applies only to files stored from now on.
    pub fn open(path: &Path, name: &str, min_degree: usize) -> Result<Self, DatabaseError> {
        let mut blocks = file::read_image(path)?;

        let first_bitmap = FIRST_BITMAP_BLOCK as usize;
        let allocator = BlockAllocator::from_blocks(
            &blocks[first_bitmap..first_bitmap + BITMAP_BLOCKS],
            BLOCK_COUNT,
            RESERVED_BLOCKS,
        )
        .ok_or_else(|| DatabaseError::Corrupt("reserved blocks are marked free".to_owned()))?;

        let metadata = Metadata::from_block(&blocks[0])?;
        if metadata.db_name != name {
            tracing::warn!(
                "Image at {} records name '{}', opening as '{}'",
                path.display(),
                metadata.db_name,
                name
            );
        }

        let files = fcb::decode_file_table(&blocks, &metadata.file_names)?;
        validate_files(&files, &allocator)?;
        for fcb in &files {
            fcb.link_data_blocks(&mut blocks);
        }

        tracing::info!(
            "Opened image '{}' ({} files, {} free blocks)",
            name,
            files.len(),
            allocator.free_count()
        );

        Ok(Self {
            name: name.to_owned(),
            path: path.to_path_buf(),
            min_degree,
            allocator,
            blocks,
            files,
        })
    }

    /// Open the image at `path`, creating it if it does not exist.
    pub fn open_or_create(path: &Path, name: &str, min_degree: usize) -> Result<Self, DatabaseError> {
        if path.exists() {
            Self::open(path, name, min_degree)
        } else {
            Self::create(path, name, min_degree)
        }
    }

    /// Store the local file at `local_path` under its path as given.
    pub fn put(&mut self, local_path: &Path) -> Result<PutSummary, DatabaseError> {
        let contents = std::fs::read(local_path).map_err(FileError::Io)?;
        self.put_bytes(&local_path.display().to_string(), &contents)
    }

    /// Store `contents` under `file_name`.
    ///
    /// Checks every capacity limit before touching the image. If writing the
    /// image fails, the in-memory image is restored, so a failed put leaves
    /// the image as it was.
    pub fn put_bytes(
        &mut self,
        file_name: &str,
        contents: &[u8],
    ) -> Result<PutSummary, DatabaseError> {
        if self.position_of(file_name).is_some() {
            return Err(DatabaseError::FileExists(file_name.to_owned()));
        }

        let records = split_records(contents);
        let data_count = data_blocks_for(records.len());
        let free = self.allocator.free_count();
        if data_count > free {
            return Err(DatabaseError::CapacityExhausted(Capacity::Blocks {
                needed: data_count,
                free,
            }));
        }

        // Values are record ordinals until the data blocks are allocated.
        let mut tree = BTree::new(self.min_degree);
        for (ordinal, record) in records.iter().enumerate() {
            tree.insert(record.key, (ordinal / RECORDS_PER_BLOCK) as i32);
        }
        let index_count = index_blocks_for(&tree);

        self.check_capacity(file_name, data_count, index_count)?;

        let mut undo = Undo::capture(self);
        let mut data_blocks = self
            .allocator
            .allocate_many(data_count + index_count)
            .ok_or(DatabaseError::CapacityExhausted(Capacity::Blocks {
                needed: data_count + index_count,
                free,
            }))?;
        undo.save_blocks(&self.blocks, &data_blocks);
        let index_blocks = data_blocks.split_off(data_count);
        tracing::debug!(
            "Allocated {} data and {} index blocks for '{}'",
            data_count,
            index_count,
            file_name
        );

        for (ordinal, record) in records.iter().enumerate() {
            let block = &mut self.blocks[data_blocks[ordinal / RECORDS_PER_BLOCK] as usize];
            record.write_to_block(block, ordinal % RECORDS_PER_BLOCK);
        }

        tree.map_values(|ordinal| data_blocks[ordinal as usize] as i32);
        write_index_stream(&mut self.blocks, &index_blocks, &index_stream(&tree));

        let fcb = Fcb {
            file_name: file_name.to_owned(),
            index_blocks,
            data_blocks,
            index_tree: tree,
        };
        fcb.link_data_blocks(&mut self.blocks);
        self.files.push(fcb);
        if let Err(e) = self.commit(undo) {
            self.files.pop();
            return Err(e);
        }

        tracing::info!(
            "Stored '{}' in '{}': {} records, {} data blocks, {} index blocks",
            file_name,
            self.name,
            records.len(),
            data_count,
            index_count
        );

        Ok(PutSummary {
            records: records.len(),
            data_blocks: data_count,
            index_blocks: index_count,
        })
    }

    /// Return the stored contents of `file_name`.
    ///
    /// Record values are joined with `\n`. Values longer than the record
    /// value size were truncated when stored.
    pub fn get(&self, file_name: &str) -> Result<Vec<u8>, DatabaseError> {
        let fcb = self.lookup(file_name)?;
        let record_count = fcb.index_tree.len();

        let mut values = Vec::with_capacity(record_count);
        let mut current = fcb.data_blocks.first().copied().unwrap_or(NO_BLOCK);
        while current != NO_BLOCK && values.len() < record_count {
            let block = &self.blocks[current as usize];
            let live = (record_count - values.len()).min(RECORDS_PER_BLOCK);
            for slot in 0..live {
                values.push(Record::read_from_block(block, slot).value);
            }
            current = block.next_block();
        }

        Ok(join_values(values.iter().map(Vec::as_slice)))
    }

    /// Look up the record with `key` in `file_name`.
    ///
    /// The index names the data block to inspect first. The scan continues
    /// through the file's remaining data blocks, wrapping around, until the
    /// key is found.
    pub fn find(&self, file_name: &str, key: i32) -> Result<FindResult, DatabaseError> {
        let fcb = self.lookup(file_name)?;
        let not_found = || DatabaseError::KeyNotFound {
            file: file_name.to_owned(),
            key,
        };

        let hint = fcb.index_tree.find(key).ok_or_else(not_found)?;
        let block_count = fcb.data_blocks.len();
        let start = fcb
            .data_blocks
            .iter()
            .position(|&id| id as i32 == hint)
            .unwrap_or(0);
        let record_count = fcb.index_tree.len();

        for step in 0..block_count {
            let position = (start + step) % block_count;
            let block = &self.blocks[fcb.data_blocks[position] as usize];
            let first_ordinal = position * RECORDS_PER_BLOCK;
            let live = record_count
                .saturating_sub(first_ordinal)
                .min(RECORDS_PER_BLOCK);

            for slot in 0..live {
                let record = Record::read_from_block(block, slot);
                if record.key == key {
                    tracing::debug!(
                        "Found key {} in '{}' after {} blocks",
                        key,
                        file_name,
                        step + 1
                    );
                    return Ok(FindResult {
                        value: record.value,
                        blocks_accessed: step + 1,
                    });
                }
            }
        }

        Err(not_found())
    }

    /// Delete `file_name`, releasing its index and data blocks.
    ///
    /// If writing the image fails, the file stays stored.
    pub fn remove(&mut self, file_name: &str) -> Result<(), DatabaseError> {
        let position = self
            .position_of(file_name)
            .ok_or_else(|| DatabaseError::FileNotFound(file_name.to_owned()))?;
        let owned: Vec<BlockId> = self.files[position].owned_blocks().collect();

        let mut undo = Undo::capture(self);
        undo.save_blocks(&self.blocks, &owned);
        let fcb = self.files.remove(position);
        for &id in &owned {
            self.allocator.free(id);
            self.blocks[id as usize].clear();
        }
        if let Err(e) = self.commit(undo) {
            self.files.insert(position, fcb);
            return Err(e);
        }

        tracing::info!("Removed '{}' from '{}'", file_name, self.name);
        Ok(())
    }

    /// Names of the stored files, in insertion order.
    #[must_use]
    pub fn files(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.file_name.as_str()).collect()
    }

    /// Control block of a stored file.
    #[must_use]
    pub fn file(&self, file_name: &str) -> Option<&Fcb> {
        self.files.iter().find(|f| f.file_name == file_name)
    }

    /// Number of unoccupied blocks.
    #[must_use]
    pub const fn free_blocks(&self) -> usize {
        self.allocator.free_count()
    }

    /// Name this image was opened under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-encode the image's own structures into their reserved blocks and
    /// write the whole image to disk.
    pub fn flush(&mut self) -> Result<(), DatabaseError> {
        let metadata = self.metadata();
        self.blocks[0] = metadata
            .to_block()
            .ok_or(DatabaseError::CapacityExhausted(Capacity::Metadata))?;

        let table = fcb::encode_file_table(&self.files)
            .ok_or(DatabaseError::CapacityExhausted(Capacity::FileTable))?;
        let first_table = FIRST_FILE_TABLE_BLOCK as usize;
        for (offset, block) in table.into_iter().enumerate() {
            self.blocks[first_table + offset] = block;
        }

        let first_bitmap = FIRST_BITMAP_BLOCK as usize;
        for (offset, block) in self.allocator.to_blocks().into_iter().enumerate() {
            self.blocks[first_bitmap + offset] = block;
        }

        file::write_image(&self.path, &self.blocks)?;
        Ok(())
    }

    /// Flush, putting back the blocks and allocator saved in `undo` if the
    /// write fails.
    fn commit(&mut self, undo: Undo) -> Result<(), DatabaseError> {
        if let Err(e) = self.flush() {
            tracing::warn!("Write of image '{}' failed, rolling back: {}", self.name, e);
            self.allocator = undo.allocator;
            for (id, block) in undo.blocks {
                self.blocks[id as usize] = block;
            }
            return Err(e);
        }
        Ok(())
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            db_name: self.name.clone(),
            file_names: self.files.iter().map(|f| f.file_name.clone()).collect(),
        }
    }

    fn position_of(&self, file_name: &str) -> Option<usize> {
        self.files.iter().position(|f| f.file_name == file_name)
    }

    fn lookup(&self, file_name: &str) -> Result<&Fcb, DatabaseError> {
        self.file(file_name)
            .ok_or_else(|| DatabaseError::FileNotFound(file_name.to_owned()))
    }

    /// Fail unless a new file of this shape fits every region of the image.
    fn check_capacity(
        &self,
        file_name: &str,
        data_count: usize,
        index_count: usize,
    ) -> Result<(), DatabaseError> {
        let needed = data_count + index_count;
        let free = self.allocator.free_count();
        if needed > free {
            return Err(DatabaseError::CapacityExhausted(Capacity::Blocks {
                needed,
                free,
            }));
        }

        let mut metadata = self.metadata();
        metadata.file_names.push(file_name.to_owned());
        if !metadata.fits_in_block() {
            return Err(DatabaseError::CapacityExhausted(Capacity::Metadata));
        }

        let table_len: usize = self.files.iter().map(Fcb::table_record_len).sum::<usize>()
            + fcb::table_record_len(file_name, index_count, data_count);
        if table_len > FILE_TABLE_SIZE {
            return Err(DatabaseError::CapacityExhausted(Capacity::FileTable));
        }

        Ok(())
    }
}

/// Image state saved before a mutation.
struct Undo {
    allocator: BlockAllocator,
    blocks: Vec<(BlockId, Block)>,
}

impl Undo {
    /// Save the allocator and the reserved blocks, which every flush rewrites.
    fn capture(db: &Database) -> Self {
        let mut undo = Self {
            allocator: db.allocator.clone(),
            blocks: Vec::new(),
        };
        let reserved: Vec<BlockId> = (0..RESERVED_BLOCKS as BlockId).collect();
        undo.save_blocks(&db.blocks, &reserved);
        undo
    }

    fn save_blocks(&mut self, blocks: &[Block], ids: &[BlockId]) {
        self.blocks
            .extend(ids.iter().map(|&id| (id, blocks[id as usize].clone())));
    }
}

/// Check that stored files reference only occupied, unshared, non-reserved
/// blocks, and that each file has exactly the data blocks its records need.
fn validate_files(files: &[Fcb], allocator: &BlockAllocator) -> Result<(), DatabaseError> {
    let mut claimed: HashSet<BlockId> = HashSet::new();
    for fcb in files {
        if fcb.data_blocks.len() != data_blocks_for(fcb.index_tree.len()) {
            return Err(DatabaseError::Corrupt(format!(
                "'{}' has {} data blocks for {} records",
                fcb.file_name,
                fcb.data_blocks.len(),
                fcb.index_tree.len()
            )));
        }
        for id in fcb.owned_blocks() {
            if (id as usize) < RESERVED_BLOCKS {
                return Err(DatabaseError::Corrupt(format!(
                    "'{}' references reserved block {id}",
                    fcb.file_name
                )));
            }
            if !allocator.is_allocated(id) {
                return Err(DatabaseError::Corrupt(format!(
                    "'{}' references free block {id}",
                    fcb.file_name
                )));
            }
            if !claimed.insert(id) {
                return Err(DatabaseError::Corrupt(format!(
                    "block {id} is claimed more than once"
                )));
            }
        }
    }
    Ok(())
}

/// Which limit of the image a `put` would exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Not enough free blocks for the file's data and index.
    Blocks { needed: usize, free: usize },
    /// The metadata block cannot list another file name.
    Metadata,
    /// The file table cannot hold another control block.
    FileTable,
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocks { needed, free } => {
                write!(f, "{needed} blocks needed, {free} free")
            }
            Self::Metadata => write!(f, "metadata block is full"),
            Self::FileTable => write!(f, "file table is full"),
        }
    }
}

/// Broad category of a [`DatabaseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CapacityExhausted,
    FileNotFound,
    KeyNotFound,
    CorruptImage,
    IoFailure,
    InvalidRequest,
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// The image has no room for the requested file.
    CapacityExhausted(Capacity),
    /// No stored file has this name.
    FileNotFound(String),
    /// A file with this name is already stored.
    FileExists(String),
    /// The file holds no record with this key.
    KeyNotFound { file: String, key: i32 },
    /// The image contents are inconsistent.
    Corrupt(String),
    /// A record in the image failed to decode.
    Codec(CodecError),
    /// Image or input file I/O failed.
    File(FileError),
    /// An image name is unusable as a file name.
    InvalidName(String),
}

impl DatabaseError {
    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CapacityExhausted(_) => ErrorKind::CapacityExhausted,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::Corrupt(_) | Self::Codec(_) | Self::File(FileError::WrongSize { .. }) => {
                ErrorKind::CorruptImage
            }
            Self::File(FileError::Io(_)) => ErrorKind::IoFailure,
            Self::FileExists(_) | Self::InvalidName(_) => ErrorKind::InvalidRequest,
        }
    }
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityExhausted(c) => write!(f, "capacity exhausted: {c}"),
            Self::FileNotFound(name) => write!(f, "file not found: {name}"),
            Self::FileExists(name) => write!(f, "file already stored: {name}"),
            Self::KeyNotFound { file, key } => write!(f, "key {key} not found in {file}"),
            Self::Corrupt(msg) => write!(f, "corrupt image: {msg}"),
            Self::Codec(e) => write!(f, "corrupt image: {e}"),
            Self::File(e) => write!(f, "file error: {e}"),
            Self::InvalidName(name) => write!(f, "invalid image name: '{name}'"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::File(e) => Some(e),
            Self::CapacityExhausted(_)
            | Self::FileNotFound(_)
            | Self::FileExists(_)
            | Self::KeyNotFound { .. }
            | Self::Corrupt(_)
            | Self::InvalidName(_) => None,
        }
    }
}

impl From<FileError> for DatabaseError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<CodecError> for DatabaseError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<FcbError> for DatabaseError {
    fn from(e: FcbError) -> Self {
        match e {
            FcbError::Codec(e) => Self::Codec(e),
            other @ (FcbError::NameMismatch { .. }
            | FcbError::BlockOutOfRange(_)
            | FcbError::InvalidMinDegree(_)) => Self::Corrupt(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block::{BLOCK_SIZE, IMAGE_SIZE};
    use crate::storage::btree::DEFAULT_MIN_DEGREE;
    use crate::testing::{image_bytes, write_local_file};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    const T: usize = DEFAULT_MIN_DEGREE;

    fn lines(count: usize) -> Vec<u8> {
        let lines: Vec<String> = (0..count).map(|i| format!("line {i}")).collect();
        lines.join("\n").into_bytes()
    }

    #[test]
    fn test_create_fresh_image() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("fresh.db0");

        let db = Database::create(&path, "fresh", T).expect("create");

        assert_eq!(db.free_blocks(), BLOCK_COUNT - RESERVED_BLOCKS);
        assert!(db.files().is_empty());
        assert_eq!(image_bytes(&path).len(), IMAGE_SIZE);
    }

    #[test]
    fn test_put_then_get_three_lines() {
        let dir = tempdir().expect("create temp dir");
        let mut db = Database::create(&dir.path().join("db.db0"), "db", T).expect("create");
        let local = write_local_file(dir.path(), "abc.txt", b"alpha\nbeta\ngamma");

        let summary = db.put(&local).expect("put");
        assert_eq!(
            summary,
            PutSummary {
                records: 3,
                data_blocks: 1,
                index_blocks: 1,
            }
        );

        let name = local.display().to_string();
        assert_eq!(db.files(), vec![name.as_str()]);
        assert_eq!(db.get(&name).expect("get"), b"alpha\nbeta\ngamma");
    }

    #[test]
    fn test_put_allocates_lowest_blocks_data_first() {
        let dir = tempdir().expect("create temp dir");
        let mut db = Database::create(&dir.path().join("db.db0"), "db", T).expect("create");

        db.put_bytes("twelve", &lines(12)).expect("put");

        let fcb = db.file("twelve").expect("stored");
        let first = RESERVED_BLOCKS as BlockId;
        assert_eq!(fcb.data_blocks, vec![first, first + 1, first + 2]);
        assert_eq!(fcb.index_blocks, vec![first + 3]);
        assert_eq!(db.free_blocks(), BLOCK_COUNT - RESERVED_BLOCKS - 4);
        // Index values name the data block holding each record.
        assert_eq!(fcb.index_tree.find(0), Some(first as i32));
        assert_eq!(fcb.index_tree.find(11), Some(first as i32 + 2));
    }

    #[test]
    fn test_find_with_correct_hint_reads_one_block() {
        let dir = tempdir().expect("create temp dir");
        let mut db = Database::create(&dir.path().join("db.db0"), "db", T).expect("create");
        db.put_bytes("movies.csv", &lines(40)).expect("put");

        for key in [0, 4, 5, 23, 39] {
            let found = db.find("movies.csv", key).expect("find");
            assert_eq!(found.value, format!("line {key}").into_bytes());
            assert_eq!(found.blocks_accessed, 1);
        }
    }

    #[test]
    fn test_find_missing_key_and_file() {
        let dir = tempdir().expect("create temp dir");
        let mut db = Database::create(&dir.path().join("db.db0"), "db", T).expect("create");
        db.put_bytes("small", b"a\nb").expect("put");

        let err = db.find("small", 2).expect_err("missing key");
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);
        assert_eq!(err.to_string(), "key 2 not found in small");

        assert_eq!(
            db.find("absent", 0).expect_err("missing file").kind(),
            ErrorKind::FileNotFound
        );
        assert_eq!(
            db.get("absent").expect_err("missing file").kind(),
            ErrorKind::FileNotFound
        );
    }

    #[test]
    fn test_long_lines_are_truncated() {
        let dir = tempdir().expect("create temp dir");
        let mut db = Database::create(&dir.path().join("db.db0"), "db", T).expect("create");
        let long = "x".repeat(100);
        db.put_bytes("long", format!("short\n{long}").as_bytes())
            .expect("put");

        let stored = db.get("long").expect("get");
        assert_eq!(stored, format!("short\n{}", "x".repeat(40)).into_bytes());
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let dir = tempdir().expect("create temp dir");
        let mut db = Database::create(&dir.path().join("db.db0"), "db", T).expect("create");
        db.put_bytes("dup", b"one").expect("put");
        let free = db.free_blocks();

        let err = db.put_bytes("dup", b"two").expect_err("duplicate");
        assert!(matches!(err, DatabaseError::FileExists(ref n) if n == "dup"));
        assert_eq!(db.free_blocks(), free);
        assert_eq!(db.get("dup").expect("get"), b"one");
    }

    #[test]
    fn test_reopen_preserves_files() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("persist.db0");
        {
            let mut db = Database::create(&path, "persist", T).expect("create");
            db.put_bytes("a.csv", &lines(7)).expect("put a");
            db.put_bytes("b.csv", &lines(300)).expect("put b");
        }

        let db = Database::open(&path, "persist", T).expect("open");
        assert_eq!(db.files(), vec!["a.csv", "b.csv"]);
        assert_eq!(db.get("a.csv").expect("get a"), lines(7));
        assert_eq!(db.get("b.csv").expect("get b"), lines(300));

        let found = db.find("b.csv", 217).expect("find");
        assert_eq!(found.value, b"line 217");
        assert_eq!(found.blocks_accessed, 1);
    }

    #[test]
    fn test_open_or_create() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("lazy.db0");
        assert!(!path.exists());

        {
            let mut db = Database::open_or_create(&path, "lazy", T).expect("create");
            db.put_bytes("f", b"x").expect("put");
        }
        assert!(path.exists());

        let db = Database::open_or_create(&path, "lazy", T).expect("open");
        assert_eq!(db.files(), vec!["f"]);
    }

    #[test]
    fn test_block_capacity_exhausted_leaves_image_untouched() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("full.db0");
        let mut db = Database::create(&path, "full", T).expect("create");
        db.put_bytes("small", b"kept").expect("put");

        let before = image_bytes(&path);
        let free = db.free_blocks();

        // More records than the free blocks can hold.
        let err = db
            .put_bytes("huge", &lines(free * RECORDS_PER_BLOCK + 1))
            .expect_err("too large");

        assert_eq!(err.kind(), ErrorKind::CapacityExhausted);
        assert!(matches!(
            err,
            DatabaseError::CapacityExhausted(Capacity::Blocks { .. })
        ));
        assert_eq!(db.free_blocks(), free);
        assert_eq!(db.files(), vec!["small"]);
        assert_eq!(image_bytes(&path), before);
    }

    #[test]
    fn test_data_fits_but_index_does_not() {
        let dir = tempdir().expect("create temp dir");
        let mut db = Database::create(&dir.path().join("db.db0"), "db", T).expect("create");
        let free = db.free_blocks();

        // Exactly enough data blocks, none left for the index.
        let err = db
            .put_bytes("edge", &lines(free * RECORDS_PER_BLOCK))
            .expect_err("no room for index");

        assert!(matches!(
            err,
            DatabaseError::CapacityExhausted(Capacity::Blocks { .. })
        ));
        assert_eq!(db.free_blocks(), free);
    }

    #[test]
    fn test_metadata_capacity_exhausted() {
        let dir = tempdir().expect("create temp dir");
        let mut db = Database::create(&dir.path().join("db.db0"), "db", T).expect("create");

        let first = "a".repeat(120);
        let second = "b".repeat(120);
        db.put_bytes(&first, b"1").expect("first fits");

        let err = db.put_bytes(&second, b"2").expect_err("second overflows");
        assert!(matches!(
            err,
            DatabaseError::CapacityExhausted(Capacity::Metadata)
        ));
        assert_eq!(db.files().len(), 1);
    }

    #[test]
    fn test_remove_releases_blocks() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("db.db0");
        let mut db = Database::create(&path, "db", T).expect("create");
        let free = db.free_blocks();

        db.put_bytes("gone", &lines(50)).expect("put");
        db.put_bytes("kept", &lines(3)).expect("put");
        let ids: Vec<BlockId> = db.file("gone").expect("stored").owned_blocks().collect();

        db.remove("gone").expect("remove");
        assert_eq!(db.files(), vec!["kept"]);
        assert_eq!(db.get("gone").expect_err("gone").kind(), ErrorKind::FileNotFound);
        assert_eq!(
            db.remove("gone").expect_err("twice").kind(),
            ErrorKind::FileNotFound
        );

        // Freed blocks are zeroed on disk and reused first.
        let bytes = image_bytes(&path);
        for &id in &ids {
            let start = id as usize * BLOCK_SIZE;
            assert!(bytes[start..start + BLOCK_SIZE].iter().all(|&b| b == 0));
        }
        db.put_bytes("again", &lines(2)).expect("put");
        let lowest = ids.iter().copied().min().expect("non-empty");
        assert_eq!(db.file("again").expect("stored").data_blocks, vec![lowest]);

        db.remove("again").expect("remove");
        db.remove("kept").expect("remove");
        assert_eq!(db.free_blocks(), free);

        let reopened = Database::open(&path, "db", T).expect("open");
        assert!(reopened.files().is_empty());
        assert_eq!(reopened.free_blocks(), free);
    }

    #[test]
    fn test_open_detects_name_mismatch() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("db.db0");
        {
            let mut db = Database::create(&path, "db", T).expect("create");
            db.put_bytes("real.txt", b"x").expect("put");
        }

        let forged = Metadata {
            db_name: "db".to_owned(),
            file_names: vec!["fake.txt".to_owned()],
        };
        let mut bytes = image_bytes(&path);
        bytes[..BLOCK_SIZE].copy_from_slice(forged.to_block().expect("fits").as_bytes());
        std::fs::write(&path, bytes).expect("write");

        let err = Database::open(&path, "db", T).err().expect("corrupt");
        assert_eq!(err.kind(), ErrorKind::CorruptImage);
    }

    #[test]
    fn test_open_detects_freed_reserved_block() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("db.db0");
        Database::create(&path, "db", T).expect("create");

        let mut bytes = image_bytes(&path);
        // Bit 0 of the bitmap covers block 0.
        bytes[BLOCK_SIZE] &= !1;
        std::fs::write(&path, bytes).expect("write");

        let err = Database::open(&path, "db", T).err().expect("corrupt");
        assert!(matches!(err, DatabaseError::Corrupt(_)));
    }

    #[test]
    fn test_open_detects_file_block_marked_free() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("db.db0");
        {
            let mut db = Database::create(&path, "db", T).expect("create");
            db.put_bytes("f", b"x").expect("put");
        }

        // Block 67 is the file's data block; clear its bit.
        let mut bytes = image_bytes(&path);
        bytes[BLOCK_SIZE + RESERVED_BLOCKS / 8] &= !(1 << (RESERVED_BLOCKS % 8));
        std::fs::write(&path, bytes).expect("write");

        let err = Database::open(&path, "db", T).err().expect("corrupt");
        assert!(matches!(err, DatabaseError::Corrupt(ref m) if m.contains("free block")));
    }

    #[test]
    fn test_open_rejects_wrong_size() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("db.db0");
        std::fs::write(&path, vec![0u8; 4096]).expect("write");

        let err = Database::open(&path, "db", T).err().expect("wrong size");
        assert_eq!(err.kind(), ErrorKind::CorruptImage);
    }

    #[test]
    fn test_open_under_different_name() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("renamed.db0");
        Database::create(&path, "before", T).expect("create");

        let db = Database::open(&path, "renamed", T).expect("open");
        assert_eq!(db.name(), "renamed");
        assert_eq!(db.path(), path.as_path());
    }

    #[test]
    fn test_random_lines_are_found_on_first_block() {
        let mut rng = StdRng::seed_from_u64(7);
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("rand.db0");
        let mut db = Database::create(&path, "rand", 2).expect("create");

        let count = 500;
        let values: Vec<String> = (0..count)
            .map(|_| {
                let len = rng.random_range(1..60);
                (0..len)
                    .map(|_| char::from(rng.random_range(b'a'..=b'z')))
                    .collect()
            })
            .collect();
        db.put_bytes("rand.txt", values.join("\n").as_bytes())
            .expect("put");

        let db = Database::open(&path, "rand", 2).expect("reopen");
        for _ in 0..100 {
            let key = rng.random_range(0..count);
            let found = db.find("rand.txt", key as i32).expect("find");
            let expected = &values[key].as_bytes()[..values[key].len().min(40)];
            assert_eq!(found.value, expected);
            assert_eq!(found.blocks_accessed, 1);
        }
    }

    #[test]
    fn test_reopen_with_other_min_degree() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("degree.db0");
        {
            let mut db = Database::create(&path, "degree", 3).expect("create");
            db.put_bytes("ten", &lines(10)).expect("put");
        }

        for t in [2, 4] {
            let mut db = Database::open(&path, "degree", t).expect("open");
            assert_eq!(db.file("ten").expect("stored").index_tree.min_degree(), 3);
            assert_eq!(db.get("ten").expect("get"), lines(10));
            assert_eq!(db.find("ten", 9).expect("find").value, b"line 9");

            let name = format!("t{t}");
            db.put_bytes(&name, &lines(10)).expect("put");
            assert_eq!(db.file(&name).expect("stored").index_tree.min_degree(), t);
        }

        let db = Database::open(&path, "degree", 3).expect("reopen");
        assert_eq!(db.files(), vec!["ten", "t2", "t4"]);
        assert_eq!(db.file("t2").expect("stored").index_tree.min_degree(), 2);
        assert_eq!(db.find("t4", 7).expect("find").blocks_accessed, 1);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("db.db0");
        let mut db = Database::create(&path, "db", T).expect("create");
        db.put_bytes("kept", b"x").expect("put");
        let free = db.free_blocks();

        // A directory in place of the image makes every write fail.
        std::fs::remove_file(&path).expect("remove image");
        std::fs::create_dir(&path).expect("block image path");

        let err = db.put_bytes("new", b"a\nb").expect_err("write fails");
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert_eq!(db.files(), vec!["kept"]);
        assert_eq!(db.free_blocks(), free);
        assert_eq!(
            db.get("new").expect_err("not stored").kind(),
            ErrorKind::FileNotFound
        );

        let err = db.remove("kept").expect_err("write fails");
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert_eq!(db.get("kept").expect("still stored"), b"x");
        assert_eq!(db.free_blocks(), free);

        std::fs::remove_dir(&path).expect("unblock image path");
        db.put_bytes("new", b"a\nb").expect("retry put");
        let first_free = RESERVED_BLOCKS as BlockId + 2;
        assert_eq!(db.file("new").expect("stored").data_blocks, vec![first_free]);
        db.remove("kept").expect("retry remove");

        let reopened = Database::open(&path, "db", T).expect("open");
        assert_eq!(reopened.files(), vec!["new"]);
        assert_eq!(reopened.get("new").expect("get"), b"a\nb");
        assert_eq!(reopened.free_blocks(), db.free_blocks());
    }

    #[test]
    fn test_put_into_full_image_leaves_image_untouched() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("full.db0");
        let mut db = Database::create(&path, "full", T).expect("create");

        let blocks_for_file = |data: usize| {
            let mut tree = BTree::new(T);
            for key in 0..(data * RECORDS_PER_BLOCK) as i32 {
                tree.insert(key, 0);
            }
            data + index_blocks_for(&tree)
        };

        // Largest bulk file that leaves at least ten blocks free.
        let target = db.free_blocks() - 10;
        let (mut low, mut high) = (1, target);
        while low < high {
            let mid = (low + high).div_ceil(2);
            if blocks_for_file(mid) <= target {
                low = mid;
            } else {
                high = mid - 1;
            }
        }
        db.put_bytes("bulk", &lines(low * RECORDS_PER_BLOCK))
            .expect("bulk");

        // Six records take three blocks, one record takes two.
        if db.free_blocks() % 2 == 1 {
            db.put_bytes("odd", &lines(6)).expect("odd");
        }
        let mut count = 0;
        while db.free_blocks() > 0 {
            db.put_bytes(&format!("one{count}"), b"x").expect("one");
            count += 1;
        }
        assert_eq!(db.free_blocks(), 0);

        let before = image_bytes(&path);
        let files = db.files().len();

        let err = db.put_bytes("last", b"y").expect_err("image is full");
        assert!(matches!(
            err,
            DatabaseError::CapacityExhausted(Capacity::Blocks { needed: 1, free: 0 })
        ));
        assert_eq!(db.files().len(), files);
        assert_eq!(image_bytes(&path), before);
    }
}
