//! Key-indexed block storage engine.
//!
//! A database is a single image file of 4096 blocks of 256 bytes each:
//!
//! - Block 0: metadata (image name and stored file names)
//! - Blocks 1-2: allocation bitmap
//! - Blocks 3-66: file table (one control block per stored file)
//! - Remaining blocks: record data and serialized B-tree indexes
//!
//! The whole image is held in memory and rewritten after every mutation.
//!
//! # Usage
//!
//! ```ignore
//! use blockstore::storage::ImageDirectory;
//!
//! let images = ImageDirectory::new(Path::new("./data"), 3);
//! let mut db = images.open("movies")?;
//!
//! db.put(Path::new("movies.csv"))?;
//! let contents = db.get("movies.csv")?;
//! let found = db.find("movies.csv", 42)?;
//! println!("{} blocks read", found.blocks_accessed);
//! ```

mod allocator;
mod block;
pub mod btree;
mod codec;
mod database;
mod directory;
mod fcb;
mod file;
mod metadata;
mod record;

pub use allocator::BlockAllocator;
pub use block::{
    BITMAP_BLOCKS, BLOCK_COUNT, BLOCK_SIZE, Block, BlockId, FILE_TABLE_BLOCKS, IMAGE_SIZE,
    METADATA_BLOCKS, RESERVED_BLOCKS,
};
pub use codec::{CodecError, Reader, Writer};
pub use database::{Capacity, Database, DatabaseError, ErrorKind, FindResult, PutSummary};
pub use directory::{IMAGE_SUFFIX, ImageDirectory, parse_segment_file_name};
pub use fcb::{Fcb, FcbError, TreeSection};
pub use file::{FileError, read_image, write_image};
pub use metadata::Metadata;
pub use record::{MAX_VALUE_SIZE, RECORD_SIZE, RECORDS_PER_BLOCK, Record};
