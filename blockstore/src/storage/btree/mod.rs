//! B-tree index for the storage engine.
//!
//! Each stored file carries one B-tree mapping a record key (the record's
//! zero-based line number) to the data block that holds the record.
//!
//! # Usage
//!
//! ```
//! use blockstore::storage::btree::BTree;
//!
//! let mut tree = BTree::new(3);
//! for line in 0..10 {
//!     tree.insert(line, 100 + line / 5);
//! }
//!
//! assert_eq!(tree.find(7), Some(101));
//! assert_eq!(tree.find(42), None);
//!
//! let restored = BTree::from_bytes(&tree.to_bytes(), 3).unwrap();
//! assert_eq!(restored.find(7), Some(101));
//! ```

mod node;
mod tree;

pub use node::{Entry, Node, NodeId, NodeType};
pub use tree::{BTree, DEFAULT_MIN_DEGREE};
