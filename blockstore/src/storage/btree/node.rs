//! B-tree node types.
//!
//! Nodes live in an arena owned by the tree and refer to their children by
//! arena index. A node is a leaf iff it has no children.

/// A key/value pair stored in a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub key: i32,
    pub val: i32,
}

impl Entry {
    #[must_use]
    pub const fn new(key: i32, val: i32) -> Self {
        Self { key, val }
    }
}

/// Index of a node in the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub(crate) usize);

/// Node type discriminant as written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum NodeType {
    Internal = 0,
    Leaf = 1,
}

impl TryFrom<i32> for NodeType {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Internal),
            1 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// A B-tree node.
///
/// Holds N entries in ascending key order and, if internal, N+1 children.
/// `children[i]` holds keys below `entries[i].key`;
/// `children[i+1]` holds keys at or above it.
#[derive(Debug, Default)]
pub struct Node {
    pub entries: Vec<Entry>,
    pub children: Vec<NodeId>,
}

impl Node {
    /// Create an empty leaf.
    #[must_use]
    pub const fn leaf() -> Self {
        Self {
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::is_empty() is not const-stable
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    #[must_use]
    pub fn node_type(&self) -> NodeType {
        if self.is_leaf() {
            NodeType::Leaf
        } else {
            NodeType::Internal
        }
    }

    /// Position of the first entry whose key is `>= key`.
    #[must_use]
    pub fn lower_bound(&self, key: i32) -> usize {
        self.entries.partition_point(|e| e.key < key)
    }

    /// Position of the first entry whose key is `> key`.
    ///
    /// New entries go here, so equal keys keep insertion order.
    #[must_use]
    pub fn upper_bound(&self, key: i32) -> usize {
        self.entries.partition_point(|e| e.key <= key)
    }
}
