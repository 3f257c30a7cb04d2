//! In-memory B-tree index over integer keys.
//!
//! A classic CLRS-style B-tree of minimum degree `t`:
//! - every node holds at most `2t-1` keys
//! - every non-root node holds at least `t-1` keys
//! - internal nodes hold one more child than keys
//! - all leaves sit at the same depth
//!
//! Insertion is top-down: a full child is split before descending into it, so
//! a split never has to propagate upwards. The tree only grows in height when
//! the root itself is full. There is no deletion.
//!
//! Nodes are stored in an arena and addressed by [`NodeId`], so a split is a
//! pair of `split_off` calls rather than pointer surgery.

use crate::storage::btree::node::{Entry, Node, NodeId, NodeType};
use crate::storage::codec::{CodecError, Reader, Writer};

/// Minimum degree used for file indexes unless configured otherwise.
pub const DEFAULT_MIN_DEGREE: usize = 3;

/// Deepest nesting accepted when decoding. Far above any height a full image
/// can reach, low enough to keep recursion bounded on hostile input.
const MAX_DECODE_DEPTH: usize = 32;

/// A B-tree mapping `i32` keys to `i32` values.
#[derive(Debug)]
pub struct BTree {
    nodes: Vec<Node>,
    root: NodeId,
    min_degree: usize,
    len: usize,
}

impl BTree {
    /// Create an empty tree (a single empty leaf).
    ///
    /// # Panics
    ///
    /// Panics if `min_degree < 2`.
    #[must_use]
    pub fn new(min_degree: usize) -> Self {
        assert!(min_degree >= 2, "B-tree minimum degree must be at least 2");
        Self {
            nodes: vec![Node::leaf()],
            root: NodeId(0),
            min_degree,
            len: 0,
        }
    }

    #[must_use]
    pub const fn min_degree(&self) -> usize {
        self.min_degree
    }

    /// Maximum number of keys a node may hold (`2t-1`).
    #[must_use]
    pub const fn max_keys(&self) -> usize {
        2 * self.min_degree - 1
    }

    /// Number of entries in the tree.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> &Node {
        self.node(self.root)
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Number of levels; 1 for a tree whose root is a leaf.
    #[must_use]
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut current = self.root();
        while let Some(&child) = current.children.first() {
            height += 1;
            current = self.node(child);
        }
        height
    }

    /// Insert an entry.
    ///
    /// Duplicate keys are accepted and placed after the existing equal keys.
    pub fn insert(&mut self, key: i32, val: i32) {
        if self.root().entries.len() == self.max_keys() {
            let old_root = self.root;
            let new_root = self.push_node(Node {
                entries: Vec::new(),
                children: vec![old_root],
            });
            self.root = new_root;
            self.split_child(new_root, 0);
        }

        self.insert_non_full(self.root, Entry::new(key, val));
        self.len += 1;
    }

    /// Find the value stored for `key`.
    ///
    /// Internal nodes are checked too, not only leaves.
    #[must_use]
    pub fn find(&self, key: i32) -> Option<i32> {
        let mut current = self.root();
        loop {
            let i = current.lower_bound(key);
            if let Some(entry) = current.entries.get(i).filter(|e| e.key == key) {
                return Some(entry.val);
            }
            if current.is_leaf() {
                return None;
            }
            current = self.node(current.children[i]);
        }
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: i32) -> bool {
        self.find(key).is_some()
    }

    /// All entries in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        let mut out = Vec::with_capacity(self.len);
        self.collect_in_order(self.root, &mut out);
        out
    }

    /// Rewrite every value in place.
    pub fn map_values(&mut self, mut f: impl FnMut(i32) -> i32) {
        // Every arena slot is reachable: nodes are only ever added.
        for node in &mut self.nodes {
            for entry in &mut node.entries {
                entry.val = f(entry.val);
            }
        }
    }

    /// Serialize the tree, root first.
    ///
    /// Node layout: `i32 node_type` (1 = leaf, 0 = internal), `i32 key_count`,
    /// `key_count` pairs of `i32 key, i32 val`, then for internal nodes
    /// `key_count + 1` children, each as `i32 byte_len` followed by the child.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.encode_node(self.root, &mut writer);
        writer.into_bytes()
    }

    /// Deserialize a tree written by [`BTree::to_bytes`].
    ///
    /// Validates the node capacity bounds for `min_degree`, key order within
    /// each node and against the parent's separator keys, and that all leaves
    /// are at the same depth.
    ///
    /// # Panics
    ///
    /// Panics if `min_degree < 2`.
    pub fn from_bytes(bytes: &[u8], min_degree: usize) -> Result<Self, CodecError> {
        let mut tree = Self::new(min_degree);
        tree.nodes.clear();

        let mut reader = Reader::new(bytes);
        let mut leaf_depth = None;
        tree.root = tree.decode_node(&mut reader, 0, (i32::MIN, i32::MAX), &mut leaf_depth)?;
        reader.finish()?;

        tree.len = tree.nodes.iter().map(|n| n.entries.len()).sum();
        Ok(tree)
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Insert into the subtree at `id`, which must not be full.
    fn insert_non_full(&mut self, mut id: NodeId, entry: Entry) {
        loop {
            let node = &self.nodes[id.0];
            let mut i = node.upper_bound(entry.key);

            if node.is_leaf() {
                self.nodes[id.0].entries.insert(i, entry);
                return;
            }

            let child = node.children[i];
            if self.nodes[child.0].entries.len() == self.max_keys() {
                self.split_child(id, i);
                if entry.key >= self.nodes[id.0].entries[i].key {
                    i += 1;
                }
            }
            id = self.nodes[id.0].children[i];
        }
    }

    /// Split the full child at `parent.children[index]`.
    ///
    /// The median (index `t-1`) moves up into the parent; keys after it and,
    /// for internal nodes, the last `t` children move to a new right sibling.
    fn split_child(&mut self, parent: NodeId, index: usize) {
        let t = self.min_degree;
        let left = self.nodes[parent.0].children[index];

        let left_node = &mut self.nodes[left.0];
        debug_assert_eq!(left_node.entries.len(), 2 * t - 1);
        let right_entries = left_node.entries.split_off(t);
        let right_children = if left_node.is_leaf() {
            Vec::new()
        } else {
            left_node.children.split_off(t)
        };
        let Some(median) = left_node.entries.pop() else {
            return;
        };

        let right = self.push_node(Node {
            entries: right_entries,
            children: right_children,
        });

        let parent_node = &mut self.nodes[parent.0];
        parent_node.entries.insert(index, median);
        parent_node.children.insert(index + 1, right);
    }

    fn collect_in_order(&self, id: NodeId, out: &mut Vec<Entry>) {
        let node = self.node(id);
        for (i, entry) in node.entries.iter().enumerate() {
            if let Some(&child) = node.children.get(i) {
                self.collect_in_order(child, out);
            }
            out.push(*entry);
        }
        if let Some(&last) = node.children.get(node.entries.len()) {
            self.collect_in_order(last, out);
        }
    }

    fn encode_node(&self, id: NodeId, writer: &mut Writer) {
        let node = self.node(id);
        writer.put_i32(node.node_type() as i32);
        writer.put_len(node.entries.len());
        for entry in &node.entries {
            writer.put_i32(entry.key);
            writer.put_i32(entry.val);
        }
        for &child in &node.children {
            let mut child_writer = Writer::new();
            self.encode_node(child, &mut child_writer);
            writer.put_bytes(&child_writer.into_bytes());
        }
    }

    /// Decode the subtree in `reader`. Every key must lie within the inclusive
    /// `bounds` set by the parent's separators.
    fn decode_node(
        &mut self,
        reader: &mut Reader<'_>,
        depth: usize,
        bounds: (i32, i32),
        leaf_depth: &mut Option<usize>,
    ) -> Result<NodeId, CodecError> {
        if depth >= MAX_DECODE_DEPTH {
            return Err(CodecError::TooDeep);
        }

        let raw_type = reader.get_i32()?;
        let node_type = NodeType::try_from(raw_type).map_err(CodecError::InvalidNodeType)?;

        let key_count = reader.get_len()?;
        if key_count > self.max_keys() {
            return Err(CodecError::NodeOverflow {
                keys: key_count,
                max: self.max_keys(),
            });
        }
        let min_keys = match (depth, node_type) {
            (0, NodeType::Leaf) => 0,
            (0, NodeType::Internal) => 1,
            _ => self.min_degree - 1,
        };
        if key_count < min_keys {
            return Err(CodecError::NodeUnderflow {
                keys: key_count,
                min: min_keys,
            });
        }

        let mut entries = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let key = reader.get_i32()?;
            let val = reader.get_i32()?;
            entries.push(Entry::new(key, val));
        }
        let (lower, upper) = bounds;
        if entries.windows(2).any(|pair| pair[0].key > pair[1].key)
            || entries.iter().any(|e| e.key < lower || e.key > upper)
        {
            return Err(CodecError::KeysOutOfOrder);
        }

        let mut children = Vec::new();
        match node_type {
            NodeType::Leaf => match *leaf_depth {
                Some(expected) if expected != depth => return Err(CodecError::UnevenLeaves),
                Some(_) => {}
                None => *leaf_depth = Some(depth),
            },
            NodeType::Internal => {
                children.reserve(key_count + 1);
                for i in 0..=key_count {
                    let child_bounds = (
                        i.checked_sub(1).map_or(lower, |prev| entries[prev].key),
                        entries.get(i).map_or(upper, |e| e.key),
                    );
                    let mut child_reader = Reader::new(reader.get_bytes()?);
                    let child =
                        self.decode_node(&mut child_reader, depth + 1, child_bounds, leaf_depth)?;
                    child_reader.finish()?;
                    children.push(child);
                }
            }
        }

        Ok(self.push_node(Node { entries, children }))
    }
}

impl Default for BTree {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DEGREE)
    }
}
