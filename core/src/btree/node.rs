//! Arena-resident tree nodes

use std::fmt;

/// Handle of a node inside the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Key/value pair stored in a leaf
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<V> {
    pub key: i64,
    pub value: V,
}

impl<V> Entry<V> {
    pub fn new(key: i64, value: V) -> Self {
        Self { key, value }
    }
}

#[derive(Debug, Clone)]
pub struct LeafNode<V> {
    /// Sorted by key, no gaps.
    pub entries: Vec<Entry<V>>,
    pub parent: Option<NodeId>,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
}

impl<V> LeafNode<V> {
    pub fn new(entries: Vec<Entry<V>>) -> Self {
        Self {
            entries,
            parent: None,
            left: None,
            right: None,
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn first_key(&self) -> Option<i64> {
        self.entries.first().map(|e| e.key)
    }

    /// Position of `key`, or the slot it would be inserted at.
    pub fn locate(&self, key: i64) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&key, |e| e.key)
    }
}

#[derive(Debug, Clone)]
pub struct InternalNode {
    /// `keys.len() + 1 == children.len()` outside of a split in progress.
    pub keys: Vec<i64>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
}

impl InternalNode {
    pub fn new(keys: Vec<i64>, children: Vec<NodeId>) -> Self {
        Self {
            keys,
            children,
            parent: None,
            left: None,
            right: None,
        }
    }

    pub fn degree(&self) -> usize {
        self.children.len()
    }

    /// Index of the child whose subtree may hold `key`.
    pub fn child_slot(&self, key: i64) -> usize {
        self.keys.partition_point(|k| *k <= key)
    }

    pub fn index_of(&self, child: NodeId) -> Option<usize> {
        self.children.iter().position(|c| *c == child)
    }
}

#[derive(Debug, Clone)]
pub enum Node<V> {
    Leaf(LeafNode<V>),
    Internal(InternalNode),
}

impl<V> Node<V> {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn parent(&self) -> Option<NodeId> {
        match self {
            Node::Leaf(leaf) => leaf.parent,
            Node::Internal(internal) => internal.parent,
        }
    }

    pub fn set_parent(&mut self, parent: Option<NodeId>) {
        match self {
            Node::Leaf(leaf) => leaf.parent = parent,
            Node::Internal(internal) => internal.parent = parent,
        }
    }

    pub fn left(&self) -> Option<NodeId> {
        match self {
            Node::Leaf(leaf) => leaf.left,
            Node::Internal(internal) => internal.left,
        }
    }

    pub fn right(&self) -> Option<NodeId> {
        match self {
            Node::Leaf(leaf) => leaf.right,
            Node::Internal(internal) => internal.right,
        }
    }
}
