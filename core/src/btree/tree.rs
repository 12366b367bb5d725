//! B+ tree keyed by row id
//!
//! Nodes live in an arena owned by the tree. Parent and sibling fields are
//! handles into that arena, so splits and merges rewrite plain indices instead
//! of aliasing references.

use super::node::{Entry, InternalNode, LeafNode, Node, NodeId};
use crate::error::{PineError, PineResult};

/// Smallest order that still allows a split to leave both halves non-empty.
pub const MIN_ORDER: usize = 3;

pub struct BPlusTree<V> {
    order: usize,
    nodes: Vec<Option<Node<V>>>,
    free_slots: Vec<NodeId>,
    pub(crate) root: Option<NodeId>,
    pub(crate) first_leaf: Option<NodeId>,
    pub(crate) len: usize,
}

impl<V: Clone> BPlusTree<V> {
    /// Create an empty tree of order `order` (maximum children per internal node).
    pub fn new(order: usize) -> PineResult<Self> {
        if order < MIN_ORDER {
            return Err(PineError::InvalidInput(format!(
                "B+ tree order must be at least {}, got {}",
                MIN_ORDER, order
            )));
        }

        Ok(Self {
            order,
            nodes: Vec::new(),
            free_slots: Vec::new(),
            root: None,
            first_leaf: None,
            len: 0,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.first_leaf.is_none()
    }

    /// Levels from the root down to the leaves (0 for an empty tree).
    pub fn height(&self) -> usize {
        let Some(mut current) = self.root.or(self.first_leaf) else {
            return 0;
        };

        let mut height = 1;
        while let Node::Internal(internal) = self.node(current) {
            current = internal.children[0];
            height += 1;
        }
        height
    }

    pub(crate) fn max_entries(&self) -> usize {
        self.order - 1
    }

    pub(crate) fn min_entries(&self) -> usize {
        self.order.div_ceil(2) - 1
    }

    pub(crate) fn max_degree(&self) -> usize {
        self.order
    }

    pub(crate) fn min_degree(&self) -> usize {
        self.order.div_ceil(2)
    }

    /// Split point shared by leaf and internal splits.
    fn midpoint(&self) -> usize {
        (self.order + 1).div_ceil(2) - 1
    }

    // ---- arena ----

    pub(crate) fn alloc(&mut self, node: Node<V>) -> NodeId {
        if let Some(id) = self.free_slots.pop() {
            self.nodes[id.0] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    pub(crate) fn release(&mut self, id: NodeId) {
        debug_assert!(self.nodes[id.0].is_some(), "double free of node {}", id);
        self.nodes[id.0] = None;
        self.free_slots.push(id);
    }

    /// Nodes currently allocated in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_slots.len()
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node<V> {
        match self.nodes.get(id.0) {
            Some(Some(node)) => node,
            _ => unreachable!("dangling node handle {}", id),
        }
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node<V> {
        match self.nodes.get_mut(id.0) {
            Some(Some(node)) => node,
            _ => unreachable!("dangling node handle {}", id),
        }
    }

    pub(crate) fn leaf(&self, id: NodeId) -> &LeafNode<V> {
        match self.node(id) {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => unreachable!("node {} is not a leaf", id),
        }
    }

    pub(crate) fn leaf_mut(&mut self, id: NodeId) -> &mut LeafNode<V> {
        match self.node_mut(id) {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => unreachable!("node {} is not a leaf", id),
        }
    }

    pub(crate) fn internal(&self, id: NodeId) -> &InternalNode {
        match self.node(id) {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => unreachable!("node {} is not an internal node", id),
        }
    }

    pub(crate) fn internal_mut(&mut self, id: NodeId) -> &mut InternalNode {
        match self.node_mut(id) {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => unreachable!("node {} is not an internal node", id),
        }
    }

    // ---- lookup ----

    /// Leaf whose key range covers `key`.
    pub(crate) fn find_leaf(&self, key: i64) -> Option<NodeId> {
        let mut current = match self.root {
            Some(root) => root,
            None => return self.first_leaf,
        };

        loop {
            match self.node(current) {
                Node::Internal(internal) => {
                    current = internal.children[internal.child_slot(key)];
                }
                Node::Leaf(_) => return Some(current),
            }
        }
    }

    /// Point lookup.
    pub fn search(&self, key: i64) -> Option<&V> {
        let leaf = self.leaf(self.find_leaf(key)?);
        leaf.locate(key).ok().map(|i| &leaf.entries[i].value)
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.search(key).is_some()
    }

    /// Values whose keys fall in `[lower, upper]`, ascending by key.
    pub fn search_range(&self, lower: i64, upper: i64) -> Vec<V> {
        self.range_entries(lower, upper)
            .into_iter()
            .map(|e| e.value.clone())
            .collect()
    }

    /// Entries whose keys fall in `[lower, upper]`, ascending by key.
    pub fn range_entries(&self, lower: i64, upper: i64) -> Vec<&Entry<V>> {
        let mut found = Vec::new();
        if lower > upper {
            return found;
        }

        let mut cursor = self.find_leaf(lower);
        while let Some(id) = cursor {
            let leaf = self.leaf(id);
            let start = leaf.locate(lower).unwrap_or_else(|slot| slot);
            for entry in &leaf.entries[start..] {
                if entry.key > upper {
                    return found;
                }
                found.push(entry);
            }
            cursor = leaf.right;
        }

        found
    }

    /// In-order walk of the leaf chain.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            tree: self,
            leaf: self.first_leaf,
            slot: 0,
        }
    }

    pub fn first_key(&self) -> Option<i64> {
        self.first_leaf.and_then(|id| self.leaf(id).first_key())
    }

    pub fn last_key(&self) -> Option<i64> {
        let mut current = self.first_leaf?;
        while let Some(next) = self.leaf(current).right {
            current = next;
        }
        self.leaf(current).entries.last().map(|e| e.key)
    }

    // ---- insert ----

    /// Insert a new key. Existing keys are rejected with `DuplicateKey` and
    /// leave the tree untouched.
    pub fn insert(&mut self, key: i64, value: V) -> PineResult<()> {
        let Some(leaf_id) = self.find_leaf(key) else {
            let leaf = self.alloc(Node::Leaf(LeafNode::new(vec![Entry::new(key, value)])));
            self.first_leaf = Some(leaf);
            self.len = 1;
            return Ok(());
        };

        let max_entries = self.max_entries();
        let leaf = self.leaf_mut(leaf_id);
        let slot = match leaf.locate(key) {
            Ok(_) => return Err(PineError::DuplicateKey(key)),
            Err(slot) => slot,
        };
        leaf.entries.insert(slot, Entry::new(key, value));
        let overfull = leaf.count() > max_entries;
        self.len += 1;

        if overfull {
            self.split_leaf(leaf_id);
        }

        Ok(())
    }

    fn split_leaf(&mut self, leaf_id: NodeId) {
        let midpoint = self.midpoint();

        let leaf = self.leaf_mut(leaf_id);
        let promoted = leaf.entries.split_off(midpoint);
        let old_right = leaf.right;
        let parent = leaf.parent;
        let separator = promoted[0].key;

        let mut sibling = LeafNode::new(promoted);
        sibling.parent = parent;
        sibling.left = Some(leaf_id);
        sibling.right = old_right;
        let sibling_id = self.alloc(Node::Leaf(sibling));

        self.leaf_mut(leaf_id).right = Some(sibling_id);
        if let Some(right) = old_right {
            self.leaf_mut(right).left = Some(sibling_id);
        }

        tracing::trace!(leaf = %leaf_id, sibling = %sibling_id, separator, "split leaf");
        self.insert_into_parent(leaf_id, separator, sibling_id);
    }

    /// Hook `right` into the tree directly after `left`, separated by `key`.
    fn insert_into_parent(&mut self, left: NodeId, key: i64, right: NodeId) {
        let Some(parent_id) = self.node(left).parent() else {
            let root = self.alloc(Node::Internal(InternalNode::new(vec![key], vec![left, right])));
            self.node_mut(left).set_parent(Some(root));
            self.node_mut(right).set_parent(Some(root));
            self.root = Some(root);
            return;
        };

        let max_degree = self.max_degree();
        let parent = self.internal_mut(parent_id);
        let slot = match parent.index_of(left) {
            Some(slot) => slot,
            None => unreachable!("node {} missing from its parent {}", left, parent_id),
        };
        parent.keys.insert(slot, key);
        parent.children.insert(slot + 1, right);
        let overfull = parent.degree() > max_degree;

        self.node_mut(right).set_parent(Some(parent_id));

        if overfull {
            self.split_internal(parent_id);
        }
    }

    fn split_internal(&mut self, node_id: NodeId) {
        let midpoint = self.midpoint();

        let node = self.internal_mut(node_id);
        let right_keys = node.keys.split_off(midpoint + 1);
        let promoted = match node.keys.pop() {
            Some(key) => key,
            None => unreachable!("overfull internal node {} has no keys", node_id),
        };
        let right_children = node.children.split_off(midpoint + 1);
        let old_right = node.right;
        let parent = node.parent;

        let mut sibling = InternalNode::new(right_keys, right_children.clone());
        sibling.parent = parent;
        sibling.left = Some(node_id);
        sibling.right = old_right;
        let sibling_id = self.alloc(Node::Internal(sibling));

        self.internal_mut(node_id).right = Some(sibling_id);
        if let Some(right) = old_right {
            self.internal_mut(right).left = Some(sibling_id);
        }
        for child in right_children {
            self.node_mut(child).set_parent(Some(sibling_id));
        }

        tracing::trace!(node = %node_id, sibling = %sibling_id, promoted, "split internal node");
        self.insert_into_parent(node_id, promoted, sibling_id);
    }
}

pub struct Iter<'a, V> {
    tree: &'a BPlusTree<V>,
    leaf: Option<NodeId>,
    slot: usize,
}

impl<'a, V: Clone> Iterator for Iter<'a, V> {
    type Item = &'a Entry<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        loop {
            let leaf = tree.leaf(self.leaf?);
            if let Some(entry) = leaf.entries.get(self.slot) {
                self.slot += 1;
                return Some(entry);
            }
            self.leaf = leaf.right;
            self.slot = 0;
        }
    }
}
