//! Deletion and rebalancing

use super::node::NodeId;
use super::tree::BPlusTree;

impl<V: Clone> BPlusTree<V> {
    /// Remove `key`, returning its value. An absent key is a no-op.
    pub fn delete(&mut self, key: i64) -> Option<V> {
        let leaf_id = self.find_leaf(key)?;
        let slot = self.leaf(leaf_id).locate(key).ok()?;

        let removed = self.leaf_mut(leaf_id).entries.remove(slot);
        self.len -= 1;

        let leaf = self.leaf(leaf_id);
        let is_sole_node = leaf.parent.is_none();
        let now_empty = leaf.entries.is_empty();
        let deficient = leaf.count() < self.min_entries();

        if is_sole_node {
            if now_empty {
                self.release(leaf_id);
                self.first_leaf = None;
            }
        } else if deficient {
            self.rebalance_leaf(leaf_id);
        }

        Some(removed.value)
    }

    /// Neighbours of `children[slot]` that share its parent.
    fn siblings_of(&self, parent_id: NodeId, slot: usize) -> (Option<NodeId>, Option<NodeId>) {
        let parent = self.internal(parent_id);
        let left = slot.checked_sub(1).map(|i| parent.children[i]);
        let right = parent.children.get(slot + 1).copied();
        (left, right)
    }

    fn parent_slot(&self, id: NodeId) -> (NodeId, usize) {
        let Some(parent_id) = self.node(id).parent() else {
            unreachable!("node {} has no parent", id);
        };
        match self.internal(parent_id).index_of(id) {
            Some(slot) => (parent_id, slot),
            None => unreachable!("node {} missing from its parent {}", id, parent_id),
        }
    }

    fn rebalance_leaf(&mut self, leaf_id: NodeId) {
        let (parent_id, slot) = self.parent_slot(leaf_id);
        let (left, right) = self.siblings_of(parent_id, slot);
        let min = self.min_entries();

        debug_assert_eq!(left, left.and(self.leaf(leaf_id).left));
        debug_assert_eq!(right, right.and(self.leaf(leaf_id).right));

        if let Some(left) = left {
            if self.leaf(left).count() > min {
                let Some(entry) = self.leaf_mut(left).entries.pop() else {
                    unreachable!("lendable leaf {} is empty", left);
                };
                let key = entry.key;
                self.leaf_mut(leaf_id).entries.insert(0, entry);
                self.internal_mut(parent_id).keys[slot - 1] = key;
                tracing::trace!(leaf = %leaf_id, from = %left, key, "borrowed from left leaf");
                return;
            }
        }

        if let Some(right) = right {
            if self.leaf(right).count() > min {
                let entry = self.leaf_mut(right).entries.remove(0);
                let key = entry.key;
                self.leaf_mut(leaf_id).entries.push(entry);
                let Some(new_min) = self.leaf(right).first_key() else {
                    unreachable!("lendable leaf {} drained", right);
                };
                self.internal_mut(parent_id).keys[slot] = new_min;
                tracing::trace!(leaf = %leaf_id, from = %right, key, "borrowed from right leaf");
                return;
            }
        }

        if let Some(left) = left {
            let entries = std::mem::take(&mut self.leaf_mut(leaf_id).entries);
            self.leaf_mut(left).entries.extend(entries);
            self.unlink_leaf(leaf_id);

            let parent = self.internal_mut(parent_id);
            parent.keys.remove(slot - 1);
            parent.children.remove(slot);
            self.release(leaf_id);
            tracing::trace!(leaf = %leaf_id, into = %left, "merged leaf into left sibling");
        } else if let Some(right) = right {
            let mut entries = std::mem::take(&mut self.leaf_mut(leaf_id).entries);
            entries.append(&mut self.leaf_mut(right).entries);
            self.leaf_mut(right).entries = entries;
            self.unlink_leaf(leaf_id);

            let parent = self.internal_mut(parent_id);
            parent.keys.remove(slot);
            parent.children.remove(slot);
            self.release(leaf_id);
            tracing::trace!(leaf = %leaf_id, into = %right, "merged leaf into right sibling");
        } else {
            unreachable!("leaf {} has no sibling under parent {}", leaf_id, parent_id);
        }

        self.handle_deficiency(parent_id);
    }

    /// Detach a leaf from the sibling chain.
    fn unlink_leaf(&mut self, leaf_id: NodeId) {
        let leaf = self.leaf(leaf_id);
        let (left, right) = (leaf.left, leaf.right);

        match left {
            Some(left) => self.leaf_mut(left).right = right,
            None => self.first_leaf = right,
        }
        if let Some(right) = right {
            self.leaf_mut(right).left = left;
        }
    }

    /// Restore occupancy of an internal node after it lost a child, walking
    /// upward while ancestors end up deficient.
    pub(crate) fn handle_deficiency(&mut self, start: NodeId) {
        let mut node_id = start;

        loop {
            let node = self.internal(node_id);
            let Some(_) = node.parent else {
                if node.degree() == 1 {
                    self.collapse_root(node_id);
                }
                return;
            };
            if node.degree() >= self.min_degree() {
                return;
            }

            let (parent_id, slot) = self.parent_slot(node_id);
            let (left, right) = self.siblings_of(parent_id, slot);
            let min = self.min_degree();

            if let Some(left) = left {
                if self.internal(left).degree() > min {
                    self.borrow_from_left(node_id, left, parent_id, slot);
                    return;
                }
            }
            if let Some(right) = right {
                if self.internal(right).degree() > min {
                    self.borrow_from_right(node_id, right, parent_id, slot);
                    return;
                }
            }

            match (left, right) {
                (Some(left), _) => self.merge_internal(left, node_id, parent_id, slot - 1),
                (None, Some(right)) => self.merge_internal(node_id, right, parent_id, slot),
                (None, None) => {
                    unreachable!("internal node {} has no sibling under {}", node_id, parent_id)
                }
            }

            node_id = parent_id;
        }
    }

    /// Rotate the left sibling's last child through the parent separator.
    fn borrow_from_left(&mut self, node_id: NodeId, left: NodeId, parent_id: NodeId, slot: usize) {
        let separator = self.internal(parent_id).keys[slot - 1];

        let sibling = self.internal_mut(left);
        let (Some(child), Some(key)) = (sibling.children.pop(), sibling.keys.pop()) else {
            unreachable!("lendable internal node {} is empty", left);
        };

        let node = self.internal_mut(node_id);
        node.children.insert(0, child);
        node.keys.insert(0, separator);

        self.internal_mut(parent_id).keys[slot - 1] = key;
        self.node_mut(child).set_parent(Some(node_id));
        tracing::trace!(node = %node_id, from = %left, "borrowed child from left internal node");
    }

    /// Rotate the right sibling's first child through the parent separator.
    fn borrow_from_right(&mut self, node_id: NodeId, right: NodeId, parent_id: NodeId, slot: usize) {
        let separator = self.internal(parent_id).keys[slot];

        let sibling = self.internal_mut(right);
        let child = sibling.children.remove(0);
        let key = sibling.keys.remove(0);

        let node = self.internal_mut(node_id);
        node.children.push(child);
        node.keys.push(separator);

        self.internal_mut(parent_id).keys[slot] = key;
        self.node_mut(child).set_parent(Some(node_id));
        tracing::trace!(node = %node_id, from = %right, "borrowed child from right internal node");
    }

    /// Fold `absorbed` (the child right after `survivor`) into `survivor`,
    /// pulling their separator `keys[separator_slot]` down from the parent.
    fn merge_internal(
        &mut self,
        survivor: NodeId,
        absorbed: NodeId,
        parent_id: NodeId,
        separator_slot: usize,
    ) {
        let parent = self.internal_mut(parent_id);
        let separator = parent.keys.remove(separator_slot);
        let removed = parent.children.remove(separator_slot + 1);
        debug_assert_eq!(removed, absorbed);

        let node = self.internal_mut(absorbed);
        let keys = std::mem::take(&mut node.keys);
        let children = std::mem::take(&mut node.children);
        let next = node.right;

        let target = self.internal_mut(survivor);
        target.keys.push(separator);
        target.keys.extend(keys);
        target.children.extend(children.iter().copied());
        target.right = next;

        if let Some(next) = next {
            self.internal_mut(next).left = Some(survivor);
        }
        for child in children {
            self.node_mut(child).set_parent(Some(survivor));
        }

        self.release(absorbed);
        tracing::trace!(survivor = %survivor, absorbed = %absorbed, "merged internal nodes");
    }

    /// Drop a root that is down to a single child.
    fn collapse_root(&mut self, root_id: NodeId) {
        let child = self.internal(root_id).children[0];
        self.release(root_id);

        let node = self.node_mut(child);
        node.set_parent(None);
        debug_assert!(node.left().is_none() && node.right().is_none());

        if node.is_leaf() {
            self.root = None;
            self.first_leaf = Some(child);
        } else {
            self.root = Some(child);
        }
        tracing::trace!(new_root = %child, "collapsed root");
    }
}
