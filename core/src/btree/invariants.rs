//! Structural self-check

use super::node::{Node, NodeId};
use super::tree::BPlusTree;
use crate::error::{PineError, PineResult};

struct Walk {
    leaves: Vec<NodeId>,
    levels: Vec<Vec<NodeId>>,
    leaf_depth: Option<usize>,
    entries: usize,
}

impl<V: Clone> BPlusTree<V> {
    /// Verify ordering, occupancy, parent links, separator bounds and the
    /// sibling chains. Returns the first violation found.
    pub fn check_invariants(&self) -> PineResult<()> {
        let Some(top) = self.root.or(self.first_leaf) else {
            if self.len != 0 {
                return Err(violation(format!("empty tree reports {} entries", self.len)));
            }
            return Ok(());
        };

        if self.node(top).parent().is_some() {
            return Err(violation(format!("top node {} has a parent", top)));
        }
        if self.root.is_none() && !self.node(top).is_leaf() {
            return Err(violation("internal node reachable without a root"));
        }

        let mut walk = Walk {
            leaves: Vec::new(),
            levels: Vec::new(),
            leaf_depth: None,
            entries: 0,
        };
        self.check_node(top, None, None, 0, &mut walk)?;

        if walk.entries != self.len {
            return Err(violation(format!(
                "counted {} entries, tree reports {}",
                walk.entries, self.len
            )));
        }

        // The leaf chain must visit exactly the leaves of the in-order walk.
        let mut chain = Vec::new();
        let mut previous = None;
        let mut cursor = self.first_leaf;
        while let Some(id) = cursor {
            let leaf = self.leaf(id);
            if leaf.left != previous {
                return Err(violation(format!("leaf {} has a stale left link", id)));
            }
            chain.push(id);
            previous = Some(id);
            cursor = leaf.right;
        }
        if chain != walk.leaves {
            return Err(violation(format!(
                "leaf chain {:?} does not match tree order {:?}",
                chain, walk.leaves
            )));
        }

        for level in &walk.levels {
            for (i, id) in level.iter().enumerate() {
                let node = self.node(*id);
                let expected_left = i.checked_sub(1).map(|j| level[j]);
                let expected_right = level.get(i + 1).copied();
                if node.left() != expected_left || node.right() != expected_right {
                    return Err(violation(format!("node {} has stale sibling links", id)));
                }
            }
        }

        Ok(())
    }

    fn check_node(
        &self,
        id: NodeId,
        lower: Option<i64>,
        upper: Option<i64>,
        depth: usize,
        walk: &mut Walk,
    ) -> PineResult<()> {
        let in_bounds =
            |key: i64| lower.is_none_or(|lo| key >= lo) && upper.is_none_or(|hi| key < hi);
        let is_top = depth == 0;

        if walk.levels.len() <= depth {
            walk.levels.push(Vec::new());
        }
        walk.levels[depth].push(id);

        match self.node(id) {
            Node::Leaf(leaf) => {
                if let Some(expected) = walk.leaf_depth {
                    if expected != depth {
                        return Err(violation(format!("leaf {} at uneven depth", id)));
                    }
                } else {
                    walk.leaf_depth = Some(depth);
                }

                if leaf.count() > self.max_entries() {
                    return Err(violation(format!("leaf {} is overfull", id)));
                }
                if leaf.entries.is_empty() || (!is_top && leaf.count() < self.min_entries()) {
                    return Err(violation(format!(
                        "leaf {} is deficient ({} entries)",
                        id,
                        leaf.count()
                    )));
                }
                if leaf.entries.windows(2).any(|w| w[0].key >= w[1].key) {
                    return Err(violation(format!("leaf {} is not strictly sorted", id)));
                }
                if let Some(entry) = leaf.entries.iter().find(|e| !in_bounds(e.key)) {
                    return Err(violation(format!(
                        "key {} in leaf {} escapes its separators",
                        entry.key, id
                    )));
                }

                walk.entries += leaf.count();
                walk.leaves.push(id);
            }
            Node::Internal(internal) => {
                if internal.keys.len() + 1 != internal.degree() {
                    return Err(violation(format!("node {} has mismatched keys/children", id)));
                }
                if internal.degree() > self.max_degree() {
                    return Err(violation(format!("node {} is overfull", id)));
                }
                let floor = if is_top { 2 } else { self.min_degree() };
                if internal.degree() < floor {
                    return Err(violation(format!(
                        "node {} is deficient (degree {})",
                        id,
                        internal.degree()
                    )));
                }
                if internal.keys.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(violation(format!("node {} keys are not sorted", id)));
                }
                if let Some(key) = internal.keys.iter().find(|k| !in_bounds(**k)) {
                    return Err(violation(format!(
                        "separator {} in node {} escapes its bounds",
                        key, id
                    )));
                }

                for (i, child) in internal.children.iter().enumerate() {
                    if self.node(*child).parent() != Some(id) {
                        return Err(violation(format!(
                            "child {} does not point back to {}",
                            child, id
                        )));
                    }
                    let child_lower = if i == 0 { lower } else { Some(internal.keys[i - 1]) };
                    let child_upper = internal.keys.get(i).copied().or(upper);
                    self.check_node(*child, child_lower, child_upper, depth + 1, walk)?;
                }
            }
        }

        Ok(())
    }
}

fn violation(message: impl Into<String>) -> PineError {
    PineError::Internal(format!("B+ tree invariant violated: {}", message.into()))
}
