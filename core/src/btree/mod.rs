//! In-memory B+ tree index mapping row ids to row locations

mod delete;
mod invariants;
pub mod node;
pub mod tree;


pub use node::{Entry, InternalNode, LeafNode, Node, NodeId};
pub use tree::{BPlusTree, Iter, MIN_ORDER};
