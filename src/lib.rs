//! # bptree
//!
//! A concurrent, in-memory, multi-value B+ tree index.
//!
//! `bptree` is the ordered-index building block of a database engine: it
//! maps keys from a totally ordered domain to *sets* of values and
//! supports point lookup, ordered bidirectional scans, insertion with
//! optional uniqueness and predicate gates, and deletion of a specific
//! (key, value) pair.
//!
//! ## Design
//!
//! - Leaves hold sorted (key, value-set) entries and form a doubly linked
//!   chain in key order; inner nodes hold a leftmost child plus sorted
//!   (separator, child) pairs.
//! - A node holding `FAN_OUT` entries splits; a non-root node below half
//!   occupancy borrows from a sibling or coalesces with one. The tree
//!   grows only by splitting the root and shrinks only when an inner root
//!   is left with a single child.
//!
//! ## Concurrency
//!
//! Every node carries its own reader/writer latch; there is no global
//! lock. Reads descend hand-over-hand holding at most two shared latches.
//! Writes descend exclusive and retain latches only from the highest
//! *unsafe* ancestor (one that could overflow or underflow) down to the
//! leaf, so a structural change blocks exactly the subtree it touches.
//! Operations on the same key are linearizable; cursors take no latches
//! and are meant for quiescent scans.
//!
//! ## Example
//!
//! ```
//! use bptree::BPlusTree;
//!
//! let index: BPlusTree<u64, u64> = BPlusTree::new();
//!
//! index.insert(10, 1);
//! index.insert(10, 2);
//! index.insert(20, 3);
//!
//! assert_eq!(index.get(&10).len(), 2);
//! assert_eq!(index.iter().count(), 3);
//!
//! let keys: Vec<u64> = index.iter().map(|(k, _)| k).collect();
//! assert_eq!(keys, vec![10, 10, 20]);
//! ```

pub mod latch;
pub mod valueset;

pub mod tree;

mod inner;
mod leaf;
mod node;
mod ordering;
mod tracing_helpers;

pub use tree::{BPlusTree, ConditionalInsert, Cursor, Iter};
pub use valueset::ValueSet;
