//! Filepath: src/tree/validate.rs
//!
//! Whole-tree invariant checker.
//!
//! Walks every reachable node and asserts the structural invariants the
//! operations are supposed to preserve: separator bounds on every
//! subtree, strict key ordering, non-empty value sets, minimum occupancy
//! for non-root nodes, uniform leaf depth, and a sibling chain that
//! enumerates exactly the leaves in order, forwards and backwards.
//!
//! # Quiescence Requirements
//!
//! The walk takes no latches; run it only when the tree is quiescent
//! (test assertions, debugging sessions, teardown checks). Any violation
//! panics with a description of the broken invariant.

use crate::inner::InnerNode;
use crate::leaf::LeafNode;
use crate::node::{NodeBody, NodePtr};
use crate::tree::BPlusTree;

impl<K: Ord + Clone, V: Eq + Clone, const FAN_OUT: usize> BPlusTree<K, V, FAN_OUT> {
    /// Assert every structural invariant of the tree.
    ///
    /// # Panics
    ///
    /// On the first violated invariant.
    pub fn check_invariants(&self) {
        let Some(root) = self.root_ptr() else {
            assert_eq!(self.len(), 0, "empty tree with a non-zero pair count");
            return;
        };

        let mut leaves = Vec::new();
        // SAFETY: quiescence contract; the root pins the whole tree.
        let depth = unsafe { Self::check_node(root, None, None, true, &mut leaves) };

        assert_eq!(
            depth,
            self.height(),
            "left-spine height disagrees with recursive depth"
        );

        Self::check_leaf_chain(&leaves);

        let pairs: usize = leaves
            .iter()
            .map(|&leaf| {
                // SAFETY: collected from the reachable tree above.
                match unsafe { leaf.as_ref().body() } {
                    NodeBody::Leaf(l) => l.entries().iter().map(|e| e.values.len()).sum::<usize>(),

                    NodeBody::Inner(_) => unreachable!("leaf list holds leaves"),
                }
            })
            .sum();
        assert_eq!(pairs, self.len(), "stored pairs disagree with the counter");
    }

    /// Validate the subtree under `ptr`, keys bounded by `lo..hi`
    /// (`lo` inclusive, `hi` exclusive, `None` = unbounded). Returns the
    /// subtree depth and appends leaves in key order.
    unsafe fn check_node(
        ptr: NodePtr<K, V, FAN_OUT>,
        lo: Option<&K>,
        hi: Option<&K>,
        is_root: bool,
        leaves: &mut Vec<NodePtr<K, V, FAN_OUT>>,
    ) -> usize {
        // SAFETY: reachable per caller.
        match unsafe { ptr.as_ref().body() } {
            NodeBody::Leaf(leaf) => {
                Self::check_leaf(leaf, lo, hi, is_root);
                leaves.push(ptr);
                1
            }

            NodeBody::Inner(inner) => {
                // SAFETY: children reachable through this node.
                unsafe { Self::check_inner(inner, lo, hi, is_root, leaves) }
            }
        }
    }

    fn check_leaf(leaf: &LeafNode<K, V, FAN_OUT>, lo: Option<&K>, hi: Option<&K>, is_root: bool) {
        assert!(leaf.size() < FAN_OUT, "leaf at or above FAN_OUT entries");
        if is_root {
            assert!(leaf.size() >= 1, "empty leaf reachable as root");
        } else {
            assert!(
                leaf.size() >= LeafNode::<K, V, FAN_OUT>::MIN_ENTRIES,
                "non-root leaf below minimum occupancy"
            );
        }

        let mut prev: Option<&K> = None;
        for entry in leaf.entries() {
            assert!(
                prev.is_none_or(|p| *p < entry.key),
                "leaf keys not strictly increasing"
            );
            assert!(
                lo.is_none_or(|l| *l <= entry.key),
                "leaf key below its subtree's lower bound"
            );
            assert!(
                hi.is_none_or(|h| entry.key < *h),
                "leaf key at or above its subtree's upper bound"
            );
            assert!(!entry.values.is_empty(), "empty value set stored");
            prev = Some(&entry.key);
        }
    }

    unsafe fn check_inner(
        inner: &InnerNode<K, V, FAN_OUT>,
        lo: Option<&K>,
        hi: Option<&K>,
        is_root: bool,
        leaves: &mut Vec<NodePtr<K, V, FAN_OUT>>,
    ) -> usize {
        assert!(inner.size() < FAN_OUT, "inner node at or above FAN_OUT entries");
        assert!(
            inner.leftmost().is_some(),
            "inner node with no leftmost child"
        );
        if is_root {
            assert!(inner.children() >= 2, "inner root with fewer than two children");
        } else {
            assert!(
                inner.children() >= InnerNode::<K, V, FAN_OUT>::MIN_CHILDREN,
                "non-root inner node below minimum occupancy"
            );
        }

        let entries = inner.entries();
        for window in entries.windows(2) {
            assert!(
                window[0].key < window[1].key,
                "separators not strictly increasing"
            );
        }
        for entry in entries {
            assert!(
                lo.is_none_or(|l| *l <= entry.key),
                "separator below the node's lower bound"
            );
            assert!(
                hi.is_none_or(|h| entry.key < *h),
                "separator at or above the node's upper bound"
            );
        }

        // Leftmost child: keys in [lo, first separator).
        let first_hi = entries.first().map(|e| &e.key).or(hi);
        let leftmost = inner.leftmost().expect("asserted above");
        // SAFETY: child reachable through this node.
        let mut depth = unsafe { Self::check_node(leftmost, lo, first_hi, false, leaves) };

        // Child at separator i: keys in [sep_i, sep_{i+1}) (or hi).
        for (i, entry) in entries.iter().enumerate() {
            let child_hi = entries.get(i + 1).map(|e| &e.key).or(hi);
            // SAFETY: child reachable through this node.
            let child_depth =
                unsafe { Self::check_node(entry.child, Some(&entry.key), child_hi, false, leaves) };

            assert_eq!(depth, child_depth, "leaves at unequal depths");
            depth = child_depth;
        }

        depth + 1
    }

    /// The forward and backward chains are mutual inverses and enumerate
    /// exactly the reachable leaves in key order.
    fn check_leaf_chain(leaves: &[NodePtr<K, V, FAN_OUT>]) {
        for (i, &leaf) in leaves.iter().enumerate() {
            // SAFETY: collected from the reachable tree.
            let node = unsafe { leaf.as_ref() };

            let expected_prev = i.checked_sub(1).map(|j| leaves[j]);
            assert!(
                node.prev_leaf() == expected_prev,
                "backward sibling link out of order at leaf {i}"
            );

            let expected_next = leaves.get(i + 1).copied();
            assert!(
                node.next_leaf() == expected_next,
                "forward sibling link out of order at leaf {i}"
            );
        }
    }
}
