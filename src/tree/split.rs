//! Filepath: src/tree/split.rs
//!
//! Insert path: collision gates, the optimistic fast path, and
//! split-and-propagate on overflow.
//!
//! # Protocol
//!
//! 1. Optimistic descent with the leaf latched exclusive and everything
//!    above it shared. If the leaf would have to split, back out and
//!    re-descend pessimistically.
//! 2. Pessimistic descent retains exclusive latches from the highest
//!    unsafe ancestor down to the leaf; the collision gate is re-checked
//!    (the leaf may have changed between the two descents).
//! 3. Insert into the leaf. On overflow, split it, splice the new right
//!    sibling into the leaf chain, and propagate the separator upward:
//!    each overflowed ancestor splits in turn, lifting the first separator
//!    of its new right half. If the node that split was the root, a new
//!    inner root adopts both halves and the tree grows by one level.

use crate::inner::InnerNode;
use crate::leaf::LeafNode;
use crate::node::NodePtr;
use crate::tracing_helpers::{debug_log, trace_log};
use crate::tree::BPlusTree;
use crate::tree::traverse::{LatchedPath, LeafLatch, WriteIntent};

// ============================================================================
//  Insert gates and outcomes
// ============================================================================

/// Precondition gate an insert runs against the latched leaf.
pub(crate) enum InsertGate<P> {
    /// Reject only the exact (key, value) duplicate.
    Duplicates,

    /// Reject if any entry with the key exists.
    UniqueKey,

    /// Reject if any stored value at the key satisfies the predicate.
    Predicate(P),
}

/// What an insert attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    /// The pair is stored (or was already stored, under a predicate gate).
    Inserted,

    /// The exact (key, value) pair was already present.
    DuplicatePair,

    /// Uniqueness was requested and the key was already present.
    KeyExists,

    /// Some stored value at the key satisfied the predicate.
    PredicateSatisfied,
}

impl InsertOutcome {
    /// Whether the attempt stored anything (the boolean the facade returns).
    #[inline]
    pub(crate) fn inserted(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

// ============================================================================
//  Insert
// ============================================================================

impl<K: Ord + Clone, V: Eq + Clone, const FAN_OUT: usize> BPlusTree<K, V, FAN_OUT> {
    /// Insert `(key, value)` subject to `gate`.
    pub(crate) fn insert_gated<P: Fn(&V) -> bool>(
        &self,
        key: &K,
        value: &V,
        gate: &InsertGate<P>,
    ) -> InsertOutcome {
        match self.try_insert_fast(key, value, gate) {
            Some(outcome) => outcome,

            None => self.insert_pessimistic(key, value, gate),
        }
    }

    /// Run `gate` against the latched leaf. `None` means the insert may
    /// proceed.
    fn gate_check<P: Fn(&V) -> bool>(
        leaf: &LeafNode<K, V, FAN_OUT>,
        key: &K,
        value: &V,
        gate: &InsertGate<P>,
    ) -> Option<InsertOutcome> {
        match gate {
            InsertGate::Duplicates => leaf
                .contains_pair(key, value)
                .then_some(InsertOutcome::DuplicatePair),

            InsertGate::UniqueKey => leaf
                .contains_key(key)
                .then_some(InsertOutcome::KeyExists),

            InsertGate::Predicate(p) => leaf
                .any_value_satisfies(key, p)
                .then_some(InsertOutcome::PredicateSatisfied),
        }
    }

    /// Optimistic fast path: shared descent, exclusive latch on the leaf
    /// only. Returns `None` when a pessimistic descent is required (empty
    /// tree, or the leaf would have to split).
    fn try_insert_fast<P: Fn(&V) -> bool>(
        &self,
        key: &K,
        value: &V,
        gate: &InsertGate<P>,
    ) -> Option<InsertOutcome> {
        let leaf_ptr = self.find_leaf(key, LeafLatch::Exclusive)?;

        // SAFETY: find_leaf returned the leaf latched exclusive.
        let node = unsafe { leaf_ptr.as_ref() };
        let leaf = unsafe { node.body_mut() }
            .as_leaf_mut()
            .expect("descent terminates at a leaf");

        let outcome = 'attempt: {
            if let Some(rejected) = Self::gate_check(leaf, key, value, gate) {
                break 'attempt Some(rejected);
            }

            if leaf.contains_key(key) {
                // Extending an existing value set never adds an entry, so
                // no split can follow.
                if leaf.insert(key.clone(), value.clone()) {
                    self.count_pair_added();
                }
                break 'attempt Some(InsertOutcome::Inserted);
            }

            if leaf.will_overflow() {
                // Needs a split; retry with retained write latches.
                trace_log!(size = leaf.size(), "insert fast path backing out");
                break 'attempt None;
            }

            let inserted = leaf.insert(key.clone(), value.clone());
            debug_assert!(inserted, "fresh key insert cannot be a duplicate");
            self.count_pair_added();
            Some(InsertOutcome::Inserted)
        };

        // SAFETY: latched exclusive by find_leaf above.
        unsafe { node.latch().unlock_exclusive() };
        outcome
    }

    /// Pessimistic path: exclusive descent with retained unsafe ancestors,
    /// gate re-check, insert, and structural propagation on overflow.
    fn insert_pessimistic<P: Fn(&V) -> bool>(
        &self,
        key: &K,
        value: &V,
        gate: &InsertGate<P>,
    ) -> InsertOutcome {
        let mut path = self.descend_exclusive(key, WriteIntent::Insert);

        if path.is_empty() {
            // Empty tree: the root latch (held exclusive by the path)
            // serializes creation of the first leaf.
            let mut leaf = LeafNode::new();
            leaf.insert(key.clone(), value.clone());
            self.set_root(Some(NodePtr::new_leaf(leaf)));
            self.count_pair_added();

            debug_log!("created root leaf");
            return InsertOutcome::Inserted;
        }

        let leaf_ptr = path.last();
        // SAFETY: the path holds the leaf latched exclusive.
        let node = unsafe { leaf_ptr.as_ref() };
        let leaf = unsafe { node.body_mut() }
            .as_leaf_mut()
            .expect("descent terminates at a leaf");

        // The leaf may have changed between the optimistic attempt and
        // this descent; the gate must be re-run.
        if let Some(rejected) = Self::gate_check(leaf, key, value, gate) {
            return rejected;
        }

        if leaf.insert(key.clone(), value.clone()) {
            self.count_pair_added();
        }

        if leaf.is_overflow() {
            self.split_and_propagate(&mut path);
        }

        InsertOutcome::Inserted
    }

    /// Split the overflowed leaf at the end of `path` and propagate the
    /// separator up the retained ancestor chain.
    fn split_and_propagate(&self, path: &mut LatchedPath<'_, K, V, FAN_OUT>) {
        let mut level = path.len() - 1;

        let leaf_ptr = path.node(level);
        // SAFETY: latched exclusive by the path.
        let leaf_node = unsafe { leaf_ptr.as_ref() };
        let leaf = unsafe { leaf_node.body_mut() }
            .as_leaf_mut()
            .expect("split_and_propagate starts at a leaf");

        // Move the right tail into a new leaf and splice it into the
        // sibling chain just after the current one.
        let upper = leaf.split_off_upper();
        let mut separator = upper
            .first_key()
            .expect("upper half of a split is non-empty")
            .clone();
        let new_ptr = NodePtr::new_leaf(upper);

        // SAFETY: freshly allocated, exclusively owned until linked.
        let new_node = unsafe { new_ptr.as_ref() };
        let old_next = leaf_node.next_leaf();
        new_node.set_prev_leaf(Some(leaf_ptr));
        new_node.set_next_leaf(old_next);
        if let Some(next) = old_next {
            // SAFETY: the splice boundary is covered by the exclusive
            // latches this path retains; see node.rs on sibling links.
            unsafe { next.as_ref() }.set_prev_leaf(Some(new_ptr));
        }
        leaf_node.set_next_leaf(Some(new_ptr));

        debug_log!(left = leaf.size(), "leaf split");

        let mut new_child = new_ptr;
        loop {
            if level == 0 {
                // The node that split was the root: grow the tree by one
                // level. The root latch is necessarily still held, because
                // a root that can split is never safe for insert.
                debug_assert!(path.holds_root_latch());

                let old_root = path.node(0);
                let mut new_root = InnerNode::new(Some(old_root));
                new_root.insert(separator, new_child);
                self.set_root(Some(NodePtr::new_inner(new_root)));

                debug_log!("root split; tree grew a level");
                return;
            }

            level -= 1;
            let parent_ptr = path.node(level);
            // SAFETY: latched exclusive by the path.
            let parent = unsafe { parent_ptr.as_ref().body_mut() }
                .as_inner_mut()
                .expect("ancestors of a leaf are inner nodes");

            parent.insert(separator, new_child);
            if !parent.is_overflow() {
                return;
            }

            // The parent overflows in turn: split it and lift the first
            // separator of its new right half one level further.
            let mut upper = parent.split_off_upper();
            separator = upper.promote_first_child();
            new_child = NodePtr::new_inner(upper);

            debug_log!(level, left = parent.size(), "inner split");
        }
    }
}
