//! Filepath: src/tree/traverse.rs
//!
//! Descent from the root to the leaf covering a key, in the two latching
//! modes the operations need.
//!
//! # Read descent
//!
//! Hand-over-hand shared latching: at most two latches are held (parent
//! and child); the parent is released as soon as the child is latched.
//! Lookups latch the leaf shared; the insert fast path latches the leaf
//! exclusive and everything above it shared.
//!
//! # Write descent
//!
//! Everything is latched exclusive, starting with the tree-level latch
//! that guards the root pointer (the topmost rung of the crab ladder).
//! After latching a child that is *safe* for the operation, every retained
//! ancestor latch is released: latches are held only from the highest
//! unsafe ancestor down to the leaf, which bounds the scope a structural
//! modification can block.
//!
//! A node is safe for insert iff one more entry cannot overflow it, and
//! safe for delete iff one fewer entry cannot underflow it. The root is
//! safe when the operation cannot force a root replacement (split of the
//! root, collapse to a single child, or draining the last entry).

use crate::inner::InnerNode;
use crate::node::{NodeBody, NodePtr};
use crate::tree::BPlusTree;

// ============================================================================
//  WriteIntent
// ============================================================================

/// Which mutation a write descent serves; decides the safety predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteIntent {
    Insert,
    Remove,
}

// ============================================================================
//  LatchedPath
// ============================================================================

/// The retained chain of a write descent.
///
/// Holds the tree-level root latch (until released) and the
/// exclusive-latched nodes from the highest unsafe ancestor down to the
/// current descent position, in root-to-leaf order. Everything still held
/// is released on drop, so every exit path of a mutation - including the
/// early precondition returns - unwinds its latches.
pub(crate) struct LatchedPath<'t, K, V, const FAN_OUT: usize> {
    tree: &'t BPlusTree<K, V, FAN_OUT>,
    holds_root_latch: bool,
    nodes: Vec<NodePtr<K, V, FAN_OUT>>,
}

impl<'t, K, V, const FAN_OUT: usize> LatchedPath<'t, K, V, FAN_OUT> {
    /// Empty path holding nothing.
    pub(crate) fn new(tree: &'t BPlusTree<K, V, FAN_OUT>) -> Self {
        Self {
            tree,
            holds_root_latch: false,
            nodes: Vec::new(),
        }
    }

    /// Acquire the tree-level root latch exclusive.
    pub(crate) fn lock_root_latch(&mut self) {
        debug_assert!(!self.holds_root_latch);

        self.tree.root_latch().lock_exclusive();
        self.holds_root_latch = true;
    }

    /// Whether the tree-level root latch is still held.
    ///
    /// Invariant: while this is true, `node(0)` (if any) is the root node.
    #[inline]
    pub(crate) fn holds_root_latch(&self) -> bool {
        self.holds_root_latch
    }

    /// Number of latched nodes.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is latched.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The latched node at `idx` (0 = highest retained).
    #[inline]
    pub(crate) fn node(&self, idx: usize) -> NodePtr<K, V, FAN_OUT> {
        self.nodes[idx]
    }

    /// The deepest latched node.
    #[inline]
    pub(crate) fn last(&self) -> NodePtr<K, V, FAN_OUT> {
        *self.nodes.last().expect("path is non-empty")
    }

    /// Retain `ptr`, which the caller has just latched exclusive.
    pub(crate) fn push(&mut self, ptr: NodePtr<K, V, FAN_OUT>) {
        self.nodes.push(ptr);
    }

    /// Release every retained latch (top-down), including the root latch.
    pub(crate) fn release_all(&mut self) {
        if self.holds_root_latch {
            // SAFETY: acquired in lock_root_latch and not yet released.
            unsafe { self.tree.root_latch().unlock_exclusive() };
            self.holds_root_latch = false;
        }

        for ptr in self.nodes.drain(..) {
            // SAFETY: every node in the path was latched exclusive by this
            // path and stays allocated while latched.
            unsafe { ptr.as_ref().latch().unlock_exclusive() };
        }
    }

    /// Release and remove the deepest latched node, returning it.
    ///
    /// Used when a node is done with (propagation passed it, or it has
    /// been drained and is about to be freed). Once unlatched, a drained
    /// node is unreachable: its parent is still latched exclusive higher
    /// up the path, so no descent can rediscover it.
    pub(crate) fn pop_release(&mut self) -> NodePtr<K, V, FAN_OUT> {
        let ptr = self.nodes.pop().expect("path is non-empty");

        // SAFETY: latched exclusive by this path.
        unsafe { ptr.as_ref().latch().unlock_exclusive() };
        ptr
    }
}

impl<K, V, const FAN_OUT: usize> Drop for LatchedPath<'_, K, V, FAN_OUT> {
    fn drop(&mut self) {
        self.release_all();
    }
}

// ============================================================================
//  Descent
// ============================================================================

/// Leaf latch mode for read descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeafLatch {
    Shared,
    Exclusive,
}

impl<K: Ord, V, const FAN_OUT: usize> BPlusTree<K, V, FAN_OUT> {
    /// Read descent to the leaf covering `key`.
    ///
    /// Returns the leaf latched in `mode` (everything above it already
    /// released), or `None` for the empty tree. The caller reads the leaf
    /// and releases its latch.
    pub(crate) fn find_leaf(&self, key: &K, mode: LeafLatch) -> Option<NodePtr<K, V, FAN_OUT>> {
        self.descend_shared(mode, |inner| inner.child_for_key(key))
    }

    /// Read descent along the left spine to the smallest leaf.
    pub(crate) fn find_leftmost_leaf(
        &self,
        mode: LeafLatch,
    ) -> Option<NodePtr<K, V, FAN_OUT>> {
        self.descend_shared(mode, |inner| {
            inner.leftmost().expect("inner node has a leftmost child")
        })
    }

    /// Read descent along the right spine to the greatest leaf.
    pub(crate) fn find_rightmost_leaf(
        &self,
        mode: LeafLatch,
    ) -> Option<NodePtr<K, V, FAN_OUT>> {
        self.descend_shared(mode, |inner| match inner.entries().last() {
            Some(e) => e.child,

            None => inner.leftmost().expect("inner node has a leftmost child"),
        })
    }

    /// Shared hand-over-hand descent; `route` picks the child at each
    /// inner node. The returned leaf is latched per `mode`.
    fn descend_shared<R>(&self, mode: LeafLatch, route: R) -> Option<NodePtr<K, V, FAN_OUT>>
    where
        R: Fn(&InnerNode<K, V, FAN_OUT>) -> NodePtr<K, V, FAN_OUT>,
    {
        self.root_latch().lock_shared();

        let Some(root) = self.root_ptr() else {
            // SAFETY: acquired two lines up.
            unsafe { self.root_latch().unlock_shared() };
            return None;
        };

        // SAFETY: root is reachable while the root latch is held.
        let root_node = unsafe { root.as_ref() };
        match (root_node.is_leaf(), mode) {
            (true, LeafLatch::Exclusive) => root_node.latch().lock_exclusive(),

            _ => root_node.latch().lock_shared(),
        }

        // SAFETY: acquired above; the root node latch now pins the descent.
        unsafe { self.root_latch().unlock_shared() };

        let mut cur = root;
        loop {
            // SAFETY: cur is latched, hence reachable and allocated.
            let node = unsafe { cur.as_ref() };

            let inner = match unsafe { node.body() } {
                NodeBody::Leaf(_) => return Some(cur),

                NodeBody::Inner(inner) => inner,
            };

            let child = route(inner);
            // SAFETY: child is owned by the latched parent.
            let child_node = unsafe { child.as_ref() };

            match (child_node.is_leaf(), mode) {
                (true, LeafLatch::Exclusive) => child_node.latch().lock_exclusive(),

                _ => child_node.latch().lock_shared(),
            }

            // SAFETY: latched shared during this descent, released exactly once.
            unsafe { node.latch().unlock_shared() };
            cur = child;
        }
    }

    /// Pessimistic write descent to the leaf covering `key`.
    ///
    /// Latches everything exclusive, releasing retained ancestors whenever
    /// the newly latched child is safe for `intent`. On return the path
    /// ends at the leaf; for the empty tree the path holds only the root
    /// latch and no nodes.
    pub(crate) fn descend_exclusive(
        &self,
        key: &K,
        intent: WriteIntent,
    ) -> LatchedPath<'_, K, V, FAN_OUT> {
        let mut path = LatchedPath::new(self);
        path.lock_root_latch();

        let Some(root) = self.root_ptr() else {
            return path;
        };

        let mut cur = root;
        loop {
            // SAFETY: cur is reachable: it is the root (pinned by the root
            // latch) or a child of the exclusively latched deepest node.
            let node = unsafe { cur.as_ref() };
            node.latch().lock_exclusive();

            if Self::write_safe(cur, cur == root, intent) {
                path.release_all();
            }
            path.push(cur);

            if node.is_leaf() {
                return path;
            }

            // SAFETY: exclusive latch held on cur.
            cur = match unsafe { node.body() } {
                NodeBody::Inner(inner) => inner.child_for_key(key),

                NodeBody::Leaf(_) => unreachable!("leaf returned above"),
            };
        }
    }

    /// Safety predicate of the crab-latching protocol.
    fn write_safe(ptr: NodePtr<K, V, FAN_OUT>, is_root: bool, intent: WriteIntent) -> bool {
        // SAFETY: caller holds the exclusive latch on ptr.
        let body = unsafe { ptr.as_ref().body() };

        match (body, intent) {
            (NodeBody::Leaf(leaf), WriteIntent::Insert) => !leaf.will_overflow(),

            (NodeBody::Inner(inner), WriteIntent::Insert) => !inner.will_overflow(),

            // A root leaf is safe unless the delete could drain it; a root
            // inner node is safe unless it could drop to a single child.
            (NodeBody::Leaf(leaf), WriteIntent::Remove) => {
                if is_root {
                    leaf.size() >= 2
                } else {
                    !leaf.will_underflow()
                }
            }

            (NodeBody::Inner(inner), WriteIntent::Remove) => {
                if is_root {
                    inner.size() >= 2
                } else {
                    !inner.will_underflow()
                }
            }
        }
    }
}
