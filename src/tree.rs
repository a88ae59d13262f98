//! Filepath: src/tree.rs
//!
//! `BPlusTree` - a concurrent in-memory multi-value B+ tree index.
//!
//! This module provides the public facade: insertion (plain, unique-key,
//! and predicate-gated), deletion of a specific (key, value) pair, point
//! lookup, bidirectional cursors, and the size/height metrics. The
//! structural machinery lives in the submodules:
//!
//! - [`traverse`](self::traverse): crab-latching descent
//! - [`split`](self::split): insert path and overflow propagation
//! - [`rebalance`](self::rebalance): delete path, borrow/coalesce
//! - [`cursor`](self::cursor): ordered scans
//! - [`validate`](self::validate): whole-tree invariant checking

use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize};

use crate::latch::RwLatch;
use crate::node::{Node, NodeBody, NodePtr};
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};
use crate::tree::split::InsertGate;
use crate::tree::traverse::LeafLatch;

pub(crate) mod traverse;

mod rebalance;
mod split;
mod validate;

pub mod cursor;

pub use cursor::{Cursor, Iter};

// ============================================================================
//  ConditionalInsert
// ============================================================================

/// Outcome of [`BPlusTree::insert_if`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalInsert {
    /// No stored value satisfied the predicate; the pair is stored.
    Inserted,

    /// A stored value at the key satisfied the predicate; nothing was
    /// inserted.
    PredicateSatisfied,
}

// ============================================================================
//  BPlusTree
// ============================================================================

/// A concurrent in-memory B+ tree mapping keys to *sets* of values.
///
/// Every key maps to a non-empty set of values, unique under `==`; the
/// same key may be inserted many times with different values. All
/// operations take `&self` and are safe to call from multiple threads:
/// each node carries its own reader/writer latch and mutations use
/// hand-over-hand (crab) latching, so readers and writers block each other
/// only on the subtree a structural change actually touches.
///
/// `FAN_OUT` bounds node size: a node holding `FAN_OUT` entries overflows
/// and splits. The default of 10 keeps non-root leaves between 5 and 9
/// entries and non-root inner nodes between 5 and 10 children.
///
/// # Example
///
/// ```
/// use bptree::BPlusTree;
///
/// let tree: BPlusTree<i64, i64> = BPlusTree::new();
///
/// assert!(tree.insert(1, 100));
/// assert!(tree.insert(1, 101));
/// assert!(!tree.insert(1, 100)); // exact pair already present
///
/// let mut values = tree.get(&1);
/// values.sort_unstable();
/// assert_eq!(values, vec![100, 101]);
///
/// assert!(tree.remove(&1, &100));
/// assert_eq!(tree.get(&1), vec![101]);
/// ```
pub struct BPlusTree<K, V, const FAN_OUT: usize = 10> {
    /// The root node, null for the empty tree. Written only while
    /// `root_latch` is held exclusive.
    root: AtomicPtr<Node<K, V, FAN_OUT>>,

    /// Tree-level latch guarding the root pointer; the topmost rung of the
    /// crab ladder.
    root_latch: RwLatch,

    /// Live (key, value) pair count.
    pairs: AtomicUsize,

    /// The tree owns every reachable node.
    _owns: PhantomData<Box<Node<K, V, FAN_OUT>>>,
}

// SAFETY: the latch protocol serializes all access to node bodies; keys
// and values cross threads both by reference (lookups clone under a shared
// latch) and by value (inserts move them in), hence the Send + Sync
// bounds on both.
unsafe impl<K: Send + Sync, V: Send + Sync, const FAN_OUT: usize> Send
    for BPlusTree<K, V, FAN_OUT>
{
}

// SAFETY: see the Send impl.
unsafe impl<K: Send + Sync, V: Send + Sync, const FAN_OUT: usize> Sync
    for BPlusTree<K, V, FAN_OUT>
{
}

impl<K, V, const FAN_OUT: usize> BPlusTree<K, V, FAN_OUT> {
    const FAN_OUT_CHECK: () = {
        assert!(FAN_OUT >= 4, "FAN_OUT must be at least 4");
    };

    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        // Trigger the compile-time FAN_OUT check.
        let () = Self::FAN_OUT_CHECK;

        Self {
            root: AtomicPtr::new(std::ptr::null_mut()),
            root_latch: RwLatch::new(),
            pairs: AtomicUsize::new(0),
            _owns: PhantomData,
        }
    }

    /// Number of live (key, value) pairs.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.load(RELAXED)
    }

    /// Whether the tree holds no pairs.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    //  Internal root-pointer plumbing
    // ========================================================================

    /// The tree-level latch guarding the root pointer.
    #[inline]
    pub(crate) fn root_latch(&self) -> &RwLatch {
        &self.root_latch
    }

    /// The current root, if any.
    #[inline]
    pub(crate) fn root_ptr(&self) -> Option<NodePtr<K, V, FAN_OUT>> {
        NonNull::new(self.root.load(READ_ORD)).map(NodePtr::from_raw)
    }

    /// Replace the root pointer. Caller holds `root_latch` exclusive.
    #[inline]
    pub(crate) fn set_root(&self, ptr: Option<NodePtr<K, V, FAN_OUT>>) {
        self.root.store(NodePtr::to_raw(ptr), WRITE_ORD);
    }

    /// Account one stored pair.
    #[inline]
    pub(crate) fn count_pair_added(&self) {
        self.pairs.fetch_add(1, RELAXED);
    }

    /// Account one removed pair.
    #[inline]
    pub(crate) fn count_pair_removed(&self) {
        self.pairs.fetch_sub(1, RELAXED);
    }
}

impl<K: Ord + Clone, V: Eq + Clone, const FAN_OUT: usize> BPlusTree<K, V, FAN_OUT> {
    // ========================================================================
    //  Mutations
    // ========================================================================

    /// Insert `(key, value)`.
    ///
    /// Returns `false` iff the exact pair is already present (value sets
    /// never hold duplicates).
    pub fn insert(&self, key: K, value: V) -> bool {
        self.insert_gated(&key, &value, &InsertGate::<fn(&V) -> bool>::Duplicates)
            .inserted()
    }

    /// Insert `(key, value)` requiring the key to be absent.
    ///
    /// Returns `false` iff any entry with `key` exists (with any value),
    /// or the exact pair is already present.
    pub fn insert_unique(&self, key: K, value: V) -> bool {
        self.insert_gated(&key, &value, &InsertGate::<fn(&V) -> bool>::UniqueKey)
            .inserted()
    }

    /// Insert `(key, value)` unless a stored value at `key` satisfies
    /// `predicate`.
    ///
    /// The predicate runs under the leaf's latch against every value
    /// currently stored at `key`; if any satisfies it, nothing is inserted
    /// and [`ConditionalInsert::PredicateSatisfied`] is returned.
    pub fn insert_if<P: Fn(&V) -> bool>(
        &self,
        key: K,
        value: V,
        predicate: P,
    ) -> ConditionalInsert {
        match self.insert_gated(&key, &value, &InsertGate::Predicate(predicate)) {
            split::InsertOutcome::PredicateSatisfied => ConditionalInsert::PredicateSatisfied,

            _ => ConditionalInsert::Inserted,
        }
    }

    /// Remove the exact `(key, value)` pair.
    ///
    /// Returns `true` iff the pair was present and removed. Removing the
    /// last value at a key removes the key's entry.
    pub fn remove(&self, key: &K, value: &V) -> bool {
        self.remove_impl(key, value)
    }

    // ========================================================================
    //  Lookups
    // ========================================================================

    /// All values stored at `key`, in unspecified order.
    #[must_use]
    pub fn get(&self, key: &K) -> Vec<V> {
        let mut out = Vec::new();
        self.scan_key(key, &mut out);
        out
    }

    /// Append every value stored at `key` to `out`, in unspecified order.
    /// `out` is untouched when the key is absent.
    pub fn scan_key(&self, key: &K, out: &mut Vec<V>) {
        let Some(leaf_ptr) = self.find_leaf(key, LeafLatch::Shared) else {
            return;
        };

        // SAFETY: find_leaf returned the leaf latched shared.
        let node = unsafe { leaf_ptr.as_ref() };
        match unsafe { node.body() } {
            NodeBody::Leaf(leaf) => leaf.append_values(key, out),

            NodeBody::Inner(_) => unreachable!("descent terminates at a leaf"),
        }

        // SAFETY: latched shared by find_leaf.
        unsafe { node.latch().unlock_shared() };
    }

    // ========================================================================
    //  Metrics
    // ========================================================================

    /// Number of levels on the path from the root to any leaf.
    ///
    /// 0 for the empty tree, 1 while the root is a leaf.
    #[must_use]
    pub fn height(&self) -> usize {
        self.root_latch.lock_shared();

        let Some(root) = self.root_ptr() else {
            // SAFETY: acquired two lines up.
            unsafe { self.root_latch.unlock_shared() };
            return 0;
        };

        // SAFETY: root is reachable while the root latch is held.
        let root_node = unsafe { root.as_ref() };
        root_node.latch().lock_shared();
        // SAFETY: acquired above.
        unsafe { self.root_latch.unlock_shared() };

        // Walk the left spine with hand-over-hand shared latches.
        let mut levels = 1;
        let mut cur = root;
        loop {
            // SAFETY: cur is latched shared.
            let node = unsafe { cur.as_ref() };

            let child = match unsafe { node.body() } {
                NodeBody::Leaf(_) => {
                    // SAFETY: latched during this walk.
                    unsafe { node.latch().unlock_shared() };
                    return levels;
                }

                NodeBody::Inner(inner) => {
                    inner.leftmost().expect("inner node has a leftmost child")
                }
            };

            // SAFETY: child is owned by the latched parent.
            unsafe { child.as_ref() }.latch().lock_shared();
            // SAFETY: latched during this walk.
            unsafe { node.latch().unlock_shared() };
            cur = child;
            levels += 1;
        }
    }

    /// Heap bytes used by entry storage across the whole tree.
    ///
    /// Counts one key per leaf entry plus one value per set member, and
    /// one (key, child-pointer) pair per inner entry; node headers and the
    /// leftmost child pointers are not counted.
    #[must_use]
    pub fn heap_usage(&self) -> usize {
        self.root_latch.lock_shared();

        let Some(root) = self.root_ptr() else {
            // SAFETY: acquired two lines up.
            unsafe { self.root_latch.unlock_shared() };
            return 0;
        };

        // SAFETY: root is reachable while the root latch is held.
        let root_node = unsafe { root.as_ref() };
        root_node.latch().lock_shared();
        // SAFETY: acquired above.
        unsafe { self.root_latch.unlock_shared() };

        let total = Self::heap_of_subtree(root);

        // SAFETY: latched above.
        unsafe { root_node.latch().unlock_shared() };
        total
    }

    /// Recursive accountant; `ptr` is latched shared by the caller and
    /// children are latched shared one at a time while visited.
    fn heap_of_subtree(ptr: NodePtr<K, V, FAN_OUT>) -> usize {
        // SAFETY: latched shared by the caller.
        let body = unsafe { ptr.as_ref().body() };

        let mut total = body.heap_space();
        if let NodeBody::Inner(inner) = body {
            let children = inner
                .leftmost()
                .into_iter()
                .chain(inner.entries().iter().map(|e| e.child));

            for child in children {
                // SAFETY: owned by the latched parent.
                let child_node = unsafe { child.as_ref() };
                child_node.latch().lock_shared();
                total += Self::heap_of_subtree(child);
                // SAFETY: latched two lines up.
                unsafe { child_node.latch().unlock_shared() };
            }
        }

        total
    }
}

impl<K, V, const FAN_OUT: usize> Default for BPlusTree<K, V, FAN_OUT> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const FAN_OUT: usize> StdFmt::Debug for BPlusTree<K, V, FAN_OUT> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("BPlusTree")
            .field("pairs", &self.len())
            .finish_non_exhaustive()
    }
}

impl<K, V, const FAN_OUT: usize> Drop for BPlusTree<K, V, FAN_OUT> {
    fn drop(&mut self) {
        let mut stack = Vec::new();
        if let Some(root) = self.root_ptr() {
            stack.push(root);
        }

        while let Some(ptr) = stack.pop() {
            // SAFETY: `&mut self` - no other thread can reach the tree, and
            // every reachable node is owned by exactly one parent, so each
            // is visited and freed exactly once.
            let node = unsafe { ptr.as_ref() };
            if let NodeBody::Inner(inner) = unsafe { node.body_mut() } {
                stack.extend(inner.take_leftmost());
                stack.extend(inner.take_entries().into_iter().map(|e| e.child));
            }

            // SAFETY: drained above; nothing references it anymore.
            unsafe { ptr.dealloc() };
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================
