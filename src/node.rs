//! Filepath: src/node.rs
//!
//! Tagged node representation shared by leaves and inner nodes.
//!
//! A heap node is a [`Node`]: the per-node latch, an immutable kind tag,
//! the leaf sibling links, and the arm-specific body behind an
//! `UnsafeCell`. [`NodePtr`] is the copyable handle the rest of the crate
//! passes around; every dereference states which latch mode makes it sound.
//!
//! # Why the sibling links live in the header
//!
//! Chain splices during split and coalesce write the `prev` link of the
//! node *after* the splice point, which may belong to a different parent
//! than the latched participants. Keeping the links as atomics outside the
//! body means that write never aliases a `&mut` body another thread holds
//! under its own exclusive latch. The inner arm's leftmost-child pointer
//! has no such problem (it is only touched under the node's own exclusive
//! latch) and stays inside the body.
//!
//! # Kind tag
//!
//! `kind` mirrors the body's discriminant and is written once at
//! construction. The descent loop reads it without a latch to decide which
//! latch mode to take on a child; a node never changes arm in place.

use std::cell::UnsafeCell;
use std::fmt as StdFmt;
use std::mem as StdMem;
use std::ptr::NonNull;
use std::sync::atomic::AtomicPtr;

use crate::inner::InnerNode;
use crate::latch::RwLatch;
use crate::leaf::LeafNode;
use crate::ordering::{READ_ORD, WRITE_ORD};

// ============================================================================
//  NodeKind / NodeBody
// ============================================================================

/// Which arm a node is. Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    /// Data-carrying leaf.
    Leaf,

    /// Routing node.
    Inner,
}

/// The arm-specific payload of a node.
pub(crate) enum NodeBody<K, V, const FAN_OUT: usize> {
    /// Sorted (key, value-set) entries.
    Leaf(LeafNode<K, V, FAN_OUT>),

    /// Leftmost child plus sorted (separator, child) pairs.
    Inner(InnerNode<K, V, FAN_OUT>),
}

impl<K, V, const FAN_OUT: usize> NodeBody<K, V, FAN_OUT> {
    /// Leaf reference, if this is the leaf arm.
    #[inline]
    pub(crate) fn as_leaf(&self) -> Option<&LeafNode<K, V, FAN_OUT>> {
        match self {
            Self::Leaf(leaf) => Some(leaf),

            Self::Inner(_) => None,
        }
    }

    /// Mutable leaf reference, if this is the leaf arm.
    #[inline]
    pub(crate) fn as_leaf_mut(&mut self) -> Option<&mut LeafNode<K, V, FAN_OUT>> {
        match self {
            Self::Leaf(leaf) => Some(leaf),

            Self::Inner(_) => None,
        }
    }

    /// Inner reference, if this is the inner arm.
    #[inline]
    pub(crate) fn as_inner(&self) -> Option<&InnerNode<K, V, FAN_OUT>> {
        match self {
            Self::Leaf(_) => None,

            Self::Inner(inner) => Some(inner),
        }
    }

    /// Mutable inner reference, if this is the inner arm.
    #[inline]
    pub(crate) fn as_inner_mut(&mut self) -> Option<&mut InnerNode<K, V, FAN_OUT>> {
        match self {
            Self::Leaf(_) => None,

            Self::Inner(inner) => Some(inner),
        }
    }

    /// Number of entries in this node.
    #[inline]
    pub(crate) fn size(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.size(),

            Self::Inner(inner) => inner.size(),
        }
    }

    /// The smallest key present in this node.
    ///
    /// Leaf: first entry's key. Inner: first separator.
    #[inline]
    pub(crate) fn first_key(&self) -> Option<&K> {
        match self {
            Self::Leaf(leaf) => leaf.first_key(),

            Self::Inner(inner) => inner.first_key(),
        }
    }

    /// Heap bytes attributable to this node's own entry storage.
    ///
    /// Leaves account one key plus one value per set member; inner nodes
    /// account one key plus one child pointer per pair. The leftmost child
    /// pointer is part of the node itself and is not counted, matching the
    /// accounting the engine's metrics expect.
    pub(crate) fn heap_space(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf
                .entries()
                .iter()
                .map(|e| StdMem::size_of::<K>() + e.values.len() * StdMem::size_of::<V>())
                .sum(),

            Self::Inner(inner) => {
                inner.size() * (StdMem::size_of::<K>() + StdMem::size_of::<NodePtr<K, V, FAN_OUT>>())
            }
        }
    }
}

// ============================================================================
//  Node
// ============================================================================

/// A heap-allocated tree node.
///
/// Field protocol:
/// - `latch` is always accessible.
/// - `kind` is immutable and always accessible.
/// - `prev_leaf` / `next_leaf` are the doubly linked leaf chain (null for
///   inner nodes). They are written only by a thread holding the exclusive
///   latch on the parent covering the splice boundary, and read either
///   under a latch or by the cursor, which is specified only for quiescent
///   trees.
/// - `body` requires the shared latch for `&` access and the exclusive
///   latch for `&mut` access.
pub(crate) struct Node<K, V, const FAN_OUT: usize> {
    latch: RwLatch,
    kind: NodeKind,
    prev_leaf: AtomicPtr<Node<K, V, FAN_OUT>>,
    next_leaf: AtomicPtr<Node<K, V, FAN_OUT>>,
    body: UnsafeCell<NodeBody<K, V, FAN_OUT>>,
}

impl<K, V, const FAN_OUT: usize> Node<K, V, FAN_OUT> {
    /// The node's latch.
    #[inline]
    pub(crate) fn latch(&self) -> &RwLatch {
        &self.latch
    }

    /// Whether this node is a leaf. Readable without a latch.
    #[inline]
    pub(crate) fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Shared access to the body.
    ///
    /// # Safety
    ///
    /// The caller must hold this node's latch (either mode), and the
    /// returned reference must not outlive that hold.
    #[inline]
    pub(crate) unsafe fn body(&self) -> &NodeBody<K, V, FAN_OUT> {
        // SAFETY: latch held per precondition; writers are excluded.
        unsafe { &*self.body.get() }
    }

    /// Exclusive access to the body.
    ///
    /// # Safety
    ///
    /// The caller must hold this node's latch in exclusive mode, and the
    /// returned reference must not outlive that hold.
    #[expect(clippy::mut_from_ref, reason = "exclusive latch stands in for &mut")]
    #[inline]
    pub(crate) unsafe fn body_mut(&self) -> &mut NodeBody<K, V, FAN_OUT> {
        // SAFETY: exclusive latch held per precondition; all other access
        // is excluded.
        unsafe { &mut *self.body.get() }
    }

    // ========================================================================
    //  Leaf sibling links
    // ========================================================================

    /// Backward sibling, if any. Null for inner nodes.
    #[inline]
    pub(crate) fn prev_leaf(&self) -> Option<NodePtr<K, V, FAN_OUT>> {
        NonNull::new(self.prev_leaf.load(READ_ORD)).map(NodePtr::from_raw)
    }

    /// Forward sibling, if any. Null for inner nodes.
    #[inline]
    pub(crate) fn next_leaf(&self) -> Option<NodePtr<K, V, FAN_OUT>> {
        NonNull::new(self.next_leaf.load(READ_ORD)).map(NodePtr::from_raw)
    }

    /// Point the backward sibling link at `ptr`.
    #[inline]
    pub(crate) fn set_prev_leaf(&self, ptr: Option<NodePtr<K, V, FAN_OUT>>) {
        self.prev_leaf.store(NodePtr::to_raw(ptr), WRITE_ORD);
    }

    /// Point the forward sibling link at `ptr`.
    #[inline]
    pub(crate) fn set_next_leaf(&self, ptr: Option<NodePtr<K, V, FAN_OUT>>) {
        self.next_leaf.store(NodePtr::to_raw(ptr), WRITE_ORD);
    }
}

impl<K, V, const FAN_OUT: usize> StdFmt::Debug for Node<K, V, FAN_OUT> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("latched", &self.latch.is_locked())
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  NodePtr
// ============================================================================

/// Copyable handle to a heap node.
///
/// Validity is a protocol property, not a type property: a `NodePtr` stays
/// valid while the node is reachable from the tree, and reachability only
/// changes under the exclusive latches the structural modifier holds.
pub(crate) struct NodePtr<K, V, const FAN_OUT: usize> {
    ptr: NonNull<Node<K, V, FAN_OUT>>,
}

impl<K, V, const FAN_OUT: usize> NodePtr<K, V, FAN_OUT> {
    /// Allocate a node around `body`.
    fn alloc(kind: NodeKind, body: NodeBody<K, V, FAN_OUT>) -> Self {
        let node = Box::new(Node {
            latch: RwLatch::new(),
            kind,
            prev_leaf: AtomicPtr::new(std::ptr::null_mut()),
            next_leaf: AtomicPtr::new(std::ptr::null_mut()),
            body: UnsafeCell::new(body),
        });

        Self {
            // SAFETY: Box::into_raw never returns null.
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(node)) },
        }
    }

    /// Allocate a leaf node.
    pub(crate) fn new_leaf(leaf: LeafNode<K, V, FAN_OUT>) -> Self {
        Self::alloc(NodeKind::Leaf, NodeBody::Leaf(leaf))
    }

    /// Allocate an inner node.
    pub(crate) fn new_inner(inner: InnerNode<K, V, FAN_OUT>) -> Self {
        Self::alloc(NodeKind::Inner, NodeBody::Inner(inner))
    }

    /// Wrap a non-null raw node pointer.
    #[inline]
    pub(crate) fn from_raw(ptr: NonNull<Node<K, V, FAN_OUT>>) -> Self {
        Self { ptr }
    }

    /// The raw pointer behind `ptr`, null for `None`.
    #[inline]
    pub(crate) fn to_raw(ptr: Option<Self>) -> *mut Node<K, V, FAN_OUT> {
        match ptr {
            Some(p) => p.ptr.as_ptr(),

            None => std::ptr::null_mut(),
        }
    }

    /// The raw pointer.
    #[inline]
    pub(crate) fn as_raw(self) -> *mut Node<K, V, FAN_OUT> {
        self.ptr.as_ptr()
    }

    /// Dereference the handle.
    ///
    /// # Safety
    ///
    /// The node must still be allocated: reachable from the tree, or owned
    /// by the calling code path (freshly split, or drained under exclusive
    /// latches and not yet freed).
    #[inline]
    pub(crate) unsafe fn as_ref<'a>(self) -> &'a Node<K, V, FAN_OUT> {
        // SAFETY: allocation validity per precondition.
        unsafe { self.ptr.as_ref() }
    }

    /// Free the node.
    ///
    /// # Safety
    ///
    /// The node must be unreachable from the tree (unlinked from its parent
    /// and from the sibling chain), unlatched, and never used through any
    /// handle again. Children are not freed; the caller owns them.
    pub(crate) unsafe fn dealloc(self) {
        // SAFETY: exclusive ownership per precondition.
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
}

impl<K, V, const FAN_OUT: usize> Clone for NodePtr<K, V, FAN_OUT> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V, const FAN_OUT: usize> Copy for NodePtr<K, V, FAN_OUT> {}

impl<K, V, const FAN_OUT: usize> PartialEq for NodePtr<K, V, FAN_OUT> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<K, V, const FAN_OUT: usize> Eq for NodePtr<K, V, FAN_OUT> {}

impl<K, V, const FAN_OUT: usize> StdFmt::Debug for NodePtr<K, V, FAN_OUT> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_tuple("NodePtr").field(&self.ptr).finish()
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    type TestPtr = NodePtr<i64, i64, 10>;

    #[test]
    fn test_leaf_node_kind() {
        let ptr: TestPtr = NodePtr::new_leaf(LeafNode::new());

        let node = unsafe { ptr.as_ref() };
        assert!(node.is_leaf());
        assert!(node.prev_leaf().is_none());
        assert!(node.next_leaf().is_none());

        unsafe { ptr.dealloc() };
    }

    #[test]
    fn test_inner_node_kind() {
        let leaf: TestPtr = NodePtr::new_leaf(LeafNode::new());
        let inner: TestPtr = NodePtr::new_inner(InnerNode::new(Some(leaf)));

        let node = unsafe { inner.as_ref() };
        assert!(!node.is_leaf());

        unsafe {
            inner.dealloc();
            leaf.dealloc();
        }
    }

    #[test]
    fn test_sibling_links() {
        let a: TestPtr = NodePtr::new_leaf(LeafNode::new());
        let b: TestPtr = NodePtr::new_leaf(LeafNode::new());

        unsafe {
            a.as_ref().set_next_leaf(Some(b));
            b.as_ref().set_prev_leaf(Some(a));

            assert_eq!(a.as_ref().next_leaf(), Some(b));
            assert_eq!(b.as_ref().prev_leaf(), Some(a));

            a.as_ref().set_next_leaf(None);
            assert!(a.as_ref().next_leaf().is_none());

            a.dealloc();
            b.dealloc();
        }
    }

    #[test]
    fn test_body_access_roundtrip() {
        let ptr: TestPtr = NodePtr::new_leaf(LeafNode::new());
        let node = unsafe { ptr.as_ref() };

        node.latch().lock_exclusive();
        let leaf = unsafe { node.body_mut() }.as_leaf_mut().unwrap();
        leaf.insert(3, 30);
        leaf.insert(1, 10);
        unsafe { node.latch().unlock_exclusive() };

        node.latch().lock_shared();
        let body = unsafe { node.body() };
        assert_eq!(body.size(), 2);
        assert_eq!(body.first_key(), Some(&1));
        unsafe { node.latch().unlock_shared() };

        unsafe { ptr.dealloc() };
    }
}
