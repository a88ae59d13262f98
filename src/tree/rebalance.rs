//! Filepath: src/tree/rebalance.rs
//!
//! Delete path: removal, borrow-or-coalesce rebalance, and root collapse.
//!
//! # Protocol
//!
//! Deletes always descend pessimistically (safety predicate: one fewer
//! entry cannot underflow). After removing the pair from the leaf:
//!
//! - a root leaf is allowed any occupancy; when it drains, the root
//!   pointer returns to null (the empty-tree representation);
//! - an underflowed non-root leaf first tries to borrow the closest entry
//!   from a same-parent sibling (left, then right), rotating the parent
//!   separator; failing that it coalesces with a sibling, always draining
//!   the right-hand participant into the left-hand one;
//! - the parent loses one entry per coalesce, so rebalance ascends the
//!   retained chain while the current inner node is underflowed, with the
//!   inner-level borrow rotating a (separator, child) pair through the
//!   parent and the inner-level coalesce folding the parent separator in
//!   as a real entry above the drained node's leftmost child;
//! - an inner root that drops to a single child is retired and that child
//!   becomes the new root (the tree shrinks by one level).
//!
//! # Sibling latching
//!
//! A probed sibling stays latched exclusive from the probe to the action
//! taken on it. The occupancy a probe observed must still hold when the
//! borrow or coalesce runs: writers already below the parent can reach a
//! sibling without passing the parent latch, so releasing it between
//! decision and action would let them change the arithmetic the decision
//! was based on. Siblings are acquired left before right; only the holder
//! of the parent's exclusive latch ever latches two siblings, so the
//! order cannot deadlock.

use crate::node::NodeBody;
use crate::tracing_helpers::debug_log;
use crate::tree::BPlusTree;
use crate::tree::traverse::{LatchedPath, WriteIntent};

impl<K: Ord + Clone, V: Eq + Clone, const FAN_OUT: usize> BPlusTree<K, V, FAN_OUT> {
    /// Remove the exact `(key, value)` pair. Returns `true` iff it was
    /// present.
    pub(crate) fn remove_impl(&self, key: &K, value: &V) -> bool {
        let mut path = self.descend_exclusive(key, WriteIntent::Remove);

        if path.is_empty() {
            // Empty tree.
            return false;
        }

        let leaf_ptr = path.last();
        // SAFETY: the path holds the leaf latched exclusive.
        let leaf_node = unsafe { leaf_ptr.as_ref() };
        let leaf = unsafe { leaf_node.body_mut() }
            .as_leaf_mut()
            .expect("descent terminates at a leaf");

        if !leaf.remove(key, value) {
            return false;
        }
        self.count_pair_removed();

        // Root identity is stable while this thread holds the leaf's
        // exclusive latch: replacing the root requires the old root's
        // latch. A stale read is only possible when the leaf was safe for
        // remove, in which case neither branch below has work to do.
        if self.root_ptr() == Some(leaf_ptr) {
            // A root leaf is allowed any occupancy; when it drains, the
            // tree returns to the empty representation.
            if leaf.size() == 0 {
                debug_assert!(
                    path.holds_root_latch(),
                    "a root leaf that can drain is never safe for remove"
                );

                self.set_root(None);
                let ptr = path.pop_release();
                // SAFETY: unlinked from the tree under the still-held root
                // latch; no other handle can reach it.
                unsafe { ptr.dealloc() };

                debug_log!("root leaf drained; tree is empty");
            }
            return true;
        }

        if !leaf.is_underflow() {
            return true;
        }

        // The removed key routes to the underflowed node at every level
        // (that is how the descent reached it, and no lower-level
        // rebalance moves a path node's slot in its own parent), so it
        // serves as the routing pivot for the whole ascent.
        self.rebalance_leaf(&mut path, key);
        self.ascend(&mut path, key);
        true
    }

    // ========================================================================
    //  Leaf level
    // ========================================================================

    /// Rebalance the underflowed non-root leaf at the end of `path`.
    ///
    /// On coalesce the drained node is popped from the path and freed, so
    /// the path ends at the parent afterwards; on borrow the parent's
    /// occupancy is untouched and no ascent will be needed.
    fn rebalance_leaf(&self, path: &mut LatchedPath<'_, K, V, FAN_OUT>, pivot: &K) {
        debug_assert!(path.len() >= 2, "underflowed leaf has a retained parent");

        let leaf_ptr = path.node(path.len() - 1);
        let parent_ptr = path.node(path.len() - 2);

        // SAFETY: both latched exclusive by the path; distinct nodes.
        let leaf_node = unsafe { leaf_ptr.as_ref() };
        let leaf = unsafe { leaf_node.body_mut() }
            .as_leaf_mut()
            .expect("rebalance_leaf runs on a leaf");
        let parent = unsafe { parent_ptr.as_ref().body_mut() }
            .as_inner_mut()
            .expect("parent of a leaf is an inner node");

        // Probe the left sibling; it stays latched through the decision.
        let left_ptr = parent.predecessor_of(pivot);
        if let Some(lp) = left_ptr {
            // SAFETY: owned by the exclusively latched parent.
            unsafe { lp.as_ref() }.latch().lock_exclusive();

            let left = unsafe { lp.as_ref().body_mut() }
                .as_leaf_mut()
                .expect("siblings of a leaf are leaves");

            if !left.will_underflow() {
                // Its last entry moves over; the separator covering this
                // leaf becomes the borrowed key.
                let entry = left.pop_last_entry();
                parent.replace_key(pivot, entry.key.clone());
                leaf.insert_entry(entry);

                // SAFETY: latched above.
                unsafe { lp.as_ref().latch().unlock_exclusive() };
                debug_log!("leaf borrow from left");
                return;
            }
        }

        // Probe the right sibling likewise.
        let right_ptr = parent.successor_of(pivot);
        if let Some(rp) = right_ptr {
            // SAFETY: owned by the exclusively latched parent.
            unsafe { rp.as_ref() }.latch().lock_exclusive();

            let right = unsafe { rp.as_ref().body_mut() }
                .as_leaf_mut()
                .expect("siblings of a leaf are leaves");

            if !right.will_underflow() {
                // Its first entry moves over; the separator covering the
                // right sibling becomes its new first key.
                let entry = right.pop_first_entry();
                let new_first = right
                    .first_key()
                    .expect("lender keeps at least minimum occupancy")
                    .clone();
                parent.replace_key(&entry.key, new_first);
                leaf.insert_entry(entry);

                // SAFETY: both latched above.
                unsafe { rp.as_ref().latch().unlock_exclusive() };
                if let Some(lp) = left_ptr {
                    unsafe { lp.as_ref().latch().unlock_exclusive() };
                }
                debug_log!("leaf borrow from right");
                return;
            }
        }

        // Neither sibling can lend: coalesce. The right-hand participant
        // drains into the left-hand one and is destroyed.
        if let Some(lp) = left_ptr {
            if let Some(rp) = right_ptr {
                // SAFETY: latched above; a left-side merge leaves it alone.
                unsafe { rp.as_ref().latch().unlock_exclusive() };
            }

            // SAFETY: still latched from the probe.
            let left = unsafe { lp.as_ref().body_mut() }
                .as_leaf_mut()
                .expect("siblings of a leaf are leaves");

            let (_, unlinked) = parent.remove_entry_covering(pivot);
            debug_assert!(unlinked == leaf_ptr, "separator slot routed elsewhere");

            left.append_entries(leaf.take_entries());

            let after = leaf_node.next_leaf();
            // SAFETY: still latched from the probe.
            unsafe { lp.as_ref() }.set_next_leaf(after);
            if let Some(after_ptr) = after {
                // SAFETY: splice boundary covered by the parent's latch.
                unsafe { after_ptr.as_ref() }.set_prev_leaf(Some(lp));
            }

            // SAFETY: latched at the probe.
            unsafe { lp.as_ref().latch().unlock_exclusive() };

            let drained = path.pop_release();
            debug_assert!(drained == leaf_ptr);
            // SAFETY: unlinked from parent and chain; unreachable.
            unsafe { drained.dealloc() };

            debug_log!("leaf coalesced into left sibling");
        } else {
            let rp = right_ptr.expect("a non-root leaf has at least one sibling");

            // SAFETY: still latched from the probe.
            let right_node = unsafe { rp.as_ref() };
            let right = unsafe { right_node.body_mut() }
                .as_leaf_mut()
                .expect("siblings of a leaf are leaves");

            let right_first = right
                .first_key()
                .expect("non-root leaf is non-empty")
                .clone();
            let (_, unlinked) = parent.remove_entry_covering(&right_first);
            debug_assert!(unlinked == rp, "separator slot routed elsewhere");

            leaf.append_entries(right.take_entries());

            let after = right_node.next_leaf();
            leaf_node.set_next_leaf(after);
            if let Some(after_ptr) = after {
                // SAFETY: splice boundary covered by the parent's latch.
                unsafe { after_ptr.as_ref() }.set_prev_leaf(Some(leaf_ptr));
            }

            // SAFETY: latched at the probe.
            unsafe { right_node.latch().unlock_exclusive() };
            // SAFETY: unlinked from parent and chain; unreachable.
            unsafe { rp.dealloc() };

            // The surviving leaf is done; drop it from the path so the
            // ascent starts at the parent.
            let survivor = path.pop_release();
            debug_assert!(survivor == leaf_ptr);

            debug_log!("right sibling coalesced into leaf");
        }
    }

    // ========================================================================
    //  Inner level
    // ========================================================================

    /// Walk the retained chain upward while the deepest node is an
    /// underflowed inner node; collapse the root if it ends up with a
    /// single child.
    fn ascend(&self, path: &mut LatchedPath<'_, K, V, FAN_OUT>, pivot: &K) {
        loop {
            if path.is_empty() {
                return;
            }

            let node_ptr = path.last();
            // SAFETY: latched exclusive by the path.
            let node = unsafe { node_ptr.as_ref() };

            let inner = match unsafe { node.body() } {
                // A leaf at the end of the path means no coalesce happened
                // below it; nothing to do.
                NodeBody::Leaf(_) => return,

                NodeBody::Inner(inner) => inner,
            };

            if path.len() == 1 {
                // Topmost retained node: the root (with the root latch
                // held), or an ancestor that was safe at descent time and
                // therefore cannot be underflowed now.
                if path.holds_root_latch() && inner.size() == 0 {
                    let child = unsafe { node.body_mut() }
                        .as_inner_mut()
                        .expect("checked inner above")
                        .take_leftmost()
                        .expect("inner root keeps its leftmost child");

                    self.set_root(Some(child));
                    let retired = path.pop_release();
                    // SAFETY: unlinked from the tree under the root latch.
                    unsafe { retired.dealloc() };

                    debug_log!("root collapsed; tree shrank a level");
                }
                return;
            }

            if !inner.is_underflow() {
                return;
            }

            if self.rebalance_inner(path, pivot) {
                // Resolved by borrow: parent occupancy unchanged.
                return;
            }
        }
    }

    /// One borrow-or-coalesce step at the underflowed inner node at the
    /// end of `path`. Returns `true` when a borrow resolved the underflow
    /// (no ascent needed), `false` after a coalesce (the parent lost an
    /// entry and must be examined next).
    fn rebalance_inner(&self, path: &mut LatchedPath<'_, K, V, FAN_OUT>, pivot: &K) -> bool {
        debug_assert!(path.len() >= 2, "underflowed inner node has a retained parent");

        let node_ptr = path.node(path.len() - 1);
        let parent_ptr = path.node(path.len() - 2);

        // SAFETY: both latched exclusive by the path; distinct nodes.
        let node = unsafe { node_ptr.as_ref().body_mut() }
            .as_inner_mut()
            .expect("rebalance_inner runs on an inner node");
        let parent = unsafe { parent_ptr.as_ref().body_mut() }
            .as_inner_mut()
            .expect("ancestors are inner nodes");

        // Probe the left sibling; it stays latched through the decision.
        let left_ptr = parent.predecessor_of(pivot);
        if let Some(lp) = left_ptr {
            // SAFETY: owned by the exclusively latched parent.
            unsafe { lp.as_ref() }.latch().lock_exclusive();

            let left = unsafe { lp.as_ref().body_mut() }
                .as_inner_mut()
                .expect("siblings of an inner node are inner nodes");

            if !left.will_underflow() {
                // Its last (key, child) rotates through the parent
                // separator.
                let (lent_key, lent_child) = left.pop_last_entry();
                let old_separator = parent.replace_key(pivot, lent_key);

                let old_leftmost = node
                    .take_leftmost()
                    .expect("leftmost child set during rebalance");
                node.set_leftmost(Some(lent_child));
                node.insert(old_separator, old_leftmost);

                // SAFETY: latched above.
                unsafe { lp.as_ref().latch().unlock_exclusive() };
                debug_log!("inner borrow from left");
                return true;
            }
        }

        // Probe the right sibling likewise.
        let right_ptr = parent.successor_of(pivot);
        if let Some(rp) = right_ptr {
            // SAFETY: owned by the exclusively latched parent.
            unsafe { rp.as_ref() }.latch().lock_exclusive();

            let right = unsafe { rp.as_ref().body_mut() }
                .as_inner_mut()
                .expect("siblings of an inner node are inner nodes");

            if !right.will_underflow() {
                // Its leftmost child migrates under the old parent
                // separator; its first separator moves up.
                let migrant = right
                    .take_leftmost()
                    .expect("leftmost child set during rebalance");
                let (lifted_key, lifted_child) = right.pop_first_entry();
                right.set_leftmost(Some(lifted_child));

                let old_separator = parent.replace_key(&lifted_key, lifted_key.clone());
                node.insert(old_separator, migrant);

                // SAFETY: both latched above.
                unsafe { rp.as_ref().latch().unlock_exclusive() };
                if let Some(lp) = left_ptr {
                    unsafe { lp.as_ref().latch().unlock_exclusive() };
                }
                debug_log!("inner borrow from right");
                return true;
            }
        }

        // Coalesce: fold the parent separator in as a real entry above the
        // drained node's leftmost child, then append its entries.
        if let Some(lp) = left_ptr {
            if let Some(rp) = right_ptr {
                // SAFETY: latched above; a left-side merge leaves it alone.
                unsafe { rp.as_ref().latch().unlock_exclusive() };
            }

            // SAFETY: still latched from the probe.
            let left = unsafe { lp.as_ref().body_mut() }
                .as_inner_mut()
                .expect("siblings of an inner node are inner nodes");

            let (separator, unlinked) = parent.remove_entry_covering(pivot);
            debug_assert!(unlinked == node_ptr, "separator slot routed elsewhere");

            let orphan = node
                .take_leftmost()
                .expect("leftmost child set during rebalance");
            left.insert(separator, orphan);
            left.append_entries(node.take_entries());

            // SAFETY: latched at the probe.
            unsafe { lp.as_ref().latch().unlock_exclusive() };

            let drained = path.pop_release();
            debug_assert!(drained == node_ptr);
            // SAFETY: unlinked from parent; unreachable.
            unsafe { drained.dealloc() };

            debug_log!("inner coalesced into left sibling");
        } else {
            let rp = right_ptr.expect("a non-root inner node has at least one sibling");

            // SAFETY: still latched from the probe.
            let right = unsafe { rp.as_ref().body_mut() }
                .as_inner_mut()
                .expect("siblings of an inner node are inner nodes");

            let right_pivot = right
                .first_key()
                .expect("non-root inner node keeps at least one separator")
                .clone();
            let (separator, unlinked) = parent.remove_entry_covering(&right_pivot);
            debug_assert!(unlinked == rp, "separator slot routed elsewhere");

            let orphan = right
                .take_leftmost()
                .expect("leftmost child set during rebalance");
            node.insert(separator, orphan);
            node.append_entries(right.take_entries());

            // SAFETY: latched at the probe.
            unsafe { rp.as_ref().latch().unlock_exclusive() };
            // SAFETY: unlinked from parent; unreachable.
            unsafe { rp.dealloc() };

            let survivor = path.pop_release();
            debug_assert!(survivor == node_ptr);

            debug_log!("right sibling coalesced into inner node");
        }

        false
    }
}
