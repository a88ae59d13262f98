//! Filepath: src/latch.rs
//!
//! Per-node reader/writer latch.
//!
//! Every tree node embeds one [`RwLatch`]; the tree embeds one more that
//! guards the root pointer. Crab latching acquires and releases latches in
//! non-lexical order (a child is latched before its parent is released, and
//! a retained ancestor chain is released only once a safe node is reached),
//! so the latch exposes raw acquire/release operations instead of RAII
//! guards. Pairing is the caller's responsibility; the release operations
//! are `unsafe` for that reason.
//!
//! # Concurrency Model
//!
//! 1. Readers: `lock_shared()` .. `unlock_shared()`, at most two held at a
//!    time during descent (parent and child).
//! 2. Writers: `lock_exclusive()` .. `unlock_exclusive()`, retained from the
//!    highest unsafe ancestor down to the leaf.
//!
//! Latches are never re-acquired by the thread that already holds them; the
//! descent protocol visits each node at most once per operation.

use parking_lot::RawRwLock;
use parking_lot::lock_api::RawRwLock as _;

// ============================================================================
//  RwLatch
// ============================================================================

/// A reader/writer latch for tree nodes.
///
/// Thin wrapper over [`parking_lot::RawRwLock`] with the guard-free API the
/// crab-latching protocol needs. Readers block writers and vice versa;
/// acquisition order is strictly top-down (root-pointer latch, then node
/// latches along the descent path), which keeps the protocol deadlock-free.
pub struct RwLatch {
    raw: RawRwLock,
}

impl std::fmt::Debug for RwLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLatch").finish_non_exhaustive()
    }
}

impl RwLatch {
    /// Create a new unlocked latch.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { raw: RawRwLock::INIT }
    }

    // ========================================================================
    //  Shared (reader) side
    // ========================================================================

    /// Acquire the latch in shared mode, blocking until available.
    #[inline]
    pub fn lock_shared(&self) {
        self.raw.lock_shared();
    }

    /// Release one shared acquisition.
    ///
    /// # Safety
    ///
    /// The calling thread must currently hold the latch in shared mode.
    #[inline]
    pub unsafe fn unlock_shared(&self) {
        // SAFETY: forwarded precondition.
        unsafe { self.raw.unlock_shared() };
    }

    // ========================================================================
    //  Exclusive (writer) side
    // ========================================================================

    /// Acquire the latch in exclusive mode, blocking until available.
    #[inline]
    pub fn lock_exclusive(&self) {
        self.raw.lock_exclusive();
    }

    /// Release an exclusive acquisition.
    ///
    /// # Safety
    ///
    /// The calling thread must currently hold the latch in exclusive mode.
    #[inline]
    pub unsafe fn unlock_exclusive(&self) {
        // SAFETY: forwarded precondition.
        unsafe { self.raw.unlock_exclusive() };
    }

    /// Whether the latch is held in any mode (diagnostic only; the answer is
    /// stale as soon as it is produced).
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl Default for RwLatch {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn test_new_is_unlocked() {
        let latch = RwLatch::new();
        assert!(!latch.is_locked());
    }

    #[test]
    fn test_shared_then_release() {
        let latch = RwLatch::new();

        latch.lock_shared();
        latch.lock_shared();
        assert!(latch.is_locked());

        unsafe {
            latch.unlock_shared();
            latch.unlock_shared();
        }
        assert!(!latch.is_locked());
    }

    #[test]
    fn test_exclusive_then_release() {
        let latch = RwLatch::new();

        latch.lock_exclusive();
        assert!(latch.is_locked());

        unsafe { latch.unlock_exclusive() };
        assert!(!latch.is_locked());
    }

    #[test]
    fn test_writer_excludes_readers() {
        let latch = Arc::new(RwLatch::new());
        let observed = Arc::new(AtomicUsize::new(0));

        latch.lock_exclusive();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let latch = Arc::clone(&latch);
                let observed = Arc::clone(&observed);
                thread::spawn(move || {
                    latch.lock_shared();
                    observed.fetch_add(1, Ordering::SeqCst);
                    unsafe { latch.unlock_shared() };
                })
            })
            .collect();

        // Readers must not get through while the writer holds the latch.
        thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(observed.load(Ordering::SeqCst), 0);

        unsafe { latch.unlock_exclusive() };

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(observed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_exclusive_serializes_writers() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 1_000;

        let latch = Arc::new(RwLatch::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let latch = Arc::clone(&latch);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        latch.lock_exclusive();
                        // Non-atomic read-modify-write under the latch.
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                        unsafe { latch.unlock_exclusive() };
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), THREADS * ROUNDS);
    }
}
