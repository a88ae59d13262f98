//! Filepath: src/ordering.rs
//!
//! Standard memory orderings for the crate's few atomics (root pointer,
//! leaf sibling links, pair counter).
//!
//! These constants keep ordering usage consistent and make the intent clear
//! at each access point.

use std::sync::atomic::Ordering;

/// Ordering for reading a shared pointer published by another thread.
/// Pairs with the writer's Release stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for publishing a pointer written under a latch.
/// Pairs with the reader's Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for counters with no ordering requirements of their own.
pub const RELAXED: Ordering = Ordering::Relaxed;
