//! Benchmarks for `BPlusTree` using Divan.
//!
//! Run with: `cargo bench --bench tree`

use bptree::BPlusTree;
use divan::{Bencher, black_box};

fn main() {
    divan::main();
}

// =============================================================================
// Construction
// =============================================================================

#[divan::bench_group]
mod construction {
    use super::BPlusTree;

    #[divan::bench]
    fn new_tree() -> BPlusTree<u64, u64> {
        BPlusTree::new()
    }

    #[divan::bench]
    fn default_tree() -> BPlusTree<u64, u64> {
        BPlusTree::default()
    }
}

// =============================================================================
// Insert Operations
// =============================================================================

#[divan::bench_group]
mod insert {
    use super::{BPlusTree, Bencher, black_box};

    #[divan::bench]
    fn insert_single(bencher: Bencher) {
        bencher
            .with_inputs(BPlusTree::<u64, u64>::new)
            .bench_local_values(|tree| {
                let _ = tree.insert(black_box(42), black_box(42));
                tree
            });
    }

    #[divan::bench(args = [1_000, 100_000])]
    fn insert_sequential(bencher: Bencher, n: u64) {
        bencher
            .with_inputs(BPlusTree::<u64, u64>::new)
            .bench_local_values(|tree| {
                for k in 0..n {
                    let _ = tree.insert(black_box(k), k);
                }
                tree
            });
    }

    #[divan::bench(args = [1_000, 100_000])]
    fn insert_scattered(bencher: Bencher, n: u64) {
        bencher
            .with_inputs(BPlusTree::<u64, u64>::new)
            .bench_local_values(move |tree| {
                for i in 0..n {
                    let k = i.wrapping_mul(0x9E37_79B9_7F4A_7C15);
                    let _ = tree.insert(black_box(k), i);
                }
                tree
            });
    }

    #[divan::bench]
    fn insert_duplicate_value(bencher: Bencher) {
        bencher
            .with_inputs(|| {
                let tree = BPlusTree::<u64, u64>::new();
                let _ = tree.insert(42, 1);
                tree
            })
            .bench_local_values(|tree| {
                // Set semantics: a no-op that still descends and latches.
                let _ = tree.insert(black_box(42), black_box(1));
                tree
            });
    }
}

// =============================================================================
// Lookup Operations
// =============================================================================

#[divan::bench_group]
mod lookup {
    use super::{BPlusTree, Bencher, black_box};

    fn filled(n: u64) -> BPlusTree<u64, u64> {
        let tree = BPlusTree::new();
        for k in 0..n {
            let _ = tree.insert(k, k);
        }
        tree
    }

    #[divan::bench(args = [1_000, 100_000])]
    fn get_hit(bencher: Bencher, n: u64) {
        let tree = filled(n);
        let mut k = 0;

        bencher.bench_local(|| {
            k = (k + 7) % n;
            black_box(tree.get(black_box(&k)))
        });
    }

    #[divan::bench(args = [1_000, 100_000])]
    fn get_miss(bencher: Bencher, n: u64) {
        let tree = filled(n);

        bencher.bench_local(|| black_box(tree.get(black_box(&u64::MAX))));
    }

    #[divan::bench(args = [100_000])]
    fn scan_all(bencher: Bencher, n: u64) {
        let tree = filled(n);

        bencher.bench_local(|| {
            let mut count = 0usize;
            for pair in tree.iter() {
                black_box(pair);
                count += 1;
            }
            count
        });
    }
}

// =============================================================================
// Remove Operations
// =============================================================================

#[divan::bench_group]
mod remove {
    use super::{BPlusTree, Bencher, black_box};

    #[divan::bench(args = [1_000])]
    fn remove_all_sequential(bencher: Bencher, n: u64) {
        bencher
            .with_inputs(|| {
                let tree = BPlusTree::<u64, u64>::new();
                for k in 0..n {
                    let _ = tree.insert(k, k);
                }
                tree
            })
            .bench_local_values(|tree| {
                for k in 0..n {
                    let _ = tree.remove(black_box(&k), &k);
                }
                tree
            });
    }
}

// =============================================================================
// Concurrent Throughput
// =============================================================================

#[divan::bench_group]
mod concurrent {
    use std::sync::Arc;
    use std::thread;

    use super::{BPlusTree, Bencher, black_box};

    #[divan::bench(args = [2, 4, 8])]
    fn concurrent_inserts(bencher: Bencher, threads: u64) {
        const KEYS_PER_THREAD: u64 = 10_000;

        bencher
            .with_inputs(|| Arc::new(BPlusTree::<u64, u64>::new()))
            .bench_local_values(|tree| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let tree = Arc::clone(&tree);
                        thread::spawn(move || {
                            for i in 0..KEYS_PER_THREAD {
                                let k = i * threads + t;
                                let _ = tree.insert(black_box(k), k);
                            }
                        })
                    })
                    .collect();

                for h in handles {
                    h.join().unwrap();
                }
                tree
            });
    }

    #[divan::bench(args = [4])]
    fn concurrent_reads(bencher: Bencher, threads: u64) {
        const KEYS: u64 = 100_000;

        let tree = Arc::new(BPlusTree::<u64, u64>::new());
        for k in 0..KEYS {
            let _ = tree.insert(k, k);
        }

        bencher.bench_local(|| {
            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let tree = Arc::clone(&tree);
                    thread::spawn(move || {
                        let mut k = t;
                        for _ in 0..10_000 {
                            k = (k * 31 + 7) % KEYS;
                            black_box(tree.get(&k));
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        });
    }
}
