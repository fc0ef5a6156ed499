//! Benchmarks for the leaf-update engine using Divan.
//!
//! Run with: `cargo bench --bench engine`
//! With mimalloc: `cargo bench --bench engine --features mimalloc`

// Use alternative allocator if feature is enabled
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use divan::{Bencher, black_box};

use bwtree::BwTree;

fn main() {
    divan::main();
}

// =============================================================================
// Single-threaded update paths
// =============================================================================

#[divan::bench_group]
mod updates {
    use super::{Bencher, BwTree, black_box};

    /// Delta appends only: a threshold high enough that consolidation never
    /// fires within the measured batch.
    #[divan::bench]
    fn delta_append_1k(bencher: Bencher) {
        bencher
            .with_inputs(|| BwTree::<u64, u64>::with_consolidation(2048))
            .bench_values(|tree| {
                for i in 0..1000u64 {
                    black_box(tree.insert(i, i).unwrap());
                }
                tree
            });
    }

    /// The full delta/consolidate/reclaim cycle at the default threshold.
    #[divan::bench]
    fn consolidating_insert_1k(bencher: Bencher) {
        bencher
            .with_inputs(|| BwTree::<u64, u64>::with_consolidation(8))
            .bench_values(|tree| {
                for i in 0..1000u64 {
                    black_box(tree.insert(i, i).unwrap());
                }
                tree
            });
    }

    /// Worst-case write amplification: every update rewrites the full leaf.
    #[divan::bench]
    fn consolidate_every_update_1k(bencher: Bencher) {
        bencher
            .with_inputs(|| BwTree::<u64, u64>::with_consolidation(1))
            .bench_values(|tree| {
                for i in 0..1000u64 {
                    black_box(tree.insert(i, i).unwrap());
                }
                tree
            });
    }

    #[divan::bench]
    fn insert_delete_cycle_1k(bencher: Bencher) {
        bencher
            .with_inputs(|| BwTree::<u64, u64>::with_consolidation(8))
            .bench_values(|tree| {
                for i in 0..1000u64 {
                    tree.insert(i, i).unwrap();
                    black_box(tree.remove(&i).unwrap());
                }
                tree
            });
    }
}

// =============================================================================
// Reads
// =============================================================================

#[divan::bench_group]
mod reads {
    use super::{Bencher, BwTree, black_box};

    /// Cache-served gets against a populated, consolidated leaf.
    #[divan::bench]
    fn get_hit_1k(bencher: Bencher) {
        bencher
            .with_inputs(|| {
                let tree = BwTree::<u64, u64>::with_consolidation(8);
                for i in 0..1000u64 {
                    tree.insert(i, i).unwrap();
                }
                tree
            })
            .bench_values(|tree| {
                for i in 0..1000u64 {
                    black_box(tree.get(&i).unwrap());
                }
                tree
            });
    }

    #[divan::bench]
    fn get_miss_1k(bencher: Bencher) {
        bencher
            .with_inputs(|| {
                let tree = BwTree::<u64, u64>::with_consolidation(8);
                for i in 0..1000u64 {
                    tree.insert(i, i).unwrap();
                }
                tree
            })
            .bench_values(|tree| {
                for i in 1000..2000u64 {
                    black_box(tree.get(&i).unwrap());
                }
                tree
            });
    }
}

// =============================================================================
// Contention
// =============================================================================

#[divan::bench_group]
mod contention {
    use std::sync::Arc;
    use std::thread;

    use super::{Bencher, BwTree, black_box};

    /// All threads hammer the same leaf; losers pay the retry protocol.
    #[divan::bench(args = [2, 4, 8])]
    fn racing_inserts(bencher: Bencher, threads: u64) {
        bencher
            .with_inputs(|| Arc::new(BwTree::<u64, u64>::with_consolidation(8)))
            .bench_values(|tree| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let tree = Arc::clone(&tree);
                        thread::spawn(move || {
                            for i in 0..100u64 {
                                black_box(tree.insert(t * 1000 + i, i).unwrap());
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
}
