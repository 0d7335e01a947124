use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder, ThreadPoolBuildError};

use super::{reduce_runs, split_segments, Parallelism};

/// Inputs shorter than this run inline on the calling thread.
const PARALLEL_THRESHOLD: usize = 4096;

/// Rayon-backed multi-threaded backend with a dedicated pool.
#[derive(Debug, Clone)]
pub struct ThreadedExecutor {
    pool: Arc<ThreadPool>,
}

impl ThreadedExecutor {
    /// Build a pool with `threads` workers (0 = rayon default).
    pub fn new(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("bqsr-worker-{i}"))
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

impl Parallelism for ThreadedExecutor {
    fn name(&self) -> &'static str {
        "threaded"
    }

    fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn map<T, U, F>(&self, input: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        self.pool.install(|| input.par_iter().map(f).collect())
    }

    fn compact<T, F>(&self, input: &[T], keep: F) -> Vec<T>
    where
        T: Copy + Send + Sync,
        F: Fn(&T) -> bool + Sync + Send,
    {
        self.pool
            .install(|| input.par_iter().copied().filter(|x| keep(x)).collect())
    }

    fn exclusive_scan(&self, counts: &[u32]) -> (Vec<u32>, u32) {
        if counts.len() < PARALLEL_THRESHOLD {
            let mut offsets = Vec::with_capacity(counts.len());
            let mut total = 0u32;
            for &c in counts {
                offsets.push(total);
                total += c;
            }
            return (offsets, total);
        }

        // Two passes: per-chunk totals, then each chunk scans from its base.
        let chunk = counts.len().div_ceil(self.threads().max(1) * 4).max(1024);
        self.pool.install(|| {
            let chunk_sums: Vec<u32> = counts.par_chunks(chunk).map(|c| c.iter().sum()).collect();
            let mut bases = Vec::with_capacity(chunk_sums.len());
            let mut total = 0u32;
            for s in &chunk_sums {
                bases.push(total);
                total += s;
            }

            let mut offsets = vec![0u32; counts.len()];
            offsets
                .par_chunks_mut(chunk)
                .zip(counts.par_chunks(chunk))
                .zip(bases.par_iter())
                .for_each(|((out, input), &base)| {
                    let mut running = base;
                    for (o, &c) in out.iter_mut().zip(input) {
                        *o = running;
                        running += c;
                    }
                });
            (offsets, total)
        })
    }

    fn sort_by_key<K, V>(&self, pairs: &mut [(K, V)])
    where
        K: Ord + Send,
        V: Send,
    {
        self.pool
            .install(|| pairs.par_sort_by(|a, b| a.0.cmp(&b.0)));
    }

    fn reduce_by_key<K, V, F>(&self, sorted: &[(K, V)], combine: F) -> Vec<(K, V)>
    where
        K: Copy + Eq + Send + Sync,
        V: Copy + Send + Sync,
        F: Fn(V, V) -> V + Sync + Send,
    {
        if sorted.len() < PARALLEL_THRESHOLD {
            return reduce_runs(sorted, combine);
        }
        self.pool.install(|| {
            sorted
                .par_chunk_by(|a, b| a.0 == b.0)
                .map(|run| {
                    let value = run[1..].iter().fold(run[0].1, |acc, x| combine(acc, x.1));
                    (run[0].0, value)
                })
                .collect()
        })
    }

    fn for_each_segment<T, F>(&self, offsets: &[u32], out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        let segments = split_segments(offsets, out);
        self.pool.install(|| {
            segments
                .into_par_iter()
                .enumerate()
                .for_each(|(i, segment)| f(i, segment));
        });
    }
}
