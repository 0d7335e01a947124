//! Data-parallel execution backends.
//!
//! Every pipeline stage is written against [`Parallelism`], a small set of
//! batch-wide primitives (map, stream compaction, exclusive scan, sort,
//! reduce-by-key, segmented scatter). Two implementations exist: a
//! single-threaded one and a rayon thread pool. The backend is chosen once
//! from configuration; data types never encode where they execute.

mod serial;
mod threaded;

pub use serial::SerialExecutor;
pub use threaded::ThreadedExecutor;

/// Batched primitives shared by all pipeline stages.
///
/// Implementations must produce identical results; only scheduling differs.
pub trait Parallelism: Send + Sync + std::fmt::Debug {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Worker count (1 for the serial backend).
    fn threads(&self) -> usize;

    /// Apply `f` to every element, preserving order.
    fn map<T, U, F>(&self, input: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send;

    /// Stable stream compaction: keep elements for which `keep` holds.
    fn compact<T, F>(&self, input: &[T], keep: F) -> Vec<T>
    where
        T: Copy + Send + Sync,
        F: Fn(&T) -> bool + Sync + Send;

    /// Exclusive prefix sum; returns the offsets and the grand total.
    fn exclusive_scan(&self, counts: &[u32]) -> (Vec<u32>, u32);

    /// Stable sort of `(key, value)` pairs by key; equal keys keep input order.
    fn sort_by_key<K, V>(&self, pairs: &mut [(K, V)])
    where
        K: Ord + Send,
        V: Send;

    /// Collapse runs of equal keys in key-sorted input with `combine`.
    fn reduce_by_key<K, V, F>(&self, sorted: &[(K, V)], combine: F) -> Vec<(K, V)>
    where
        K: Copy + Eq + Send + Sync,
        V: Copy + Send + Sync,
        F: Fn(V, V) -> V + Sync + Send;

    /// Run `f(i, segment_i)` where segment `i` is `out[offsets[i]..offsets[i + 1]]`.
    ///
    /// Segments are disjoint, so kernels may write them concurrently.
    fn for_each_segment<T, F>(&self, offsets: &[u32], out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send;
}

/// Split `out` into the disjoint segments described by `offsets` (length n + 1).
pub(crate) fn split_segments<'a, T>(offsets: &[u32], mut out: &'a mut [T]) -> Vec<&'a mut [T]> {
    let mut segments = Vec::with_capacity(offsets.len().saturating_sub(1));
    let mut consumed = 0usize;
    for window in offsets.windows(2) {
        let start = window[0] as usize;
        let end = window[1] as usize;
        debug_assert!(start >= consumed && end >= start, "offsets must be non-decreasing");
        let rest = std::mem::take(&mut out);
        let (_, rest) = rest.split_at_mut(start - consumed);
        let (segment, rest) = rest.split_at_mut(end - start);
        segments.push(segment);
        out = rest;
        consumed = end;
    }
    segments
}

/// Sequential reduce-by-key used by both backends for small inputs.
pub(crate) fn reduce_runs<K, V, F>(sorted: &[(K, V)], combine: F) -> Vec<(K, V)>
where
    K: Copy + Eq,
    V: Copy,
    F: Fn(V, V) -> V,
{
    let mut out: Vec<(K, V)> = Vec::new();
    for &(key, value) in sorted {
        match out.last_mut() {
            Some((last_key, acc)) if *last_key == key => *acc = combine(*acc, value),
            _ => out.push((key, value)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise<E: Parallelism>(exec: &E) {
        let input: Vec<u32> = (0..10_000).collect();

        let doubled = exec.map(&input, |x| x * 2);
        assert_eq!(doubled[9_999], 19_998);

        let evens = exec.compact(&input, |x| x % 2 == 0);
        assert_eq!(evens.len(), 5_000);
        assert!(evens.windows(2).all(|w| w[0] < w[1]), "compaction must be stable");

        let counts: Vec<u32> = (0..5_000).map(|i| i % 7).collect();
        let (offsets, total) = exec.exclusive_scan(&counts);
        assert_eq!(total, counts.iter().sum::<u32>());
        assert_eq!(offsets[0], 0);
        for i in 1..counts.len() {
            assert_eq!(offsets[i], offsets[i - 1] + counts[i - 1]);
        }

        let mut pairs: Vec<(u32, u64)> = (0..3_000).map(|i| ((i * 7919) % 13, 1)).collect();
        exec.sort_by_key(&mut pairs);
        assert!(pairs.windows(2).all(|w| w[0].0 <= w[1].0));
        let reduced = exec.reduce_by_key(&pairs, |a, b| a + b);
        assert_eq!(reduced.len(), 13);
        assert_eq!(reduced.iter().map(|p| p.1).sum::<u64>(), 3_000);

        let seg_offsets = vec![0u32, 3, 3, 7];
        let mut out = vec![0usize; 7];
        exec.for_each_segment(&seg_offsets, &mut out, |i, seg| seg.fill(i + 1));
        assert_eq!(out, vec![1, 1, 1, 3, 3, 3, 3]);
    }

    #[test]
    fn serial_primitives() {
        exercise(&SerialExecutor);
    }

    #[test]
    fn threaded_primitives() {
        exercise(&ThreadedExecutor::new(4).unwrap());
    }

    #[test]
    fn empty_inputs() {
        let exec = ThreadedExecutor::new(2).unwrap();
        let (offsets, total) = exec.exclusive_scan(&[]);
        assert!(offsets.is_empty());
        assert_eq!(total, 0);
        assert!(exec.reduce_by_key::<u32, u32, _>(&[], |a, b| a + b).is_empty());
        let mut out: Vec<u8> = Vec::new();
        exec.for_each_segment(&[0], &mut out, |_, _| unreachable!());
    }
}
