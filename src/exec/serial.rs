use super::{reduce_runs, split_segments, Parallelism};

/// Single-threaded backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialExecutor;

impl Parallelism for SerialExecutor {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn threads(&self) -> usize {
        1
    }

    fn map<T, U, F>(&self, input: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        input.iter().map(f).collect()
    }

    fn compact<T, F>(&self, input: &[T], keep: F) -> Vec<T>
    where
        T: Copy + Send + Sync,
        F: Fn(&T) -> bool + Sync + Send,
    {
        input.iter().copied().filter(|x| keep(x)).collect()
    }

    fn exclusive_scan(&self, counts: &[u32]) -> (Vec<u32>, u32) {
        let mut offsets = Vec::with_capacity(counts.len());
        let mut total = 0u32;
        for &count in counts {
            offsets.push(total);
            total += count;
        }
        (offsets, total)
    }

    fn sort_by_key<K, V>(&self, pairs: &mut [(K, V)])
    where
        K: Ord + Send,
        V: Send,
    {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
    }

    fn reduce_by_key<K, V, F>(&self, sorted: &[(K, V)], combine: F) -> Vec<(K, V)>
    where
        K: Copy + Eq + Send + Sync,
        V: Copy + Send + Sync,
        F: Fn(V, V) -> V + Sync + Send,
    {
        reduce_runs(sorted, combine)
    }

    fn for_each_segment<T, F>(&self, offsets: &[u32], out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        for (i, segment) in split_segments(offsets, out).into_iter().enumerate() {
            f(i, segment);
        }
    }
}
