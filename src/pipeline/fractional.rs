use super::cigar::{active_read_mask, BaseErrorFlags};
use super::stats::{PipelineStatistics, Stage, StageTimer};
use crate::covariates::EventType;
use crate::exec::Parallelism;
use crate::genomics::ReadBatch;

/// Per-base error values for the three event types.
#[derive(Debug, Clone, Default)]
pub struct FractionalErrors {
    /// Indexed by base, then by [`EventType::index`].
    pub values: Vec<[f64; 3]>,
}

impl FractionalErrors {
    /// Error value of `event` at batch base `base`.
    pub fn get(&self, base: usize, event: EventType) -> f64 {
        self.values[base][event.index()]
    }
}

/// Spread errors over BAQ uncertainty blocks.
///
/// A base is uncertain when `baq` differs from `reported`. Each uncertain
/// block, widened by one base on both sides, shares its total error count
/// evenly; bases outside blocks keep their own indicator.
pub fn fractional_errors(errors: &[bool], reported: &[u8], baq: &[u8], out: &mut [f64]) {
    debug_assert!(errors.len() == out.len() && baq.len() == out.len());
    let spread = |out: &mut [f64], first: usize, last: usize| {
        let start = first.saturating_sub(1);
        let total = errors[start..=last].iter().filter(|&&e| e).count() as f64;
        let share = total / (last - start + 1) as f64;
        out[start..=last].fill(share);
    };

    out.fill(0.0);
    let mut block_start = None;
    for i in 0..out.len() {
        let uncertain = baq[i] != reported[i];
        match (uncertain, block_start) {
            (false, None) => out[i] = f64::from(u8::from(errors[i])),
            (false, Some(start)) => {
                spread(out, start, i);
                block_start = None;
            }
            (true, None) => block_start = Some(i),
            (true, Some(_)) => {}
        }
    }
    if let Some(start) = block_start {
        spread(out, start, out.len() - 1);
    }
}

/// Fractional errors of every active read, for all three event types.
pub fn compute_fractional_errors<E: Parallelism>(
    exec: &E,
    batch: &ReadBatch,
    active: &[u32],
    flags: &[BaseErrorFlags],
    baq_qualities: &[u8],
    out: &mut FractionalErrors,
    stats: &mut PipelineStatistics,
) {
    let timer = StageTimer::start(Stage::FractionalError);
    let is_active = active_read_mask(batch.len(), active);
    out.values.clear();
    out.values.resize(batch.total_bases(), [0.0; 3]);

    exec.for_each_segment(batch.base_offsets(), &mut out.values, |read, segment| {
        if !is_active[read] {
            return;
        }
        let range = batch.base_range(read);
        let reported = batch.read_qualities(read);
        let baq = &baq_qualities[range.clone()];
        let flags = &flags[range];

        let mut indicator = vec![false; segment.len()];
        let mut values = vec![0.0; segment.len()];
        for event in EventType::ALL {
            for (slot, f) in indicator.iter_mut().zip(flags) {
                *slot = match event {
                    EventType::Mismatch => f.snp,
                    EventType::Insertion => f.insertion,
                    EventType::Deletion => f.deletion,
                };
            }
            fractional_errors(&indicator, reported, baq, &mut values);
            for (dst, &v) in segment.iter_mut().zip(&values) {
                dst[event.index()] = v;
            }
        }
    });
    timer.stop(stats);
}
