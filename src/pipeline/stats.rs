use std::fmt;
use std::ops::AddAssign;
use std::time::{Duration, Instant};

use tracing::info;

/// Pipeline stages with their own timing series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Batch decoding.
    Io,
    /// Read filter.
    ReadFilter,
    /// Known-variant filter.
    SnpFilter,
    /// Per-base quality filter.
    BpFilter,
    /// CIGAR expansion.
    CigarExpansion,
    /// Base alignment quality.
    Baq,
    /// Fractional error arrays.
    FractionalError,
    /// Covariate emission and merge.
    Covariates,
    /// Report rendering.
    Output,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 9] = [
        Stage::Io,
        Stage::ReadFilter,
        Stage::SnpFilter,
        Stage::BpFilter,
        Stage::CigarExpansion,
        Stage::Baq,
        Stage::FractionalError,
        Stage::Covariates,
        Stage::Output,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Io => "io",
            Stage::ReadFilter => "read_filter",
            Stage::SnpFilter => "snp_filter",
            Stage::BpFilter => "bp_filter",
            Stage::CigarExpansion => "cigar_expansion",
            Stage::Baq => "baq",
            Stage::FractionalError => "fractional_error",
            Stage::Covariates => "covariates",
            Stage::Output => "output",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-batch durations of one stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    samples: Vec<Duration>,
}

impl TimeSeries {
    /// Append one sample.
    pub fn add(&mut self, sample: Duration) {
        self.samples.push(sample);
    }

    /// Recorded samples.
    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    /// Sum of all samples.
    pub fn total(&self) -> Duration {
        self.samples.iter().sum()
    }

    /// Longest sample.
    pub fn max(&self) -> Duration {
        self.samples.iter().copied().max().unwrap_or_default()
    }

    /// Mean sample, zero when empty.
    pub fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.total() / self.samples.len() as u32
    }
}

impl AddAssign<&TimeSeries> for TimeSeries {
    fn add_assign(&mut self, rhs: &TimeSeries) {
        self.samples.extend_from_slice(&rhs.samples);
    }
}

/// Started stage clock; call [`stop`](Self::stop) to record it.
#[derive(Debug)]
#[must_use]
pub struct StageTimer {
    stage: Stage,
    started: Instant,
}

impl StageTimer {
    /// Start timing `stage`.
    pub fn start(stage: Stage) -> Self {
        Self {
            stage,
            started: Instant::now(),
        }
    }

    /// Record the elapsed time into `stats`.
    pub fn stop(self, stats: &mut PipelineStatistics) {
        stats.record(self.stage, self.started.elapsed());
    }
}

/// Run counters and stage timings.
///
/// Stages receive a batch-local instance; the driver folds it into the run
/// totals with `+=` once the batch completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStatistics {
    /// Reads decoded.
    pub total_reads: u64,
    /// Reads removed by the read filter.
    pub filtered_reads: u64,
    /// Reads that went through the BAQ HMM.
    pub baq_reads: u64,
    /// Reads whose BAQ computation diverged and was discarded.
    pub baq_failures: u64,
    /// Batches processed.
    pub num_batches: u64,
    /// Bases that contributed mismatch observations.
    pub active_bases: u64,
    /// Bases deactivated because they overlap a known variant.
    pub excluded_variant_bases: u64,
    /// Reads dropped because their read-group id exceeds the key width.
    pub read_group_overflow: u64,
    timings: [TimeSeries; Stage::ALL.len()],
}

impl PipelineStatistics {
    /// Fresh, zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch-local statistics for a batch of `total_reads` reads.
    pub fn for_batch(total_reads: u64) -> Self {
        Self {
            total_reads,
            num_batches: 1,
            ..Self::default()
        }
    }

    /// Append a timing sample for `stage`.
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        self.timings[stage.index()].add(elapsed);
    }

    /// Timing series for `stage`.
    pub fn timing(&self, stage: Stage) -> &TimeSeries {
        &self.timings[stage.index()]
    }

    /// Log counters and per-stage totals.
    pub fn log_summary(&self) {
        info!(
            batches = self.num_batches,
            reads = self.total_reads,
            filtered = self.filtered_reads,
            baq_reads = self.baq_reads,
            baq_failures = self.baq_failures,
            active_bases = self.active_bases,
            excluded_variant_bases = self.excluded_variant_bases,
            read_group_overflow = self.read_group_overflow,
            "pipeline statistics"
        );
        for stage in Stage::ALL {
            let series = self.timing(stage);
            if series.samples().is_empty() {
                continue;
            }
            info!(
                stage = stage.name(),
                total_ms = series.total().as_secs_f64() * 1e3,
                mean_ms = series.mean().as_secs_f64() * 1e3,
                max_ms = series.max().as_secs_f64() * 1e3,
                "stage timing"
            );
        }
    }
}

impl AddAssign<&PipelineStatistics> for PipelineStatistics {
    fn add_assign(&mut self, rhs: &PipelineStatistics) {
        self.total_reads += rhs.total_reads;
        self.filtered_reads += rhs.filtered_reads;
        self.baq_reads += rhs.baq_reads;
        self.baq_failures += rhs.baq_failures;
        self.num_batches += rhs.num_batches;
        self.active_bases += rhs.active_bases;
        self.excluded_variant_bases += rhs.excluded_variant_bases;
        self.read_group_overflow += rhs.read_group_overflow;
        for (mine, theirs) in self.timings.iter_mut().zip(&rhs.timings) {
            *mine += theirs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_accumulate() {
        let mut run = PipelineStatistics::new();
        let mut batch = PipelineStatistics::for_batch(10);
        batch.filtered_reads = 3;
        batch.read_group_overflow = 1;
        batch.record(Stage::Baq, Duration::from_millis(5));

        run += &batch;
        run += &batch;

        assert_eq!(run.total_reads, 20);
        assert_eq!(run.filtered_reads, 6);
        assert_eq!(run.num_batches, 2);
        assert_eq!(run.read_group_overflow, 2);
        assert_eq!(run.timing(Stage::Baq).samples().len(), 2);
        assert_eq!(run.timing(Stage::Baq).total(), Duration::from_millis(10));
        assert_eq!(run.timing(Stage::Io).mean(), Duration::ZERO);
    }
}
