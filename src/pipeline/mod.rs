//! Batch-at-a-time recalibration pipeline.
//!
//! A [`Pipeline`] owns the reusable [`PipelineContext`] and the persistent
//! covariate tables. Each batch runs the stages strictly in order:
//!
//! 1. alignment windows
//! 2. read filter (staged compaction of the active read list)
//! 3. reference offsets, soft-clip and filtered-read base deactivation
//! 4. known-variant base filter
//! 5. per-base quality filter
//! 6. CIGAR expansion and error indicators
//! 7. base alignment quality
//! 8. fractional errors
//! 9. covariate emission, sort, reduce and merge
//!
//! Parallelism lives inside the stages, through [`Parallelism`]. The active
//! read list only ever shrinks and bases only ever move from active to
//! inactive within a batch.

mod activity;
mod baq;
mod cigar;
mod context;
mod fractional;
mod read_filter;
mod stats;
mod windows;

pub use activity::{filter_bases, filter_known_variants, variant_exclusions};
pub use baq::{
    cap_base_by_baq, compute_baq, read_baq, state_is_indel, state_position, BaqError, BaqHmm,
    HmmAlignment, ReadBaq,
};
pub use cigar::{
    active_read_mask, build_reference_offsets, event_count, expand_cigars, read_error_flags,
    reference_offsets_for_read, BaseErrorFlags, CigarEvent, CigarEventKind, CigarExpansion,
};
pub use context::{ActiveLocationList, AlignmentWindow, PipelineContext, NO_REFERENCE_OFFSET};
pub use fractional::{compute_fractional_errors, fractional_errors, FractionalErrors};
pub use read_filter::{
    filter_reads, passes_flag_filter, passes_mapq_filter, read_passes, ReadFilterInputs,
    EXCLUDED_FLAGS,
};
pub use stats::{PipelineStatistics, Stage, StageTimer, TimeSeries};
pub use windows::{alignment_window, compute_alignment_windows};

use tracing::{debug, info};

use crate::covariates::{accumulate_batch, CovariateInputs, CovariateTables};
use crate::exec::{Parallelism, SerialExecutor, ThreadedExecutor};
use crate::genomics::{BatchSource, ReadBatch, ReferenceSequences, VariantDatabase};
use crate::options::{ExecutorKind, RecalibrationConfig};

/// Drives batches through the stages and accumulates covariate tables.
#[derive(Debug)]
pub struct Pipeline<'a, E: Parallelism> {
    exec: E,
    config: &'a RecalibrationConfig,
    reference: &'a ReferenceSequences,
    variants: &'a VariantDatabase,
    context: PipelineContext,
    tables: CovariateTables,
    stats: PipelineStatistics,
}

impl<'a, E: Parallelism> Pipeline<'a, E> {
    /// New pipeline with empty tables.
    pub fn new(
        exec: E,
        config: &'a RecalibrationConfig,
        reference: &'a ReferenceSequences,
        variants: &'a VariantDatabase,
    ) -> Self {
        Self {
            exec,
            config,
            reference,
            variants,
            context: PipelineContext::new(),
            tables: CovariateTables::new(),
            stats: PipelineStatistics::new(),
        }
    }

    /// Run every stage over `batch` and merge its observations.
    pub fn process_batch(&mut self, batch: &ReadBatch) -> crate::Result<()> {
        let Self {
            exec,
            config,
            reference,
            variants,
            context: ctx,
            tables,
            stats: run_stats,
        } = self;
        let exec = &*exec;
        let (config, reference, variants) = (*config, *reference, *variants);
        let mut stats = PipelineStatistics::for_batch(batch.len() as u64);

        ctx.start_batch(batch);
        ctx.windows = compute_alignment_windows(exec, batch, &ctx.active_reads);

        let filter_inputs = ReadFilterInputs {
            batch,
            windows: &ctx.windows,
            reference,
        };
        ctx.active_reads = filter_reads(exec, &filter_inputs, &ctx.active_reads, &mut stats);

        build_reference_offsets(
            exec,
            batch,
            &ctx.active_reads,
            &ctx.windows,
            &mut ctx.reference_offsets,
            &mut ctx.active_locations,
        );
        filter_known_variants(
            exec,
            batch,
            variants,
            &ctx.active_reads,
            &ctx.windows,
            &ctx.reference_offsets,
            &mut ctx.active_locations,
            &mut stats,
        );
        filter_bases(
            exec,
            batch,
            &ctx.active_reads,
            config.covariates.min_base_quality,
            &mut ctx.active_locations,
            &mut stats,
        );

        expand_cigars(
            exec,
            batch,
            reference,
            &ctx.active_reads,
            &mut ctx.cigar,
            &mut stats,
        );
        compute_baq(
            exec,
            &config.baq,
            batch,
            reference,
            &ctx.active_reads,
            &ctx.windows,
            &mut ctx.baq_qualities,
            &mut stats,
        );
        compute_fractional_errors(
            exec,
            batch,
            &ctx.active_reads,
            &ctx.cigar.errors,
            &ctx.baq_qualities,
            &mut ctx.fractional,
            &mut stats,
        );

        let inputs = CovariateInputs {
            batch,
            active: &ctx.active_reads,
            locations: &ctx.active_locations,
            errors: &ctx.fractional,
            options: &config.covariates,
        };
        accumulate_batch(exec, &inputs, tables, &mut stats)?;

        debug!(
            batch = run_stats.num_batches,
            reads = batch.len(),
            active_reads = ctx.active_reads.len(),
            active_bases = stats.active_bases,
            "batch complete"
        );
        *run_stats += &stats;
        Ok(())
    }

    /// Process every batch `source` yields.
    pub fn run<S: BatchSource + ?Sized>(&mut self, source: &mut S) -> crate::Result<()> {
        info!(
            backend = self.exec.name(),
            threads = self.exec.threads(),
            batch_size = self.config.batch_size,
            "starting recalibration"
        );
        loop {
            let timer = StageTimer::start(Stage::Io);
            let batch = source.next_batch(self.config.batch_size)?;
            timer.stop(&mut self.stats);
            match batch {
                Some(batch) => self.process_batch(&batch)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Tables accumulated so far.
    pub fn tables(&self) -> &CovariateTables {
        &self.tables
    }

    /// Statistics accumulated so far.
    pub fn statistics(&self) -> &PipelineStatistics {
        &self.stats
    }

    /// Working state of the last processed batch.
    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Consume the pipeline, returning its tables and statistics.
    pub fn finish(self) -> RecalibrationResult {
        RecalibrationResult {
            tables: self.tables,
            statistics: self.stats,
        }
    }
}

/// Output of a complete run.
#[derive(Debug, Clone)]
pub struct RecalibrationResult {
    /// Final covariate tables.
    pub tables: CovariateTables,
    /// Run statistics.
    pub statistics: PipelineStatistics,
}

/// Run all batches of `source` on the backend selected by `config`.
pub fn run_recalibration<S: BatchSource + ?Sized>(
    config: &RecalibrationConfig,
    reference: &ReferenceSequences,
    variants: &VariantDatabase,
    source: &mut S,
) -> crate::Result<RecalibrationResult> {
    config.validate_parameters()?;
    match config.executor {
        ExecutorKind::Serial => {
            run_with(SerialExecutor, config, reference, variants, source)
        }
        ExecutorKind::Threaded { threads } => {
            let exec = ThreadedExecutor::new(threads)?;
            run_with(exec, config, reference, variants, source)
        }
    }
}

fn run_with<E: Parallelism, S: BatchSource + ?Sized>(
    exec: E,
    config: &RecalibrationConfig,
    reference: &ReferenceSequences,
    variants: &VariantDatabase,
    source: &mut S,
) -> crate::Result<RecalibrationResult> {
    let mut pipeline = Pipeline::new(exec, config, reference, variants);
    pipeline.run(source)?;
    Ok(pipeline.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{AlignedRead, CigarOp, CigarOpKind, InMemoryBatchSource};

    fn reference() -> ReferenceSequences {
        let mut fasta = b">chr1\n".to_vec();
        for i in 0..200 {
            fasta.push(b"ACGT"[(i * 7 + i / 3) % 4]);
        }
        fasta.push(b'\n');
        ReferenceSequences::from_fasta(&fasta).unwrap()
    }

    fn read_at(reference: &ReferenceSequences, pos: u32, len: u32) -> AlignedRead {
        let bases: Vec<u8> = (pos..pos + len)
            .map(|p| reference.base(0, p).unwrap())
            .collect();
        AlignedRead::new(
            0,
            pos,
            60,
            vec![CigarOp::new(CigarOpKind::Match, len)],
            bases,
            vec![30; len as usize],
            0,
        )
    }

    #[test]
    fn empty_source_leaves_tables_empty() {
        let reference = reference();
        let variants = VariantDatabase::default();
        let config = RecalibrationConfig::default().with_executor(ExecutorKind::Serial);
        let mut source = InMemoryBatchSource::new(Vec::new());
        let result = run_recalibration(&config, &reference, &variants, &mut source).unwrap();
        assert!(result.tables.is_empty());
        assert_eq!(result.statistics.num_batches, 0);
    }

    #[test]
    fn batches_accumulate_into_one_table() {
        let reference = reference();
        let variants = VariantDatabase::default();
        let config = RecalibrationConfig::default()
            .with_executor(ExecutorKind::Serial)
            .with_batch_size(2);
        let reads: Vec<_> = (0..5).map(|i| read_at(&reference, 10 + i * 20, 50)).collect();
        let mut source = InMemoryBatchSource::new(reads);
        let result = run_recalibration(&config, &reference, &variants, &mut source).unwrap();

        assert_eq!(result.statistics.num_batches, 3);
        assert_eq!(result.statistics.total_reads, 5);
        assert_eq!(result.statistics.filtered_reads, 0);
        assert_eq!(result.statistics.timing(Stage::Io).samples().len(), 4);

        let table = result.tables.table(crate::covariates::CovariateChain::QualityScore);
        let observations: u64 = table.values().iter().map(|v| v.observations).sum();
        // Three event types per active base.
        assert_eq!(observations, 3 * 5 * 50);
    }
}
