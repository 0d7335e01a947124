//! # Base quality score recalibration
//!
//! Builds empirical recalibration tables from aligned reads, a reference
//! genome and a database of known variant sites.
//!
//! ## Pipeline
//!
//! 1. **Batching**: reads are decoded into columnar [`genomics::ReadBatch`]es
//! 2. **Filtering**: malformed and unusable reads are compacted away, then
//!    soft clips, known variants and low-quality bases are deactivated
//! 3. **Alignment**: CIGARs are expanded into per-base events and the
//!    banded pair-HMM computes base alignment qualities
//! 4. **Covariates**: every active base emits packed covariate keys that are
//!    sorted, reduced and merged into persistent tables
//!
//! The report is rendered once at the end of the run.
//!
//! ## Usage Example
//!
//! ```ignore
//! use bqsr::{run_recalibration, RecalibrationConfig};
//!
//! let config = RecalibrationConfig::default();
//! let result = run_recalibration(&config, &reference, &variants, &mut source)?;
//! println!("{} batches", result.statistics.num_batches);
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod covariates; // Key schemas, empirical tables and quality math
pub mod exec; // Serial and threaded execution backends
pub mod genomics; // Reads, references, known sites and batch sources
pub mod options; // Run configuration
pub mod pipeline; // Per-batch stages and the driver
pub mod report; // GATK report output

use thiserror::Error;

pub use covariates::{CovariateChain, CovariateTables, EmpiricalTable, EmpiricalValue};
pub use exec::{Parallelism, SerialExecutor, ThreadedExecutor};
pub use genomics::{ReadBatch, ReferenceSequences, VariantDatabase};
pub use options::{ConfigError, ExecutorKind, RecalibrationConfig};
pub use pipeline::{run_recalibration, Pipeline, PipelineStatistics, RecalibrationResult};
pub use report::{render_report, write_report, ReportInputs};

/// Top-level error for a recalibration run.
#[derive(Debug, Error)]
pub enum BqsrError {
    /// Invalid or incomplete configuration.
    #[error(transparent)]
    Config(#[from] options::ConfigError),
    /// Reference could not be loaded.
    #[error(transparent)]
    Reference(#[from] genomics::ReferenceError),
    /// Known-sites database could not be loaded.
    #[error(transparent)]
    Variants(#[from] genomics::VariantDatabaseError),
    /// Alignments could not be read.
    #[error(transparent)]
    Batch(#[from] genomics::BatchError),
    /// A covariate value did not fit its key.
    #[error(transparent)]
    Schema(#[from] covariates::SchemaError),
    /// BAQ failed outside the per-read recovery path.
    #[error(transparent)]
    Baq(#[from] pipeline::BaqError),
    /// Report could not be written.
    #[error(transparent)]
    Report(#[from] report::ReportError),
    /// Worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    Executor(#[from] rayon::ThreadPoolBuildError),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BqsrError>;
