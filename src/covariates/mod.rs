//! Covariate keys, empirical tables and the batch aggregator.
//!
//! Each recalibration table is described by a [`CovariateSchema`], an
//! ordered list of fields and bit widths packed into a [`CovariateKey`].
//! The aggregator emits one `(key, observation)` pair per active base,
//! event type and table, then sorts, reduces and merges them into the
//! persistent [`EmpiricalTable`]s.

mod aggregator;
mod quality;
mod schema;
mod table;
mod values;

pub use aggregator::{accumulate_batch, CovariateInputs, CovariateTables};
pub use quality::{
    bayesian_estimate, empirical_quality, error_prob_to_qual, estimated_reported_quality,
    qual_to_error_prob, MAX_REASONABLE_Q_SCORE, MAX_RECALIBRATED_Q_SCORE,
};
pub use schema::{
    CovariateField, CovariateKey, CovariateSchema, FieldSpec, SchemaError, KEY_BITS,
};
pub use table::{EmpiricalTable, EmpiricalValue, FixedCount};
pub use values::{
    context_to_string, decode_cycle, encode_cycle, mask_low_quality_tails, pack_context,
    read_contexts, read_cycles, EventType, ReadCycles, INDEL_CYCLE_CUSHION,
};

use CovariateField::{Context, Cycle, EventType as Event, QualityScore, ReadGroup};

/// Width of the read-group field in every key.
pub const READ_GROUP_BITS: u32 = 8;
/// Read-group ids at or above this cannot be keyed.
pub const MAX_READ_GROUPS: u32 = 1 << READ_GROUP_BITS;

/// Read group, reported quality and event type.
pub const QUALITY_SCORE_SCHEMA: CovariateSchema = CovariateSchema::new(
    "QualityScore",
    &[
        FieldSpec::new(ReadGroup, READ_GROUP_BITS),
        FieldSpec::new(QualityScore, 8),
        FieldSpec::new(Event, 2),
    ],
);

/// Quality table extended with the preceding sequence context.
pub const CONTEXT_SCHEMA: CovariateSchema = CovariateSchema::new(
    "Context",
    &[
        FieldSpec::new(ReadGroup, READ_GROUP_BITS),
        FieldSpec::new(QualityScore, 8),
        FieldSpec::new(Context, 8),
        FieldSpec::new(Event, 2),
    ],
);

/// Quality table extended with the machine cycle.
pub const CYCLE_SCHEMA: CovariateSchema = CovariateSchema::new(
    "Cycle",
    &[
        FieldSpec::new(ReadGroup, READ_GROUP_BITS),
        FieldSpec::new(QualityScore, 8),
        FieldSpec::new(Cycle, 10),
        FieldSpec::new(Event, 2),
    ],
);

/// The recalibration tables built per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CovariateChain {
    /// Quality score table.
    QualityScore,
    /// Context covariate table.
    Context,
    /// Cycle covariate table.
    Cycle,
}

impl CovariateChain {
    /// All chains in report order.
    pub const ALL: [CovariateChain; 3] = [Self::QualityScore, Self::Context, Self::Cycle];

    /// Key layout of the chain.
    pub fn schema(self) -> CovariateSchema {
        match self {
            Self::QualityScore => QUALITY_SCORE_SCHEMA,
            Self::Context => CONTEXT_SCHEMA,
            Self::Cycle => CYCLE_SCHEMA,
        }
    }

    /// Covariate name written to reports.
    pub fn name(self) -> &'static str {
        self.schema().name()
    }

    /// The field that distinguishes this chain from the quality table.
    pub fn covariate_field(self) -> Option<CovariateField> {
        match self {
            Self::QualityScore => None,
            Self::Context => Some(Context),
            Self::Cycle => Some(Cycle),
        }
    }
}
