//! Genomics primitives consumed by the recalibration pipeline.
//!
//! Reads, CIGARs, packed reference sequences, the known-variant database and
//! the batch sources that feed columnar read batches into the pipeline.

mod bam;
mod batch;
mod packed_dna;
mod read_groups;
mod reference;
mod types;
mod variants;

pub use bam::{BamBatchSource, BamInput};
pub use batch::{
    BatchError, BatchSource, InMemoryBatchSource, ReadBatch, INVALID_ID, INVALID_POS,
};
pub use packed_dna::{
    base_code, complement, is_regular_base, AmbiguityMask, PackedDnaError, PackedSequence,
    BASE_CODE_N,
};
pub use read_groups::ReadGroupDatabase;
pub use reference::{ReferenceError, ReferenceSequences};
pub use types::{
    flags, parse_cigar, AlignedRead, CigarOp, CigarOpKind, CigarParseError, MAPQ_UNAVAILABLE,
};
pub use variants::{VariantDatabase, VariantDatabaseBuilder, VariantDatabaseError, VariantSpans};
