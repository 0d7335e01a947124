use tracing::{debug, warn};

use super::context::AlignmentWindow;
use super::stats::{PipelineStatistics, Stage, StageTimer};
use crate::covariates::MAX_READ_GROUPS;
use crate::exec::Parallelism;
use crate::genomics::{
    flags, CigarOpKind, ReadBatch, ReferenceSequences, INVALID_ID, INVALID_POS, MAPQ_UNAVAILABLE,
};

/// Flags that remove a read outright.
pub const EXCLUDED_FLAGS: u16 =
    flags::DUPLICATE | flags::QC_FAIL | flags::UNMAPPED | flags::SECONDARY;

/// Borrowed inputs every read predicate looks at.
#[derive(Debug, Clone, Copy)]
pub struct ReadFilterInputs<'a> {
    /// Current batch.
    pub batch: &'a ReadBatch,
    /// Alignment windows, indexed by read.
    pub windows: &'a [AlignmentWindow],
    /// Reference, for sequence lengths.
    pub reference: &'a ReferenceSequences,
}

type ReadPredicate = fn(&ReadFilterInputs<'_>, usize) -> bool;

/// Filter passes in application order.
const FILTER_PASSES: [(&str, ReadPredicate); 9] = [
    ("flags", flags_pass),
    ("mapping_quality", mapq_pass),
    ("mapped_fields", mapped_fields_are_valid),
    ("contig_position", contig_matches_position),
    ("read_group", has_read_group),
    ("quality_length", qualities_match_bases),
    ("read_length", has_bases),
    ("skip_operator", has_no_skip),
    ("cigar_length", cigar_matches_bases),
];

fn flags_pass(inputs: &ReadFilterInputs<'_>, read: usize) -> bool {
    passes_flag_filter(inputs.batch.flags()[read])
}

fn mapq_pass(inputs: &ReadFilterInputs<'_>, read: usize) -> bool {
    passes_mapq_filter(inputs.batch.mapq()[read])
}

/// An unplaced contig with a position is inconsistent.
fn contig_matches_position(inputs: &ReadFilterInputs<'_>, read: usize) -> bool {
    let batch = inputs.batch;
    !(batch.ref_ids()[read] == INVALID_ID && batch.alignment_starts()[read] != INVALID_POS)
}

/// Assigned, and small enough to fit the read-group field of a key.
fn has_read_group(inputs: &ReadFilterInputs<'_>, read: usize) -> bool {
    inputs.batch.read_groups()[read] < MAX_READ_GROUPS
}

fn read_group_overflows(read_group: u32) -> bool {
    read_group != INVALID_ID && read_group >= MAX_READ_GROUPS
}

fn qualities_match_bases(inputs: &ReadFilterInputs<'_>, read: usize) -> bool {
    inputs.batch.read_qualities(read).len() == inputs.batch.read_len(read)
}

fn has_bases(inputs: &ReadFilterInputs<'_>, read: usize) -> bool {
    inputs.batch.read_len(read) > 0
}

fn has_no_skip(inputs: &ReadFilterInputs<'_>, read: usize) -> bool {
    inputs
        .batch
        .cigar(read)
        .iter()
        .all(|op| op.kind != CigarOpKind::Skip)
}

fn cigar_matches_bases(inputs: &ReadFilterInputs<'_>, read: usize) -> bool {
    let consumed: u64 = inputs
        .batch
        .cigar(read)
        .iter()
        .filter(|op| op.kind.consumes_read())
        .map(|op| u64::from(op.len))
        .sum();
    consumed == inputs.batch.read_len(read) as u64
}

/// No duplicate, QC-fail, unmapped or secondary flag.
pub fn passes_flag_filter(read_flags: u16) -> bool {
    read_flags & EXCLUDED_FLAGS == 0
}

/// Mapping quality is known and non-zero.
pub fn passes_mapq_filter(mapq: u8) -> bool {
    mapq != 0 && mapq != MAPQ_UNAVAILABLE
}

/// Placement checks that only apply to reads flagged as mapped.
fn mapped_fields_are_valid(inputs: &ReadFilterInputs<'_>, read: usize) -> bool {
    let batch = inputs.batch;
    if batch.is_unmapped(read) {
        return true;
    }
    let ref_id = batch.ref_ids()[read];
    let Some(sequence_len) = inputs.reference.sequence_len(ref_id) else {
        return false;
    };
    let window = &inputs.windows[read];
    batch.alignment_starts()[read] != INVALID_POS
        && window.reference_end > window.reference_start
        && window.reference_end <= sequence_len
        && !batch.cigar(read).is_empty()
}

/// Whether `read` passes every filter.
pub fn read_passes(inputs: &ReadFilterInputs<'_>, read: usize) -> bool {
    FILTER_PASSES.iter().all(|(_, pass)| pass(inputs, read))
}

/// Narrow `active` to the reads passing all filters, preserving order.
///
/// Each filter runs as its own compaction pass. `filtered_reads` grows by
/// exactly the number of reads removed.
pub fn filter_reads<E: Parallelism>(
    exec: &E,
    inputs: &ReadFilterInputs<'_>,
    active: &[u32],
    stats: &mut PipelineStatistics,
) -> Vec<u32> {
    let timer = StageTimer::start(Stage::ReadFilter);
    let read_groups = inputs.batch.read_groups();
    let overflow = active
        .iter()
        .filter(|&&read| read_group_overflows(read_groups[read as usize]))
        .count();
    if overflow > 0 {
        warn!(
            reads = overflow,
            limit = MAX_READ_GROUPS,
            "dropping reads whose read-group id does not fit a covariate key"
        );
        stats.read_group_overflow += overflow as u64;
    }

    let mut current = active.to_vec();
    for (name, pass) in FILTER_PASSES {
        let before = current.len();
        current = exec.compact(&current, |&read| pass(inputs, read as usize));
        if current.len() != before {
            debug!(filter = name, removed = before - current.len(), "read filter pass");
        }
    }
    stats.filtered_reads += (active.len() - current.len()) as u64;
    timer.stop(stats);
    current
}
