use std::ops::Range;

use super::cigar::active_read_mask;
use super::context::{ActiveLocationList, AlignmentWindow, NO_REFERENCE_OFFSET};
use super::stats::{PipelineStatistics, Stage, StageTimer};
use crate::exec::Parallelism;
use crate::genomics::{is_regular_base, ReadBatch, VariantDatabase, VariantSpans};

/// Read offsets overlapping known variants, as inclusive-exclusive ranges.
///
/// Each overlapping variant excludes everything from the first to the last
/// aligned base inside its span, including insertions in between. Variants
/// that fall entirely inside a deletion exclude nothing.
pub fn variant_exclusions(
    spans: &VariantSpans,
    window: &AlignmentWindow,
    reference_offsets: &[u32],
) -> Vec<Range<usize>> {
    let candidates = spans.candidate_range(window.reference_start, window.reference_end);
    let mut excluded = Vec::new();
    for idx in candidates {
        let (start, end) = (spans.starts()[idx], spans.ends()[idx]);
        if end <= window.reference_start || start >= window.reference_end {
            continue;
        }
        let mut first = None;
        let mut last = 0;
        for (offset, &reference_offset) in reference_offsets.iter().enumerate() {
            if reference_offset == NO_REFERENCE_OFFSET {
                continue;
            }
            let position = window.reference_start + reference_offset;
            if position >= end {
                break;
            }
            if position >= start {
                first.get_or_insert(offset);
                last = offset;
            }
        }
        if let Some(first) = first {
            excluded.push(first..last + 1);
        }
    }
    excluded
}

/// Deactivate bases that overlap known variants.
///
/// The candidate variants for each read come from a binary search over the
/// variant starts of its reference sequence.
#[allow(clippy::too_many_arguments)]
pub fn filter_known_variants<E: Parallelism>(
    exec: &E,
    batch: &ReadBatch,
    variants: &VariantDatabase,
    active: &[u32],
    windows: &[AlignmentWindow],
    reference_offsets: &[u32],
    locations: &mut ActiveLocationList,
    stats: &mut PipelineStatistics,
) {
    let timer = StageTimer::start(Stage::SnpFilter);
    let per_read = exec.map(active, |&read| {
        let read = read as usize;
        let Some(spans) = variants.spans(batch.ref_ids()[read]) else {
            return Vec::new();
        };
        let range = batch.base_range(read);
        let base = range.start;
        variant_exclusions(spans, &windows[read], &reference_offsets[range])
            .into_iter()
            .map(|r| base + r.start..base + r.end)
            .collect()
    });

    let mut cleared = 0;
    for ranges in per_read {
        for range in ranges {
            cleared += locations.deactivate_range(range);
        }
    }
    stats.excluded_variant_bases += cleared as u64;
    timer.stop(stats);
}

/// Deactivate ambiguous bases and bases below `min_base_quality`.
pub fn filter_bases<E: Parallelism>(
    exec: &E,
    batch: &ReadBatch,
    active: &[u32],
    min_base_quality: u8,
    locations: &mut ActiveLocationList,
    stats: &mut PipelineStatistics,
) {
    let timer = StageTimer::start(Stage::BpFilter);
    let is_active = active_read_mask(batch.len(), active);
    let mut keep = vec![true; batch.total_bases()];
    exec.for_each_segment(batch.base_offsets(), &mut keep, |read, out| {
        if !is_active[read] {
            return;
        }
        let bases = batch.read_bases(read);
        let quals = batch.read_qualities(read);
        for ((k, &b), &q) in out.iter_mut().zip(bases).zip(quals) {
            *k = is_regular_base(b) && q >= min_base_quality;
        }
    });
    locations.retain(&keep);
    timer.stop(stats);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::VariantDatabaseBuilder;
    use crate::pipeline::cigar::reference_offsets_for_read;
    use crate::pipeline::windows::alignment_window;
    use crate::genomics::parse_cigar;

    fn exclusions(start: u32, cigar: &str, variant: (u32, u32)) -> Vec<Range<usize>> {
        let cigar = parse_cigar(cigar).unwrap();
        let window = alignment_window(start, &cigar);
        let len: u32 = cigar
            .iter()
            .filter(|op| op.kind.consumes_read())
            .map(|op| op.len)
            .sum();
        let mut offsets = vec![0; len as usize];
        reference_offsets_for_read(&cigar, &mut offsets);

        let mut builder = VariantDatabaseBuilder::new(1);
        builder.add_span(0, variant.0, variant.1);
        let db = builder.build();
        variant_exclusions(db.spans(0).unwrap(), &window, &offsets)
    }

    #[test]
    fn snp_inside_window() {
        assert_eq!(exclusions(100, "50M", (120, 121)), vec![20..21]);
    }

    #[test]
    fn variant_partially_overlapping_window_start() {
        assert_eq!(exclusions(100, "50M", (95, 103)), vec![0..3]);
        assert!(exclusions(100, "50M", (90, 100)).is_empty());
        assert!(exclusions(100, "50M", (150, 151)).is_empty());
    }

    #[test]
    fn insertions_between_excluded_bases_are_excluded() {
        // Bases 0..5 align to 100..105, then 2 inserted, then 105...
        assert_eq!(exclusions(100, "5M2I10M", (104, 106)), vec![4..8]);
    }

    #[test]
    fn soft_clips_are_never_excluded() {
        assert_eq!(exclusions(100, "3S10M", (100, 102)), vec![3..5]);
    }

    #[test]
    fn variant_within_deletion_excludes_nothing() {
        assert!(exclusions(100, "5M5D5M", (106, 108)).is_empty());
    }
}
