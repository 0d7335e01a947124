use std::ops::Range;

use bitvec::prelude::*;

use super::cigar::CigarExpansion;
use super::fractional::FractionalErrors;
use crate::genomics::ReadBatch;

/// Reference offset of bases that are not aligned to a reference position.
pub const NO_REFERENCE_OFFSET: u32 = u32::MAX;

/// Span covered by one read's alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentWindow {
    /// First reference position, 0-based.
    pub reference_start: u32,
    /// One past the last reference position.
    pub reference_end: u32,
    /// First aligned read offset (after leading soft clips).
    pub sequence_start: u32,
    /// One past the last aligned read offset.
    pub sequence_end: u32,
}

impl AlignmentWindow {
    /// Reference span as a range.
    pub fn reference(&self) -> Range<u32> {
        self.reference_start..self.reference_end
    }

    /// Read-offset span as a range.
    pub fn sequence(&self) -> Range<u32> {
        self.sequence_start..self.sequence_end
    }
}

/// One bit per base of the batch marking whether it still counts.
///
/// Bits can only be cleared; nothing reactivates a base within a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveLocationList {
    bits: BitVec,
}

impl ActiveLocationList {
    /// Every one of `len` bases active.
    pub fn all_active(len: usize) -> Self {
        Self {
            bits: bitvec![1; len],
        }
    }

    /// Reset to `len` active bases, reusing the allocation.
    pub fn reset(&mut self, len: usize) {
        self.bits.clear();
        self.bits.resize(len, true);
    }

    /// Number of tracked bases.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Whether no bases are tracked.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Whether base `idx` is active.
    pub fn is_active(&self, idx: usize) -> bool {
        self.bits.get(idx).is_some_and(|b| *b)
    }

    /// Deactivate one base; returns whether it was active before.
    pub fn deactivate(&mut self, idx: usize) -> bool {
        let was = self.is_active(idx);
        if was {
            self.bits.set(idx, false);
        }
        was
    }

    /// Deactivate a range of bases; returns how many were active before.
    pub fn deactivate_range(&mut self, range: Range<usize>) -> usize {
        let slice = &mut self.bits[range];
        let was = slice.count_ones();
        slice.fill(false);
        was
    }

    /// Deactivate every base whose `keep` entry is false; returns how many
    /// active bases were cleared.
    pub fn retain(&mut self, keep: &[bool]) -> usize {
        debug_assert_eq!(keep.len(), self.bits.len());
        let mut cleared = 0;
        for (idx, &k) in keep.iter().enumerate() {
            if !k && self.deactivate(idx) {
                cleared += 1;
            }
        }
        cleared
    }

    /// Active bases in `range`.
    pub fn count_active(&self, range: Range<usize>) -> usize {
        self.bits[range].count_ones()
    }

    /// Active bases overall.
    pub fn count_all(&self) -> usize {
        self.bits.count_ones()
    }
}

/// Per-batch working state shared by the stages.
///
/// Buffers are reused across batches; [`start_batch`](Self::start_batch)
/// resizes them for the incoming batch.
#[derive(Debug, Default)]
pub struct PipelineContext {
    /// Reads still under consideration, ascending batch indices.
    pub active_reads: Vec<u32>,
    /// Alignment window of every read in the batch.
    pub windows: Vec<AlignmentWindow>,
    /// Per-base activity.
    pub active_locations: ActiveLocationList,
    /// Per-base offset from the alignment start, or [`NO_REFERENCE_OFFSET`].
    pub reference_offsets: Vec<u32>,
    /// Expanded CIGAR events and error indicators.
    pub cigar: CigarExpansion,
    /// Per-base BAQ-capped qualities.
    pub baq_qualities: Vec<u8>,
    /// Per-base fractional error arrays.
    pub fractional: FractionalErrors,
}

impl PipelineContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read and every base of `batch` active.
    pub fn start_batch(&mut self, batch: &ReadBatch) {
        self.active_reads.clear();
        self.active_reads.extend(0..batch.len() as u32);
        self.windows.clear();
        self.active_locations.reset(batch.total_bases());
        self.reference_offsets.clear();
        self.reference_offsets
            .resize(batch.total_bases(), NO_REFERENCE_OFFSET);
        self.baq_qualities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_only_move_to_inactive() {
        let mut locations = ActiveLocationList::all_active(10);
        assert_eq!(locations.count_all(), 10);

        assert_eq!(locations.deactivate_range(2..5), 3);
        assert_eq!(locations.deactivate_range(3..6), 1);
        assert!(locations.deactivate(0));
        assert!(!locations.deactivate(0));

        let mut keep = vec![true; 10];
        keep[9] = false;
        keep[2] = false;
        assert_eq!(locations.retain(&keep), 1);

        assert_eq!(locations.count_all(), 4);
        assert_eq!(locations.count_active(6..9), 3);
        assert!(!locations.is_active(42));
    }
}
