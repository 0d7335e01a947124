//! Columnar read batches and the sources that produce them.

use std::collections::VecDeque;
use std::ops::Range;

use thiserror::Error;

use super::types::{flags, AlignedRead, CigarOp};

/// Sentinel for "no reference sequence" / "no read group".
pub const INVALID_ID: u32 = u32::MAX;
/// Sentinel for "no alignment position".
pub const INVALID_POS: u32 = u32::MAX;

/// Errors produced by batch sources.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Underlying file could not be opened or read.
    #[error("failed to read alignments: {0}")]
    Io(String),
    /// A record could not be decoded.
    #[error("malformed alignment record {record}: {message}")]
    Decode {
        /// 0-based record index within the input.
        record: u64,
        /// Decoder message.
        message: String,
    },
}

/// Structure-of-arrays view over a fixed number of reads.
///
/// Variable-length data (CIGAR, bases, qualities) live in shared arrays and
/// are addressed through per-read offset arrays of length `len() + 1`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadBatch {
    flags: Vec<u16>,
    mapq: Vec<u8>,
    ref_id: Vec<u32>,
    alignment_start: Vec<u32>,
    read_group: Vec<u32>,
    cigar_offsets: Vec<u32>,
    cigars: Vec<CigarOp>,
    base_offsets: Vec<u32>,
    bases: Vec<u8>,
    quality_offsets: Vec<u32>,
    qualities: Vec<u8>,
}

impl ReadBatch {
    /// Empty batch with room for `capacity` reads.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut batch = Self {
            flags: Vec::with_capacity(capacity),
            mapq: Vec::with_capacity(capacity),
            ref_id: Vec::with_capacity(capacity),
            alignment_start: Vec::with_capacity(capacity),
            read_group: Vec::with_capacity(capacity),
            cigar_offsets: Vec::with_capacity(capacity + 1),
            base_offsets: Vec::with_capacity(capacity + 1),
            quality_offsets: Vec::with_capacity(capacity + 1),
            ..Self::default()
        };
        batch.cigar_offsets.push(0);
        batch.base_offsets.push(0);
        batch.quality_offsets.push(0);
        batch
    }

    /// Build a batch from row-oriented reads.
    pub fn from_reads(reads: &[AlignedRead]) -> Self {
        let mut batch = Self::with_capacity(reads.len());
        for read in reads {
            batch.push(read);
        }
        batch
    }

    /// Append one read.
    pub fn push(&mut self, read: &AlignedRead) {
        self.push_parts(
            read.flags,
            read.mapq,
            read.ref_id.unwrap_or(INVALID_ID),
            read.pos.unwrap_or(INVALID_POS),
            read.read_group.unwrap_or(INVALID_ID),
            &read.cigar,
            &read.sequence,
            &read.qualities,
        );
    }

    /// Append one read from its raw columns.
    #[allow(clippy::too_many_arguments)]
    pub fn push_parts(
        &mut self,
        flags: u16,
        mapq: u8,
        ref_id: u32,
        alignment_start: u32,
        read_group: u32,
        cigar: &[CigarOp],
        bases: &[u8],
        qualities: &[u8],
    ) {
        if self.cigar_offsets.is_empty() {
            self.cigar_offsets.push(0);
            self.base_offsets.push(0);
            self.quality_offsets.push(0);
        }
        self.flags.push(flags);
        self.mapq.push(mapq);
        self.ref_id.push(ref_id);
        self.alignment_start.push(alignment_start);
        self.read_group.push(read_group);
        self.cigars.extend_from_slice(cigar);
        self.cigar_offsets.push(self.cigars.len() as u32);
        self.bases.extend(bases.iter().map(u8::to_ascii_uppercase));
        self.base_offsets.push(self.bases.len() as u32);
        self.qualities.extend_from_slice(qualities);
        self.quality_offsets.push(self.qualities.len() as u32);
    }

    /// Number of reads.
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Whether the batch holds no reads.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Total bases across all reads.
    pub fn total_bases(&self) -> usize {
        self.bases.len()
    }

    /// Per-read SAM flags.
    pub fn flags(&self) -> &[u16] {
        &self.flags
    }

    /// Per-read mapping qualities.
    pub fn mapq(&self) -> &[u8] {
        &self.mapq
    }

    /// Per-read reference ids ([`INVALID_ID`] when unplaced).
    pub fn ref_ids(&self) -> &[u32] {
        &self.ref_id
    }

    /// Per-read 0-based alignment starts ([`INVALID_POS`] when unplaced).
    pub fn alignment_starts(&self) -> &[u32] {
        &self.alignment_start
    }

    /// Per-read read-group ids ([`INVALID_ID`] when absent).
    pub fn read_groups(&self) -> &[u32] {
        &self.read_group
    }

    /// All bases, concatenated.
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    /// Per-read start offsets into [`bases`](Self::bases), length `len() + 1`.
    pub fn base_offsets(&self) -> &[u32] {
        &self.base_offsets
    }

    /// Range of read `read` within [`bases`](Self::bases).
    pub fn base_range(&self, read: usize) -> Range<usize> {
        self.base_offsets[read] as usize..self.base_offsets[read + 1] as usize
    }

    /// Bases of read `read`.
    pub fn read_bases(&self, read: usize) -> &[u8] {
        &self.bases[self.base_range(read)]
    }

    /// Qualities of read `read`.
    pub fn read_qualities(&self, read: usize) -> &[u8] {
        let range = self.quality_offsets[read] as usize..self.quality_offsets[read + 1] as usize;
        &self.qualities[range]
    }

    /// CIGAR of read `read`.
    pub fn cigar(&self, read: usize) -> &[CigarOp] {
        let range = self.cigar_offsets[read] as usize..self.cigar_offsets[read + 1] as usize;
        &self.cigars[range]
    }

    /// Number of bases in read `read`.
    pub fn read_len(&self, read: usize) -> usize {
        (self.base_offsets[read + 1] - self.base_offsets[read]) as usize
    }

    /// Whether read `read` is on the reverse strand.
    pub fn is_reverse(&self, read: usize) -> bool {
        self.flags[read] & flags::REVERSE != 0
    }

    /// Whether read `read` is the second segment of a paired template.
    pub fn is_second_of_pair(&self, read: usize) -> bool {
        let f = self.flags[read];
        f & flags::PAIRED != 0 && f & flags::SECOND_OF_PAIR != 0
    }

    /// Whether read `read` is flagged unmapped.
    pub fn is_unmapped(&self, read: usize) -> bool {
        self.flags[read] & flags::UNMAPPED != 0
    }
}

/// Producer of read batches; the pipeline owns each batch until the next call.
pub trait BatchSource {
    /// Decode up to `capacity` reads, `Ok(None)` at end of stream.
    fn next_batch(&mut self, capacity: usize) -> Result<Option<ReadBatch>, BatchError>;
}

/// Batch source over reads already in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBatchSource {
    reads: VecDeque<AlignedRead>,
}

impl InMemoryBatchSource {
    /// Source yielding `reads` in order.
    pub fn new(reads: Vec<AlignedRead>) -> Self {
        Self {
            reads: reads.into(),
        }
    }
}

impl BatchSource for InMemoryBatchSource {
    fn next_batch(&mut self, capacity: usize) -> Result<Option<ReadBatch>, BatchError> {
        if self.reads.is_empty() {
            return Ok(None);
        }
        let take = capacity.max(1).min(self.reads.len());
        let chunk: Vec<AlignedRead> = self.reads.drain(..take).collect();
        Ok(Some(ReadBatch::from_reads(&chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{parse_cigar, CigarOpKind};

    fn read(pos: u32, seq: &[u8]) -> AlignedRead {
        AlignedRead::new(
            0,
            pos,
            60,
            vec![CigarOp::new(CigarOpKind::Match, seq.len() as u32)],
            seq.to_vec(),
            vec![30; seq.len()],
            0,
        )
    }

    #[test]
    fn columnar_accessors_address_each_read() {
        let mut unplaced = read(0, b"acgt");
        unplaced.ref_id = None;
        unplaced.pos = None;
        unplaced.read_group = None;
        unplaced.cigar = parse_cigar("2S2M").unwrap();

        let batch = ReadBatch::from_reads(&[read(10, b"AAAC"), unplaced]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.total_bases(), 8);
        assert_eq!(batch.read_bases(1), b"ACGT");
        assert_eq!(batch.base_range(1), 4..8);
        assert_eq!(batch.cigar(1).len(), 2);
        assert_eq!(batch.ref_ids()[1], INVALID_ID);
        assert_eq!(batch.alignment_starts()[1], INVALID_POS);
        assert_eq!(batch.read_groups()[1], INVALID_ID);
        assert_eq!(batch.read_qualities(0), &[30; 4]);
    }

    #[test]
    fn in_memory_source_respects_capacity() {
        let reads: Vec<_> = (0..5).map(|i| read(i, b"ACGT")).collect();
        let mut source = InMemoryBatchSource::new(reads);
        assert_eq!(source.next_batch(2).unwrap().unwrap().len(), 2);
        assert_eq!(source.next_batch(2).unwrap().unwrap().len(), 2);
        assert_eq!(source.next_batch(2).unwrap().unwrap().len(), 1);
        assert!(source.next_batch(2).unwrap().is_none());
    }

    #[test]
    fn pair_orientation_flags() {
        let r = read(0, b"A").with_flags(flags::PAIRED | flags::SECOND_OF_PAIR | flags::REVERSE);
        let batch = ReadBatch::from_reads(&[r]);
        assert!(batch.is_second_of_pair(0));
        assert!(batch.is_reverse(0));
        assert!(!batch.is_unmapped(0));
    }
}
