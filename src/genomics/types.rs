use std::fmt;

use thiserror::Error;

/// SAM flag bits consulted by the pipeline.
pub mod flags {
    /// Template has multiple segments.
    pub const PAIRED: u16 = 0x1;
    /// Segment is unmapped.
    pub const UNMAPPED: u16 = 0x4;
    /// Sequence is reverse complemented.
    pub const REVERSE: u16 = 0x10;
    /// First segment in the template.
    pub const FIRST_OF_PAIR: u16 = 0x40;
    /// Last segment in the template.
    pub const SECOND_OF_PAIR: u16 = 0x80;
    /// Secondary alignment.
    pub const SECONDARY: u16 = 0x100;
    /// Not passing platform quality checks.
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate.
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment.
    pub const SUPPLEMENTARY: u16 = 0x800;
}

/// Mapping quality meaning "not available".
pub const MAPQ_UNAVAILABLE: u8 = 255;

/// CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOpKind {
    /// Alignment match (`M`), may be a sequence match or mismatch.
    Match,
    /// Insertion relative to the reference (`I`).
    Insertion,
    /// Deletion relative to the reference (`D`).
    Deletion,
    /// Skipped reference region (`N`).
    Skip,
    /// Soft clipping (`S`, sequence present in read only).
    SoftClip,
    /// Hard clipping (`H`, trimmed sequence not present in read).
    HardClip,
    /// Silent padding (`P`).
    Padding,
    /// Sequence match (`=`).
    SequenceMatch,
    /// Sequence mismatch (`X`).
    SequenceMismatch,
}

impl CigarOpKind {
    /// Whether the operation consumes reference bases.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            Self::Match | Self::Deletion | Self::Skip | Self::SequenceMatch | Self::SequenceMismatch
        )
    }

    /// Whether the operation consumes read bases.
    pub fn consumes_read(self) -> bool {
        matches!(
            self,
            Self::Match
                | Self::Insertion
                | Self::SoftClip
                | Self::SequenceMatch
                | Self::SequenceMismatch
        )
    }

    /// Aligned (match/mismatch) operations.
    pub fn is_aligned(self) -> bool {
        matches!(
            self,
            Self::Match | Self::SequenceMatch | Self::SequenceMismatch
        )
    }

    /// SAM character for the operation.
    pub fn as_char(self) -> char {
        match self {
            Self::Match => 'M',
            Self::Insertion => 'I',
            Self::Deletion => 'D',
            Self::Skip => 'N',
            Self::SoftClip => 'S',
            Self::HardClip => 'H',
            Self::Padding => 'P',
            Self::SequenceMatch => '=',
            Self::SequenceMismatch => 'X',
        }
    }

    /// Parse a SAM CIGAR character.
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'M' => Self::Match,
            'I' => Self::Insertion,
            'D' => Self::Deletion,
            'N' => Self::Skip,
            'S' => Self::SoftClip,
            'H' => Self::HardClip,
            'P' => Self::Padding,
            '=' => Self::SequenceMatch,
            'X' => Self::SequenceMismatch,
            _ => return None,
        })
    }
}

/// One run-length CIGAR element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CigarOp {
    /// What the run does.
    pub kind: CigarOpKind,
    /// Run length.
    pub len: u32,
}

impl CigarOp {
    /// A run of `len` bases of `kind`.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len, self.kind.as_char())
    }
}

/// Errors produced while parsing textual CIGAR strings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CigarParseError {
    /// Operation character outside the SAM alphabet.
    #[error("unknown CIGAR operation '{0}'")]
    UnknownOperation(char),
    /// Operation without a preceding length.
    #[error("CIGAR operation '{0}' has no length")]
    MissingLength(char),
    /// Trailing digits without an operation.
    #[error("CIGAR string ends with a dangling length")]
    DanglingLength,
}

/// Parse a SAM CIGAR string such as `10S80M2I8M`. `*` yields an empty CIGAR.
pub fn parse_cigar(text: &str) -> Result<Vec<CigarOp>, CigarParseError> {
    if text == "*" {
        return Ok(Vec::new());
    }

    let mut ops = Vec::new();
    let mut len: Option<u32> = None;
    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            len = Some(len.unwrap_or(0).saturating_mul(10).saturating_add(digit));
            continue;
        }
        let kind = CigarOpKind::from_char(c).ok_or(CigarParseError::UnknownOperation(c))?;
        let op_len = len.take().ok_or(CigarParseError::MissingLength(c))?;
        ops.push(CigarOp::new(kind, op_len));
    }

    if len.is_some() {
        return Err(CigarParseError::DanglingLength);
    }
    Ok(ops)
}

/// One SAM/BAM record, reduced to the fields recalibration reads.
///
/// This is the row-oriented form of a read; batches store the same data
/// column-wise (see [`ReadBatch`](crate::genomics::ReadBatch)).
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRead {
    /// SAM flags.
    pub flags: u16,
    /// Reference sequence id, `None` when unplaced.
    pub ref_id: Option<u32>,
    /// 0-based leftmost reference coordinate, `None` when unplaced.
    pub pos: Option<u32>,
    /// Phred-scaled MAPQ; 255 means unavailable.
    pub mapq: u8,
    /// Alignment against the reference contig.
    pub cigar: Vec<CigarOp>,
    /// Bases as sequenced (ASCII, forward strand of the reference).
    pub sequence: Vec<u8>,
    /// Reported base qualities, one per base.
    pub qualities: Vec<u8>,
    /// Interned read group id, `None` when the read carries no `RG` tag.
    pub read_group: Option<u32>,
}

impl AlignedRead {
    /// Construct a mapped read on `ref_id` at `pos`.
    pub fn new(
        ref_id: u32,
        pos: u32,
        mapq: u8,
        cigar: Vec<CigarOp>,
        sequence: impl Into<Vec<u8>>,
        qualities: impl Into<Vec<u8>>,
        read_group: u32,
    ) -> Self {
        let mut sequence = sequence.into();
        sequence.make_ascii_uppercase();
        Self {
            flags: 0,
            ref_id: Some(ref_id),
            pos: Some(pos),
            mapq,
            cigar,
            sequence,
            qualities: qualities.into(),
            read_group: Some(read_group),
        }
    }

    /// Replace the SAM flags.
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Number of bases in the record.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the read carries no bases.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// `true` when the REVERSE flag is set.
    pub fn is_reverse(&self) -> bool {
        self.flags & flags::REVERSE != 0
    }

    /// ASCII base at `offset`.
    pub fn base_at(&self, offset: usize) -> Option<u8> {
        self.sequence.get(offset).copied()
    }

    /// Reported quality at `offset`.
    pub fn quality_at(&self, offset: usize) -> Option<u8> {
        self.qualities.get(offset).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_cigar() {
        let ops = parse_cigar("5S90M2I3D1M").unwrap();
        assert_eq!(
            ops,
            vec![
                CigarOp::new(CigarOpKind::SoftClip, 5),
                CigarOp::new(CigarOpKind::Match, 90),
                CigarOp::new(CigarOpKind::Insertion, 2),
                CigarOp::new(CigarOpKind::Deletion, 3),
                CigarOp::new(CigarOpKind::Match, 1),
            ]
        );
        let rendered: String = ops.iter().map(|op| op.to_string()).collect();
        assert_eq!(rendered, "5S90M2I3D1M");
    }

    #[test]
    fn rejects_malformed_cigar() {
        assert_eq!(parse_cigar("M"), Err(CigarParseError::MissingLength('M')));
        assert_eq!(parse_cigar("10M5"), Err(CigarParseError::DanglingLength));
        assert_eq!(parse_cigar("10Q"), Err(CigarParseError::UnknownOperation('Q')));
        assert!(parse_cigar("*").unwrap().is_empty());
    }

    #[test]
    fn consumption_table() {
        assert!(CigarOpKind::Deletion.consumes_reference());
        assert!(!CigarOpKind::Deletion.consumes_read());
        assert!(CigarOpKind::Insertion.consumes_read());
        assert!(!CigarOpKind::HardClip.consumes_read());
        assert!(CigarOpKind::SequenceMismatch.is_aligned());
    }
}
