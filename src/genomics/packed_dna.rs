use std::fmt;

use bitvec::prelude::*;
use thiserror::Error;

/// Base code used for anything that is not A/C/G/T.
pub const BASE_CODE_N: u8 = 4;

const ASCII_BY_CODE: [u8; 5] = *b"ACGTN";

/// One bit per position, set where the reference carried an IUPAC code or `N`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbiguityMask {
    bits: BitVec<u64, Lsb0>,
}

impl AmbiguityMask {
    /// Number of ambiguous positions.
    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    /// Whether position `idx` is ambiguous.
    pub fn contains(&self, idx: usize) -> bool {
        self.bits.get(idx).map(|bit| *bit).unwrap_or(false)
    }
}

/// Errors that can occur while packing DNA sequences.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackedDnaError {
    /// Encountered a byte that is not a nucleotide code at all.
    #[error("unsupported nucleotide '{0}' at position {1}")]
    UnsupportedBase(char, usize),
}

/// Reference contig held at two bits per base.
///
/// Ambiguous positions keep a zero code in `codes` and are flagged in the
/// mask, so every read of the sequence goes through [`PackedSequence::code_at`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedSequence {
    codes: BitVec<u64, Lsb0>,
    ambiguity: AmbiguityMask,
}

impl PackedSequence {
    /// Pack an ASCII sequence.
    pub fn pack(sequence: &[u8]) -> Result<Self, PackedDnaError> {
        let mut packed = Self::with_capacity(sequence.len());
        packed.extend_from_slice(sequence)?;
        Ok(packed)
    }

    /// Empty sequence with room for `len` bases.
    pub fn with_capacity(len: usize) -> Self {
        Self {
            codes: BitVec::with_capacity(len * 2),
            ambiguity: AmbiguityMask {
                bits: BitVec::with_capacity(len),
            },
        }
    }

    /// Number of bases.
    pub fn len(&self) -> usize {
        self.ambiguity.bits.len()
    }

    /// Returns `true` when no bases are stored.
    pub fn is_empty(&self) -> bool {
        self.ambiguity.bits.is_empty()
    }

    /// Positions that hold an ambiguity code.
    pub fn ambiguity(&self) -> &AmbiguityMask {
        &self.ambiguity
    }

    /// Code (0..=3) of the base at `idx`, or [`BASE_CODE_N`] when ambiguous.
    pub fn code_at(&self, idx: usize) -> Option<u8> {
        if *self.ambiguity.bits.get(idx)? {
            return Some(BASE_CODE_N);
        }
        let pair = &self.codes[idx * 2..idx * 2 + 2];
        Some(pair.load_le::<u8>())
    }

    /// Uppercase ASCII base at `idx`.
    pub fn base_at(&self, idx: usize) -> Option<u8> {
        self.code_at(idx).map(|code| ASCII_BY_CODE[code as usize])
    }

    /// Decode `[start, end)` into `out` (cleared first). Positions past the end are dropped.
    pub fn decode_range(&self, start: usize, end: usize, out: &mut Vec<u8>) {
        out.clear();
        let end = end.min(self.len());
        if start >= end {
            return;
        }
        out.reserve(end - start);
        out.extend((start..end).filter_map(|idx| self.base_at(idx)));
    }

    /// Decode the whole sequence.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.decode_range(0, self.len(), &mut out);
        out
    }

    /// Append a single base.
    pub fn push(&mut self, base: u8) -> Result<(), PackedDnaError> {
        let position = self.len();
        let code = match base_code(base) {
            BASE_CODE_N if is_ambiguity_code(base) => None,
            BASE_CODE_N => return Err(PackedDnaError::UnsupportedBase(base as char, position)),
            code => Some(code),
        };
        let bits = code.unwrap_or(0);
        self.codes.push(bits & 0b01 != 0);
        self.codes.push(bits & 0b10 != 0);
        self.ambiguity.bits.push(code.is_none());
        Ok(())
    }

    /// Append every base of `sequence`, stopping at the first unsupported byte.
    pub fn extend_from_slice(&mut self, sequence: &[u8]) -> Result<(), PackedDnaError> {
        self.codes.reserve(sequence.len() * 2);
        self.ambiguity.bits.reserve(sequence.len());
        sequence.iter().try_for_each(|&base| self.push(base))
    }
}

impl fmt::Display for PackedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (0..self.len())
            .filter_map(|idx| self.base_at(idx))
            .try_for_each(|base| write!(f, "{}", base as char))
    }
}

/// Code of an ASCII base (A=0, C=1, G=2, T/U=3, anything else [`BASE_CODE_N`]).
pub fn base_code(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' | b'U' => 3,
        _ => BASE_CODE_N,
    }
}

/// Whether `base` is one of A/C/G/T (either case).
pub fn is_regular_base(base: u8) -> bool {
    base_code(base) < BASE_CODE_N
}

/// Complement of an ASCII base; anything irregular maps to `N`.
pub fn complement(base: u8) -> u8 {
    match base_code(base) {
        BASE_CODE_N => b'N',
        code => ASCII_BY_CODE[(3 - code) as usize],
    }
}

// IUPAC ambiguity letters plus the gap characters some FASTA writers emit.
fn is_ambiguity_code(base: u8) -> bool {
    matches!(
        base.to_ascii_uppercase(),
        b'N' | b'R' | b'Y' | b'K' | b'M' | b'S' | b'W' | b'B' | b'D' | b'H' | b'V' | b'.' | b'-'
    )
}
