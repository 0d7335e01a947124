//! Per-read covariate values: event types, sequence context and machine cycle.

use std::fmt;

use crate::genomics::{base_code, complement, BASE_CODE_N};

/// Bases at either end of a read that never get an indel cycle.
pub const INDEL_CYCLE_CUSHION: usize = 4;

/// Kind of error event a table row counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// Base substitution.
    Mismatch = 0,
    /// Insertion.
    Insertion = 1,
    /// Deletion.
    Deletion = 2,
}

impl EventType {
    /// All event types in key order.
    pub const ALL: [EventType; 3] = [Self::Mismatch, Self::Insertion, Self::Deletion];

    /// Value stored in the key.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Position in [`ALL`](Self::ALL).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Mismatch),
            1 => Some(Self::Insertion),
            2 => Some(Self::Deletion),
            _ => None,
        }
    }

    /// Report symbol.
    pub fn as_char(self) -> char {
        match self {
            Self::Mismatch => 'M',
            Self::Insertion => 'I',
            Self::Deletion => 'D',
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Copy `bases` into `out`, replacing low-quality read ends with `N`.
///
/// Bases are masked from each end while their quality is at or below
/// `threshold`.
pub fn mask_low_quality_tails(bases: &[u8], quals: &[u8], threshold: u8, out: &mut Vec<u8>) {
    out.clear();
    out.extend_from_slice(bases);
    let len = bases.len().min(quals.len());

    let mut left = 0;
    while left < len && quals[left] <= threshold {
        out[left] = b'N';
        left += 1;
    }
    let mut right = len;
    while right > left && quals[right - 1] <= threshold {
        out[right - 1] = b'N';
        right -= 1;
    }
}

/// Pack a run of bases, 2 bits each with the first base most significant.
///
/// `None` if any base is not A/C/G/T.
pub fn pack_context(bases: &[u8]) -> Option<u32> {
    let mut value = 0u32;
    for &b in bases {
        let code = base_code(b);
        if code == BASE_CODE_N {
            return None;
        }
        value = (value << 2) | u32::from(code);
    }
    Some(value)
}

/// Render a packed context of `size` bases.
pub fn context_to_string(value: u32, size: usize) -> String {
    const BASES: [char; 4] = ['A', 'C', 'G', 'T'];
    (0..size)
        .rev()
        .map(|i| BASES[((value >> (2 * i)) & 3) as usize])
        .collect()
}

/// Context ending at each base, indexed by offset in stored orientation.
///
/// The context is read in sequencing orientation, so reverse-strand reads
/// use the reverse complement. Bases without `size - 1` predecessors get
/// `None`, as do contexts touching a masked tail or an ambiguous base.
pub fn read_contexts(
    bases: &[u8],
    quals: &[u8],
    is_reverse: bool,
    size: usize,
    low_quality_tail: u8,
) -> Vec<Option<u32>> {
    let len = bases.len();
    let mut oriented = Vec::with_capacity(len);
    mask_low_quality_tails(bases, quals, low_quality_tail, &mut oriented);
    if is_reverse {
        oriented.reverse();
        for b in &mut oriented {
            *b = complement(*b);
        }
    }

    let mut contexts = vec![None; len];
    for (i, slot) in (0..len).map(|i| if is_reverse { len - 1 - i } else { i }).enumerate() {
        if i + 1 >= size {
            contexts[slot] = pack_context(&oriented[i + 1 - size..=i]);
        }
    }
    contexts
}

/// Encode a signed cycle as `|c| << 1 | sign`; `None` beyond `maximum`.
pub fn encode_cycle(cycle: i32, maximum: u32) -> Option<u32> {
    let magnitude = cycle.unsigned_abs();
    if magnitude > maximum {
        return None;
    }
    Some((magnitude << 1) | u32::from(cycle < 0))
}

/// Inverse of [`encode_cycle`].
pub fn decode_cycle(value: u32) -> i32 {
    let magnitude = (value >> 1) as i32;
    if value & 1 == 1 {
        -magnitude
    } else {
        magnitude
    }
}

/// Encoded cycles per base for substitution and indel events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadCycles {
    /// Cycle for base substitutions.
    pub substitution: Vec<Option<u32>>,
    /// Cycle for insertions and deletions (undefined near read ends).
    pub indel: Vec<Option<u32>>,
}

/// Machine cycle of every base of a read of length `len`.
///
/// Cycles count from 1 in sequencing order and are negated for the second
/// read of a pair.
pub fn read_cycles(len: usize, is_reverse: bool, second_of_pair: bool, maximum: u32) -> ReadCycles {
    let order: i32 = if second_of_pair { -1 } else { 1 };
    let (mut cycle, step) = if is_reverse {
        (len as i32 * order, -order)
    } else {
        (order, order)
    };

    let mut cycles = ReadCycles {
        substitution: Vec::with_capacity(len),
        indel: Vec::with_capacity(len),
    };
    for i in 0..len {
        let key = encode_cycle(cycle, maximum);
        cycles.substitution.push(key);
        let cushioned = i < INDEL_CYCLE_CUSHION || i + INDEL_CYCLE_CUSHION >= len;
        cycles.indel.push(if cushioned { None } else { key });
        cycle += step;
    }
    cycles
}
