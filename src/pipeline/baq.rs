//! Base alignment quality.
//!
//! A glocal pair-HMM (match / insertion / deletion states) aligns the
//! aligned part of each read against a slightly widened reference window.
//! Forward and backward passes run in natural-log space over a band around
//! the diagonal; the posterior of the best state per base yields a Phred
//! score that caps the reported quality where alignment is uncertain.

use thiserror::Error;
use tracing::debug;

use super::context::AlignmentWindow;
use super::stats::{PipelineStatistics, Stage, StageTimer};
use crate::exec::Parallelism;
use crate::genomics::{base_code, CigarOp, CigarOpKind, ReadBatch, ReferenceSequences};
use crate::options::BaqOptions;

/// Emission probability of a mismatching base, given the base is wrong.
const EM: f64 = 1.0 / 3.0;
/// Emission probability of an inserted base.
const EI: f64 = 0.25;

const MATCH: usize = 0;
const INSERTION: usize = 1;
const DELETION: usize = 2;

/// Per-read BAQ failures. These never abort a batch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BaqError {
    /// Forward and backward totals disagree.
    #[error("forward ({forward:.6}) and backward ({backward:.6}) log-likelihoods diverge")]
    Divergence {
        /// Forward total log-likelihood.
        forward: f64,
        /// Backward total log-likelihood.
        backward: f64,
    },
    /// Nothing to align.
    #[error("empty query or reference window")]
    EmptyInput,
    /// Query and quality lengths differ.
    #[error("query has {bases} bases but {quals} qualities")]
    LengthMismatch {
        /// Query length.
        bases: usize,
        /// Quality length.
        quals: usize,
    },
}

/// Result of aligning one query.
#[derive(Debug, Clone, PartialEq)]
pub struct HmmAlignment {
    /// MAP state per query base: `(reference index << 2) | state`, where
    /// state 0 is match and 1 is insertion.
    pub states: Vec<u32>,
    /// Posterior Phred quality of each MAP state.
    pub qualities: Vec<u8>,
    /// Forward total log-likelihood.
    pub forward: f64,
    /// Backward total log-likelihood.
    pub backward: f64,
}

/// Whether a MAP state is an insertion.
pub fn state_is_indel(state: u32) -> bool {
    state & 3 != 0
}

/// Reference index of a MAP state.
pub fn state_position(state: u32) -> u32 {
    state >> 2
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Three-state cells for rows `0..=query_len`, each row holding the band
/// around the diagonal. Cells outside the band read as `-inf`.
struct BandedMatrix {
    band: usize,
    width: usize,
    cells: Vec<f64>,
}

impl BandedMatrix {
    fn new(rows: usize, band: usize) -> Self {
        let width = 2 * band + 1;
        Self {
            band,
            width,
            cells: vec![f64::NEG_INFINITY; rows * width * 3],
        }
    }

    fn slot(&self, i: usize, k: usize) -> Option<usize> {
        let first = i.saturating_sub(self.band);
        if k < first || k - first >= self.width {
            return None;
        }
        Some((i * self.width + (k - first)) * 3)
    }

    fn get(&self, i: usize, k: usize, state: usize) -> f64 {
        self.slot(i, k)
            .map_or(f64::NEG_INFINITY, |s| self.cells[s + state])
    }

    fn set(&mut self, i: usize, k: usize, state: usize, value: f64) {
        if let Some(s) = self.slot(i, k) {
            self.cells[s + state] = value;
        }
    }
}

/// Banded glocal pair-HMM.
#[derive(Debug, Clone, PartialEq)]
pub struct BaqHmm {
    gap_open: f64,
    gap_extension: f64,
    band_radius: usize,
    min_base_quality: u8,
    tolerance: f64,
}

impl BaqHmm {
    /// HMM configured from `options`.
    pub fn new(options: &BaqOptions) -> Self {
        Self {
            gap_open: options.gap_open,
            gap_extension: options.gap_extension,
            band_radius: options.band_radius as usize,
            min_base_quality: options.min_base_quality,
            tolerance: options.tolerance,
        }
    }

    /// Align `query` (2-bit codes, 4 = N) with qualities `quals` against
    /// `reference` (2-bit codes).
    pub fn align(
        &self,
        reference: &[u8],
        query: &[u8],
        quals: &[u8],
    ) -> Result<HmmAlignment, BaqError> {
        let (l_ref, l_query) = (reference.len(), query.len());
        if l_ref == 0 || l_query == 0 {
            return Err(BaqError::EmptyInput);
        }
        if quals.len() != l_query {
            return Err(BaqError::LengthMismatch {
                bases: l_query,
                quals: quals.len(),
            });
        }

        let band = self.band_radius.max(l_ref.abs_diff(l_query));
        let (d, e) = (self.gap_open, self.gap_extension);
        let s = 1.0 / (2.0 * l_query as f64 + 2.0);
        let ln_s = s.ln();
        let ln_begin_match = ((1.0 - d) / l_ref as f64).ln();
        let ln_begin_insertion = (d / l_ref as f64).ln();
        let ln_ei = EI.ln();
        // Transition (from, to) in log space; I<->D transitions are impossible.
        let t = [
            [((1.0 - 2.0 * d) * (1.0 - s)).ln(), (d * (1.0 - s)).ln(), (d * (1.0 - s)).ln()],
            [((1.0 - e) * (1.0 - s)).ln(), (e * (1.0 - s)).ln(), f64::NEG_INFINITY],
            [(1.0 - e).ln(), f64::NEG_INFINITY, e.ln()],
        ];

        let error: Vec<f64> = quals
            .iter()
            .map(|&q| 10f64.powf(-f64::from(q.max(self.min_base_quality)) / 10.0))
            .collect();
        // i and k are 1-based.
        let emission = |i: usize, k: usize| -> f64 {
            let (r, q) = (reference[k - 1], query[i - 1]);
            if r > 3 || q > 3 {
                0.0
            } else if r == q {
                (1.0 - error[i - 1]).ln()
            } else {
                (error[i - 1] * EM).ln()
            }
        };
        let band_of = |i: usize| -> (usize, usize) {
            let lo = i.saturating_sub(band).max(1);
            let hi = (i + band).min(l_ref);
            (lo, hi)
        };

        // Forward.
        let mut f = BandedMatrix::new(l_query + 1, band);
        let (lo, hi) = band_of(1);
        for k in lo..=hi {
            f.set(1, k, MATCH, emission(1, k) + ln_begin_match);
            f.set(1, k, INSERTION, ln_ei + ln_begin_insertion);
        }
        for i in 2..=l_query {
            let (lo, hi) = band_of(i);
            for k in lo..=hi {
                let m = emission(i, k)
                    + log_sum_exp(&[
                        t[MATCH][MATCH] + f.get(i - 1, k - 1, MATCH),
                        t[INSERTION][MATCH] + f.get(i - 1, k - 1, INSERTION),
                        t[DELETION][MATCH] + f.get(i - 1, k - 1, DELETION),
                    ]);
                let ins = ln_ei
                    + log_sum_exp(&[
                        t[MATCH][INSERTION] + f.get(i - 1, k, MATCH),
                        t[INSERTION][INSERTION] + f.get(i - 1, k, INSERTION),
                    ]);
                let del = log_sum_exp(&[
                    t[MATCH][DELETION] + f.get(i, k - 1, MATCH),
                    t[DELETION][DELETION] + f.get(i, k - 1, DELETION),
                ]);
                f.set(i, k, MATCH, m);
                f.set(i, k, INSERTION, ins);
                f.set(i, k, DELETION, del);
            }
        }
        let (lo, hi) = band_of(l_query);
        let ends: Vec<f64> = (lo..=hi)
            .flat_map(|k| {
                [
                    f.get(l_query, k, MATCH) + ln_s,
                    f.get(l_query, k, INSERTION) + ln_s,
                ]
            })
            .collect();
        let forward = log_sum_exp(&ends);

        // Backward.
        let mut b = BandedMatrix::new(l_query + 1, band);
        for k in lo..=hi {
            b.set(l_query, k, MATCH, ln_s);
            b.set(l_query, k, INSERTION, ln_s);
        }
        for i in (1..l_query).rev() {
            let (lo, hi) = band_of(i);
            for k in (lo..=hi).rev() {
                let next_match = if k < l_ref {
                    emission(i + 1, k + 1) + b.get(i + 1, k + 1, MATCH)
                } else {
                    f64::NEG_INFINITY
                };
                let next_insertion = ln_ei + b.get(i + 1, k, INSERTION);
                let m = log_sum_exp(&[
                    next_match + t[MATCH][MATCH],
                    next_insertion + t[MATCH][INSERTION],
                    t[MATCH][DELETION] + b.get(i, k + 1, DELETION),
                ]);
                let ins = log_sum_exp(&[
                    next_match + t[INSERTION][MATCH],
                    next_insertion + t[INSERTION][INSERTION],
                ]);
                // A read cannot open with a deletion.
                let del = if i > 1 {
                    log_sum_exp(&[
                        next_match + t[DELETION][MATCH],
                        t[DELETION][DELETION] + b.get(i, k + 1, DELETION),
                    ])
                } else {
                    f64::NEG_INFINITY
                };
                b.set(i, k, MATCH, m);
                b.set(i, k, INSERTION, ins);
                b.set(i, k, DELETION, del);
            }
        }
        let (lo, hi) = band_of(1);
        let starts: Vec<f64> = (lo..=hi)
            .flat_map(|k| {
                [
                    emission(1, k) + b.get(1, k, MATCH) + ln_begin_match,
                    ln_ei + b.get(1, k, INSERTION) + ln_begin_insertion,
                ]
            })
            .collect();
        let backward = log_sum_exp(&starts);

        if !forward.is_finite()
            || !backward.is_finite()
            || (forward - backward).abs() > self.tolerance
        {
            return Err(BaqError::Divergence { forward, backward });
        }

        // Posterior MAP state per base.
        let mut states = Vec::with_capacity(l_query);
        let mut qualities = Vec::with_capacity(l_query);
        let mut row = Vec::with_capacity(2 * (2 * band + 1));
        for i in 1..=l_query {
            let (lo, hi) = band_of(i);
            row.clear();
            let mut best = f64::NEG_INFINITY;
            let mut best_state = 0u32;
            for k in lo..=hi {
                for state in [MATCH, INSERTION] {
                    let z = f.get(i, k, state) + b.get(i, k, state);
                    row.push(z);
                    if z > best {
                        best = z;
                        best_state = (((k - 1) as u32) << 2) | state as u32;
                    }
                }
            }
            let posterior = (best - log_sum_exp(&row)).exp();
            states.push(best_state);
            qualities.push(posterior_quality(posterior));
        }

        Ok(HmmAlignment {
            states,
            qualities,
            forward,
            backward,
        })
    }
}

/// Phred score of a MAP posterior; near-certain states read as 99.
fn posterior_quality(posterior: f64) -> u8 {
    let error = 1.0 - posterior;
    if error <= 0.0 {
        return 99;
    }
    let q = (-4.343 * error.ln() + 0.499) as i64;
    if q > 100 {
        99
    } else {
        q.clamp(0, 99) as u8
    }
}

/// Cap a reported quality by its BAQ.
///
/// Bases whose MAP state is an insertion, or a match at an unexpected
/// reference index, drop to `floor`.
pub fn cap_base_by_baq(reported: u8, baq: u8, state: u32, expected_position: u32, floor: u8) -> u8 {
    if state_is_indel(state) || state_position(state) != expected_position {
        floor
    } else {
        baq.min(reported)
    }
}

/// Outcome of BAQ for one read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadBaq {
    /// Not computed; qualities stay as reported.
    Skipped,
    /// Per-base BAQ-capped qualities.
    Computed(Vec<u8>),
    /// The HMM failed; qualities stay as reported.
    Failed(BaqError),
}

fn leading_insertion(cigar: &[CigarOp]) -> u32 {
    cigar
        .iter()
        .find(|op| !matches!(op.kind, CigarOpKind::SoftClip | CigarOpKind::HardClip))
        .filter(|op| op.kind == CigarOpKind::Insertion)
        .map_or(0, |op| op.len)
}

fn trailing_insertion(cigar: &[CigarOp]) -> u32 {
    cigar
        .iter()
        .rev()
        .find(|op| !matches!(op.kind, CigarOpKind::SoftClip | CigarOpKind::HardClip))
        .filter(|op| op.kind == CigarOpKind::Insertion)
        .map_or(0, |op| op.len)
}

/// BAQ of one read already known to pass the read filter.
pub fn read_baq(
    hmm: &BaqHmm,
    options: &BaqOptions,
    batch: &ReadBatch,
    reference: &ReferenceSequences,
    windows: &[AlignmentWindow],
    read: usize,
) -> ReadBaq {
    if options
        .skip_mapq_at_least
        .is_some_and(|threshold| batch.mapq()[read] >= threshold)
    {
        return ReadBaq::Skipped;
    }
    let Some(sequence) = reference.sequence(batch.ref_ids()[read]) else {
        return ReadBaq::Skipped;
    };
    let window = &windows[read];
    if window.sequence_end <= window.sequence_start {
        return ReadBaq::Skipped;
    }

    let cigar = batch.cigar(read);
    let flank = options.band_radius / 2;
    let ref_start = window
        .reference_start
        .saturating_sub(flank + leading_insertion(cigar));
    let ref_end = (window.reference_end + flank + trailing_insertion(cigar))
        .min(sequence.len() as u32);
    let ref_codes: Vec<u8> = (ref_start..ref_end)
        .filter_map(|p| sequence.code_at(p as usize))
        .collect();

    let bases = batch.read_bases(read);
    let quals = batch.read_qualities(read);
    let query_range = window.sequence_start as usize..window.sequence_end as usize;
    let query: Vec<u8> = bases[query_range.clone()].iter().map(|&b| base_code(b)).collect();

    let alignment = match hmm.align(&ref_codes, &query, &quals[query_range.clone()]) {
        Ok(alignment) => alignment,
        Err(err) => return ReadBaq::Failed(err),
    };

    let mut capped = quals.to_vec();
    let shift = window.reference_start - ref_start;
    let mut read_offset = 0usize;
    let mut reference_offset = 0u32;
    for op in cigar {
        match op.kind {
            CigarOpKind::Match | CigarOpKind::SequenceMatch | CigarOpKind::SequenceMismatch => {
                for j in 0..op.len as usize {
                    let offset = read_offset + j;
                    let q = offset - query_range.start;
                    let expected = reference_offset + j as u32 + shift;
                    capped[offset] = cap_base_by_baq(
                        quals[offset],
                        alignment.qualities[q],
                        alignment.states[q],
                        expected,
                        options.min_base_quality,
                    );
                }
                read_offset += op.len as usize;
                reference_offset += op.len;
            }
            CigarOpKind::Insertion | CigarOpKind::SoftClip => read_offset += op.len as usize,
            CigarOpKind::Deletion | CigarOpKind::Skip => reference_offset += op.len,
            CigarOpKind::HardClip | CigarOpKind::Padding => {}
        }
    }
    ReadBaq::Computed(capped)
}

/// Fill `out` with per-base BAQ-capped qualities for the batch.
///
/// Bases of inactive, skipped or failed reads keep their reported quality.
#[allow(clippy::too_many_arguments)]
pub fn compute_baq<E: Parallelism>(
    exec: &E,
    options: &BaqOptions,
    batch: &ReadBatch,
    reference: &ReferenceSequences,
    active: &[u32],
    windows: &[AlignmentWindow],
    out: &mut Vec<u8>,
    stats: &mut PipelineStatistics,
) {
    let timer = StageTimer::start(Stage::Baq);
    out.clear();
    out.resize(batch.total_bases(), 0);
    exec.for_each_segment(batch.base_offsets(), out, |read, segment| {
        let quals = batch.read_qualities(read);
        let n = segment.len().min(quals.len());
        segment[..n].copy_from_slice(&quals[..n]);
    });

    if options.enabled {
        let hmm = BaqHmm::new(options);
        let outcomes = exec.map(active, |&read| {
            read_baq(&hmm, options, batch, reference, windows, read as usize)
        });
        for (&read, outcome) in active.iter().zip(outcomes) {
            match outcome {
                ReadBaq::Computed(quals) => {
                    out[batch.base_range(read as usize)].copy_from_slice(&quals);
                    stats.baq_reads += 1;
                }
                ReadBaq::Failed(err) => {
                    debug!(read, error = %err, "BAQ skipped for read");
                    stats.baq_failures += 1;
                }
                ReadBaq::Skipped => {}
            }
        }
    }
    timer.stop(stats);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(s: &[u8]) -> Vec<u8> {
        s.iter().map(|&b| base_code(b)).collect()
    }

    #[test]
    fn perfect_match_is_confident_and_on_diagonal() {
        let hmm = BaqHmm::new(&BaqOptions::default());
        let reference = codes(b"GGGACGTTGCATGCAAGTCCCC");
        let query = codes(b"ACGTTGCATGCAAGT");
        let alignment = hmm.align(&reference, &query, &[30; 15]).unwrap();

        assert!((alignment.forward - alignment.backward).abs() < 1e-3);
        for (i, &state) in alignment.states.iter().enumerate() {
            assert!(!state_is_indel(state));
            assert_eq!(state_position(state), i as u32 + 3);
        }
        assert!(alignment.qualities[7] >= 30, "{:?}", alignment.qualities);
    }

    #[test]
    fn empty_inputs_fail() {
        let hmm = BaqHmm::new(&BaqOptions::default());
        assert_eq!(hmm.align(&[], &[0], &[30]), Err(BaqError::EmptyInput));
        assert!(matches!(
            hmm.align(&[0, 1], &[0], &[30, 30]),
            Err(BaqError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn capping_rules() {
        let on_diagonal = 10 << 2;
        assert_eq!(cap_base_by_baq(30, 20, on_diagonal, 10, 4), 20);
        assert_eq!(cap_base_by_baq(15, 20, on_diagonal, 10, 4), 15);
        assert_eq!(cap_base_by_baq(30, 20, on_diagonal, 11, 4), 4);
        assert_eq!(cap_base_by_baq(30, 20, on_diagonal | 1, 10, 4), 4);
    }

    #[test]
    fn posterior_quality_saturates() {
        assert_eq!(posterior_quality(1.0), 99);
        assert_eq!(posterior_quality(0.0), 0);
        assert_eq!(posterior_quality(0.999), 30);
    }
}
