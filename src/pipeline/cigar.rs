use super::context::{ActiveLocationList, AlignmentWindow, NO_REFERENCE_OFFSET};
use super::stats::{PipelineStatistics, Stage, StageTimer};
use crate::exec::Parallelism;
use crate::genomics::{CigarOp, CigarOpKind, ReadBatch, ReferenceSequences};

/// What happened to one base (or one deleted reference position).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CigarEventKind {
    /// Read base equals the reference base.
    #[default]
    Match,
    /// Read base differs from the reference base.
    Mismatch,
    /// Read base absent from the reference.
    Insertion,
    /// Reference base absent from the read.
    Deletion,
    /// Soft-clipped read base.
    SoftClip,
}

/// One expanded CIGAR event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CigarEvent {
    /// Event kind.
    pub kind: CigarEventKind,
    /// Offset from the alignment start, or [`NO_REFERENCE_OFFSET`].
    pub reference_offset: u32,
}

/// Error indicators of one read base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseErrorFlags {
    /// Base mismatches the reference.
    pub snp: bool,
    /// An insertion is adjacent in sequencing order.
    pub insertion: bool,
    /// A deletion is adjacent in sequencing order.
    pub deletion: bool,
}

/// Expanded events of a batch plus per-base error indicators.
#[derive(Debug, Clone, Default)]
pub struct CigarExpansion {
    /// Start of each read's events in [`events`](Self::events), length `reads + 1`.
    pub event_offsets: Vec<u32>,
    /// Events of all active reads, concatenated.
    pub events: Vec<CigarEvent>,
    /// Indicators for every base of the batch.
    pub errors: Vec<BaseErrorFlags>,
}

impl CigarExpansion {
    /// Events of read `read`.
    pub fn read_events(&self, read: usize) -> &[CigarEvent] {
        let start = self.event_offsets[read] as usize;
        let end = self.event_offsets[read + 1] as usize;
        &self.events[start..end]
    }
}

/// Events emitted by one CIGAR.
pub fn event_count(cigar: &[CigarOp]) -> u32 {
    cigar
        .iter()
        .filter(|op| {
            op.kind.consumes_read() || op.kind == CigarOpKind::Deletion
        })
        .map(|op| op.len)
        .sum()
}

/// Fill `out` (one slot per read base) with each base's offset from the
/// alignment start; unaligned bases get [`NO_REFERENCE_OFFSET`].
pub fn reference_offsets_for_read(cigar: &[CigarOp], out: &mut [u32]) {
    out.fill(NO_REFERENCE_OFFSET);
    let mut read_offset = 0usize;
    let mut reference_offset = 0u32;
    for op in cigar {
        let len = op.len as usize;
        if op.kind.is_aligned() {
            for (i, slot) in out.iter_mut().skip(read_offset).take(len).enumerate() {
                *slot = reference_offset + i as u32;
            }
        }
        if op.kind.consumes_read() {
            read_offset += len;
        }
        if op.kind.consumes_reference() {
            reference_offset += op.len;
        }
    }
}

/// Mask of reads present in `active`.
pub fn active_read_mask(num_reads: usize, active: &[u32]) -> Vec<bool> {
    let mut mask = vec![false; num_reads];
    for &read in active {
        mask[read as usize] = true;
    }
    mask
}

/// Build the per-base reference-offset list and deactivate bases of
/// filtered reads and soft-clipped bases.
pub fn build_reference_offsets<E: Parallelism>(
    exec: &E,
    batch: &ReadBatch,
    active: &[u32],
    windows: &[AlignmentWindow],
    offsets: &mut [u32],
    locations: &mut ActiveLocationList,
) {
    let is_active = active_read_mask(batch.len(), active);
    exec.for_each_segment(batch.base_offsets(), offsets, |read, out| {
        if is_active[read] {
            reference_offsets_for_read(batch.cigar(read), out);
        } else {
            out.fill(NO_REFERENCE_OFFSET);
        }
    });

    for (read, &read_active) in is_active.iter().enumerate() {
        let range = batch.base_range(read);
        if !read_active {
            locations.deactivate_range(range);
            continue;
        }
        let window = &windows[read];
        let sequence_start = range.start + window.sequence_start as usize;
        let sequence_end = (range.start + window.sequence_end as usize).min(range.end);
        locations.deactivate_range(range.start..sequence_start.min(range.end));
        locations.deactivate_range(sequence_end.max(range.start)..range.end);
    }
}

fn expand_read(
    batch: &ReadBatch,
    reference: &ReferenceSequences,
    read: usize,
    out: &mut [CigarEvent],
) {
    let bases = batch.read_bases(read);
    let ref_id = batch.ref_ids()[read];
    let start = batch.alignment_starts()[read];

    let mut emitted = 0usize;
    let mut read_offset = 0usize;
    let mut reference_offset = 0u32;
    for op in batch.cigar(read) {
        for _ in 0..op.len {
            let event = match op.kind {
                CigarOpKind::Match | CigarOpKind::SequenceMatch | CigarOpKind::SequenceMismatch => {
                    let read_base = bases.get(read_offset).copied();
                    let ref_base = reference.base(ref_id, start + reference_offset);
                    let kind = if read_base.is_some() && read_base == ref_base {
                        CigarEventKind::Match
                    } else {
                        CigarEventKind::Mismatch
                    };
                    Some(CigarEvent {
                        kind,
                        reference_offset,
                    })
                }
                CigarOpKind::Insertion => Some(CigarEvent {
                    kind: CigarEventKind::Insertion,
                    reference_offset: NO_REFERENCE_OFFSET,
                }),
                CigarOpKind::Deletion => Some(CigarEvent {
                    kind: CigarEventKind::Deletion,
                    reference_offset,
                }),
                CigarOpKind::SoftClip => Some(CigarEvent {
                    kind: CigarEventKind::SoftClip,
                    reference_offset: NO_REFERENCE_OFFSET,
                }),
                CigarOpKind::Skip | CigarOpKind::HardClip | CigarOpKind::Padding => None,
            };
            if let Some(event) = event {
                out[emitted] = event;
                emitted += 1;
            }
            if op.kind.consumes_read() {
                read_offset += 1;
            }
            if op.kind.consumes_reference() {
                reference_offset += 1;
            }
        }
    }
    debug_assert_eq!(emitted, out.len());
}

/// Error indicators for one read from its expanded events.
///
/// Indels mark the base preceding them in sequencing order: the base
/// before on the forward strand, the base after on the reverse strand.
pub fn read_error_flags(
    cigar: &[CigarOp],
    events: &[CigarEvent],
    is_reverse: bool,
    out: &mut [BaseErrorFlags],
) {
    out.fill(BaseErrorFlags::default());
    let len = out.len() as isize;
    let mut mark = |index: isize, insertion: bool| {
        if (0..len).contains(&index) {
            let flags = &mut out[index as usize];
            if insertion {
                flags.insertion = true;
            } else {
                flags.deletion = true;
            }
        }
    };

    let mut read_pos = 0isize;
    for op in cigar {
        let op_len = op.len as isize;
        match op.kind {
            CigarOpKind::Deletion => {
                mark(if is_reverse { read_pos } else { read_pos - 1 }, false);
            }
            CigarOpKind::Insertion => {
                if !is_reverse {
                    mark(read_pos - 1, true);
                }
                read_pos += op_len;
                if is_reverse {
                    mark(read_pos, true);
                }
            }
            kind if kind.consumes_read() => read_pos += op_len,
            _ => {}
        }
    }

    let mut read_pos = 0usize;
    for event in events {
        match event.kind {
            CigarEventKind::Mismatch => {
                if let Some(flags) = out.get_mut(read_pos) {
                    flags.snp = true;
                }
                read_pos += 1;
            }
            CigarEventKind::Deletion => {}
            _ => read_pos += 1,
        }
    }
}

/// Expand the CIGARs of all active reads.
///
/// Per-read event counts go through an exclusive scan so each read writes
/// its own disjoint slice of the event array.
pub fn expand_cigars<E: Parallelism>(
    exec: &E,
    batch: &ReadBatch,
    reference: &ReferenceSequences,
    active: &[u32],
    expansion: &mut CigarExpansion,
    stats: &mut PipelineStatistics,
) {
    let timer = StageTimer::start(Stage::CigarExpansion);
    let is_active = active_read_mask(batch.len(), active);
    let reads: Vec<u32> = (0..batch.len() as u32).collect();
    let counts = exec.map(&reads, |&read| {
        if is_active[read as usize] {
            event_count(batch.cigar(read as usize))
        } else {
            0
        }
    });

    let (mut offsets, total) = exec.exclusive_scan(&counts);
    offsets.push(total);

    let mut events = std::mem::take(&mut expansion.events);
    events.clear();
    events.resize(total as usize, CigarEvent::default());
    exec.for_each_segment(&offsets, &mut events, |read, out| {
        if is_active[read] {
            expand_read(batch, reference, read, out);
        }
    });
    expansion.event_offsets = offsets;
    expansion.events = events;

    let mut errors = std::mem::take(&mut expansion.errors);
    errors.clear();
    errors.resize(batch.total_bases(), BaseErrorFlags::default());
    let expanded: &CigarExpansion = expansion;
    exec.for_each_segment(batch.base_offsets(), &mut errors, |read, out| {
        if is_active[read] {
            read_error_flags(
                batch.cigar(read),
                expanded.read_events(read),
                batch.is_reverse(read),
                out,
            );
        }
    });
    expansion.errors = errors;
    timer.stop(stats);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::parse_cigar;

    fn events_of(cigar: &str) -> Vec<CigarEvent> {
        let cigar = parse_cigar(cigar).unwrap();
        let mut out = vec![CigarEvent::default(); event_count(&cigar) as usize];
        let mut batch = ReadBatch::with_capacity(1);
        let read_len: u32 = cigar
            .iter()
            .filter(|op| op.kind.consumes_read())
            .map(|op| op.len)
            .sum();
        let bases = vec![b'A'; read_len as usize];
        let quals = vec![30; read_len as usize];
        batch.push_parts(0, 60, 0, 0, 0, &cigar, &bases, &quals);
        let reference = ReferenceSequences::from_fasta(b">chr1\nAAAACAAAAAAAAAAAAAAA\n").unwrap();
        expand_read(&batch, &reference, 0, &mut out);
        out
    }

    #[test]
    fn expansion_emits_one_event_per_consumed_position() {
        let events = events_of("2S3M1I2M1D2M3H");
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        use CigarEventKind::*;
        assert_eq!(
            kinds,
            vec![SoftClip, SoftClip, Match, Match, Match, Insertion, Match, Mismatch, Deletion, Match, Match]
        );
        assert_eq!(events[2].reference_offset, 0);
        assert_eq!(events[5].reference_offset, NO_REFERENCE_OFFSET);
        assert_eq!(events[8].reference_offset, 5);
    }

    #[test]
    fn hard_clips_and_zero_length_ops_emit_nothing() {
        assert!(events_of("5H").is_empty());
        assert_eq!(events_of("0M3M0I").len(), 3);
    }

    #[test]
    fn filtered_reads_get_no_events() {
        let reference =
            ReferenceSequences::from_fasta(b">chr1\nACGTACGTACGTACGTACGTACGTACGTACGT\n").unwrap();
        let mut batch = ReadBatch::with_capacity(3);
        for start in [0, 8, 16] {
            let cigar = parse_cigar("10M").unwrap();
            batch.push_parts(0, 60, 0, start, 0, &cigar, &[b'A'; 10], &[30; 10]);
        }
        let mut expansion = CigarExpansion::default();
        let mut stats = PipelineStatistics::new();

        expand_cigars(
            &crate::exec::SerialExecutor,
            &batch,
            &reference,
            &[1],
            &mut expansion,
            &mut stats,
        );

        assert!(expansion.read_events(0).is_empty());
        assert_eq!(expansion.read_events(1).len(), 10);
        assert!(expansion.read_events(2).is_empty());
        assert_eq!(expansion.events.len(), 10);
        assert!(expansion.errors[..10].iter().all(|f| !f.snp));
    }

    #[test]
    fn reference_offsets_skip_unaligned_bases() {
        let cigar = parse_cigar("2S2M1I1M2D2M").unwrap();
        let mut out = vec![0; 8];
        reference_offsets_for_read(&cigar, &mut out);
        let n = NO_REFERENCE_OFFSET;
        assert_eq!(out, vec![n, n, 0, 1, n, 2, 5, 6]);
    }

    #[test]
    fn indels_mark_the_preceding_base_in_sequencing_order() {
        let cigar = parse_cigar("3M1I2M1D2M").unwrap();
        let events = vec![CigarEvent::default(); 9];
        let mut forward = vec![BaseErrorFlags::default(); 8];
        read_error_flags(&cigar, &events, false, &mut forward);
        assert!(forward[2].insertion);
        assert!(forward[5].deletion);
        assert_eq!(forward.iter().filter(|f| f.insertion || f.deletion).count(), 2);

        let mut reverse = vec![BaseErrorFlags::default(); 8];
        read_error_flags(&cigar, &events, true, &mut reverse);
        assert!(reverse[4].insertion);
        assert!(reverse[6].deletion);
    }
}
