use super::context::AlignmentWindow;
use crate::exec::Parallelism;
use crate::genomics::{CigarOp, CigarOpKind, ReadBatch, INVALID_POS};

/// Window of one alignment starting at `start`.
///
/// Reads without a position get an empty reference window so the
/// malformed-read checks reject them.
pub fn alignment_window(start: u32, cigar: &[CigarOp]) -> AlignmentWindow {
    let mut reference_len = 0u32;
    let mut read_offset = 0u32;
    let mut sequence = None::<(u32, u32)>;

    for op in cigar {
        if op.kind.consumes_reference() {
            reference_len += op.len;
        }
        if op.kind.consumes_read() {
            if op.kind != CigarOpKind::SoftClip && op.len > 0 {
                let end = read_offset + op.len;
                sequence = Some(match sequence {
                    Some((first, _)) => (first, end),
                    None => (read_offset, end),
                });
            }
            read_offset += op.len;
        }
    }

    let (sequence_start, sequence_end) = sequence.unwrap_or((read_offset, read_offset));
    let (reference_start, reference_end) = if start == INVALID_POS {
        (0, 0)
    } else {
        (start, start.saturating_add(reference_len))
    };
    AlignmentWindow {
        reference_start,
        reference_end,
        sequence_start,
        sequence_end,
    }
}

/// Windows for every read in the batch, indexed by read.
pub fn compute_alignment_windows<E: Parallelism>(
    exec: &E,
    batch: &ReadBatch,
    reads: &[u32],
) -> Vec<AlignmentWindow> {
    let starts = batch.alignment_starts();
    let computed = exec.map(reads, |&read| {
        let read = read as usize;
        alignment_window(starts[read], batch.cigar(read))
    });

    let mut windows = vec![AlignmentWindow::default(); batch.len()];
    for (&read, window) in reads.iter().zip(computed) {
        windows[read as usize] = window;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::parse_cigar;

    fn window(start: u32, cigar: &str) -> AlignmentWindow {
        alignment_window(start, &parse_cigar(cigar).unwrap())
    }

    #[test]
    fn simple_match() {
        let w = window(100, "50M");
        assert_eq!(w.reference(), 100..150);
        assert_eq!(w.sequence(), 0..50);
    }

    #[test]
    fn clips_and_indels() {
        let w = window(10, "5H3S10M2I5M4D6M2S");
        assert_eq!(w.reference(), 10..35);
        assert_eq!(w.sequence(), 3..26);
    }

    #[test]
    fn clip_only_and_unplaced_reads_have_empty_reference_windows() {
        let w = window(10, "20S");
        assert_eq!(w.reference(), 10..10);
        assert!(w.sequence().is_empty());

        let w = window(INVALID_POS, "20M");
        assert!(w.reference().is_empty());
    }
}
