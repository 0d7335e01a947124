//! Known-variant database used to exclude polymorphic sites from recalibration.

use std::fs::File;
use std::ops::Range;
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, warn};

use super::reference::ReferenceSequences;

/// Errors raised while loading the variant database.
#[derive(Debug, Error)]
pub enum VariantDatabaseError {
    /// The file could not be opened, mapped or read.
    #[error("failed to read known sites {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A data line had fewer than five columns.
    #[error("line {0}: expected at least 5 tab-separated columns")]
    TruncatedLine(usize),
    /// POS column was not a positive integer.
    #[error("line {line}: invalid position '{value}'")]
    InvalidPosition {
        /// 1-based line number.
        line: usize,
        /// Offending text.
        value: String,
    },
}

/// Sorted variant spans for one reference sequence.
#[derive(Debug, Clone, Default)]
pub struct VariantSpans {
    starts: Vec<u32>,
    ends: Vec<u32>,
    allele_ranges: Vec<(Range<u32>, Range<u32>)>,
    max_span: u32,
}

impl VariantSpans {
    /// Number of variants on this sequence.
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    /// Whether the sequence has no variants.
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// 0-based start coordinates, ascending.
    pub fn starts(&self) -> &[u32] {
        &self.starts
    }

    /// Exclusive end coordinates, parallel to [`starts`](Self::starts).
    pub fn ends(&self) -> &[u32] {
        &self.ends
    }

    /// Length of the longest span on this sequence.
    pub fn max_span(&self) -> u32 {
        self.max_span
    }

    /// Index range of records that may overlap `[window_start, window_end)`.
    ///
    /// Two binary searches over the start coordinates; the lower bound is widened
    /// by the longest span so long deletions starting left of the window are
    /// still found. Callers must still check each candidate's actual end.
    pub fn candidate_range(&self, window_start: u32, window_end: u32) -> Range<usize> {
        if window_end <= window_start || self.starts.is_empty() {
            return 0..0;
        }
        let earliest = window_start.saturating_sub(self.max_span.saturating_sub(1));
        let lo = self.starts.partition_point(|&s| s < earliest);
        let hi = self.starts.partition_point(|&s| s < window_end);
        lo..hi.max(lo)
    }

    /// Whether any record overlaps `[window_start, window_end)`.
    pub fn overlaps(&self, window_start: u32, window_end: u32) -> bool {
        self.candidate_range(window_start, window_end)
            .any(|i| self.ends[i] > window_start)
    }
}

/// Immutable, per-sequence sorted table of known variants.
#[derive(Debug, Clone, Default)]
pub struct VariantDatabase {
    per_sequence: Vec<VariantSpans>,
    alleles: Vec<u8>,
    skipped_records: usize,
}

impl VariantDatabase {
    /// Load a VCF file, mapping contigs through `reference`.
    pub fn load(
        path: impl AsRef<Path>,
        reference: &ReferenceSequences,
        use_mmap: bool,
    ) -> Result<Self, VariantDatabaseError> {
        let path = path.as_ref();
        let io_err = |source| VariantDatabaseError::Io {
            path: path.display().to_string(),
            source,
        };

        let db = if use_mmap {
            let file = File::open(path).map_err(io_err)?;
            // Safety: the file is opened read-only and not modified while mapped
            let mmap = unsafe { Mmap::map(&file).map_err(io_err)? };
            Self::from_vcf(&mmap, reference)?
        } else {
            let contents = std::fs::read(path).map_err(io_err)?;
            Self::from_vcf(&contents, reference)?
        };

        if db.skipped_records > 0 {
            warn!(
                skipped = db.skipped_records,
                "known-sites records on contigs absent from the reference were ignored"
            );
        }
        debug!(path = %path.display(), variants = db.len(), mmap = use_mmap, "loaded known sites");
        Ok(db)
    }

    /// Parse VCF text. Each record spans `[POS-1, POS-1+len(REF))`.
    pub fn from_vcf(
        data: &[u8],
        reference: &ReferenceSequences,
    ) -> Result<Self, VariantDatabaseError> {
        let mut builder = VariantDatabaseBuilder::new(reference.len());

        for (idx, raw) in data.split(|&b| b == b'\n').enumerate() {
            let line_no = idx + 1;
            let line = raw.strip_suffix(b"\r").unwrap_or(raw);
            if line.is_empty() || line.starts_with(b"#") {
                continue;
            }

            let mut fields = line.split(|&b| b == b'\t');
            let (Some(chrom), Some(pos), Some(_id), Some(ref_allele), Some(alt_allele)) = (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) else {
                return Err(VariantDatabaseError::TruncatedLine(line_no));
            };

            let pos_text = String::from_utf8_lossy(pos);
            let pos: u32 = pos_text
                .trim()
                .parse()
                .ok()
                .filter(|&p| p > 0)
                .ok_or_else(|| VariantDatabaseError::InvalidPosition {
                    line: line_no,
                    value: pos_text.to_string(),
                })?;

            let Some(seq_id) = reference.sequence_id(&String::from_utf8_lossy(chrom)) else {
                builder.skipped_records += 1;
                continue;
            };
            builder.add(seq_id, pos - 1, ref_allele, alt_allele);
        }

        Ok(builder.build())
    }

    /// Spans for sequence `seq_id`, `None` if the id is out of range.
    pub fn spans(&self, seq_id: u32) -> Option<&VariantSpans> {
        self.per_sequence.get(seq_id as usize)
    }

    /// Total number of variants.
    pub fn len(&self) -> usize {
        self.per_sequence.iter().map(VariantSpans::len).sum()
    }

    /// Whether the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records ignored because their contig was unknown.
    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    /// Reference and alternate allele text of variant `idx` on `seq_id`.
    pub fn alleles(&self, seq_id: u32, idx: usize) -> Option<(&[u8], &[u8])> {
        let (r, a) = self.spans(seq_id)?.allele_ranges.get(idx)?;
        Some((
            &self.alleles[r.start as usize..r.end as usize],
            &self.alleles[a.start as usize..a.end as usize],
        ))
    }
}

/// Incremental builder; records may arrive in any order.
#[derive(Debug, Default)]
pub struct VariantDatabaseBuilder {
    records: Vec<Vec<(u32, u32, Range<u32>, Range<u32>)>>,
    alleles: Vec<u8>,
    skipped_records: usize,
}

impl VariantDatabaseBuilder {
    /// Builder for a reference with `num_sequences` sequences.
    pub fn new(num_sequences: usize) -> Self {
        Self {
            records: vec![Vec::new(); num_sequences],
            ..Self::default()
        }
    }

    /// Add a variant at 0-based `start` whose reference allele is `ref_allele`.
    pub fn add(&mut self, seq_id: u32, start: u32, ref_allele: &[u8], alt_allele: &[u8]) {
        let idx = seq_id as usize;
        if idx >= self.records.len() {
            self.records.resize(idx + 1, Vec::new());
        }
        let span = (ref_allele.len() as u32).max(1);
        let ref_range = self.store_allele(ref_allele);
        let alt_range = self.store_allele(alt_allele);
        self.records[idx].push((start, start + span, ref_range, alt_range));
    }

    /// Add a bare `[start, end)` span with no allele text.
    pub fn add_span(&mut self, seq_id: u32, start: u32, end: u32) {
        let idx = seq_id as usize;
        if idx >= self.records.len() {
            self.records.resize(idx + 1, Vec::new());
        }
        let empty = self.alleles.len() as u32;
        self.records[idx].push((start, end.max(start + 1), empty..empty, empty..empty));
    }

    fn store_allele(&mut self, allele: &[u8]) -> Range<u32> {
        let start = self.alleles.len() as u32;
        self.alleles.extend(allele.iter().map(u8::to_ascii_uppercase));
        start..self.alleles.len() as u32
    }

    /// Sort each sequence's records by start and freeze the database.
    pub fn build(self) -> VariantDatabase {
        let per_sequence = self
            .records
            .into_iter()
            .map(|mut records| {
                records.sort_by_key(|&(start, end, _, _)| (start, end));
                let mut spans = VariantSpans::default();
                for (start, end, r, a) in records {
                    spans.max_span = spans.max_span.max(end - start);
                    spans.starts.push(start);
                    spans.ends.push(end);
                    spans.allele_ranges.push((r, a));
                }
                spans
            })
            .collect();

        VariantDatabase {
            per_sequence,
            alleles: self.alleles,
            skipped_records: self.skipped_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ReferenceSequences {
        ReferenceSequences::from_fasta(b">chr1\nACGTACGTACGTACGTACGT\n>chr2\nAAAA\n").unwrap()
    }

    #[test]
    fn parses_vcf_and_sorts() {
        let vcf = b"##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\n\
chr1\t10\t.\tC\tT\n\
chr1\t3\trs1\tGTA\tG\n\
chrUn\t5\t.\tA\tC\n\
chr2\t1\t.\tA\tG\n";
        let db = VariantDatabase::from_vcf(vcf, &reference()).unwrap();
        assert_eq!(db.len(), 3);
        assert_eq!(db.skipped_records(), 1);

        let spans = db.spans(0).unwrap();
        assert_eq!(spans.starts(), &[2, 9]);
        assert_eq!(spans.ends(), &[5, 10]);
        assert_eq!(spans.max_span(), 3);
        assert_eq!(db.alleles(0, 0), Some((&b"GTA"[..], &b"G"[..])));
    }

    #[test]
    fn invalid_lines_are_errors() {
        assert!(matches!(
            VariantDatabase::from_vcf(b"chr1\t5\n", &reference()),
            Err(VariantDatabaseError::TruncatedLine(1))
        ));
        assert!(matches!(
            VariantDatabase::from_vcf(b"chr1\tzero\t.\tA\tC\n", &reference()),
            Err(VariantDatabaseError::InvalidPosition { line: 1, .. })
        ));
    }

    #[test]
    fn candidate_range_finds_long_spans_left_of_window() {
        let mut builder = VariantDatabaseBuilder::new(1);
        builder.add_span(0, 0, 50);
        builder.add_span(0, 60, 61);
        builder.add_span(0, 100, 101);
        let db = builder.build();
        let spans = db.spans(0).unwrap();

        assert!(spans.overlaps(40, 55));
        assert!(!spans.overlaps(50, 60));
        assert_eq!(spans.candidate_range(55, 100), 1..2);
        assert!(spans.overlaps(100, 150));
        assert!(!spans.overlaps(101, 150));
        assert_eq!(spans.candidate_range(10, 10), 0..0);
    }
}
