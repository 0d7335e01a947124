//! BAM-backed batch source.

use std::path::Path;

use rust_htslib::bam::record::{Aux, Cigar};
use rust_htslib::bam::{self, Read as BamRead};
use tracing::debug;

use super::batch::{BatchError, BatchSource, ReadBatch, INVALID_ID, INVALID_POS};
use super::read_groups::ReadGroupDatabase;
use super::reference::ReferenceSequences;
use super::types::{CigarOp, CigarOpKind};

/// Streams fixed-size batches out of a BAM/SAM/CRAM file.
///
/// BAM target ids are translated to reference ids by sequence name; targets
/// absent from the reference become [`INVALID_ID`] and are rejected by the
/// read filter. Read-group names are interned into the supplied database.
pub struct BamBatchSource {
    reader: bam::Reader,
    target_to_reference: Vec<u32>,
    record: bam::Record,
    records_read: u64,
    cigar_scratch: Vec<CigarOp>,
}

impl std::fmt::Debug for BamBatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BamBatchSource")
            .field("targets", &self.target_to_reference.len())
            .field("records_read", &self.records_read)
            .finish()
    }
}

impl BamBatchSource {
    /// Open `path`, registering header `@RG` ids in `read_groups`.
    pub fn open(
        path: impl AsRef<Path>,
        reference: &ReferenceSequences,
        read_groups: &mut ReadGroupDatabase,
        threads: usize,
    ) -> Result<Self, BatchError> {
        let path = path.as_ref();
        let mut reader = bam::Reader::from_path(path)
            .map_err(|e| BatchError::Io(format!("{}: {e}", path.display())))?;
        if threads > 1 {
            reader
                .set_threads(threads)
                .map_err(|e| BatchError::Io(e.to_string()))?;
        }

        let header = reader.header().clone();
        let target_to_reference: Vec<u32> = (0..header.target_count())
            .map(|tid| {
                let name = String::from_utf8_lossy(header.tid2name(tid));
                reference.sequence_id(&name).unwrap_or(INVALID_ID)
            })
            .collect();

        for line in String::from_utf8_lossy(header.as_bytes()).lines() {
            if let Some(rest) = line.strip_prefix("@RG\t") {
                if let Some(id) = rest.split('\t').find_map(|f| f.strip_prefix("ID:")) {
                    read_groups.insert(id);
                }
            }
        }

        debug!(
            path = %path.display(),
            targets = target_to_reference.len(),
            read_groups = read_groups.len(),
            "opened alignment input"
        );

        Ok(Self {
            reader,
            target_to_reference,
            record: bam::Record::new(),
            records_read: 0,
            cigar_scratch: Vec::new(),
        })
    }

    /// Records decoded so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    fn convert_cigar(record: &bam::Record, out: &mut Vec<CigarOp>) {
        out.clear();
        out.extend(record.cigar().iter().map(|op| match *op {
            Cigar::Match(l) => CigarOp::new(CigarOpKind::Match, l),
            Cigar::Ins(l) => CigarOp::new(CigarOpKind::Insertion, l),
            Cigar::Del(l) => CigarOp::new(CigarOpKind::Deletion, l),
            Cigar::RefSkip(l) => CigarOp::new(CigarOpKind::Skip, l),
            Cigar::SoftClip(l) => CigarOp::new(CigarOpKind::SoftClip, l),
            Cigar::HardClip(l) => CigarOp::new(CigarOpKind::HardClip, l),
            Cigar::Pad(l) => CigarOp::new(CigarOpKind::Padding, l),
            Cigar::Equal(l) => CigarOp::new(CigarOpKind::SequenceMatch, l),
            Cigar::Diff(l) => CigarOp::new(CigarOpKind::SequenceMismatch, l),
        }));
    }

    fn read_group_of(record: &bam::Record, read_groups: &mut ReadGroupDatabase) -> u32 {
        match record.aux(b"RG") {
            Ok(Aux::String(name)) => read_groups.insert(name),
            _ => INVALID_ID,
        }
    }

    /// Decode the next batch, interning any read groups not present in the header.
    pub fn next_batch_with_groups(
        &mut self,
        capacity: usize,
        read_groups: &mut ReadGroupDatabase,
    ) -> Result<Option<ReadBatch>, BatchError> {
        let mut batch = ReadBatch::with_capacity(capacity);

        while batch.len() < capacity.max(1) {
            match self.reader.read(&mut self.record) {
                None => break,
                Some(Err(e)) => {
                    return Err(BatchError::Decode {
                        record: self.records_read,
                        message: e.to_string(),
                    })
                }
                Some(Ok(())) => {}
            }
            self.records_read += 1;

            let record = &self.record;
            let tid = record.tid();
            let ref_id = usize::try_from(tid)
                .ok()
                .and_then(|t| self.target_to_reference.get(t).copied())
                .unwrap_or(INVALID_ID);
            let pos = u32::try_from(record.pos()).unwrap_or(INVALID_POS);
            // BAM stores a missing quality string as 0xff in every slot
            let qual = record.qual();
            let qualities: &[u8] = if qual.first() == Some(&0xff) { &[] } else { qual };

            Self::convert_cigar(record, &mut self.cigar_scratch);
            let read_group = Self::read_group_of(record, read_groups);
            batch.push_parts(
                record.flags(),
                record.mapq(),
                ref_id,
                pos,
                read_group,
                &self.cigar_scratch,
                &record.seq().as_bytes(),
                qualities,
            );
        }

        Ok((!batch.is_empty()).then_some(batch))
    }
}

/// Batch source that owns its read-group database alongside the BAM reader.
#[derive(Debug)]
pub struct BamInput {
    source: BamBatchSource,
    read_groups: ReadGroupDatabase,
}

impl BamInput {
    /// Open `path` with a fresh read-group database.
    pub fn open(
        path: impl AsRef<Path>,
        reference: &ReferenceSequences,
        threads: usize,
    ) -> Result<Self, BatchError> {
        let mut read_groups = ReadGroupDatabase::new();
        let source = BamBatchSource::open(path, reference, &mut read_groups, threads)?;
        Ok(Self {
            source,
            read_groups,
        })
    }

    /// Read groups seen so far.
    pub fn read_groups(&self) -> &ReadGroupDatabase {
        &self.read_groups
    }

    /// Records decoded so far.
    pub fn records_read(&self) -> u64 {
        self.source.records_read()
    }
}

impl BatchSource for BamInput {
    fn next_batch(&mut self, capacity: usize) -> Result<Option<ReadBatch>, BatchError> {
        self.source
            .next_batch_with_groups(capacity, &mut self.read_groups)
    }
}
