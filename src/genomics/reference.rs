//! Reference genome storage and FASTA loading.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use super::packed_dna::{PackedDnaError, PackedSequence};

/// Errors raised while loading a reference.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The file could not be opened, mapped or read.
    #[error("failed to read reference {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Sequence data appeared before any `>` header.
    #[error("sequence data before the first FASTA header (line {0})")]
    MissingHeader(usize),
    /// Two records share a name.
    #[error("duplicate reference sequence name '{0}'")]
    DuplicateName(String),
    /// A sequence line contained a non-nucleotide byte.
    #[error("invalid base in sequence '{name}': {source}")]
    InvalidBase {
        /// Record the base belongs to.
        name: String,
        /// Underlying packing error.
        #[source]
        source: PackedDnaError,
    },
    /// The file contained no records.
    #[error("reference contains no sequences")]
    Empty,
}

/// Collection of packed reference sequences addressed by id (FASTA order).
#[derive(Debug, Clone, Default)]
pub struct ReferenceSequences {
    names: Vec<String>,
    sequences: Vec<PackedSequence>,
    ids: HashMap<String, u32>,
}

impl ReferenceSequences {
    /// Load a FASTA file, optionally through a read-only memory map.
    pub fn load(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let io_err = |source| ReferenceError::Io {
            path: path.display().to_string(),
            source,
        };

        let reference = if use_mmap {
            let file = File::open(path).map_err(io_err)?;
            // Safety: the file is opened read-only and not modified while mapped
            let mmap = unsafe { Mmap::map(&file).map_err(io_err)? };
            Self::from_fasta(&mmap)?
        } else {
            let contents = std::fs::read(path).map_err(io_err)?;
            Self::from_fasta(&contents)?
        };

        debug!(
            path = %path.display(),
            sequences = reference.len(),
            mmap = use_mmap,
            "loaded reference"
        );
        Ok(reference)
    }

    /// Parse FASTA text. Record names are the first whitespace-delimited token of the header.
    pub fn from_fasta(data: &[u8]) -> Result<Self, ReferenceError> {
        let mut reference = Self::default();
        let mut current: Option<(String, PackedSequence)> = None;

        for (line_no, raw) in data.split(|&b| b == b'\n').enumerate() {
            let line = raw.strip_suffix(b"\r").unwrap_or(raw);
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix(b">") {
                if let Some((name, seq)) = current.take() {
                    reference.push(name, seq)?;
                }
                let name = String::from_utf8_lossy(header)
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                current = Some((name, PackedSequence::default()));
                continue;
            }

            let (name, seq) = current
                .as_mut()
                .ok_or(ReferenceError::MissingHeader(line_no + 1))?;
            let trimmed: Vec<u8> = line.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
            seq.extend_from_slice(&trimmed)
                .map_err(|source| ReferenceError::InvalidBase {
                    name: name.clone(),
                    source,
                })?;
        }

        if let Some((name, seq)) = current.take() {
            reference.push(name, seq)?;
        }
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }
        Ok(reference)
    }

    /// Append a named sequence, returning its id.
    pub fn push(&mut self, name: String, sequence: PackedSequence) -> Result<u32, ReferenceError> {
        if self.ids.contains_key(&name) {
            return Err(ReferenceError::DuplicateName(name));
        }
        let id = self.names.len() as u32;
        self.ids.insert(name.clone(), id);
        self.names.push(name);
        self.sequences.push(sequence);
        Ok(id)
    }

    /// Number of sequences.
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Whether no sequences are loaded.
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Id of the sequence called `name`.
    pub fn sequence_id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    /// Name of sequence `id`.
    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Length of sequence `id`.
    pub fn sequence_len(&self, id: u32) -> Option<u32> {
        self.sequences.get(id as usize).map(|s| s.len() as u32)
    }

    /// Packed sequence `id`.
    pub fn sequence(&self, id: u32) -> Option<&PackedSequence> {
        self.sequences.get(id as usize)
    }

    /// ASCII base at `offset` of sequence `id`.
    pub fn base(&self, id: u32, offset: u32) -> Option<u8> {
        self.sequence(id)?.base_at(offset as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_multi_record_fasta() {
        let fasta = b">chr1 description\nACGT\nacgt\n\n>chr2\r\nNNGG\r\n";
        let reference = ReferenceSequences::from_fasta(fasta).unwrap();
        assert_eq!(reference.len(), 2);
        assert_eq!(reference.sequence_id("chr2"), Some(1));
        assert_eq!(reference.sequence_len(0), Some(8));
        assert_eq!(reference.base(0, 5), Some(b'C'));
        assert_eq!(reference.base(1, 0), Some(b'N'));
        assert_eq!(reference.name(1), Some("chr2"));
        assert_eq!(reference.base(1, 4), None);
    }

    #[test]
    fn rejects_headerless_and_duplicate() {
        assert!(matches!(
            ReferenceSequences::from_fasta(b"ACGT\n"),
            Err(ReferenceError::MissingHeader(1))
        ));
        assert!(matches!(
            ReferenceSequences::from_fasta(b">a\nA\n>a\nC\n"),
            Err(ReferenceError::DuplicateName(_))
        ));
        assert!(matches!(
            ReferenceSequences::from_fasta(b""),
            Err(ReferenceError::Empty)
        ));
    }

    #[test]
    fn mmap_and_buffered_loads_agree() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ">chrM\nGATCACAGGTCTATCACCC").unwrap();
        let mapped = ReferenceSequences::load(file.path(), true).unwrap();
        let buffered = ReferenceSequences::load(file.path(), false).unwrap();
        assert_eq!(
            mapped.sequence(0).map(PackedSequence::to_vec),
            buffered.sequence(0).map(PackedSequence::to_vec)
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ReferenceSequences::load("/nonexistent/ref.fa", false).unwrap_err();
        assert!(matches!(err, ReferenceError::Io { .. }));
    }
}
