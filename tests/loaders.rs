mod common;

use std::io::Write;

use tempfile::NamedTempFile;

use bqsr::genomics::{ReferenceError, ReferenceSequences, VariantDatabase};

fn temp_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file.flush().expect("flush temp file");
    file
}

#[test]
fn reference_loads_with_and_without_mmap() {
    let fasta = common::reference_fasta(250, 3);
    let file = temp_file(&format!("{fasta}>chr2 second\nACGTNNACGT\n"));

    for use_mmap in [false, true] {
        let reference = ReferenceSequences::load(file.path(), use_mmap).unwrap();
        assert_eq!(reference.len(), 2);
        assert_eq!(reference.sequence_id("chr2"), Some(1));
        assert_eq!(reference.sequence_len(0), Some(250));
        assert_eq!(reference.sequence_len(1), Some(10));
        assert_eq!(reference.base(1, 4), Some(b'N'));
        assert_eq!(reference.base(1, 9), Some(b'T'));
    }
}

#[test]
fn missing_reference_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ReferenceSequences::load(dir.path().join("absent.fa"), false).unwrap_err();
    assert!(matches!(err, ReferenceError::Io { .. }));
}

#[test]
fn known_sites_map_contigs_and_skip_unknown_ones() {
    let reference = ReferenceSequences::from_fasta(b">chr1\nACGTACGTACGTACGTACGT\n").unwrap();
    let vcf = "\
##fileformat=VCFv4.2
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO
chr1\t3\trs1\tG\tA\t.\tPASS\t.
chr1\t10\trs2\tCGT\tC\t.\tPASS\t.
chrUn\t5\trs3\tA\tT\t.\tPASS\t.
";
    let file = temp_file(vcf);

    for use_mmap in [false, true] {
        let db = VariantDatabase::load(file.path(), &reference, use_mmap).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.skipped_records(), 1);

        let spans = db.spans(0).unwrap();
        assert_eq!(spans.starts(), &[2, 9]);
        assert_eq!(spans.ends(), &[3, 12]);
        assert_eq!(db.alleles(0, 1), Some((&b"CGT"[..], &b"C"[..])));
    }
}
