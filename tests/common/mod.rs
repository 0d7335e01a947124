//! Shared builders for integration tests.

#![allow(dead_code)]

use bqsr::genomics::{
    AlignedRead, CigarOp, CigarOpKind, InMemoryBatchSource, ReadGroupDatabase, VariantDatabase,
    VariantDatabaseBuilder,
};
use bqsr::report::{render_report, ReportInputs};
use bqsr::{
    run_recalibration, ExecutorKind, RecalibrationConfig, RecalibrationResult, ReferenceSequences,
};

/// FASTA text of one pseudo-random contig named `chr1`.
pub fn reference_fasta(len: usize, seed: u64) -> String {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    let mut fasta = String::from(">chr1 synthetic\n");
    for i in 0..len {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        fasta.push(b"ACGT"[(state >> 33) as usize % 4] as char);
        if i % 60 == 59 {
            fasta.push('\n');
        }
    }
    fasta.push('\n');
    fasta
}

/// Parsed single-contig reference.
pub fn reference(len: usize) -> ReferenceSequences {
    ReferenceSequences::from_fasta(reference_fasta(len, 7).as_bytes())
        .expect("synthetic reference parses")
}

/// Forward-strand read copying the reference at `pos`, all `M`, quality 30.
pub fn matching_read(reference: &ReferenceSequences, pos: u32, len: u32) -> AlignedRead {
    let bases: Vec<u8> = (pos..pos + len)
        .map(|p| reference.base(0, p).expect("position inside the reference"))
        .collect();
    AlignedRead::new(
        0,
        pos,
        60,
        vec![CigarOp::new(CigarOpKind::Match, len)],
        bases,
        vec![30; len as usize],
        0,
    )
}

/// Replace the base at `offset` with a different nucleotide.
pub fn with_mismatch(mut read: AlignedRead, offset: usize) -> AlignedRead {
    let base = read.sequence[offset];
    read.sequence[offset] = match base {
        b'A' => b'C',
        b'C' => b'G',
        b'G' => b'T',
        _ => b'A',
    };
    read
}

/// Variant database over contig 0 with half-open `spans`.
pub fn variants(spans: &[(u32, u32)]) -> VariantDatabase {
    let mut builder = VariantDatabaseBuilder::new(1);
    for &(start, end) in spans {
        builder.add_span(0, start, end);
    }
    builder.build()
}

/// Serial configuration with BAQ disabled, so error counts are exact.
pub fn exact_config() -> RecalibrationConfig {
    let mut config = RecalibrationConfig::default().with_executor(ExecutorKind::Serial);
    config.baq.enabled = false;
    config
}

/// Run `reads` through the pipeline.
pub fn run(
    config: &RecalibrationConfig,
    reference: &ReferenceSequences,
    variants: &VariantDatabase,
    reads: Vec<AlignedRead>,
) -> RecalibrationResult {
    let mut source = InMemoryBatchSource::new(reads);
    run_recalibration(config, reference, variants, &mut source).expect("pipeline runs")
}

/// Rendered report of `result` with a single read group `rg0`.
pub fn report(config: &RecalibrationConfig, result: &RecalibrationResult) -> String {
    let mut groups = ReadGroupDatabase::new();
    groups.insert("rg0");
    let inputs = ReportInputs {
        config,
        tables: &result.tables,
        read_groups: &groups,
    };
    render_report(&inputs).expect("report renders")
}
