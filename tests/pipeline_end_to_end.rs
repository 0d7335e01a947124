mod common;

use bqsr::covariates::{CovariateChain, CovariateField, EmpiricalTable, EventType};
use bqsr::genomics::{flags, CigarOp, CigarOpKind, ReadBatch, MAPQ_UNAVAILABLE};
use bqsr::{Pipeline, SerialExecutor};

use common::{exact_config, matching_read, reference, run, variants, with_mismatch};

/// (observations, mismatches) summed over every key of `event`.
fn event_totals(table: &EmpiricalTable, event: EventType) -> (u64, f64) {
    let schema = table.schema();
    table
        .iter()
        .filter(|(key, _)| schema.decode(*key, CovariateField::EventType) == Some(event.code()))
        .fold((0, 0.0), |(obs, mism), (_, value)| {
            (obs + value.observations, mism + value.mismatches.to_f64())
        })
}

#[test]
fn duplicate_read_contributes_nothing() {
    let reference = reference(500);
    let config = exact_config();
    let read = matching_read(&reference, 100, 80).with_flags(flags::DUPLICATE);

    let result = run(&config, &reference, &variants(&[]), vec![read]);

    assert!(result.tables.is_empty());
    assert_eq!(result.statistics.total_reads, 1);
    assert_eq!(result.statistics.filtered_reads, 1);
    assert_eq!(result.statistics.active_bases, 0);
}

#[test]
fn known_variant_bases_are_excluded() {
    let reference = reference(500);
    let config = exact_config();
    let read = matching_read(&reference, 0, 100);

    let result = run(&config, &reference, &variants(&[(40, 45)]), vec![read]);

    let quality = result.tables.table(CovariateChain::QualityScore);
    let (observations, mismatches) = event_totals(quality, EventType::Mismatch);
    assert_eq!(observations, 95);
    assert_eq!(mismatches, 0.0);
    assert_eq!(result.statistics.excluded_variant_bases, 5);
    assert_eq!(result.statistics.active_bases, 95);
}

#[test]
fn filtered_counter_matches_removed_reads() {
    let reference = reference(1_000);
    let config = exact_config();

    let mut unmapped = matching_read(&reference, 300, 50).with_flags(flags::UNMAPPED);
    unmapped.pos = None;
    unmapped.ref_id = None;
    let mut no_mapq = matching_read(&reference, 400, 50);
    no_mapq.mapq = MAPQ_UNAVAILABLE;
    let mut beyond_contig = matching_read(&reference, 900, 50);
    beyond_contig.cigar = vec![CigarOp::new(CigarOpKind::Match, 150)];
    beyond_contig.sequence.resize(150, b'A');
    beyond_contig.qualities.resize(150, 30);

    let reads = vec![
        matching_read(&reference, 10, 50),
        matching_read(&reference, 100, 50).with_flags(flags::SECONDARY),
        matching_read(&reference, 200, 50).with_flags(flags::QC_FAIL),
        unmapped,
        no_mapq,
        beyond_contig,
        matching_read(&reference, 500, 50),
    ];
    let result = run(&config, &reference, &variants(&[]), reads);

    assert_eq!(result.statistics.total_reads, 7);
    assert_eq!(result.statistics.filtered_reads, 5);
    assert_eq!(result.statistics.active_bases, 100);
}

#[test]
fn surviving_reads_have_non_empty_windows() {
    let reference = reference(1_000);
    let config = exact_config();
    let variants = variants(&[]);
    let mut clipped = matching_read(&reference, 200, 60);
    clipped.cigar = vec![
        CigarOp::new(CigarOpKind::SoftClip, 5),
        CigarOp::new(CigarOpKind::Match, 55),
    ];
    let reads = vec![
        matching_read(&reference, 0, 40),
        matching_read(&reference, 50, 40).with_flags(flags::DUPLICATE),
        clipped,
    ];
    let batch = ReadBatch::from_reads(&reads);

    let mut pipeline = Pipeline::new(SerialExecutor, &config, &reference, &variants);
    pipeline.process_batch(&batch).unwrap();

    let context = pipeline.context();
    assert_eq!(context.active_reads, vec![0, 2]);
    for &read in &context.active_reads {
        let window = context.windows[read as usize];
        assert!(window.reference_end > window.reference_start);
        assert!(window.sequence_end > window.sequence_start);
    }
    assert_eq!(context.windows[2].sequence_start, 5);
    assert_eq!(context.windows[2].reference_end, 255);
    // Soft-clipped bases and the duplicate's bases are inactive.
    assert_eq!(context.active_locations.count_all(), 40 + 55);
}

#[test]
fn single_mismatch_counts_one_error() {
    let reference = reference(500);
    let config = exact_config();
    let read = with_mismatch(matching_read(&reference, 10, 60), 30);

    let result = run(&config, &reference, &variants(&[]), vec![read]);

    let quality = result.tables.table(CovariateChain::QualityScore);
    assert_eq!(event_totals(quality, EventType::Mismatch), (60, 1.0));
    assert_eq!(event_totals(quality, EventType::Insertion), (60, 0.0));
    assert_eq!(event_totals(quality, EventType::Deletion), (60, 0.0));
}

#[test]
fn deletion_marks_the_preceding_base() {
    let reference = reference(500);
    let config = exact_config();
    let mut read = matching_read(&reference, 100, 30);
    let tail: Vec<u8> = (132..162).map(|p| reference.base(0, p).unwrap()).collect();
    read.sequence.extend_from_slice(&tail);
    read.qualities = vec![30; 60];
    read.cigar = vec![
        CigarOp::new(CigarOpKind::Match, 30),
        CigarOp::new(CigarOpKind::Deletion, 2),
        CigarOp::new(CigarOpKind::Match, 30),
    ];

    let result = run(&config, &reference, &variants(&[]), vec![read]);

    let quality = result.tables.table(CovariateChain::QualityScore);
    assert_eq!(event_totals(quality, EventType::Deletion), (60, 1.0));
    assert_eq!(event_totals(quality, EventType::Insertion), (60, 0.0));
    assert_eq!(event_totals(quality, EventType::Mismatch), (60, 0.0));
}

#[test]
fn low_quality_bases_are_skipped() {
    let reference = reference(500);
    let config = exact_config();
    let mut read = matching_read(&reference, 10, 60);
    read.qualities[20] = 3;
    read.qualities[21] = 5;
    read.sequence[40] = b'N';

    let result = run(&config, &reference, &variants(&[]), vec![read]);

    assert_eq!(result.statistics.active_bases, 57);
}

#[test]
fn context_and_cycle_tables_skip_undefined_covariates() {
    let reference = reference(500);
    let config = exact_config();
    let read = matching_read(&reference, 10, 60);

    let result = run(&config, &reference, &variants(&[]), vec![read]);

    let context = result.tables.table(CovariateChain::Context);
    // Mismatch contexts need one preceding base, indel contexts two.
    assert_eq!(event_totals(context, EventType::Mismatch).0, 59);
    assert_eq!(event_totals(context, EventType::Insertion).0, 58);

    let cycle = result.tables.table(CovariateChain::Cycle);
    assert_eq!(event_totals(cycle, EventType::Mismatch).0, 60);
    // Indel cycles are undefined within four bases of either end.
    assert_eq!(event_totals(cycle, EventType::Deletion).0, 52);
}

#[test]
fn report_lists_every_table() {
    let reference = reference(500);
    let config = exact_config();
    let reads = vec![
        with_mismatch(matching_read(&reference, 10, 60), 12),
        matching_read(&reference, 90, 60).with_flags(flags::REVERSE),
    ];

    let result = run(&config, &reference, &variants(&[]), reads);
    let text = common::report(&config, &result);

    assert!(text.starts_with("#:GATKReport.v1.1:4\n"));
    for name in ["Arguments", "RecalTable0", "RecalTable1", "RecalTable2"] {
        assert!(text.contains(&format!("#:GATKTable:{name}:")), "missing {name}");
    }
    assert!(text.contains("rg0"));
    assert!(text.contains("Context"));
    assert!(text.contains("Cycle"));
}

#[test]
fn unkeyable_read_group_is_dropped_not_fatal() {
    let reference = reference(500);
    let config = exact_config();
    let mut overflowing = matching_read(&reference, 200, 60);
    overflowing.read_group = Some(256);
    let reads = vec![matching_read(&reference, 0, 60), overflowing];

    let result = run(&config, &reference, &variants(&[]), reads);

    assert_eq!(result.statistics.filtered_reads, 1);
    assert_eq!(result.statistics.read_group_overflow, 1);
    assert_eq!(result.statistics.active_bases, 60);
    let quality = result.tables.table(CovariateChain::QualityScore);
    assert_eq!(event_totals(quality, EventType::Mismatch), (60, 0.0));
}
