mod common;

use std::collections::HashSet;

use blake3::hash;
use bqsr::genomics::{flags, AlignedRead, ReferenceSequences};
use bqsr::ExecutorKind;

use common::{matching_read, reference, report, run, variants, with_mismatch};

fn workload(reference: &ReferenceSequences) -> Vec<AlignedRead> {
    (0..400u32)
        .map(|i| {
            let pos = (i * 37) % 1_800;
            let mut read = matching_read(reference, pos, 100);
            if i % 3 == 0 {
                read = with_mismatch(read, (i as usize * 11) % 100);
            }
            if i % 5 == 0 {
                read = read.with_flags(flags::REVERSE);
            }
            if i % 7 == 0 {
                read.flags |= flags::PAIRED | flags::SECOND_OF_PAIR;
            }
            if i % 17 == 0 {
                read.qualities[i as usize % 100] = 4;
            }
            read
        })
        .collect()
}

#[test]
fn serial_and_threaded_reports_are_identical() {
    let reference = reference(2_000);
    let known = variants(&[(150, 151), (700, 703), (1_200, 1_201)]);

    let mut fingerprints = HashSet::new();
    for (executor, batch_size) in [
        (ExecutorKind::Serial, 20_000),
        (ExecutorKind::Serial, 64),
        (ExecutorKind::Threaded { threads: 4 }, 20_000),
        (ExecutorKind::Threaded { threads: 3 }, 50),
    ] {
        let config = bqsr::RecalibrationConfig::default()
            .with_executor(executor)
            .with_batch_size(batch_size);
        let result = run(&config, &reference, &known, workload(&reference));
        fingerprints.insert(hash(report(&config, &result).as_bytes()));
    }

    assert_eq!(fingerprints.len(), 1, "reports diverged across executors");
}

#[test]
fn repeated_runs_are_identical() {
    let reference = reference(2_000);
    let known = variants(&[(400, 420)]);
    let config = bqsr::RecalibrationConfig::default()
        .with_executor(ExecutorKind::Threaded { threads: 2 });

    let first = run(&config, &reference, &known, workload(&reference));
    let second = run(&config, &reference, &known, workload(&reference));

    assert_eq!(first.tables, second.tables);
    assert_eq!(first.statistics.active_bases, second.statistics.active_bases);
}

#[test]
fn read_order_does_not_change_the_tables() {
    let reference = reference(2_000);
    let known = variants(&[(150, 151), (700, 703)]);
    let forward = workload(&reference);
    let reversed: Vec<AlignedRead> = forward.iter().rev().cloned().collect();

    for (executor, batch_size) in [
        (ExecutorKind::Serial, 20_000),
        (ExecutorKind::Serial, 64),
        (ExecutorKind::Threaded { threads: 4 }, 20_000),
        (ExecutorKind::Threaded { threads: 3 }, 50),
    ] {
        let config = bqsr::RecalibrationConfig::default()
            .with_executor(executor)
            .with_batch_size(batch_size);
        let a = run(&config, &reference, &known, forward.clone());
        let b = run(&config, &reference, &known, reversed.clone());
        assert_eq!(a.tables, b.tables, "{executor:?} with batches of {batch_size}");
        assert_eq!(report(&config, &a), report(&config, &b));
    }
}

#[test]
fn batch_size_does_not_change_the_tables() {
    let reference = reference(2_000);
    let known = variants(&[(400, 420)]);
    let serial = |batch_size| {
        bqsr::RecalibrationConfig::default()
            .with_executor(ExecutorKind::Serial)
            .with_batch_size(batch_size)
    };

    let whole = run(&serial(20_000), &reference, &known, workload(&reference));
    for batch_size in [1, 7, 64] {
        let split = run(&serial(batch_size), &reference, &known, workload(&reference));
        assert_eq!(whole.tables, split.tables, "batches of {batch_size}");
    }
}
