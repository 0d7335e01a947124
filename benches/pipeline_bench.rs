//! Pipeline throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use bqsr::genomics::{
    AlignedRead, CigarOp, CigarOpKind, InMemoryBatchSource, ReferenceSequences,
    VariantDatabaseBuilder,
};
use bqsr::options::BaqOptions;
use bqsr::pipeline::BaqHmm;
use bqsr::{run_recalibration, ExecutorKind, RecalibrationConfig};

const REFERENCE_LEN: u32 = 100_000;
const READ_LEN: u32 = 150;

fn synthetic_reference() -> ReferenceSequences {
    let mut fasta = b">chr1\n".to_vec();
    let mut state = 0x2545_f491_4f6c_dd1du64;
    for _ in 0..REFERENCE_LEN {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        fasta.push(b"ACGT"[(state % 4) as usize]);
    }
    fasta.push(b'\n');
    ReferenceSequences::from_fasta(&fasta).unwrap()
}

fn synthetic_reads(reference: &ReferenceSequences, count: u32) -> Vec<AlignedRead> {
    (0..count)
        .map(|i| {
            let pos = (i * 97) % (REFERENCE_LEN - READ_LEN);
            let mut bases: Vec<u8> = (pos..pos + READ_LEN)
                .map(|p| reference.base(0, p).unwrap())
                .collect();
            if i % 4 == 0 {
                let offset = (i % READ_LEN) as usize;
                bases[offset] = if bases[offset] == b'A' { b'C' } else { b'A' };
            }
            let quals: Vec<u8> = (0..READ_LEN).map(|j| 20 + (j % 20) as u8).collect();
            AlignedRead::new(
                0,
                pos,
                60,
                vec![CigarOp::new(CigarOpKind::Match, READ_LEN)],
                bases,
                quals,
                0,
            )
        })
        .collect()
}

fn benchmark_pipeline(c: &mut Criterion) {
    let reference = synthetic_reference();
    let mut builder = VariantDatabaseBuilder::new(1);
    for pos in (500..REFERENCE_LEN).step_by(1_000) {
        builder.add_span(0, pos, pos + 1);
    }
    let variants = builder.build();
    let reads = synthetic_reads(&reference, 5_000);

    let mut group = c.benchmark_group("recalibration");
    group.throughput(Throughput::Elements(reads.len() as u64));
    group.sample_size(10);
    for (name, executor) in [
        ("serial", ExecutorKind::Serial),
        ("threaded", ExecutorKind::Threaded { threads: 0 }),
    ] {
        let config = RecalibrationConfig::default()
            .with_executor(executor)
            .with_batch_size(1_000);
        group.bench_with_input(BenchmarkId::from_parameter(name), &config, |b, config| {
            b.iter(|| {
                let mut source = InMemoryBatchSource::new(reads.clone());
                let result =
                    run_recalibration(config, &reference, &variants, &mut source).unwrap();
                black_box(result.statistics.active_bases);
            });
        });
    }
    group.finish();
}

fn benchmark_baq(c: &mut Criterion) {
    let hmm = BaqHmm::new(&BaqOptions::default());
    let reference: Vec<u8> = (0..READ_LEN + 8).map(|i| ((i * 7 + i / 5) % 4) as u8).collect();
    let query = reference[4..4 + READ_LEN as usize].to_vec();
    let quals = vec![30u8; query.len()];

    c.bench_function("baq_150bp", |b| {
        b.iter(|| black_box(hmm.align(&reference, &query, &quals)));
    });
}

criterion_group!(benches, benchmark_pipeline, benchmark_baq);
criterion_main!(benches);
