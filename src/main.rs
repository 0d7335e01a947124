use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use bqsr::genomics::BamInput;
use bqsr::pipeline::{Stage, StageTimer};
use bqsr::report::{fingerprint, render_report, ReportInputs};
use bqsr::{run_recalibration, ExecutorKind, RecalibrationConfig, ReferenceSequences, VariantDatabase};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "bqsr",
    about = "Build base quality score recalibration tables from aligned reads"
)]
struct Cli {
    /// Reference genome (FASTA).
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Known variant sites (VCF).
    #[arg(long)]
    known_sites: Option<PathBuf>,
    /// Aligned reads (BAM/SAM/CRAM).
    #[arg(long)]
    input: PathBuf,
    /// Report destination (stdout when omitted).
    #[arg(long)]
    output: Option<PathBuf>,
    /// Memory-map the reference instead of reading it.
    #[arg(long)]
    mmap_reference: bool,
    /// Memory-map the known-sites file instead of reading it.
    #[arg(long)]
    mmap_known_sites: bool,
    /// Half-width of the BAQ band.
    #[arg(long, default_value_t = 7)]
    baq_band_radius: u32,
    /// Skip base alignment quality entirely.
    #[arg(long)]
    no_baq: bool,
    /// Skip BAQ for reads with at least this mapping quality.
    #[arg(long)]
    baq_skip_mapq: Option<u8>,
    /// Reads per batch.
    #[arg(long, default_value_t = 20_000)]
    batch_size: usize,
    /// Worker threads (0 = one per core).
    #[arg(long, default_value_t = 0)]
    threads: usize,
    /// Run every stage on the calling thread.
    #[arg(long)]
    serial: bool,
    /// Debug-level logging unless RUST_LOG says otherwise.
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> RecalibrationConfig {
        let mut config = RecalibrationConfig {
            input: Some(self.input.clone()),
            output: self.output.clone(),
            mmap_reference: self.mmap_reference,
            mmap_known_sites: self.mmap_known_sites,
            ..RecalibrationConfig::default()
        };
        config.reference = self.reference.clone();
        config.known_sites = self.known_sites.clone();
        config.baq.enabled = !self.no_baq;
        config.baq.band_radius = self.baq_band_radius;
        config.baq.skip_mapq_at_least = self.baq_skip_mapq;
        let executor = if self.serial {
            ExecutorKind::Serial
        } else {
            ExecutorKind::Threaded {
                threads: self.threads,
            }
        };
        config.with_batch_size(self.batch_size).with_executor(executor)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.config();
    config.validate().context("invalid configuration")?;
    run(&config)
}

fn run(config: &RecalibrationConfig) -> Result<()> {
    let reference_path = config
        .reference
        .as_deref()
        .context("missing reference path")?;
    let known_sites_path = config
        .known_sites
        .as_deref()
        .context("missing known-sites path")?;
    let input_path = config.input.as_deref().context("missing input path")?;

    let reference = ReferenceSequences::load(reference_path, config.mmap_reference)
        .with_context(|| format!("failed to load reference {}", reference_path.display()))?;
    info!(sequences = reference.len(), "reference loaded");

    let variants = VariantDatabase::load(known_sites_path, &reference, config.mmap_known_sites)
        .with_context(|| {
            format!(
                "failed to load known sites {}",
                known_sites_path.display()
            )
        })?;
    info!(variants = variants.len(), "known sites loaded");

    let decode_threads = match config.executor {
        ExecutorKind::Serial => 1,
        ExecutorKind::Threaded { threads } => threads.max(1),
    };
    let mut input = BamInput::open(input_path, &reference, decode_threads)
        .with_context(|| format!("failed to open alignments {}", input_path.display()))?;

    let result = run_recalibration(config, &reference, &variants, &mut input)
        .context("recalibration failed")?;
    let mut stats = result.statistics;

    let timer = StageTimer::start(Stage::Output);
    let inputs = ReportInputs {
        config,
        tables: &result.tables,
        read_groups: input.read_groups(),
    };
    let report = render_report(&inputs).context("failed to render report")?;
    match &config.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create report {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            writer.write_all(report.as_bytes())?;
            writer.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(report.as_bytes())?;
            handle.flush()?;
        }
    }
    timer.stop(&mut stats);

    info!(
        records = input.records_read(),
        fingerprint = %fingerprint(&report),
        "report written"
    );
    stats.log_summary();
    Ok(())
}
