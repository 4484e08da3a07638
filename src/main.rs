use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use isoquant::{
    annotation::{get_annotation_stats, parse_annotation_file},
    genome::{get_genome_stats, parse_genome_file},
    logging::init_logger,
    output::{archive_report, ArchiveFormat, ReportWriter},
    quantify::QuantEngine,
    reads::{mean_read_length, parse_reads_file},
    types::QuantConfig,
};

/// isoquant: RNA isoform abundance quantification
#[derive(Parser)]
#[command(name = "isoquant")]
#[command(
    about = "Estimate isoform abundances from reads, a genome and an exon/isoform annotation"
)]
#[command(version)]
struct Args {
    /// Genome file (single line sequence or FASTA)
    #[arg(short = 'g', long = "genome", value_name = "FILE")]
    genome_file: PathBuf,

    /// Reads file (one read per line, FASTA or FASTQ)
    #[arg(short = 'r', long = "reads", value_name = "FILE")]
    reads_file: PathBuf,

    /// Gene annotation file
    #[arg(short = 'a', long = "annotation", value_name = "FILE")]
    annotation_file: PathBuf,

    /// Output report file
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output_file: PathBuf,

    /// Label written on the first line of the report
    #[arg(short = 't', long = "output-header", value_name = "LABEL")]
    output_header: String,

    /// Maximum substitutions allowed per read alignment
    #[arg(long = "max-mismatches", default_value = "2")]
    max_mismatches: u32,

    /// Seed (k-mer) length of the transcript index, at most 32
    #[arg(long = "seed-len", default_value = "12")]
    seed_len: usize,

    /// Also align the reverse complement of every read
    #[arg(long = "both-strands")]
    both_strands: bool,

    /// Maximum EM iterations per gene
    #[arg(long = "max-iterations", default_value = "1000")]
    max_iterations: usize,

    /// EM convergence threshold on the largest abundance change
    #[arg(long = "tolerance", default_value = "1e-8")]
    tolerance: f64,

    /// Report expected read counts instead of per-gene proportions
    #[arg(long = "raw-counts")]
    raw_counts: bool,

    /// Do not archive the report into <output>.zip
    #[arg(long = "no-archive")]
    no_archive: bool,

    /// Archive the report as <output>.gz instead of <output>.zip
    #[arg(long = "gzip", conflicts_with = "no_archive")]
    gzip: bool,

    /// Number of threads to use for parallel processing (default: number of CPU cores)
    #[arg(short = 'j', long = "threads", value_name = "N")]
    threads: Option<usize>,

    /// Verbose output (shows debug info)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Log file path (optional, logs all messages including per-gene details)
    #[arg(long = "log-file", value_name = "FILE")]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(args.verbose, args.log_file.as_deref())?;

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| anyhow::anyhow!("Failed to set thread pool: {}", e))?;
        info!("Using {} threads for parallel processing", threads);
    } else {
        info!(
            "Using {} threads for parallel processing (auto-detected)",
            rayon::current_num_threads()
        );
    }

    info!("Starting isoquant v{}", env!("CARGO_PKG_VERSION"));
    info!("Input genome: {}", args.genome_file.display());
    info!("Input reads: {}", args.reads_file.display());
    info!("Input annotation: {}", args.annotation_file.display());
    info!("Output report: {}", args.output_file.display());

    validate_input_files(&args)?;
    run_quantification_pipeline(&args)?;

    Ok(())
}

fn validate_input_files(args: &Args) -> Result<()> {
    if !args.genome_file.exists() {
        anyhow::bail!("Genome file does not exist: {}", args.genome_file.display());
    }
    if !args.reads_file.exists() {
        anyhow::bail!("Reads file does not exist: {}", args.reads_file.display());
    }
    if !args.annotation_file.exists() {
        anyhow::bail!(
            "Annotation file does not exist: {}",
            args.annotation_file.display()
        );
    }

    info!("All input files validated successfully");
    Ok(())
}

fn run_quantification_pipeline(args: &Args) -> Result<()> {
    let config = QuantConfig {
        max_mismatches: args.max_mismatches,
        seed_len: args.seed_len,
        both_strands: args.both_strands,
        max_iterations: args.max_iterations,
        convergence_tolerance: args.tolerance,
        raw_counts: args.raw_counts,
    };
    config.validate()?;

    info!("Loading genome");
    let genome = parse_genome_file(&args.genome_file)?;
    info!("Genome loaded: {}", get_genome_stats(&genome));

    info!("Loading annotation");
    let genes = parse_annotation_file(&args.annotation_file)?;
    info!("Annotation loaded: {}", get_annotation_stats(&genes));

    info!("Loading reads");
    let reads = parse_reads_file(&args.reads_file)?;
    info!(
        "Reads loaded: {} (mean length {:.1} bp)",
        reads.len(),
        mean_read_length(&reads)
    );

    let engine = QuantEngine::new(config);
    let quantification = engine.quantify(&genes, &genome, &reads)?;

    info!("Writing report");
    let mut writer = ReportWriter::new(&args.output_file)?;
    writer.write_abundances(
        &args.output_header,
        &quantification.transcript_abundances(),
    )?;
    drop(writer);

    if !args.no_archive {
        let format = if args.gzip {
            ArchiveFormat::Gzip
        } else {
            ArchiveFormat::Zip
        };
        archive_report(&args.output_file, format)?;
    }

    info!("Isoform quantification completed successfully!");
    info!("Output written to: {}", args.output_file.display());

    Ok(())
}
