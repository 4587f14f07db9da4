//! CLI binary for vcfroc - builds ROC tables from a classified VCF

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;
use vcfroc_rs::{
    eval::evaluate_vcf,
    utils::{get_num_cpus, prepare_output_dir, validate_file_readable},
    OutputMode, Reduction, RocConfig, VrocError,
};

#[derive(Parser)]
#[command(name = "vcfroc")]
#[command(about = "vcfroc - ROC tables for variant calls classified against a baseline")]
#[command(long_about = "
vcfroc reads a VCF whose records carry a CALL (call side) or BASE (baseline
side) INFO annotation of TP, FP or FN and produces, for each requested variant
subset, a table of cumulative true and false positives at decreasing score
thresholds.

Subsets are given with --roc-subset, once per curve. Filters are joined with
'+' (e.g. SNP+HET), may test numeric fields (e.g. INFO.DP>=10) and may end in
:rescale or :norescale. ALL is the unfiltered curve, written to
weighted_roc.tsv; every other curve goes to <name>_roc.tsv.

Records without a usable score are counted in a trailing 'None' row.
")]
struct Args {
    /// Path to the classified input VCF file (plain or gzip)
    #[arg(long, value_name = "FILE")]
    input_vcf: PathBuf,

    /// Directory receiving the ROC tables, summary.txt and VCF outputs
    #[arg(short, long, value_name = "DIR")]
    output_dir: PathBuf,

    /// Curve to produce; repeat for several curves [default: ALL, SNP, NON_SNP]
    #[arg(long = "roc-subset", value_name = "FILTERS")]
    roc_subsets: Vec<String>,

    /// Rescale true positive counts of curves without their own setting
    #[arg(long, conflicts_with = "no_rescale")]
    rescale: bool,

    /// Never rescale curves without their own setting
    #[arg(long)]
    no_rescale: bool,

    /// Score used to order calls: QUAL, INFO.<KEY>, FORMAT.<KEY> or a FORMAT key
    #[arg(long, default_value = "GQ")]
    score_field: String,

    /// How multi-valued score fields are reduced to one score
    #[arg(long, value_enum, default_value_t = Reduction::CalledAllele)]
    reduction: Reduction,

    /// Which VCF outputs to write next to the ROC tables
    #[arg(long, value_enum, default_value_t = OutputMode::RocOnly)]
    output_mode: OutputMode,

    /// Sample to evaluate; defaults to the first sample
    #[arg(long)]
    sample: Option<String>,

    /// Number of processes to use for parallel processing
    #[arg(long, default_value_t = get_num_cpus())]
    num_processes: usize,

    /// Gzip the ROC tables
    #[arg(short = 'z', long)]
    gzip: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Write into a non-empty output directory
    #[arg(short, long)]
    force: bool,
}

fn config_from_args(args: &Args) -> RocConfig {
    let defaults = RocConfig::default();
    let rescale = if args.rescale {
        Some(true)
    } else if args.no_rescale {
        Some(false)
    } else {
        None
    };

    RocConfig {
        filters: if args.roc_subsets.is_empty() {
            defaults.filters
        } else {
            args.roc_subsets.clone()
        },
        rescale,
        score_field: args.score_field.clone(),
        reduction: args.reduction,
        output_mode: args.output_mode,
        sample: args.sample.clone(),
        threads: args.num_processes,
        gzip: args.gzip,
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting vcfroc");
    log::info!("Input VCF: {:?}", args.input_vcf);
    log::info!("Output directory: {:?}", args.output_dir);
    log::info!("Number of processes: {}", args.num_processes);

    validate_file_readable(&args.input_vcf)?;
    prepare_output_dir(&args.output_dir, args.force)
        .with_context(|| format!("preparing output directory {:?}", args.output_dir))?;

    let config = config_from_args(&args);
    log::info!(
        "Configuration: curves={:?}, score={}, reduction={:?}, mode={:?}",
        config.filters,
        config.score_field,
        config.reduction,
        config.output_mode
    );

    let report = evaluate_vcf(&args.input_vcf, &args.output_dir, &config, None)
        .with_context(|| format!("evaluating {:?}", args.input_vcf))?;

    log::info!(
        "Baseline variants: {}, calls: {} TP / {} FP",
        report.totals.baseline(),
        report.totals.true_positives,
        report.totals.false_positives
    );
    log::info!("ROC tables written to: {:?}", args.output_dir);

    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: anyhow::Error) -> ! {
    eprintln!("Error: {:#}", error);
    match error.downcast_ref::<VrocError>() {
        Some(VrocError::FileNotFound(_)) => {
            eprintln!("Please check that the file exists and is readable.");
        }
        Some(VrocError::InvalidRecord(_)) => {
            eprintln!("Please check that your VCF file is properly formatted.");
        }
        Some(VrocError::Configuration(_)) => {
            eprintln!("Please check --roc-subset, --score-field and --sample against the VCF header.");
        }
        Some(VrocError::Io(_)) => {
            eprintln!("Please check file permissions and disk space.");
        }
        Some(VrocError::Csv(_)) | Some(VrocError::ShardMismatch(_)) => {
            eprintln!("This is unexpected. Please report this issue.");
        }
        Some(VrocError::Cancelled) | None => {}
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
