//! # vcfroc - ROC curves for classified variant calls
//!
//! A Rust tool for turning a VCF whose records have already been classified
//! against a baseline (TP/FP/FN) into ROC-style tables of cumulative true and
//! false positives at decreasing score thresholds, one table per requested
//! variant subset.

pub mod eval;
pub mod filter;
pub mod record;
pub mod roc;
pub mod score;
pub mod synchronizer;
pub mod utils;
pub mod vcf;
pub mod writer;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use filter::{CombinedRocFilter, RocFilter};
pub use record::{Classification, ClassifiedRecord, Genotype};
pub use roc::{RocAccumulator, RocCurve, RocPoint};
pub use score::{Reduction, ScoreExtractor};
pub use synchronizer::{ClassificationStream, EvalSynchronizer, RocReport};

/// Which artifacts an evaluation run writes next to the ROC tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Separate tp.vcf.gz, fp.vcf.gz and fn.vcf.gz files
    Split,
    /// A single output.vcf.gz holding every assessed record
    Combined,
    /// ROC tables and summary only
    #[default]
    RocOnly,
}

impl OutputMode {
    pub fn writes_vcf(&self) -> bool {
        !matches!(self, OutputMode::RocOnly)
    }
}

/// Configuration parameters for an evaluation run
#[derive(Debug, Clone)]
pub struct RocConfig {
    /// One entry per curve; each entry is a `+`-joined filter combination
    /// with an optional `:rescale` or `:norescale` suffix.
    pub filters: Vec<String>,
    /// Run-wide rescale default for curves that do not override it
    pub rescale: Option<bool>,
    pub score_field: String,
    pub reduction: Reduction,
    pub output_mode: OutputMode,
    /// Sample whose genotype and FORMAT fields are used; first sample if unset
    pub sample: Option<String>,
    pub threads: usize,
    /// Gzip the ROC tables
    pub gzip: bool,
}

impl Default for RocConfig {
    fn default() -> Self {
        Self {
            filters: vec!["ALL".to_string(), "SNP".to_string(), "NON_SNP".to_string()],
            rescale: None,
            score_field: "GQ".to_string(),
            reduction: Reduction::CalledAllele,
            output_mode: OutputMode::RocOnly,
            sample: None,
            threads: 1,
            gzip: false,
        }
    }
}

/// Validate the parts of a configuration that do not need the VCF header
pub fn validate_roc_config(config: &RocConfig) -> VrocResult<()> {
    if config.threads == 0 {
        return Err(VrocError::Configuration(
            "threads must be at least 1".to_string(),
        ));
    }

    if config.filters.is_empty() {
        return Err(VrocError::Configuration(
            "at least one ROC filter must be requested".to_string(),
        ));
    }

    score::ScoreField::parse(&config.score_field)?;
    filter::build_roc_filters(&config.filters)?;

    Ok(())
}

/// Error types for the vcfroc library
#[derive(Debug, thiserror::Error)]
pub enum VrocError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Shard results do not line up: {0}")]
    ShardMismatch(String),

    #[error("Evaluation cancelled")]
    Cancelled,
}

pub type VrocResult<T> = Result<T, VrocError>;
