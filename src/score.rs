//! Score extraction from classified records

use crate::record::{ClassifiedRecord, Genotype};
use crate::vcf::VcfHeader;
use crate::{VrocError, VrocResult};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a numeric value is read from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScoreField {
    Qual,
    Info(String),
    Format(String),
}

impl ScoreField {
    /// Parse `QUAL`, `INFO.<KEY>`, `FORMAT.<KEY>` or a bare FORMAT key
    pub fn parse(text: &str) -> VrocResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VrocError::Configuration("empty score field".to_string()));
        }
        if text.eq_ignore_ascii_case("QUAL") {
            return Ok(ScoreField::Qual);
        }

        let field = match text.split_once('.') {
            Some((scope, key)) if scope.eq_ignore_ascii_case("INFO") => ScoreField::Info(key.to_string()),
            Some((scope, key)) if scope.eq_ignore_ascii_case("FORMAT") => ScoreField::Format(key.to_string()),
            Some(_) => {
                return Err(VrocError::Configuration(format!(
                    "unknown field scope in '{}', expected QUAL, INFO.<KEY> or FORMAT.<KEY>",
                    text
                )))
            }
            None => ScoreField::Format(text.to_string()),
        };

        match &field {
            ScoreField::Info(key) | ScoreField::Format(key) if key.is_empty() => Err(
                VrocError::Configuration(format!("missing field key in '{}'", text)),
            ),
            _ => Ok(field),
        }
    }

    /// Whether the header declares this field
    pub fn is_declared(&self, header: &VcfHeader) -> bool {
        match self {
            ScoreField::Qual => true,
            ScoreField::Info(key) => header.has_info(key),
            ScoreField::Format(key) => header.has_format(key),
        }
    }

    /// All values of the field; unparseable or NaN entries are `None`
    pub fn values(&self, record: &ClassifiedRecord) -> Vec<Option<f64>> {
        let text = match self {
            ScoreField::Qual => return vec![record.record().qual.filter(|q| !q.is_nan())],
            ScoreField::Info(key) => record.record().info_value(key),
            ScoreField::Format(key) => record.sample_value(key),
        };

        match text {
            Some(text) if !text.is_empty() => text
                .split(',')
                .map(|v| v.parse::<f64>().ok().filter(|x| !x.is_nan()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for ScoreField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreField::Qual => write!(f, "QUAL"),
            ScoreField::Info(key) => write!(f, "INFO.{}", key),
            ScoreField::Format(key) => write!(f, "FORMAT.{}", key),
        }
    }
}

/// How a multi-valued score field is reduced to one score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reduction {
    /// Value belonging to the highest called ALT allele
    #[default]
    CalledAllele,
    Max,
    Min,
    First,
}

/// Pulls the confidence score used to order ROC points
#[derive(Debug, Clone)]
pub struct ScoreExtractor {
    field: ScoreField,
    reduction: Reduction,
}

impl ScoreExtractor {
    pub fn new(field: ScoreField, reduction: Reduction) -> Self {
        Self { field, reduction }
    }

    pub fn from_config(field: &str, reduction: Reduction) -> VrocResult<Self> {
        Ok(Self::new(ScoreField::parse(field)?, reduction))
    }

    pub fn field(&self) -> &ScoreField {
        &self.field
    }

    /// Warn about a score field the header does not declare. Records still
    /// carrying it are scored; the rest fall into the unscored bucket.
    pub fn bind_header(&self, header: &VcfHeader) {
        if !self.field.is_declared(header) {
            log::warn!(
                "Score field {} is not declared in the VCF header; records without it will be unscored",
                self.field
            );
        }
    }

    pub fn requires_gt(&self) -> bool {
        self.reduction == Reduction::CalledAllele && self.field != ScoreField::Qual
    }

    /// Score of a record, `None` when it cannot be determined
    pub fn extract(&self, record: &ClassifiedRecord, gt: Option<&Genotype>) -> Option<f64> {
        let values = self.field.values(record);
        if values.len() <= 1 {
            return values.first().copied().flatten();
        }

        match self.reduction {
            Reduction::First => values[0],
            Reduction::Max => values.iter().flatten().copied().reduce(f64::max),
            Reduction::Min => values.iter().flatten().copied().reduce(f64::min),
            Reduction::CalledAllele => {
                let num_alts = record.record().alt_alleles.len();
                let allele = gt.and_then(Genotype::highest_alt);
                let index = match allele {
                    // Number=A
                    Some(a) if values.len() == num_alts => a.checked_sub(1),
                    // Number=R
                    Some(a) if values.len() == num_alts + 1 => Some(a),
                    None if values.len() == num_alts + 1 => Some(0),
                    _ => None,
                };
                index.and_then(|i| values.get(i).copied().flatten())
            }
        }
    }
}
