//! ROC filters: predicates deciding which classified records count toward a curve
//!
//! Filters form a closed set of variants. Leaf filters test zygosity, variant
//! type, allele count or a numeric field; [`CombinedRocFilter`] joins an
//! ordered list of them with AND semantics. Each configured curve is backed by
//! one combined filter built from a `+`-joined specification such as
//! `SNP+HET` or `INDEL+INFO.DP>=10:rescale`.

use crate::record::{ClassifiedRecord, Genotype};
use crate::score::ScoreField;
use crate::vcf::VcfHeader;
use crate::writer::roc_file_name;
use crate::{VrocError, VrocResult};
use std::collections::HashSet;
use std::fmt;

/// Shape of a variant allele after trimming bases shared with the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Snp,
    Mnp,
    Indel,
    Complex,
}

/// Classify one ALT allele against the reference.
///
/// Symbolic alleles, breakends, `*` and `.` have no kind, nor does an ALT
/// identical to the reference.
pub fn allele_kind(reference: &str, alt: &str) -> Option<VariantKind> {
    if alt.is_empty() || alt == "*" || alt == "." || alt.starts_with('<') || alt.contains(['[', ']']) {
        return None;
    }

    let (r, a) = (reference.as_bytes(), alt.as_bytes());
    let prefix = r.iter().zip(a).take_while(|(x, y)| x == y).count();
    let (r, a) = (&r[prefix..], &a[prefix..]);
    let suffix = r.iter().rev().zip(a.iter().rev()).take_while(|(x, y)| x == y).count();
    let (r, a) = (&r[..r.len() - suffix], &a[..a.len() - suffix]);

    match (r.len(), a.len()) {
        (0, 0) => None,
        (1, 1) => Some(VariantKind::Snp),
        (x, y) if x == y => Some(VariantKind::Mnp),
        (0, _) | (_, 0) => Some(VariantKind::Indel),
        _ => Some(VariantKind::Complex),
    }
}

/// Kind shared by every classifiable ALT allele; mixed records are complex
pub fn record_kind(record: &ClassifiedRecord) -> Option<VariantKind> {
    let rec = record.record();
    let mut kinds = rec
        .alt_alleles
        .iter()
        .filter_map(|alt| allele_kind(&rec.ref_allele, alt));

    let first = kinds.next()?;
    if kinds.all(|k| k == first) {
        Some(first)
    } else {
        Some(VariantKind::Complex)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
}

impl Comparison {
    // Two-character operators first so `>=` is not read as `>`
    const OPERATORS: [(&'static str, Comparison); 6] = [
        (">=", Comparison::GreaterOrEqual),
        ("<=", Comparison::LessOrEqual),
        ("!=", Comparison::NotEqual),
        (">", Comparison::Greater),
        ("<", Comparison::Less),
        ("=", Comparison::Equal),
    ];

    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Greater => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::Less => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => value == threshold,
            Comparison::NotEqual => value != threshold,
        }
    }
}

/// Numeric comparison on the first value of a field, e.g. `INFO.DP>=10`
#[derive(Debug, Clone)]
pub struct FieldPredicate {
    text: String,
    field: ScoreField,
    comparison: Comparison,
    threshold: f64,
    bound: bool,
}

impl FieldPredicate {
    pub fn parse(text: &str) -> VrocResult<Self> {
        let start = text
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| VrocError::Configuration(format!("no comparison in '{}'", text)))?;
        let (lhs, rest) = text.split_at(start);

        let (op, comparison) = Comparison::OPERATORS
            .iter()
            .find(|(op, _)| rest.starts_with(op))
            .copied()
            .ok_or_else(|| VrocError::Configuration(format!("invalid comparison in '{}'", text)))?;
        let threshold = rest[op.len()..].trim().parse::<f64>().map_err(|_| {
            VrocError::Configuration(format!("invalid threshold in ROC filter '{}'", text))
        })?;

        Ok(Self {
            text: text.to_string(),
            field: ScoreField::parse(lhs)?,
            comparison,
            threshold,
            bound: false,
        })
    }

    pub fn field(&self) -> &ScoreField {
        &self.field
    }

    fn bind_header(&mut self, header: &VcfHeader) -> VrocResult<()> {
        if !self.field.is_declared(header) {
            return Err(VrocError::Configuration(format!(
                "ROC filter '{}' refers to {} which is not declared in the VCF header",
                self.text, self.field
            )));
        }
        self.bound = true;
        Ok(())
    }

    fn accept(&self, record: &ClassifiedRecord) -> bool {
        debug_assert!(self.bound, "filter '{}' used before header binding", self.text);
        self.field
            .values(record)
            .first()
            .copied()
            .flatten()
            .map_or(false, |value| self.comparison.holds(value, self.threshold))
    }
}

/// Decides whether a classified record counts toward a curve
#[derive(Debug, Clone)]
pub enum RocFilter {
    /// Pass-through; elided when combined
    All,
    Hom,
    Het,
    Snp,
    NonSnp,
    Mnp,
    Indel,
    Xrx,
    NonXrx,
    Biallelic,
    Multiallelic,
    Field(FieldPredicate),
    Combined(CombinedRocFilter),
}

impl RocFilter {
    /// Parse a single filter identifier or field predicate
    pub fn parse(identifier: &str) -> VrocResult<Self> {
        let identifier = identifier.trim();
        let filter = match identifier.to_ascii_uppercase().replace('-', "_").as_str() {
            "ALL" => RocFilter::All,
            "HOM" => RocFilter::Hom,
            "HET" => RocFilter::Het,
            "SNP" => RocFilter::Snp,
            "NON_SNP" => RocFilter::NonSnp,
            "MNP" => RocFilter::Mnp,
            "INDEL" => RocFilter::Indel,
            "XRX" => RocFilter::Xrx,
            "NON_XRX" => RocFilter::NonXrx,
            "BIALLELIC" => RocFilter::Biallelic,
            "MULTIALLELIC" => RocFilter::Multiallelic,
            _ if identifier.contains(['<', '>', '=', '!']) => {
                RocFilter::Field(FieldPredicate::parse(identifier)?)
            }
            _ => {
                return Err(VrocError::Configuration(format!(
                    "unknown ROC filter '{}'",
                    identifier
                )))
            }
        };
        Ok(filter)
    }

    pub fn name(&self) -> &str {
        match self {
            RocFilter::All => "ALL",
            RocFilter::Hom => "HOM",
            RocFilter::Het => "HET",
            RocFilter::Snp => "SNP",
            RocFilter::NonSnp => "NON_SNP",
            RocFilter::Mnp => "MNP",
            RocFilter::Indel => "INDEL",
            RocFilter::Xrx => "XRX",
            RocFilter::NonXrx => "NON_XRX",
            RocFilter::Biallelic => "BIALLELIC",
            RocFilter::Multiallelic => "MULTIALLELIC",
            RocFilter::Field(predicate) => predicate.text.as_str(),
            RocFilter::Combined(combined) => combined.name(),
        }
    }

    /// Accepts every record without looking at it
    pub fn is_pass_through(&self) -> bool {
        match self {
            RocFilter::All => true,
            RocFilter::Combined(combined) => combined.filters.is_empty(),
            _ => false,
        }
    }

    pub fn requires_gt(&self) -> bool {
        match self {
            RocFilter::Hom | RocFilter::Het => true,
            RocFilter::Combined(combined) => combined.requires_gt(),
            _ => false,
        }
    }

    /// Rescale override; `None` inherits the run default
    pub fn rescale(&self) -> Option<bool> {
        match self {
            RocFilter::Combined(combined) => combined.rescale(),
            _ => None,
        }
    }

    pub fn bind_header(&mut self, header: &VcfHeader) -> VrocResult<()> {
        match self {
            RocFilter::Field(predicate) => predicate.bind_header(header),
            RocFilter::Combined(combined) => combined.bind_header(header),
            _ => Ok(()),
        }
    }

    pub fn accept(&self, record: &ClassifiedRecord, gt: Option<&Genotype>) -> bool {
        match self {
            RocFilter::All => true,
            RocFilter::Hom => gt.map_or(false, Genotype::is_hom_alt),
            RocFilter::Het => gt.map_or(false, Genotype::is_het),
            RocFilter::Snp => record_kind(record) == Some(VariantKind::Snp),
            RocFilter::NonSnp => record_kind(record) != Some(VariantKind::Snp),
            RocFilter::Mnp => record_kind(record) == Some(VariantKind::Mnp),
            RocFilter::Indel => record_kind(record) == Some(VariantKind::Indel),
            RocFilter::Xrx => record_kind(record) == Some(VariantKind::Complex),
            RocFilter::NonXrx => record_kind(record) != Some(VariantKind::Complex),
            RocFilter::Biallelic => record.record().alt_alleles.len() == 1,
            RocFilter::Multiallelic => record.record().alt_alleles.len() > 1,
            RocFilter::Field(predicate) => predicate.accept(record),
            RocFilter::Combined(combined) => combined.accept(record, gt),
        }
    }
}

impl fmt::Display for RocFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts only records accepted by every member filter
#[derive(Debug, Clone)]
pub struct CombinedRocFilter {
    filters: Vec<RocFilter>,
    name: String,
    rescale: Option<bool>,
}

impl CombinedRocFilter {
    /// Combine filters in order, dropping pass-through members.
    ///
    /// `rescale` is `Some(true)` to rescale call counts to the baseline,
    /// `Some(false)` to never rescale, `None` for the run default.
    pub fn new(inputs: Vec<RocFilter>, rescale: Option<bool>) -> Self {
        let filters: Vec<RocFilter> = inputs.into_iter().filter(|f| !f.is_pass_through()).collect();
        let name = filters
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join("+");

        Self {
            filters,
            name,
            rescale,
        }
    }

    /// Parse a curve specification: `+`-joined filters with an optional
    /// `:rescale` or `:norescale` suffix
    pub fn parse(spec: &str) -> VrocResult<Self> {
        let (body, rescale) = match spec.rsplit_once(':') {
            Some((body, suffix)) => match suffix.trim().to_ascii_lowercase().as_str() {
                "rescale" => (body, Some(true)),
                "norescale" => (body, Some(false)),
                other => {
                    return Err(VrocError::Configuration(format!(
                        "unknown rescale option '{}' in ROC filter '{}'",
                        other, spec
                    )))
                }
            },
            None => (spec, None),
        };

        let filters = split_members(body)
            .into_iter()
            .map(|part| {
                if part.trim().is_empty() {
                    Err(VrocError::Configuration(format!(
                        "empty filter name in ROC filter '{}'",
                        spec
                    )))
                } else {
                    RocFilter::parse(part)
                }
            })
            .collect::<VrocResult<Vec<_>>>()?;

        Ok(Self::new(filters, rescale))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rescale(&self) -> Option<bool> {
        self.rescale
    }

    pub fn requires_gt(&self) -> bool {
        self.filters.iter().any(RocFilter::requires_gt)
    }

    pub fn bind_header(&mut self, header: &VcfHeader) -> VrocResult<()> {
        self.filters
            .iter_mut()
            .try_for_each(|f| f.bind_header(header))
    }

    pub fn accept(&self, record: &ClassifiedRecord, gt: Option<&Genotype>) -> bool {
        self.filters.iter().all(|f| f.accept(record, gt))
    }
}

// Split a curve body on `+`, except where the `+` is the exponent sign of a
// predicate threshold such as `QUAL>1e+5`
fn split_members(body: &str) -> Vec<&str> {
    let mut members = Vec::new();
    let mut start = 0;

    for (i, c) in body.char_indices() {
        if c != '+' {
            continue;
        }
        let segment = &body[start..i];
        let exponent_sign = segment.contains(['<', '>', '=', '!'])
            && segment.ends_with(['e', 'E'])
            && segment[..segment.len() - 1].ends_with(|c: char| c.is_ascii_digit() || c == '.');
        if !exponent_sign {
            members.push(segment);
            start = i + 1;
        }
    }
    members.push(&body[start..]);
    members
}

/// Build one combined filter per configured curve.
///
/// Unknown identifiers and curves that would share an output file are rejected
/// here, before any record is read.
pub fn build_roc_filters(specs: &[String]) -> VrocResult<Vec<RocFilter>> {
    let mut seen = HashSet::new();
    let mut filters = Vec::with_capacity(specs.len());

    for spec in specs {
        let combined = CombinedRocFilter::parse(spec)?;
        let file_name = roc_file_name(combined.name(), false);
        if !seen.insert(file_name.clone()) {
            return Err(VrocError::Configuration(format!(
                "ROC filter '{}' duplicates an earlier curve (both write {})",
                spec, file_name
            )));
        }
        filters.push(RocFilter::Combined(combined));
    }

    Ok(filters)
}

/// Bind every filter to the header of the input being evaluated
pub fn bind_filters(filters: &mut [RocFilter], header: &VcfHeader) -> VrocResult<()> {
    filters.iter_mut().try_for_each(|f| f.bind_header(header))
}
