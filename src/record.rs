//! Classified variant records and sample genotypes

use crate::vcf::VcfRecord;
use std::fmt;

/// INFO key carrying the call-side decision of the upstream matcher
pub const CALL_DECISION_KEY: &str = "CALL";
/// INFO key carrying the baseline-side decision of the upstream matcher
pub const BASE_DECISION_KEY: &str = "BASE";

/// Outcome assigned to a record by the upstream matching engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    TruePositive,
    FalsePositive,
    FalseNegative,
    NotAssessed,
}

impl Classification {
    /// Derive the classification from the `CALL`/`BASE` INFO annotations.
    ///
    /// A call-side TP or FP wins; otherwise a baseline-side FN is used. Baseline
    /// TPs are counted through their matching call, and any other decision
    /// (`IGN`, `OUT`, ...) leaves the record unassessed.
    pub fn from_record(record: &VcfRecord) -> Self {
        match record.info_value(CALL_DECISION_KEY) {
            Some("TP") => return Classification::TruePositive,
            Some("FP") => return Classification::FalsePositive,
            _ => {}
        }
        match record.info_value(BASE_DECISION_KEY) {
            Some("FN") => Classification::FalseNegative,
            _ => Classification::NotAssessed,
        }
    }

    pub fn is_assessed(&self) -> bool {
        !matches!(self, Classification::NotAssessed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::TruePositive => "TP",
            Classification::FalsePositive => "FP",
            Classification::FalseNegative => "FN",
            Classification::NotAssessed => "NA",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allele indices of one sample; `None` marks a missing allele (`.`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Genotype {
    alleles: Vec<Option<usize>>,
}

impl Genotype {
    /// Parse a VCF `GT` value such as `0/1`, `1|1` or `./.`
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() {
            return None;
        }

        let mut alleles = Vec::new();
        for allele in text.split(['/', '|']) {
            if allele == "." {
                alleles.push(None);
            } else {
                alleles.push(Some(allele.parse::<usize>().ok()?));
            }
        }

        Some(Self { alleles })
    }

    pub fn alleles(&self) -> &[Option<usize>] {
        &self.alleles
    }

    pub fn called(&self) -> impl Iterator<Item = usize> + '_ {
        self.alleles.iter().flatten().copied()
    }

    /// Two or more distinct called alleles
    pub fn is_het(&self) -> bool {
        let mut called = self.called();
        match called.next() {
            Some(first) => called.any(|a| a != first),
            None => false,
        }
    }

    /// Every allele called, identical and non-reference
    pub fn is_hom_alt(&self) -> bool {
        match self.alleles.first() {
            Some(Some(first)) if *first > 0 => self.alleles.iter().all(|a| *a == Some(*first)),
            _ => false,
        }
    }

    pub fn highest_alt(&self) -> Option<usize> {
        self.called().filter(|&a| a > 0).max()
    }
}

/// One VCF record together with its classification and selected sample.
#[derive(Debug, Clone)]
pub struct ClassifiedRecord {
    record: VcfRecord,
    sample: Option<usize>,
    classification: Classification,
}

impl ClassifiedRecord {
    pub fn new(record: VcfRecord, sample: Option<usize>, classification: Classification) -> Self {
        Self {
            record,
            sample,
            classification,
        }
    }

    /// Classify from the record's own `CALL`/`BASE` annotations
    pub fn from_vcf(record: VcfRecord, sample: Option<usize>) -> Self {
        let classification = Classification::from_record(&record);
        Self::new(record, sample, classification)
    }

    pub fn record(&self) -> &VcfRecord {
        &self.record
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn chrom(&self) -> &str {
        &self.record.chrom
    }

    pub fn pos(&self) -> u32 {
        self.record.pos
    }

    /// FORMAT value of the selected sample
    pub fn sample_value(&self, key: &str) -> Option<&str> {
        self.sample
            .and_then(|sample| self.record.format_value(sample, key))
    }

    /// Decode the selected sample's genotype, if the record carries one
    pub fn genotype(&self) -> Option<Genotype> {
        self.sample_value("GT").and_then(Genotype::parse)
    }
}
