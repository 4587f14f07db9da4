//! ROC table and summary output

use crate::roc::{CurveRow, RocCurve};
use crate::synchronizer::{ReportCurve, RocReport};
use crate::utils::OutputWriter;
use crate::{VrocError, VrocResult};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE_NAME: &str = "summary.txt";

const UNFILTERED_FILE_NAME: &str = "weighted_roc.tsv";

const COLUMNS: [&str; 7] = [
    "score",
    "true_positives",
    "false_positives",
    "false_negatives",
    "precision",
    "sensitivity",
    "f_measure",
];

/// File name of the ROC table for a curve
///
/// Comparison operators in field predicates are spelled out so that e.g.
/// `DP>10` and `DP<10` land in different files.
pub fn roc_file_name(name: &str, gzip: bool) -> String {
    let mut file_name = if name.is_empty() {
        UNFILTERED_FILE_NAME.to_string()
    } else {
        let mut stem = String::with_capacity(name.len());
        for c in name.chars() {
            match c {
                '>' => stem.push_str("gt"),
                '<' => stem.push_str("lt"),
                '=' => stem.push_str("eq"),
                '!' => stem.push_str("not"),
                c if c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '-' | '.') => {
                    stem.push(c.to_ascii_lowercase())
                }
                _ => stem.push('_'),
            }
        }
        format!("{}_roc.tsv", stem)
    };

    if gzip {
        file_name.push_str(".gz");
    }
    file_name
}

#[derive(Debug, Serialize)]
struct RocRow {
    score: String,
    true_positives: String,
    false_positives: String,
    false_negatives: String,
    precision: String,
    sensitivity: String,
    f_measure: String,
}

impl From<&CurveRow> for RocRow {
    fn from(row: &CurveRow) -> Self {
        Self {
            score: format_score(row.score),
            true_positives: format_count(row.true_positives),
            false_positives: format_count(row.false_positives),
            false_negatives: format_count(row.false_negatives),
            precision: format_rate(row.precision),
            sensitivity: format_rate(row.sensitivity),
            f_measure: format_rate(row.f_measure),
        }
    }
}

fn format_score(score: Option<f64>) -> String {
    match score {
        Some(score) => format!("{}", score),
        None => "None".to_string(),
    }
}

// Rescaled counts can be fractional
fn format_count(count: f64) -> String {
    if count.fract() == 0.0 {
        format!("{:.0}", count)
    } else {
        format!("{:.2}", count)
    }
}

fn format_rate(rate: Option<f64>) -> String {
    rate.map_or_else(|| "NA".to_string(), |r| format!("{:.4}", r))
}

/// Writes finalised curves into an output directory
pub struct CurveWriter {
    output_dir: PathBuf,
    gzip: bool,
    score_field: String,
}

impl CurveWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P, gzip: bool, score_field: &str) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            gzip,
            score_field: score_field.to_string(),
        }
    }

    /// Write one ROC table per curve followed by the summary of the first curve
    pub fn write_report(&self, report: &RocReport) -> VrocResult<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        for curve in &report.curves {
            let file_name = roc_file_name(&curve.name, self.gzip);
            if !seen.insert(file_name.clone()) {
                return Err(VrocError::Configuration(format!(
                    "ROC filter '{}' would overwrite {}",
                    curve.name, file_name
                )));
            }
        }

        let mut written = report
            .curves
            .iter()
            .map(|curve| self.write_curve(curve))
            .collect::<VrocResult<Vec<_>>>()?;

        if let Some(first) = report.curves.first() {
            written.push(self.write_summary(first)?);
        }

        Ok(written)
    }

    pub fn write_curve(&self, curve: &ReportCurve) -> VrocResult<PathBuf> {
        let path = self.output_dir.join(roc_file_name(&curve.name, self.gzip));
        log::info!("Writing ROC table to {:?}", path);

        let mut output = OutputWriter::create(&path)?;
        self.write_comment_header(&mut output, curve)?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(output);
        for row in curve.curve.rows() {
            writer.serialize(RocRow::from(&row))?;
        }
        writer
            .into_inner()
            .map_err(|e| VrocError::Io(e.into_error()))?
            .finish()?;

        Ok(path)
    }

    fn write_comment_header(&self, output: &mut dyn Write, curve: &ReportCurve) -> VrocResult<()> {
        let roc = &curve.curve;
        let name = if curve.name.is_empty() { "ALL" } else { &curve.name };

        writeln!(output, "#total baseline variants: {}", roc.baseline_total())?;
        writeln!(
            output,
            "#total call variants: {}",
            roc.raw_true_positives() + roc.raw_false_positives()
        )?;
        writeln!(output, "#unscored records: {}", roc.unscored().total())?;
        writeln!(output, "#score field: {}", self.score_field)?;
        writeln!(output, "#filter: {}", name)?;
        writeln!(output, "#rescale factor: {:.4}", roc.tp_scale())?;
        writeln!(output, "#{}", COLUMNS.join("\t"))?;
        Ok(())
    }

    /// Summary table with the best F-measure threshold and the all-records row
    pub fn write_summary(&self, curve: &ReportCurve) -> VrocResult<PathBuf> {
        let path = self.output_dir.join(SUMMARY_FILE_NAME);
        log::info!("Writing summary to {:?}", path);

        let mut output = OutputWriter::create(&path)?;
        output.write_all(summary_table(&curve.curve).as_bytes())?;
        output.finish()?;

        Ok(path)
    }
}

/// Render the summary table of a curve
pub fn summary_table(curve: &RocCurve) -> String {
    let rows = curve.rows();

    // Highest F-measure; ties keep the higher threshold
    let mut best: Option<CurveRow> = None;
    for row in rows.iter().filter(|row| row.score.is_some()) {
        if let Some(f) = row.f_measure {
            if best.and_then(|b| b.f_measure).map_or(true, |best_f| f > best_f) {
                best = Some(*row);
            }
        }
    }

    let all = match rows.last() {
        Some(last) => CurveRow { score: None, ..*last },
        None => CurveRow {
            score: None,
            true_positives: 0.0,
            false_positives: 0.0,
            false_negatives: curve.baseline_total() as f64 * curve.tp_scale(),
            precision: None,
            sensitivity: None,
            f_measure: None,
        },
    };

    let mut table = vec![[
        "Threshold".to_string(),
        "True-pos".to_string(),
        "False-pos".to_string(),
        "False-neg".to_string(),
        "Precision".to_string(),
        "Sensitivity".to_string(),
        "F-measure".to_string(),
    ]];
    for row in best.iter().chain(std::iter::once(&all)) {
        let row = RocRow::from(row);
        table.push([
            row.score,
            row.true_positives,
            row.false_positives,
            row.false_negatives,
            row.precision,
            row.sensitivity,
            row.f_measure,
        ]);
    }

    let mut widths = [0usize; 7];
    for cells in &table {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for cells in &table {
        let line = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:>width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&line);
        out.push('\n');
    }
    out
}
