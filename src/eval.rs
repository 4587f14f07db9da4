//! End-to-end evaluation of a classified VCF

use crate::filter::{bind_filters, build_roc_filters, RocFilter};
use crate::record::{Classification, ClassifiedRecord};
use crate::score::ScoreExtractor;
use crate::synchronizer::{
    evaluate_sharded, shard_by_contig, ClassificationStream, EvalSynchronizer, RawEvaluation, RocReport,
};
use crate::utils::{validate_file_readable, Timer};
use crate::vcf::{VcfHeader, VcfReader, VcfWriter};
use crate::writer::CurveWriter;
use crate::{validate_roc_config, OutputMode, RocConfig, VrocError, VrocResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-classification VCF outputs for the split and combined modes
struct VcfSinks {
    mode: OutputMode,
    writers: Vec<VcfWriter>,
    paths: Vec<PathBuf>,
}

impl VcfSinks {
    fn create(mode: OutputMode, output_dir: &Path, header: &VcfHeader) -> VrocResult<Self> {
        let names: &[&str] = match mode {
            OutputMode::Split => &["tp.vcf.gz", "fp.vcf.gz", "fn.vcf.gz"],
            OutputMode::Combined => &["output.vcf.gz"],
            OutputMode::RocOnly => &[],
        };

        let paths: Vec<PathBuf> = names.iter().map(|name| output_dir.join(name)).collect();
        let writers = paths
            .iter()
            .map(|path| VcfWriter::create(path, header))
            .collect::<VrocResult<Vec<_>>>()?;

        Ok(Self { mode, writers, paths })
    }

    fn write(&mut self, record: &ClassifiedRecord) -> VrocResult<()> {
        let classification = record.classification();
        if !self.mode.writes_vcf() || !classification.is_assessed() {
            return Ok(());
        }
        let index = match (self.mode, classification) {
            (OutputMode::Split, Classification::FalsePositive) => 1,
            (OutputMode::Split, Classification::FalseNegative) => 2,
            _ => 0,
        };
        self.writers[index].write_record(record.record())
    }

    fn finish(self) -> VrocResult<Vec<PathBuf>> {
        let VcfSinks { writers, paths, .. } = self;
        for writer in writers {
            writer.finish()?;
        }
        Ok(paths)
    }

    // Partial VCFs from a failed run are removed
    fn discard(self) {
        let VcfSinks { writers, paths, .. } = self;
        drop(writers);
        for path in paths {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Could not remove partial output {:?}: {}", path, e);
            }
        }
    }
}

fn is_cancelled(cancel: &Option<Arc<AtomicBool>>) -> bool {
    cancel.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed))
}

/// Run the synchronizer over `stream`, sharding by contig when more than one
/// thread is configured.
pub fn evaluate_stream<S: ClassificationStream>(
    stream: S,
    filters: Vec<RocFilter>,
    extractor: ScoreExtractor,
    config: &RocConfig,
    cancel: Option<Arc<AtomicBool>>,
) -> VrocResult<RawEvaluation> {
    if config.threads > 1 {
        let mut records = Vec::new();
        for item in stream {
            if is_cancelled(&cancel) {
                return Err(VrocError::Cancelled);
            }
            records.push(item?);
        }
        log::info!("Read {} records", records.len());

        let shards = shard_by_contig(records, config.threads);
        evaluate_sharded(shards, &filters, &extractor, config.rescale, cancel)
    } else {
        let mut sync = EvalSynchronizer::new(filters, extractor, config.rescale);
        if let Some(flag) = cancel {
            sync = sync.with_cancellation(flag);
        }
        sync.run(stream)?;
        Ok(sync.drain())
    }
}

/// Evaluate a classified VCF and write the ROC tables, summary and any VCF
/// outputs the mode asks for into `output_dir`.
///
/// Nothing but the VCF outputs is written before the whole input has been
/// read; a failed or cancelled run leaves no ROC tables behind.
pub fn evaluate_vcf<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output_dir: Q,
    config: &RocConfig,
    cancel: Option<Arc<AtomicBool>>,
) -> VrocResult<RocReport> {
    let _timer = Timer::new("ROC evaluation");
    let output_dir = output_dir.as_ref();

    validate_roc_config(config)?;
    validate_file_readable(&input)?;

    let reader = VcfReader::new(&input)?;
    let header = reader.header().clone();
    let sample = header.resolve_sample(config.sample.as_deref())?;

    let mut filters = build_roc_filters(&config.filters)?;
    bind_filters(&mut filters, &header)?;
    let extractor = ScoreExtractor::from_config(&config.score_field, config.reduction)?;
    extractor.bind_header(&header);

    if sample.is_none() {
        log::warn!("VCF has no sample columns; genotype filters and FORMAT scores will not match");
    }
    log::info!(
        "Evaluating {} curves on {:?} (score field {}, sample {})",
        filters.len(),
        input.as_ref(),
        extractor.field(),
        sample.map_or("none", |i| header.samples()[i].as_str())
    );

    let score_field = extractor.field().to_string();
    let mut sinks = VcfSinks::create(config.output_mode, output_dir, &header)?;
    if config.output_mode.writes_vcf() {
        log::info!("Writing classified records to {:?}", sinks.paths);
    }

    let stream = reader.into_classified(sample).map(|item| -> VrocResult<ClassifiedRecord> {
        let record = item?;
        sinks.write(&record)?;
        Ok(record)
    });

    let raw = match evaluate_stream(stream, filters, extractor, config, cancel) {
        Ok(raw) => raw,
        Err(e) => {
            sinks.discard();
            return Err(e);
        }
    };
    for path in sinks.finish()? {
        log::info!("Wrote {:?}", path);
    }

    let report = raw.into_report();
    CurveWriter::new(output_dir, config.gzip, &score_field).write_report(&report)?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::fs::File;
    use std::io::{Read, Write};
    use tempfile::NamedTempFile;

    const HEADER: &str = "##fileformat=VCFv4.2\n\
        ##INFO=<ID=CALL,Number=1,Type=String,Description=\"Call decision\">\n\
        ##INFO=<ID=BASE,Number=1,Type=String,Description=\"Baseline decision\">\n\
        ##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total Depth\">\n\
        ##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
        ##FORMAT=<ID=GQ,Number=1,Type=Float,Description=\"Genotype quality\">\n\
        #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tsample1\n";

    const RECORDS: [&str; 11] = [
        "chr1\t100\t.\tA\tT\t.\tPASS\tCALL=TP;DP=30\tGT:GQ\t0/1:90",
        "chr1\t200\t.\tA\tT\t.\tPASS\tCALL=TP;DP=12\tGT:GQ\t1/1:85",
        "chr1\t300\t.\tA\tAT\t.\tPASS\tCALL=FP;DP=8\tGT:GQ\t0/1:85",
        "chr1\t400\t.\tC\tG\t.\tPASS\tCALL=TP;DP=25\tGT:GQ\t0/1:70",
        "chr1\t500\t.\tG\tGA\t.\tPASS\tCALL=FP;DP=5\tGT:GQ\t0/1:60",
        "chr2\t100\t.\tT\tC\t.\tPASS\tCALL=TP;DP=40\tGT:GQ\t0/1:50",
        "chr2\t200\t.\tT\tTA\t.\tPASS\tCALL=TP;DP=18\tGT:GQ\t1/1:40",
        "chr2\t300\t.\tG\tA\t.\tPASS\tCALL=FP;DP=3\tGT:GQ\t0/1:30",
        "chr2\t400\t.\tA\tC\t.\tPASS\tCALL=TP;DP=22\tGT:GQ\t0/1:.",
        "chr2\t500\t.\tA\tG\t.\tPASS\tBASE=FN\tGT\t0/1",
        "chr2\t600\t.\tA\tG\t.\tPASS\tCALL=IGN;DP=9\tGT:GQ\t0/1:20",
    ];

    fn input_vcf(records: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", HEADER).unwrap();
        for record in records {
            writeln!(file, "{}", record).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn data_lines(text: &str) -> Vec<String> {
        text.lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| l.to_string())
            .collect()
    }

    fn read_gz(path: &Path) -> String {
        let mut text = String::new();
        MultiGzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    fn vcf_outputs(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".vcf.gz"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_roc_only_mode() {
        let input = input_vcf(&RECORDS);
        let dir = tempfile::tempdir().unwrap();
        let report = evaluate_vcf(input.path(), dir.path(), &RocConfig::default(), None).unwrap();

        assert_eq!(report.curves.len(), 3);
        assert_eq!(report.totals.baseline(), 7);
        assert!(vcf_outputs(dir.path()).is_empty());

        let weighted = std::fs::read_to_string(dir.path().join("weighted_roc.tsv")).unwrap();
        assert!(weighted.starts_with("#total baseline variants: 7\n"));
        assert!(weighted.contains("#score field: FORMAT.GQ"));
        let rows = data_lines(&weighted);
        assert_eq!(rows.len(), 8);
        assert!(rows[0].starts_with("90\t1\t0\t6\t"));
        assert!(rows[7].starts_with("None\t6\t3\t1\t"));

        assert!(dir.path().join("snp_roc.tsv").exists());
        assert!(dir.path().join("non_snp_roc.tsv").exists());
        assert!(dir.path().join("summary.txt").exists());
    }

    #[test]
    fn test_split_mode() {
        let input = input_vcf(&RECORDS);
        let dir = tempfile::tempdir().unwrap();
        let config = RocConfig {
            output_mode: OutputMode::Split,
            ..RocConfig::default()
        };
        evaluate_vcf(input.path(), dir.path(), &config, None).unwrap();

        assert_eq!(vcf_outputs(dir.path()), vec!["fn.vcf.gz", "fp.vcf.gz", "tp.vcf.gz"]);

        let tp = read_gz(&dir.path().join("tp.vcf.gz"));
        assert!(tp.starts_with("##fileformat=VCFv4.2"));
        assert_eq!(data_lines(&tp).len(), 6);
        assert_eq!(data_lines(&read_gz(&dir.path().join("fp.vcf.gz"))).len(), 3);

        let fn_lines = data_lines(&read_gz(&dir.path().join("fn.vcf.gz")));
        assert_eq!(fn_lines, vec![RECORDS[9].to_string()]);
    }

    #[test]
    fn test_combined_mode() {
        let input = input_vcf(&RECORDS);
        let dir = tempfile::tempdir().unwrap();
        let config = RocConfig {
            output_mode: OutputMode::Combined,
            ..RocConfig::default()
        };
        evaluate_vcf(input.path(), dir.path(), &config, None).unwrap();

        assert_eq!(vcf_outputs(dir.path()), vec!["output.vcf.gz"]);
        let combined = read_gz(&dir.path().join("output.vcf.gz"));
        assert_eq!(data_lines(&combined).len(), 10);
        assert!(dir.path().join("weighted_roc.tsv").exists());
    }

    #[test]
    fn test_threads_give_identical_tables() {
        let input = input_vcf(&RECORDS);
        let specs = vec!["ALL".to_string(), "SNP+HET:rescale".to_string(), "INFO.DP>=10".to_string()];

        let mut outputs = Vec::new();
        for threads in [1, 2, 4] {
            let dir = tempfile::tempdir().unwrap();
            let config = RocConfig {
                filters: specs.clone(),
                threads,
                ..RocConfig::default()
            };
            evaluate_vcf(input.path(), dir.path(), &config, None).unwrap();
            let tables: Vec<String> = ["weighted_roc.tsv", "snp+het_roc.tsv", "info.dpgteq10_roc.tsv"]
                .iter()
                .map(|name| std::fs::read_to_string(dir.path().join(name)).unwrap())
                .collect();
            outputs.push(tables);
        }

        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[0], outputs[2]);
    }

    #[test]
    fn test_configuration_errors_before_streaming() {
        let input = input_vcf(&RECORDS);
        let dir = tempfile::tempdir().unwrap();

        let unknown_sample = RocConfig {
            sample: Some("nobody".to_string()),
            ..RocConfig::default()
        };
        assert!(matches!(
            evaluate_vcf(input.path(), dir.path(), &unknown_sample, None),
            Err(VrocError::Configuration(_))
        ));

        let undeclared = RocConfig {
            filters: vec!["INFO.AF>0.5".to_string()],
            output_mode: OutputMode::Split,
            ..RocConfig::default()
        };
        assert!(matches!(
            evaluate_vcf(input.path(), dir.path(), &undeclared, None),
            Err(VrocError::Configuration(_))
        ));

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_curves_sharing_a_table_fail_before_streaming() {
        let input = input_vcf(&RECORDS);
        let dir = tempfile::tempdir().unwrap();
        let config = RocConfig {
            filters: vec!["INFO.DP>=10".to_string(), "info.DP>=10".to_string()],
            output_mode: OutputMode::Split,
            ..RocConfig::default()
        };

        assert!(validate_roc_config(&config).is_err());
        assert!(matches!(
            evaluate_vcf(input.path(), dir.path(), &config, None),
            Err(VrocError::Configuration(_))
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = evaluate_vcf("/nonexistent/input.vcf", dir.path(), &RocConfig::default(), None);
        assert!(matches!(result, Err(VrocError::FileNotFound(_))));
    }

    #[test]
    fn test_malformed_record_leaves_no_outputs() {
        let mut records = RECORDS.to_vec();
        records.insert(4, "chr1\tnot_a_position\t.\tA\tT\t.\tPASS\tCALL=TP\tGT:GQ\t0/1:10");
        let input = input_vcf(&records);
        let dir = tempfile::tempdir().unwrap();
        let config = RocConfig {
            output_mode: OutputMode::Split,
            ..RocConfig::default()
        };

        let result = evaluate_vcf(input.path(), dir.path(), &config, None);
        assert!(matches!(result, Err(VrocError::InvalidRecord(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cancelled_run_writes_no_tables() {
        let input = input_vcf(&RECORDS);
        let flag = Arc::new(AtomicBool::new(true));

        for threads in [1, 2] {
            let dir = tempfile::tempdir().unwrap();
            let config = RocConfig {
                threads,
                ..RocConfig::default()
            };
            let result = evaluate_vcf(input.path(), dir.path(), &config, Some(Arc::clone(&flag)));
            assert!(matches!(result, Err(VrocError::Cancelled)));
            assert!(!dir.path().join("weighted_roc.tsv").exists());
        }
    }

    #[test]
    fn test_qual_scores_and_gzip_tables() {
        let records: Vec<String> = RECORDS
            .iter()
            .enumerate()
            .map(|(i, r)| match i {
                9 => r.to_string(),
                _ => r.replacen("\t.\tPASS", &format!("\t{}\tPASS", 10 * (i + 1)), 1),
            })
            .collect();
        let records: Vec<&str> = records.iter().map(|r| r.as_str()).collect();
        let input = input_vcf(&records);
        let dir = tempfile::tempdir().unwrap();
        let config = RocConfig {
            filters: vec!["ALL".to_string()],
            score_field: "QUAL".to_string(),
            gzip: true,
            ..RocConfig::default()
        };
        evaluate_vcf(input.path(), dir.path(), &config, None).unwrap();

        let table = read_gz(&dir.path().join("weighted_roc.tsv.gz"));
        let rows = data_lines(&table);
        // Every call carries a QUAL; only the FN is unscored
        assert_eq!(rows.len(), 10);
        assert!(rows[0].starts_with("90\t1\t0\t6\t"));
        assert!(rows[9].starts_with("None\t6\t3\t1\t"));
    }
}
