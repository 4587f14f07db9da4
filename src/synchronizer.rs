//! Drives a classified record stream through the ROC filters and accumulators
//!
//! An [`EvalSynchronizer`] moves through `Idle -> Streaming -> Draining -> Done`.
//! Draining yields a [`RawEvaluation`] of unscaled curves; rescaling needs the
//! unfiltered true positive total, so it happens afterwards in
//! [`RawEvaluation::into_report`], once every shard has been merged.

use crate::filter::RocFilter;
use crate::record::{Classification, ClassifiedRecord};
use crate::roc::{RocAccumulator, RocCurve};
use crate::score::ScoreExtractor;
use crate::utils::chunk_work;
use crate::{VrocError, VrocResult};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ordered stream of classified records, one per position
pub trait ClassificationStream: Iterator<Item = VrocResult<ClassifiedRecord>> {}

impl<T> ClassificationStream for T where T: Iterator<Item = VrocResult<ClassifiedRecord>> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Streaming,
    Draining,
    Done,
}

/// Classification counts over every assessed record, before filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaselineTotals {
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
}

impl BaselineTotals {
    pub fn baseline(&self) -> u64 {
        self.true_positives + self.false_negatives
    }

    fn merge(self, other: BaselineTotals) -> BaselineTotals {
        BaselineTotals {
            true_positives: self.true_positives + other.true_positives,
            false_positives: self.false_positives + other.false_positives,
            false_negatives: self.false_negatives + other.false_negatives,
        }
    }
}

struct CurveSlot {
    filter: RocFilter,
    rescale: bool,
    accumulator: RocAccumulator,
}

/// Unscaled curve of one filter
#[derive(Debug, Clone, PartialEq)]
pub struct RawCurve {
    pub name: String,
    pub rescale: bool,
    pub curve: RocCurve,
}

/// Drained but not yet rescaled result of one synchronizer or shard
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvaluation {
    totals: BaselineTotals,
    curves: Vec<RawCurve>,
}

impl RawEvaluation {
    pub fn totals(&self) -> BaselineTotals {
        self.totals
    }

    pub fn curves(&self) -> &[RawCurve] {
        &self.curves
    }

    /// Combine the results of two shards evaluated with the same filters
    pub fn merge(self, other: RawEvaluation) -> VrocResult<RawEvaluation> {
        if self.curves.len() != other.curves.len() {
            return Err(VrocError::ShardMismatch(format!(
                "{} curves vs {} curves",
                self.curves.len(),
                other.curves.len()
            )));
        }

        let curves = self
            .curves
            .into_iter()
            .zip(other.curves)
            .map(|(a, b)| {
                if a.name != b.name || a.rescale != b.rescale {
                    return Err(VrocError::ShardMismatch(format!(
                        "curve '{}' paired with '{}'",
                        a.name, b.name
                    )));
                }
                Ok(RawCurve {
                    name: a.name,
                    rescale: a.rescale,
                    curve: a.curve.merge(b.curve),
                })
            })
            .collect::<VrocResult<Vec<_>>>()?;

        Ok(RawEvaluation {
            totals: self.totals.merge(other.totals),
            curves,
        })
    }

    /// Apply rescaling and produce the final curves.
    ///
    /// A rescaled curve has its true positives multiplied by the unfiltered TP
    /// total divided by its own TP total. Curves without true positives are
    /// left unscaled.
    pub fn into_report(self) -> RocReport {
        let reference = self.totals.true_positives;
        let curves = self
            .curves
            .into_iter()
            .map(|raw| {
                let curve = if raw.rescale {
                    let own = raw.curve.raw_true_positives();
                    if own > 0 {
                        let factor = reference as f64 / own as f64;
                        log::debug!("Rescaling curve '{}' by {:.4}", raw.name, factor);
                        raw.curve.rescaled(factor)
                    } else {
                        log::debug!("Curve '{}' has no true positives, not rescaling", raw.name);
                        raw.curve
                    }
                } else {
                    raw.curve
                };
                ReportCurve {
                    name: raw.name,
                    curve,
                }
            })
            .collect();

        RocReport {
            totals: self.totals,
            curves,
        }
    }
}

/// Finalised curve ready for writing
#[derive(Debug, Clone, PartialEq)]
pub struct ReportCurve {
    /// Display name of the filter; empty for the unfiltered curve
    pub name: String,
    pub curve: RocCurve,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RocReport {
    pub totals: BaselineTotals,
    pub curves: Vec<ReportCurve>,
}

/// Feeds classified records into one accumulator per filter
pub struct EvalSynchronizer {
    state: SyncState,
    slots: Vec<CurveSlot>,
    extractor: ScoreExtractor,
    decode_gt: bool,
    totals: BaselineTotals,
    skipped: u64,
    cancel: Option<Arc<AtomicBool>>,
}

impl EvalSynchronizer {
    /// Allocate accumulators for `filters`, which must already be bound to the
    /// input header.
    ///
    /// Each filter's rescale override wins over `rescale_default`; with neither
    /// set the curve is not rescaled.
    pub fn new(filters: Vec<RocFilter>, extractor: ScoreExtractor, rescale_default: Option<bool>) -> Self {
        let decode_gt = extractor.requires_gt() || filters.iter().any(RocFilter::requires_gt);
        let slots = filters
            .into_iter()
            .map(|filter| CurveSlot {
                rescale: filter.rescale().or(rescale_default).unwrap_or(false),
                filter,
                accumulator: RocAccumulator::new(),
            })
            .collect();

        Self {
            state: SyncState::Idle,
            slots,
            extractor,
            decode_gt,
            totals: BaselineTotals::default(),
            skipped: 0,
            cancel: None,
        }
    }

    /// Stop at the next record once `flag` is set
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn totals(&self) -> BaselineTotals {
        self.totals
    }

    /// Whether genotypes are decoded at all; false when nothing needs them
    pub fn decodes_genotypes(&self) -> bool {
        self.decode_gt
    }

    /// Count one record toward every curve whose filter accepts it.
    ///
    /// # Panics
    ///
    /// If the synchronizer has already been drained or aborted.
    pub fn process(&mut self, record: &ClassifiedRecord) {
        assert!(
            matches!(self.state, SyncState::Idle | SyncState::Streaming),
            "EvalSynchronizer::process called in state {:?}",
            self.state
        );
        self.state = SyncState::Streaming;

        let classification = record.classification();
        match classification {
            Classification::TruePositive => self.totals.true_positives += 1,
            Classification::FalsePositive => self.totals.false_positives += 1,
            Classification::FalseNegative => self.totals.false_negatives += 1,
            Classification::NotAssessed => {
                self.skipped += 1;
                return;
            }
        }

        let gt = if self.decode_gt { record.genotype() } else { None };
        let extractor = &self.extractor;
        let mut score = None;

        for slot in &mut self.slots {
            if !slot.filter.accept(record, gt.as_ref()) {
                continue;
            }
            let score = *score.get_or_insert_with(|| extractor.extract(record, gt.as_ref()));
            slot.accumulator.add(score, classification);
            if matches!(
                classification,
                Classification::TruePositive | Classification::FalseNegative
            ) {
                slot.accumulator.add_baseline_total(1);
            }
        }
    }

    /// Process every record of `stream` in order.
    ///
    /// A stream error or cancellation discards all accumulated counts and
    /// leaves the synchronizer `Done`.
    pub fn run<S: ClassificationStream>(&mut self, mut stream: S) -> VrocResult<()> {
        assert!(
            matches!(self.state, SyncState::Idle | SyncState::Streaming),
            "EvalSynchronizer::run called in state {:?}",
            self.state
        );
        loop {
            if self.is_cancelled() {
                log::warn!("Evaluation cancelled; discarding partial curves");
                self.abort();
                return Err(VrocError::Cancelled);
            }

            match stream.next() {
                Some(Ok(record)) => self.process(&record),
                Some(Err(e)) => {
                    self.abort();
                    return Err(e);
                }
                None => return Ok(()),
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Throw away all accumulated state without producing curves
    pub fn abort(&mut self) {
        for slot in &mut self.slots {
            slot.accumulator = RocAccumulator::new();
        }
        self.totals = BaselineTotals::default();
        self.state = SyncState::Done;
    }

    /// Finalise every accumulator.
    ///
    /// # Panics
    ///
    /// If called twice or after an abort.
    pub fn drain(&mut self) -> RawEvaluation {
        assert!(
            matches!(self.state, SyncState::Idle | SyncState::Streaming),
            "EvalSynchronizer::drain called in state {:?}",
            self.state
        );
        self.state = SyncState::Draining;

        log::info!(
            "Assessed records: {} TP, {} FP, {} FN ({} not assessed)",
            self.totals.true_positives,
            self.totals.false_positives,
            self.totals.false_negatives,
            self.skipped
        );

        let curves = self
            .slots
            .iter_mut()
            .map(|slot| {
                let curve = slot.accumulator.finalize().clone();
                log::debug!(
                    "Curve '{}': {} points, {} unscored, baseline {}",
                    slot.filter.name(),
                    curve.points().len(),
                    curve.unscored().total(),
                    curve.baseline_total()
                );
                RawCurve {
                    name: slot.filter.name().to_string(),
                    rescale: slot.rescale,
                    curve,
                }
            })
            .collect();

        self.state = SyncState::Done;

        RawEvaluation {
            totals: self.totals,
            curves,
        }
    }
}

/// Group records by contig, then spread the contigs over at most `num_shards`
/// shards. Record order within a contig is preserved.
pub fn shard_by_contig(records: Vec<ClassifiedRecord>, num_shards: usize) -> Vec<Vec<ClassifiedRecord>> {
    let mut contigs: Vec<Vec<ClassifiedRecord>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let i = *index.entry(record.chrom().to_string()).or_insert_with(|| {
            contigs.push(Vec::new());
            contigs.len() - 1
        });
        contigs[i].push(record);
    }

    chunk_work(contigs, num_shards)
        .into_iter()
        .map(|group| group.into_iter().flatten().collect())
        .collect()
}

/// Evaluate shards in parallel and merge their raw curves.
///
/// `filters` must already be bound to the header.
pub fn evaluate_sharded(
    shards: Vec<Vec<ClassifiedRecord>>,
    filters: &[RocFilter],
    extractor: &ScoreExtractor,
    rescale_default: Option<bool>,
    cancel: Option<Arc<AtomicBool>>,
) -> VrocResult<RawEvaluation> {
    log::info!("Evaluating {} shards in parallel", shards.len());

    let results: VrocResult<Vec<RawEvaluation>> = shards
        .into_par_iter()
        .map(|shard| {
            let mut sync = EvalSynchronizer::new(filters.to_vec(), extractor.clone(), rescale_default);
            if let Some(flag) = &cancel {
                sync = sync.with_cancellation(Arc::clone(flag));
            }
            sync.run(shard.into_iter().map(Ok))?;
            Ok(sync.drain())
        })
        .collect();

    let mut results = results?.into_iter();
    let first = results
        .next()
        .ok_or_else(|| VrocError::ShardMismatch("no shards to evaluate".to_string()))?;
    results.try_fold(first, RawEvaluation::merge)
}
