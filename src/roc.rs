//! ROC point accumulation and finalised curves

use crate::record::Classification;
use std::collections::HashMap;

/// Counts recorded at one distinct score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RocPoint {
    pub score: f64,
    pub true_positives: u64,
    pub false_positives: u64,
}

/// Records that were counted but carried no usable score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Unscored {
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
}

impl Unscored {
    pub fn total(&self) -> u64 {
        self.true_positives + self.false_positives + self.false_negatives
    }

    fn merge(self, other: Unscored) -> Unscored {
        Unscored {
            true_positives: self.true_positives + other.true_positives,
            false_positives: self.false_positives + other.false_positives,
            false_negatives: self.false_negatives + other.false_negatives,
        }
    }
}

// -0.0 and 0.0 share a bucket
fn normalize(score: f64) -> f64 {
    if score == 0.0 {
        0.0
    } else {
        score
    }
}

fn score_key(score: f64) -> u64 {
    normalize(score).to_bits()
}

/// Sort points by descending score and sum those sharing a score.
///
/// The result depends only on the multiset of input points, so merging
/// shards in any order or grouping gives the same curve.
pub fn coalesce<I: IntoIterator<Item = RocPoint>>(points: I) -> Vec<RocPoint> {
    let mut points: Vec<RocPoint> = points
        .into_iter()
        .map(|p| RocPoint {
            score: normalize(p.score),
            ..p
        })
        .collect();
    points.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut coalesced: Vec<RocPoint> = Vec::with_capacity(points.len());
    for point in points {
        match coalesced.last_mut() {
            Some(last) if score_key(last.score) == score_key(point.score) => {
                last.true_positives += point.true_positives;
                last.false_positives += point.false_positives;
            }
            _ => coalesced.push(point),
        }
    }
    coalesced
}

/// One output row: cumulative counts down to `score`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveRow {
    /// `None` for the trailing row that also includes unscored records
    pub score: Option<f64>,
    pub true_positives: f64,
    pub false_positives: f64,
    pub false_negatives: f64,
    pub precision: Option<f64>,
    pub sensitivity: Option<f64>,
    pub f_measure: Option<f64>,
}

/// Finalised curve for one filter, sorted by descending score.
///
/// Point counts are raw; `tp_scale` is applied when rows are produced, so the
/// raw counts stay available for merging and rescaling.
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    points: Vec<RocPoint>,
    unscored: Unscored,
    baseline_total: u64,
    tp_scale: f64,
}

impl RocCurve {
    pub fn from_points<I: IntoIterator<Item = RocPoint>>(
        points: I,
        unscored: Unscored,
        baseline_total: u64,
    ) -> Self {
        Self {
            points: coalesce(points),
            unscored,
            baseline_total,
            tp_scale: 1.0,
        }
    }

    pub fn points(&self) -> &[RocPoint] {
        &self.points
    }

    pub fn unscored(&self) -> Unscored {
        self.unscored
    }

    /// Baseline variants seen by this curve (TP + FN)
    pub fn baseline_total(&self) -> u64 {
        self.baseline_total
    }

    pub fn tp_scale(&self) -> f64 {
        self.tp_scale
    }

    pub fn raw_true_positives(&self) -> u64 {
        self.points.iter().map(|p| p.true_positives).sum::<u64>() + self.unscored.true_positives
    }

    pub fn raw_false_positives(&self) -> u64 {
        self.points.iter().map(|p| p.false_positives).sum::<u64>() + self.unscored.false_positives
    }

    /// Same curve with true positive counts multiplied by `factor`
    pub fn rescaled(&self, factor: f64) -> RocCurve {
        RocCurve {
            tp_scale: factor,
            ..self.clone()
        }
    }

    /// Combine two raw curves from disjoint record sets
    pub fn merge(self, other: RocCurve) -> RocCurve {
        debug_assert_eq!(self.tp_scale, other.tp_scale, "merging curves with different scales");
        RocCurve {
            points: coalesce(self.points.into_iter().chain(other.points)),
            unscored: self.unscored.merge(other.unscored),
            baseline_total: self.baseline_total + other.baseline_total,
            tp_scale: self.tp_scale,
        }
    }

    /// Cumulative rows from highest to lowest score, followed by a `None` row
    /// when unscored records exist.
    pub fn rows(&self) -> Vec<CurveRow> {
        let mut rows = Vec::with_capacity(self.points.len() + 1);
        let (mut tp, mut fp) = (0u64, 0u64);

        for point in &self.points {
            tp += point.true_positives;
            fp += point.false_positives;
            rows.push(self.row(Some(point.score), tp, fp));
        }

        if self.unscored.total() > 0 {
            tp += self.unscored.true_positives;
            fp += self.unscored.false_positives;
            rows.push(self.row(None, tp, fp));
        }

        rows
    }

    // Rates come from raw counts; only the displayed counts are scaled.
    fn row(&self, score: Option<f64>, tp: u64, fp: u64) -> CurveRow {
        let precision = if tp + fp > 0 {
            Some(tp as f64 / (tp + fp) as f64)
        } else {
            None
        };
        let sensitivity = if self.baseline_total > 0 {
            Some(tp as f64 / self.baseline_total as f64)
        } else {
            None
        };
        let f_measure = match (precision, sensitivity) {
            (Some(p), Some(s)) if p + s > 0.0 => Some(2.0 * p * s / (p + s)),
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };

        CurveRow {
            score,
            true_positives: tp as f64 * self.tp_scale,
            false_positives: fp as f64,
            false_negatives: self.baseline_total.saturating_sub(tp) as f64 * self.tp_scale,
            precision,
            sensitivity,
            f_measure,
        }
    }
}

/// Running counts for one curve, keyed by score
#[derive(Debug, Default)]
pub struct RocAccumulator {
    points: HashMap<u64, RocPoint>,
    unscored: Unscored,
    baseline_total: u64,
    curve: Option<RocCurve>,
}

impl RocAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one record at `score`.
    ///
    /// TP and FP records with a score become curve points. Records without a
    /// score go to the unscored tally. Scored FNs add nothing here; they only
    /// reach the curve through [`add_baseline_total`](Self::add_baseline_total).
    ///
    /// # Panics
    ///
    /// If the accumulator has already been finalised.
    pub fn add(&mut self, score: Option<f64>, classification: Classification) {
        assert!(self.curve.is_none(), "RocAccumulator::add called after finalize");

        match score.filter(|s| !s.is_nan()) {
            Some(score) => {
                let (tp, fp) = match classification {
                    Classification::TruePositive => (1, 0),
                    Classification::FalsePositive => (0, 1),
                    Classification::FalseNegative | Classification::NotAssessed => return,
                };
                let point = self.points.entry(score_key(score)).or_insert(RocPoint {
                    score: normalize(score),
                    true_positives: 0,
                    false_positives: 0,
                });
                point.true_positives += tp;
                point.false_positives += fp;
            }
            None => match classification {
                Classification::TruePositive => self.unscored.true_positives += 1,
                Classification::FalsePositive => self.unscored.false_positives += 1,
                Classification::FalseNegative => self.unscored.false_negatives += 1,
                Classification::NotAssessed => {}
            },
        }
    }

    /// # Panics
    ///
    /// If the accumulator has already been finalised.
    pub fn add_baseline_total(&mut self, n: u64) {
        assert!(
            self.curve.is_none(),
            "RocAccumulator::add_baseline_total called after finalize"
        );
        self.baseline_total += n;
    }

    /// Sort and coalesce the accumulated points. Later calls return the same curve.
    pub fn finalize(&mut self) -> &RocCurve {
        let unscored = self.unscored;
        let baseline_total = self.baseline_total;
        let points = &mut self.points;
        self.curve.get_or_insert_with(|| {
            RocCurve::from_points(std::mem::take(points).into_values(), unscored, baseline_total)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(score: f64, tp: u64, fp: u64) -> RocPoint {
        RocPoint {
            score,
            true_positives: tp,
            false_positives: fp,
        }
    }

    #[test]
    fn test_coalesce_sorts_and_merges() {
        let points = coalesce(vec![
            point(10.0, 1, 0),
            point(30.0, 0, 1),
            point(10.0, 2, 1),
            point(20.0, 1, 0),
            point(-0.0, 1, 0),
            point(0.0, 0, 1),
        ]);

        let scores: Vec<f64> = points.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![30.0, 20.0, 10.0, 0.0]);
        assert_eq!(points[2], point(10.0, 3, 1));
        assert_eq!(points[3], point(0.0, 1, 1));
    }

    #[test]
    fn test_coalesce_order_independent() {
        let a = vec![point(5.0, 1, 0), point(3.0, 0, 2), point(5.0, 0, 1)];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(coalesce(a), coalesce(b));
    }

    #[test]
    fn test_accumulator_finalize_is_idempotent() {
        let mut acc = RocAccumulator::new();
        for (score, class) in [
            (Some(9.0), Classification::TruePositive),
            (Some(7.5), Classification::FalsePositive),
            (Some(9.0), Classification::FalsePositive),
            (None, Classification::TruePositive),
        ] {
            acc.add(score, class);
        }
        acc.add_baseline_total(3);

        let first = acc.finalize().clone();
        let second = acc.finalize().clone();
        assert!(acc.curve.is_some());
        assert_eq!(first, second);
        assert_eq!(first.points().len(), 2);
        assert_eq!(first.raw_true_positives(), 2);
        assert_eq!(first.raw_false_positives(), 2);
    }

    #[test]
    #[should_panic(expected = "after finalize")]
    fn test_add_after_finalize_panics() {
        let mut acc = RocAccumulator::new();
        acc.finalize();
        acc.add(Some(1.0), Classification::TruePositive);
    }

    #[test]
    fn test_unscored_and_false_negatives() {
        let mut acc = RocAccumulator::new();
        acc.add(Some(4.0), Classification::FalseNegative);
        acc.add(None, Classification::FalseNegative);
        acc.add(None, Classification::FalsePositive);
        acc.add(Some(f64::NAN), Classification::TruePositive);

        let curve = acc.finalize();
        assert!(curve.points().is_empty());
        assert_eq!(
            curve.unscored(),
            Unscored {
                true_positives: 1,
                false_positives: 1,
                false_negatives: 1
            }
        );
    }

    #[test]
    fn test_rows_are_cumulative_and_monotonic() {
        let curve = RocCurve::from_points(
            vec![point(1.0, 2, 1), point(3.0, 1, 0), point(2.0, 0, 2), point(3.0, 1, 1)],
            Unscored {
                true_positives: 1,
                false_positives: 0,
                false_negatives: 0,
            },
            6,
        );
        let rows = curve.rows();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].score, Some(3.0));
        assert_eq!(rows[0].true_positives, 2.0);
        assert_eq!(rows[0].false_positives, 1.0);
        assert_eq!(rows[2].true_positives, 4.0);
        assert_eq!(rows[2].false_positives, 4.0);
        assert_eq!(rows[3].score, None);
        assert_eq!(rows[3].true_positives, 5.0);
        assert_eq!(rows[3].false_negatives, 1.0);

        for pair in rows.windows(2) {
            assert!(pair[1].true_positives >= pair[0].true_positives);
            assert!(pair[1].false_positives >= pair[0].false_positives);
        }

        let last = rows[3];
        assert!((last.precision.unwrap() - 5.0 / 9.0).abs() < 1e-12);
        assert!((last.sensitivity.unwrap() - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_rates_without_counts() {
        let curve = RocCurve::from_points(vec![point(2.0, 0, 3)], Unscored::default(), 0);
        let row = curve.rows()[0];
        assert_eq!(row.precision, Some(0.0));
        assert_eq!(row.sensitivity, None);
        assert_eq!(row.f_measure, None);
    }

    #[test]
    fn test_rescale_multiplies_true_positives() {
        let curve = RocCurve::from_points(
            vec![point(9.0, 20, 2), point(5.0, 30, 8)],
            Unscored::default(),
            60,
        );
        assert_eq!(curve.raw_true_positives(), 50);

        let scaled = curve.rescaled(100.0 / 50.0);
        let raw_rows = curve.rows();
        let scaled_rows = scaled.rows();
        for (raw, scaled) in raw_rows.iter().zip(&scaled_rows) {
            assert_eq!(scaled.true_positives, raw.true_positives * 2.0);
            assert_eq!(scaled.false_positives, raw.false_positives);
            assert_eq!(scaled.sensitivity, raw.sensitivity);
        }
        assert_eq!(scaled.raw_true_positives(), 50);
    }

    #[test]
    fn test_merge_is_commutative_and_associative() {
        let a = RocCurve::from_points(vec![point(3.0, 1, 0), point(1.0, 0, 1)], Unscored::default(), 2);
        let b = RocCurve::from_points(
            vec![point(3.0, 0, 1)],
            Unscored {
                true_positives: 1,
                false_positives: 0,
                false_negatives: 1,
            },
            3,
        );
        let c = RocCurve::from_points(vec![point(2.0, 4, 0), point(1.0, 1, 1)], Unscored::default(), 5);

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = c.clone().merge(b.clone().merge(a.clone()));
        assert_eq!(left, right);
        assert_eq!(left.baseline_total(), 10);
        assert_eq!(left.points().len(), 3);
        assert_eq!(left.points()[0], point(3.0, 1, 1));
    }
}
