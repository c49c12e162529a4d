//! Leave-one-out training data, holdout split, and precision.
//!
//! Each training pair comes from a resolved point: its `k` nearest
//! *other* resolved points give the distance features, and the label is
//! whether the nearest of them lies in the same tract. A fraction of
//! the pairs is held out and scored by precision, since accepting a
//! mismatched tract is the expensive mistake.

use rand::{Rng, seq::SliceRandom as _};
use serde::{Deserialize, Serialize};
use tract_match_spatial::NeighborIndex;

use crate::{ClassifierError, TrainingPair, logistic::LogisticRegression};

/// Default cap on leave-one-out samples drawn per partition.
pub const DEFAULT_MAX_SAMPLES: usize = 10_000;

/// Default fraction of pairs held out for validation.
pub const DEFAULT_HOLDOUT_RATIO: f64 = 0.75;

/// Default seed for sampling and splitting.
pub const DEFAULT_SEED: u64 = 123;

/// Draws up to `max_samples` indexed points uniformly and turns each
/// into a leave-one-out [`TrainingPair`].
///
/// Points with fewer than `k` other indexed points around them are
/// skipped.
pub fn leave_one_out_pairs<R: Rng + ?Sized>(
    index: &NeighborIndex,
    k: usize,
    max_samples: usize,
    rng: &mut R,
) -> Vec<TrainingPair> {
    let amount = max_samples.min(index.len());
    let mut slots = rand::seq::index::sample(rng, index.len(), amount).into_vec();
    slots.sort_unstable();

    slots
        .into_iter()
        .filter_map(|slot| {
            let neighbors = index.query_excluding(slot, k)?;
            let own = index.region(slot)?;
            Some(TrainingPair {
                is_match: neighbors.region_id == *own,
                features: neighbors.distances,
            })
        })
        .collect()
}

/// Shuffles `pairs` and splits them into `(train, holdout)`.
///
/// The holdout gets `ceil(len * holdout_ratio)` pairs, clamped so that
/// both sides keep at least one pair.
///
/// # Errors
///
/// * [`ClassifierError::EmptyTrainingSet`] if fewer than two pairs are given
/// * [`ClassifierError::Degenerate`] if `holdout_ratio` is not in `(0, 1)`
pub fn split<R: Rng + ?Sized>(
    mut pairs: Vec<TrainingPair>,
    holdout_ratio: f64,
    rng: &mut R,
) -> Result<(Vec<TrainingPair>, Vec<TrainingPair>), ClassifierError> {
    if !(holdout_ratio > 0.0 && holdout_ratio < 1.0) {
        return Err(ClassifierError::Degenerate {
            message: format!("holdout ratio {holdout_ratio} is not in (0, 1)"),
        });
    }
    if pairs.len() < 2 {
        return Err(ClassifierError::EmptyTrainingSet);
    }

    pairs.shuffle(rng);

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let holdout_len =
        ((pairs.len() as f64 * holdout_ratio).ceil() as usize).clamp(1, pairs.len() - 1);
    let holdout = pairs.split_off(pairs.len() - holdout_len);
    Ok((pairs, holdout))
}

/// Confusion counts and precision on a holdout split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Pairs used for fitting.
    pub train_size: usize,
    /// Pairs held out for scoring.
    pub holdout_size: usize,
    /// Accepted and correct.
    pub true_positives: usize,
    /// Accepted but wrong tract.
    pub false_positives: usize,
    /// Rejected and would have been wrong.
    pub true_negatives: usize,
    /// Rejected but would have been correct.
    pub false_negatives: usize,
    /// `TP / (TP + FP)`, or 0.0 when nothing was accepted.
    pub precision: f64,
}

impl ValidationReport {
    /// Scores `accept` against the labels of `holdout`.
    ///
    /// # Errors
    ///
    /// Propagates any error from `accept`.
    pub fn score<F>(
        train_size: usize,
        holdout: &[TrainingPair],
        mut accept: F,
    ) -> Result<Self, ClassifierError>
    where
        F: FnMut(&[f64]) -> Result<bool, ClassifierError>,
    {
        let mut report = Self {
            train_size,
            holdout_size: holdout.len(),
            ..Self::default()
        };
        for pair in holdout {
            match (accept(&pair.features)?, pair.is_match) {
                (true, true) => report.true_positives += 1,
                (true, false) => report.false_positives += 1,
                (false, false) => report.true_negatives += 1,
                (false, true) => report.false_negatives += 1,
            }
        }
        report.precision = precision(report.true_positives, report.false_positives);
        Ok(report)
    }
}

/// `tp / (tp + fp)`, or 0.0 when there are no positive predictions.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn precision(true_positives: usize, false_positives: usize) -> f64 {
    let predicted = true_positives + false_positives;
    if predicted == 0 {
        return 0.0;
    }
    true_positives as f64 / predicted as f64
}

/// Fits on the training split and scores on the holdout.
///
/// # Errors
///
/// Returns [`ClassifierError`] if the split or the fit fails.
pub fn fit_and_validate<R: Rng + ?Sized>(
    pairs: Vec<TrainingPair>,
    holdout_ratio: f64,
    threshold: f64,
    rng: &mut R,
) -> Result<(LogisticRegression, ValidationReport), ClassifierError> {
    let (train, holdout) = split(pairs, holdout_ratio, rng)?;
    let regression = LogisticRegression::fit(&train)?;
    let report = ValidationReport::score(train.len(), &holdout, |features| {
        Ok(regression.predict_proba(features)? >= threshold)
    })?;
    Ok((regression, report))
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng as _, rngs::StdRng};
    use tract_match_geography_models::{ResolvedPoint, TractGeoid};

    use super::*;

    fn tract(geoid: &str) -> TractGeoid {
        TractGeoid::parse(geoid).unwrap()
    }

    /// Two dense clusters in different tracts plus a sparse fringe whose
    /// tracts alternate, so short distances match and long ones mostly
    /// don't.
    fn clustered() -> Vec<ResolvedPoint> {
        let mut points = Vec::new();
        for i in 0..200 {
            let (dx, dy) = (f64::from(i % 20) * 0.0005, f64::from(i / 20) * 0.0005);
            points.push(ResolvedPoint::new(-97.70 + dx, 30.20 + dy, tract("48453001100")));
            points.push(ResolvedPoint::new(-97.60 + dx, 30.20 + dy, tract("48453001200")));
        }
        for i in 0..60 {
            let t = if i % 2 == 0 { "48453001300" } else { "48453001400" };
            points.push(ResolvedPoint::new(-97.0 + f64::from(i) * 0.05, 31.0, tract(t)));
        }
        points
    }

    fn index(points: &[ResolvedPoint]) -> NeighborIndex {
        NeighborIndex::build(points, 200_000, &mut StdRng::seed_from_u64(DEFAULT_SEED)).unwrap()
    }

    #[test]
    fn leave_one_out_labels_follow_tracts() {
        let points = clustered();
        let index = index(&points);
        let pairs = leave_one_out_pairs(&index, 1, 10_000, &mut StdRng::seed_from_u64(1));

        assert_eq!(pairs.len(), points.len());
        // every cluster point's nearest neighbour is 0.0005 away, same tract
        let close: Vec<_> = pairs.iter().filter(|p| p.features[0] < 0.001).collect();
        assert_eq!(close.len(), 400);
        assert!(close.iter().all(|p| p.is_match));
        // fringe points are 0.05 apart and alternate tracts
        assert!(
            pairs
                .iter()
                .filter(|p| p.features[0] > 0.04)
                .all(|p| !p.is_match)
        );
    }

    #[test]
    fn sampling_respects_max_samples() {
        let index = index(&clustered());
        let pairs = leave_one_out_pairs(&index, 3, 50, &mut StdRng::seed_from_u64(1));
        assert_eq!(pairs.len(), 50);
        assert!(pairs.iter().all(|p| p.features.len() == 3));
    }

    #[test]
    fn holdout_takes_three_quarters() {
        let pairs: Vec<_> = (0..100)
            .map(|i| TrainingPair {
                features: vec![f64::from(i)],
                is_match: i % 2 == 0,
            })
            .collect();
        let (train, holdout) =
            split(pairs, DEFAULT_HOLDOUT_RATIO, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(train.len(), 25);
        assert_eq!(holdout.len(), 75);

        let tiny = vec![
            TrainingPair {
                features: vec![0.0],
                is_match: true,
            },
            TrainingPair {
                features: vec![1.0],
                is_match: false,
            },
        ];
        let (train, holdout) = split(tiny, 0.75, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!((train.len(), holdout.len()), (1, 1));

        assert!(split(Vec::new(), 0.75, &mut StdRng::seed_from_u64(1)).is_err());
        assert!(split(vec![], 1.0, &mut StdRng::seed_from_u64(1)).is_err());
    }

    #[test]
    fn precision_without_positive_predictions_is_zero() {
        assert!(precision(0, 0).abs() < f64::EPSILON);
        assert!((precision(3, 1) - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn score_counts_confusion_matrix() {
        let holdout = [
            TrainingPair {
                features: vec![0.1],
                is_match: true,
            },
            TrainingPair {
                features: vec![0.2],
                is_match: false,
            },
            TrainingPair {
                features: vec![5.0],
                is_match: false,
            },
            TrainingPair {
                features: vec![6.0],
                is_match: true,
            },
        ];
        let report = ValidationReport::score(10, &holdout, |f| Ok(f[0] < 1.0)).unwrap();
        assert_eq!(report.true_positives, 1);
        assert_eq!(report.false_positives, 1);
        assert_eq!(report.true_negatives, 1);
        assert_eq!(report.false_negatives, 1);
        assert!((report.precision - 0.5).abs() < f64::EPSILON);
        assert_eq!((report.train_size, report.holdout_size), (10, 4));
    }

    #[test]
    fn precision_is_reproducible_for_a_fixed_seed() {
        let index = index(&clustered());
        let run = || {
            let mut rng = StdRng::seed_from_u64(DEFAULT_SEED);
            let pairs = leave_one_out_pairs(&index, 1, DEFAULT_MAX_SAMPLES, &mut rng);
            fit_and_validate(pairs, DEFAULT_HOLDOUT_RATIO, 0.5, &mut rng).unwrap()
        };
        let (model_a, report_a) = run();
        let (model_b, report_b) = run();

        assert_eq!(model_a, model_b);
        assert_eq!(report_a, report_b);
        assert!(report_a.precision > 0.9);
    }
}
