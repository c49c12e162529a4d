//! Versioned, per-partition confidence model artifact.
//!
//! Stored as pretty-printed JSON so a model can be inspected by hand and
//! loaded by any later build that understands its `formatVersion`.

use std::path::Path;

use chrono::{DateTime, Utc};
use rand::{SeedableRng as _, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tract_match_spatial::NeighborIndex;

use crate::{
    ClassifierError,
    logistic::LogisticRegression,
    training::{self, ValidationReport},
};

/// Artifact schema version written by this build.
pub const FORMAT_VERSION: u32 = 1;

/// Default acceptance threshold on the match probability.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Knobs for [`ConfidenceModel::train`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingOptions {
    /// Number of neighbour distances per feature vector.
    pub k: usize,
    /// Cap on leave-one-out samples.
    pub max_samples: usize,
    /// Fraction of pairs held out for validation.
    pub holdout_ratio: f64,
    /// Seed for sampling and splitting.
    pub seed: u64,
    /// Acceptance threshold stored in the artifact.
    pub threshold: f64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            k: 1,
            max_samples: training::DEFAULT_MAX_SAMPLES,
            holdout_ratio: training::DEFAULT_HOLDOUT_RATIO,
            seed: training::DEFAULT_SEED,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// A trained accept/reject model for one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceModel {
    /// Schema version, see [`FORMAT_VERSION`].
    pub format_version: u32,
    /// Partition key the model was trained for.
    pub partition: String,
    /// Neighbour distances per feature vector.
    pub k: usize,
    /// Minimum match probability for accepting a candidate.
    pub threshold: f64,
    /// Fitted parameters.
    pub regression: LogisticRegression,
    /// Holdout metrics from training, if trained here.
    pub validation: Option<ValidationReport>,
    /// When the model was trained.
    pub trained_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionHeader {
    format_version: u32,
}

impl ConfidenceModel {
    /// Builds a model directly from raw (unstandardised) parameters.
    /// `k` is the number of weights.
    #[must_use]
    pub fn from_parameters(partition: &str, weights: Vec<f64>, bias: f64, threshold: f64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            partition: partition.to_string(),
            k: weights.len(),
            threshold,
            regression: LogisticRegression::from_raw(weights, bias),
            validation: None,
            trained_at: None,
        }
    }

    /// Trains a model from leave-one-out pairs drawn from `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError`] if too few pairs can be drawn, the
    /// training split holds a single class, or the options are invalid.
    pub fn train(
        index: &NeighborIndex,
        partition: &str,
        options: &TrainingOptions,
    ) -> Result<Self, ClassifierError> {
        if !(0.0..=1.0).contains(&options.threshold) {
            return Err(ClassifierError::Degenerate {
                message: format!("threshold {} is not in [0, 1]", options.threshold),
            });
        }

        let mut rng = StdRng::seed_from_u64(options.seed);
        let pairs = training::leave_one_out_pairs(index, options.k, options.max_samples, &mut rng);
        log::info!(
            "[{partition}] Drew {} leave-one-out pairs (k={}) from {} indexed points",
            pairs.len(),
            options.k,
            index.len()
        );

        let (regression, report) =
            training::fit_and_validate(pairs, options.holdout_ratio, options.threshold, &mut rng)?;
        log::info!(
            "[{partition}] Holdout precision {:.4} (TP={} FP={} TN={} FN={}, train={} holdout={})",
            report.precision,
            report.true_positives,
            report.false_positives,
            report.true_negatives,
            report.false_negatives,
            report.train_size,
            report.holdout_size,
        );

        Ok(Self {
            format_version: FORMAT_VERSION,
            partition: partition.to_string(),
            k: options.k,
            threshold: options.threshold,
            regression,
            validation: Some(report),
            trained_at: Some(Utc::now()),
        })
    }

    /// Replaces the acceptance threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Probability that the nearest neighbour's tract is correct, given
    /// the `k` ascending neighbour distances.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::FeatureMismatch`] if `distances.len() != k`.
    pub fn predict_proba(&self, distances: &[f64]) -> Result<f64, ClassifierError> {
        self.regression.predict_proba(distances)
    }

    /// Whether to accept the nearest neighbour's tract.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::FeatureMismatch`] if `distances.len() != k`.
    pub fn predict(&self, distances: &[f64]) -> Result<bool, ClassifierError> {
        Ok(self.predict_proba(distances)? >= self.threshold)
    }

    /// Serialises the model to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::Json`] if serialisation fails.
    pub fn to_json(&self) -> Result<String, ClassifierError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses and validates a model from JSON.
    ///
    /// # Errors
    ///
    /// * [`ClassifierError::UnsupportedVersion`] if written by an incompatible build
    /// * [`ClassifierError::Json`] if the document is malformed
    /// * [`ClassifierError::FeatureMismatch`] / [`ClassifierError::Degenerate`]
    ///   if the parameters are inconsistent
    pub fn from_json(json: &str) -> Result<Self, ClassifierError> {
        let header: VersionHeader = serde_json::from_str(json)?;
        if header.format_version != FORMAT_VERSION {
            return Err(ClassifierError::UnsupportedVersion {
                found: header.format_version,
                supported: FORMAT_VERSION,
            });
        }

        let model: Self = serde_json::from_str(json)?;
        if model.regression.dims() != model.k {
            return Err(ClassifierError::FeatureMismatch {
                expected: model.k,
                actual: model.regression.dims(),
            });
        }
        if !model.regression.is_consistent() || !(0.0..=1.0).contains(&model.threshold) {
            return Err(ClassifierError::Degenerate {
                message: "model parameters are inconsistent".to_string(),
            });
        }
        Ok(model)
    }

    /// Writes the model to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError`] on I/O or serialisation failure.
    pub fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved confidence model for {} to {}", self.partition, path.display());
        Ok(())
    }

    /// Reads a model from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError`] if the file cannot be read or fails
    /// [`Self::from_json`] validation.
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let json = std::fs::read_to_string(path)?;
        let model = Self::from_json(&json)?;
        log::debug!(
            "Loaded confidence model for {} (k={}) from {}",
            model.partition,
            model.k,
            path.display()
        );
        Ok(model)
    }
}
