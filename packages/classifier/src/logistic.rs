//! Binary logistic regression over standardised features.
//!
//! Fitted with full-batch gradient descent and an L2 penalty, starting
//! from zero weights, so the same training pairs always produce the
//! same parameters.

use serde::{Deserialize, Serialize};

use crate::{ClassifierError, TrainingPair};

/// Gradient-descent step size. Safe for up to 8 standardised features.
const LEARNING_RATE: f64 = 0.5;

/// Iteration cap for gradient descent.
const MAX_ITERATIONS: usize = 5_000;

/// Gradient-norm threshold at which gradient descent stops early.
const TOLERANCE: f64 = 1e-7;

/// Inverse regularisation strength (sklearn's `C`).
const L2_C: f64 = 1.0;

/// Features with a smaller spread than this are left unscaled.
const MIN_SCALE: f64 = 1e-12;

/// Fitted logistic regression parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogisticRegression {
    /// Per-feature training mean, subtracted before weighting.
    pub feature_mean: Vec<f64>,
    /// Per-feature training standard deviation, divided out before weighting.
    pub feature_scale: Vec<f64>,
    /// One weight per feature.
    pub weights: Vec<f64>,
    /// Intercept.
    pub bias: f64,
}

impl LogisticRegression {
    /// Builds a model from raw (unstandardised) weights.
    #[must_use]
    pub fn from_raw(weights: Vec<f64>, bias: f64) -> Self {
        Self {
            feature_mean: vec![0.0; weights.len()],
            feature_scale: vec![1.0; weights.len()],
            weights,
            bias,
        }
    }

    /// Fits a model to `pairs`.
    ///
    /// # Errors
    ///
    /// * [`ClassifierError::EmptyTrainingSet`] if `pairs` is empty
    /// * [`ClassifierError::FeatureMismatch`] if feature vectors differ in length
    /// * [`ClassifierError::Degenerate`] if only one class is present
    pub fn fit(pairs: &[TrainingPair]) -> Result<Self, ClassifierError> {
        let Some(first) = pairs.first() else {
            return Err(ClassifierError::EmptyTrainingSet);
        };
        let dims = first.features.len();
        if dims == 0 {
            return Err(ClassifierError::FeatureMismatch {
                expected: 1,
                actual: 0,
            });
        }
        if let Some(bad) = pairs.iter().find(|p| p.features.len() != dims) {
            return Err(ClassifierError::FeatureMismatch {
                expected: dims,
                actual: bad.features.len(),
            });
        }

        let positives = pairs.iter().filter(|p| p.is_match).count();
        if positives == 0 || positives == pairs.len() {
            return Err(ClassifierError::Degenerate {
                message: format!(
                    "training split has a single class ({positives} of {} pairs match)",
                    pairs.len()
                ),
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let n = pairs.len() as f64;

        let mut feature_mean = vec![0.0; dims];
        for p in pairs {
            for (m, x) in feature_mean.iter_mut().zip(&p.features) {
                *m += x / n;
            }
        }
        let mut feature_scale = vec![0.0; dims];
        for p in pairs {
            for ((s, m), x) in feature_scale.iter_mut().zip(&feature_mean).zip(&p.features) {
                *s += (x - m).powi(2) / n;
            }
        }
        for s in &mut feature_scale {
            *s = if s.sqrt() < MIN_SCALE { 1.0 } else { s.sqrt() };
        }

        let rows: Vec<(Vec<f64>, f64)> = pairs
            .iter()
            .map(|p| {
                let x = standardise(&p.features, &feature_mean, &feature_scale);
                (x, if p.is_match { 1.0 } else { 0.0 })
            })
            .collect();

        let mut weights = vec![0.0; dims];
        let mut bias = 0.0;
        let mut iterations = 0;
        for _ in 0..MAX_ITERATIONS {
            iterations += 1;
            let mut grad_w = vec![0.0; dims];
            let mut grad_b = 0.0;
            for (x, y) in &rows {
                let err = sigmoid(linear(&weights, bias, x)) - y;
                for (g, xi) in grad_w.iter_mut().zip(x) {
                    *g += err * xi;
                }
                grad_b += err;
            }
            for (g, w) in grad_w.iter_mut().zip(&weights) {
                *g = (*g + w / L2_C) / n;
            }
            grad_b /= n;

            let norm = grad_w.iter().map(|g| g * g).sum::<f64>() + grad_b * grad_b;
            if norm.sqrt() < TOLERANCE {
                break;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= LEARNING_RATE * g;
            }
            bias -= LEARNING_RATE * grad_b;
        }
        log::debug!("Logistic regression fitted in {iterations} iteration(s): w={weights:?} b={bias}");

        Ok(Self {
            feature_mean,
            feature_scale,
            weights,
            bias,
        })
    }

    /// Number of features the model expects.
    #[must_use]
    pub fn dims(&self) -> usize {
        self.weights.len()
    }

    /// Probability that the nearest neighbour's region is correct.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::FeatureMismatch`] if `features` has the
    /// wrong length.
    pub fn predict_proba(&self, features: &[f64]) -> Result<f64, ClassifierError> {
        if features.len() != self.dims() {
            return Err(ClassifierError::FeatureMismatch {
                expected: self.dims(),
                actual: features.len(),
            });
        }
        let x = standardise(features, &self.feature_mean, &self.feature_scale);
        Ok(sigmoid(linear(&self.weights, self.bias, &x)))
    }

    pub(crate) fn is_consistent(&self) -> bool {
        let dims = self.dims();
        dims > 0
            && self.feature_mean.len() == dims
            && self.feature_scale.len() == dims
            && self.feature_scale.iter().all(|s| *s > 0.0)
            && self
                .weights
                .iter()
                .chain(&self.feature_mean)
                .chain(&self.feature_scale)
                .chain(std::iter::once(&self.bias))
                .all(|v| v.is_finite())
    }
}

fn standardise(features: &[f64], mean: &[f64], scale: &[f64]) -> Vec<f64> {
    features
        .iter()
        .zip(mean)
        .zip(scale)
        .map(|((x, m), s)| (x - m) / s)
        .collect()
}

fn linear(weights: &[f64], bias: f64, x: &[f64]) -> f64 {
    weights.iter().zip(x).fold(bias, |acc, (w, xi)| w.mul_add(*xi, acc))
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
