#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Confidence classifier for nearest-neighbour tract matches.
//!
//! Decides from the distances to the `k` nearest resolved points
//! whether the nearest one's tract can be taken as-is, or whether the
//! point has to go to the authoritative geocoder. One model is trained
//! per partition because point density varies too much between states
//! for a single distance cut-off.

pub mod artifact;
pub mod logistic;
pub mod training;

use thiserror::Error;

pub use artifact::{ConfidenceModel, FORMAT_VERSION, TrainingOptions};
pub use training::ValidationReport;

/// A labelled training example: neighbour distances and whether the
/// nearest neighbour's tract was the right one.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPair {
    /// Ascending distances to the `k` nearest other resolved points.
    pub features: Vec<f64>,
    /// Whether the nearest neighbour shares the point's tract.
    pub is_match: bool,
}

/// Errors from training, evaluating, or persisting a model.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Not enough training pairs to fit and validate.
    #[error("Not enough training pairs")]
    EmptyTrainingSet,

    /// A feature vector had the wrong length.
    #[error("Expected {expected} feature(s), got {actual}")]
    FeatureMismatch {
        /// Features the model expects.
        expected: usize,
        /// Features supplied.
        actual: usize,
    },

    /// The artifact was written with an incompatible schema.
    #[error("Unsupported model format version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the artifact.
        found: u32,
        /// Version this build reads and writes.
        supported: u32,
    },

    /// Model file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Model (de)serialisation failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Training data or parameters can't produce a usable model.
    #[error("Degenerate model: {message}")]
    Degenerate {
        /// What is wrong.
        message: String,
    },
}
