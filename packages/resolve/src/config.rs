//! Run configuration.
//!
//! Read from `tract_match.toml` at the project root (or the file named
//! by `TRACT_MATCH_CONFIG`). Every key is optional; a missing file
//! means "all defaults, no partitions".
//!
//! ```toml
//! partitions = ["TX", "DC"]
//!
//! [resolve]
//! batch_size = 5000
//!
//! [matcher]
//! k = 1
//! seed = 7
//!
//! [training]
//! retrain = true
//!
//! [geocoder]
//! max_attempts = 5
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tract_match_classifier::TrainingOptions;
use tract_match_geocoder::service_registry::ServiceOverrides;
use tract_match_geography_models::{Partition, UnknownPartitionError};
use tract_match_spatial::DEFAULT_INDEX_CAP;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TRACT_MATCH_CONFIG";

/// Config file name looked up at the project root.
pub const CONFIG_FILE_NAME: &str = "tract_match.toml";

/// Largest supported number of neighbour distances per feature vector.
pub const MAX_K: usize = 8;

/// Errors from loading or validating a [`RunConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`RunConfig`].
    #[error("Invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// A partition key is not a state abbreviation.
    #[error(transparent)]
    UnknownPartition(#[from] UnknownPartitionError),

    /// A value is out of range.
    #[error("Invalid config value: {message}")]
    Invalid {
        /// What is wrong.
        message: String,
    },
}

/// Batch loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolveConfig {
    /// Unresolved points fetched (and committed) per batch.
    pub batch_size: usize,
    /// Full passes over a partition's unresolved points.
    pub max_passes: u32,
    /// Rebuild the neighbour index before every batch so points resolved
    /// in earlier batches can serve as neighbours.
    pub rebuild_index_per_batch: bool,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            batch_size: 5_000,
            max_passes: 1,
            rebuild_index_per_batch: true,
        }
    }
}

/// Nearest-neighbour matcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatcherConfig {
    /// Neighbour distances per query (and per training pair).
    pub k: usize,
    /// Maximum resolved points loaded into the index.
    pub index_cap: usize,
    /// Seed for subsampling. `None` draws a fresh seed each build.
    pub seed: Option<u64>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            k: 1,
            index_cap: DEFAULT_INDEX_CAP,
            seed: None,
        }
    }
}

/// Confidence model training settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Cap on leave-one-out samples.
    pub max_samples: usize,
    /// Fraction of samples held out for validation.
    pub holdout_ratio: f64,
    /// Seed for sampling and splitting.
    pub seed: u64,
    /// Retrain even when a model artifact already exists.
    pub retrain: bool,
    /// Acceptance threshold on the match probability.
    pub threshold: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let defaults = TrainingOptions::default();
        Self {
            max_samples: defaults.max_samples,
            holdout_ratio: defaults.holdout_ratio,
            seed: defaults.seed,
            retrain: false,
            threshold: defaults.threshold,
        }
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// State abbreviations to process, in order.
    pub partitions: Vec<String>,
    /// Batch loop settings.
    pub resolve: ResolveConfig,
    /// Matcher settings.
    pub matcher: MatcherConfig,
    /// Training settings.
    pub training: TrainingConfig,
    /// Overrides applied on top of the embedded census service config.
    pub geocoder: ServiceOverrides,
}

impl RunConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or a value is out
    /// of range.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::de::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config at `path`, or the defaults if there is no file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file can't be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                log::info!("Loading run config from {}", path.display());
                Self::from_toml_str(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No run config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Checks value ranges and partition keys.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for the first invalid value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if self.resolve.batch_size == 0 {
            return invalid("resolve.batch_size must be at least 1".to_string());
        }
        if self.resolve.max_passes == 0 {
            return invalid("resolve.max_passes must be at least 1".to_string());
        }
        if !(1..=MAX_K).contains(&self.matcher.k) {
            return invalid(format!(
                "matcher.k must be in 1..={MAX_K}, got {}",
                self.matcher.k
            ));
        }
        if self.matcher.index_cap == 0 {
            return invalid("matcher.index_cap must be at least 1".to_string());
        }
        if !(self.training.holdout_ratio > 0.0 && self.training.holdout_ratio < 1.0) {
            return invalid(format!(
                "training.holdout_ratio must be in (0, 1), got {}",
                self.training.holdout_ratio
            ));
        }
        if !(0.0..=1.0).contains(&self.training.threshold) {
            return invalid(format!(
                "training.threshold must be in [0, 1], got {}",
                self.training.threshold
            ));
        }
        self.partitions()?;
        Ok(())
    }

    /// Resolves the configured partition keys.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPartition`] for a key that is not a
    /// state abbreviation.
    pub fn partitions(&self) -> Result<Vec<Partition>, ConfigError> {
        Ok(self
            .partitions
            .iter()
            .map(|key| Partition::from_abbr(key))
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Training knobs for the classifier crate.
    #[must_use]
    pub const fn training_options(&self) -> TrainingOptions {
        TrainingOptions {
            k: self.matcher.k,
            max_samples: self.training.max_samples,
            holdout_ratio: self.training.holdout_ratio,
            seed: self.training.seed,
            threshold: self.training.threshold,
        }
    }
}

/// Returns the config file path (`$TRACT_MATCH_CONFIG` or
/// `<root>/tract_match.toml`).
#[must_use]
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map_or_else(
            || tract_match_database::paths::project_root().join(CONFIG_FILE_NAME),
            PathBuf::from,
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = RunConfig::from_toml_str("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.resolve.batch_size, 5_000);
        assert_eq!(config.resolve.max_passes, 1);
        assert!(config.resolve.rebuild_index_per_batch);
        assert_eq!(config.matcher.k, 1);
        assert_eq!(config.matcher.index_cap, 200_000);
        assert_eq!(config.matcher.seed, None);
        assert_eq!(config.training.max_samples, 10_000);
        assert!((config.training.holdout_ratio - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.training.seed, 123);
        assert!(!config.training.retrain);
    }

    #[test]
    fn parses_full_document() {
        let config = RunConfig::from_toml_str(
            r#"
            partitions = ["tx", "DC"]

            [resolve]
            batch_size = 100
            max_passes = 3

            [matcher]
            k = 3
            seed = 7

            [training]
            retrain = true
            threshold = 0.8

            [geocoder]
            max_attempts = 4
            "#,
        )
        .unwrap();

        let keys: Vec<_> = config.partitions().unwrap().iter().map(Partition::key).collect();
        assert_eq!(keys, ["TX", "DC"]);
        assert_eq!(config.resolve.batch_size, 100);
        assert_eq!(config.resolve.max_passes, 3);
        assert_eq!(config.matcher.seed, Some(7));
        assert_eq!(config.geocoder.max_attempts, Some(4));

        let options = config.training_options();
        assert_eq!(options.k, 3);
        assert!((options.threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_out_of_range_values() {
        for doc in [
            "[resolve]\nbatch_size = 0",
            "[resolve]\nmax_passes = 0",
            "[matcher]\nk = 0",
            "[matcher]\nk = 9",
            "[matcher]\nindex_cap = 0",
            "[training]\nholdout_ratio = 1.0",
            "[training]\nthreshold = 1.5",
        ] {
            assert!(
                matches!(
                    RunConfig::from_toml_str(doc),
                    Err(ConfigError::Invalid { .. })
                ),
                "{doc}"
            );
        }
        assert!(matches!(
            RunConfig::from_toml_str("partitions = [\"XX\"]"),
            Err(ConfigError::UnknownPartition(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str("[matcher]\nkk = 2"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn missing_file_means_defaults() {
        let path = std::env::temp_dir().join("tract_match_no_such_config.toml");
        assert_eq!(RunConfig::load(&path).unwrap(), RunConfig::default());
    }
}
