//! Confidence models for the resolution loop.
//!
//! The loop asks a [`ModelSource`] for the partition's model. A partition
//! that starts cold has nothing to train on, so while no model is
//! available the loop asks again at every pass start, and at batch
//! boundaries once the resolved set has at least doubled since the last
//! attempt.

use std::path::{Path, PathBuf};

use rand::{SeedableRng as _, rngs::StdRng};
use tract_match_classifier::ConfidenceModel;
use tract_match_database::PointStore;
use tract_match_geography_models::Partition;
use tract_match_spatial::NeighborIndex;

use crate::{ResolveLoopError, RunConfig};

/// Supplies a partition's confidence model.
pub trait ModelSource {
    /// Returns the model, or `None` if there is none yet.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveLoopError`] if the model can't be loaded or
    /// trained. The loop treats this like `None` and asks again later.
    fn acquire(
        &mut self,
        store: &PointStore,
        partition: &Partition,
        config: &RunConfig,
    ) -> Result<Option<ConfidenceModel>, ResolveLoopError>;
}

/// A model decided up front. `FixedModel(None)` sends every point to the
/// geocoder.
#[derive(Debug, Clone)]
pub struct FixedModel(pub Option<ConfidenceModel>);

impl ModelSource for FixedModel {
    fn acquire(
        &mut self,
        _store: &PointStore,
        _partition: &Partition,
        _config: &RunConfig,
    ) -> Result<Option<ConfidenceModel>, ResolveLoopError> {
        Ok(self.0.clone())
    }
}

/// The model artifact on disk, trained and saved when missing.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    path: PathBuf,
}

impl ModelArtifact {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ModelSource for ModelArtifact {
    fn acquire(
        &mut self,
        store: &PointStore,
        partition: &Partition,
        config: &RunConfig,
    ) -> Result<Option<ConfidenceModel>, ResolveLoopError> {
        load_or_train_model(store, partition, config, &self.path).map(Some)
    }
}

/// The loop's current model plus when it last failed to get one.
pub(crate) struct ModelSlot<'s> {
    source: &'s mut dyn ModelSource,
    model: Option<ConfidenceModel>,
    /// Resolved count at the last attempt that produced no model.
    tried_at: Option<u64>,
}

impl<'s> ModelSlot<'s> {
    pub(crate) fn new(source: &'s mut dyn ModelSource) -> Self {
        Self {
            source,
            model: None,
            tried_at: None,
        }
    }

    pub(crate) const fn current(&self) -> Option<&ConfidenceModel> {
        self.model.as_ref()
    }

    /// Whether a missing model should be asked for again with `resolved`
    /// points now in the store.
    const fn due(&self, resolved: u64, pass_start: bool) -> bool {
        match self.tried_at {
            None => true,
            Some(last) => {
                resolved > last && (pass_start || resolved >= last.saturating_mul(2))
            }
        }
    }

    /// Asks the source for a model if none is loaded and an attempt is due.
    pub(crate) fn refresh(
        &mut self,
        store: &PointStore,
        partition: &Partition,
        config: &RunConfig,
        resolved: u64,
        pass_start: bool,
    ) {
        if self.model.is_some() || !self.due(resolved, pass_start) {
            return;
        }

        match self.source.acquire(store, partition, config) {
            Ok(Some(model)) => {
                match &model.validation {
                    Some(report) => log::info!(
                        "[{partition}] Using confidence model (k={}, precision {:.4} on {} \
                         holdout pair(s))",
                        model.k,
                        report.precision,
                        report.holdout_size
                    ),
                    None => log::info!("[{partition}] Using confidence model (k={})", model.k),
                }
                self.model = Some(model);
            }
            Ok(None) => {
                log::debug!("[{partition}] No confidence model at {resolved} resolved point(s)");
                self.tried_at = Some(resolved);
            }
            Err(e) => {
                log::warn!(
                    "[{partition}] No confidence model at {resolved} resolved point(s): {e}"
                );
                self.tried_at = Some(resolved);
            }
        }
    }
}

/// Builds the neighbour index from the partition's resolved points and
/// trains a confidence model on it.
///
/// # Errors
///
/// * [`ResolveLoopError::Store`] if resolved points can't be read
/// * [`ResolveLoopError::Index`] if there are no resolved points
/// * [`ResolveLoopError::Classifier`] if training fails
pub fn train_partition_model(
    store: &PointStore,
    partition: &Partition,
    config: &RunConfig,
) -> Result<ConfidenceModel, ResolveLoopError> {
    let resolved = store.get_resolved(partition.key())?;
    let mut rng = StdRng::seed_from_u64(config.training.seed);
    let index = NeighborIndex::build(&resolved, config.matcher.index_cap, &mut rng)?;
    Ok(ConfidenceModel::train(
        &index,
        partition.key(),
        &config.training_options(),
    )?)
}

/// Loads the model artifact at `path`, training and saving a new one
/// when it is missing, belongs to another partition, or
/// `training.retrain` is set.
///
/// # Errors
///
/// Returns [`ResolveLoopError`] if loading, training, or saving fails.
pub fn load_or_train_model(
    store: &PointStore,
    partition: &Partition,
    config: &RunConfig,
    path: &Path,
) -> Result<ConfidenceModel, ResolveLoopError> {
    if path.exists() && !config.training.retrain {
        let model = ConfidenceModel::load(path)?;
        if model.partition == partition.key() {
            return Ok(model.with_threshold(config.training.threshold));
        }
        log::warn!(
            "[{partition}] Model at {} was trained for {}, retraining",
            path.display(),
            model.partition
        );
    }

    log::info!("[{partition}] Training confidence model");
    let model = train_partition_model(store, partition, config)?;
    model.save(path)?;
    Ok(model)
}
