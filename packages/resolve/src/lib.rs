#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch resolution loop.
//!
//! Drains a partition's unresolved points in batches. For each point the
//! nearest resolved neighbour's tract is accepted when the partition's
//! confidence model says it is safe; otherwise the point goes to the
//! authoritative geocoder. Writes are committed once per batch.
//!
//! A point that cannot be resolved is left untouched and picked up again
//! by a later pass (or run), once the index has more neighbours.

pub mod batch;
pub mod config;
pub mod model;
pub mod progress;

use std::sync::Arc;

use rand::{SeedableRng as _, rngs::StdRng};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tract_match_classifier::{ClassifierError, ConfidenceModel};
use tract_match_database::{DbError, PointStore};
use tract_match_geocoder::{ResolveError, Resolver};
use tract_match_geography_models::{
    Partition, RegionInfo, ResolutionMethod, TractGeoid, UnresolvedPoint,
};
use tract_match_spatial::{MatchError, NeighborIndex};

use model::ModelSlot;

pub use batch::UnresolvedBatches;
pub use config::RunConfig;
pub use model::{
    FixedModel, ModelArtifact, ModelSource, load_or_train_model, train_partition_model,
};
pub use progress::{NullProgress, ProgressCallback, null_progress};

/// Errors that end a partition run.
#[derive(Debug, Error)]
pub enum ResolveLoopError {
    /// Point store failure. The open batch was rolled back.
    #[error("Point store error: {0}")]
    Store(#[from] DbError),

    /// Model training or loading failed.
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    /// The neighbour index could not be built for training.
    #[error("Index error: {0}")]
    Index(#[from] MatchError),
}

/// Where the loop is for the current partition.
///
/// ```text
/// Idle → Indexing → Matching → {Accepted | Fallback} → Persisted → Matching … → Drained
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LoopState {
    /// Nothing started yet (or between passes).
    Idle,
    /// Building the neighbour index from resolved points.
    Indexing,
    /// Looking at one unresolved point.
    Matching,
    /// The nearest neighbour's tract was accepted.
    Accepted,
    /// The point was handed to the authoritative geocoder.
    Fallback,
    /// A tract was written for the point.
    Persisted,
    /// No unresolved points left in this pass.
    Drained,
}

impl LoopState {
    /// Whether the loop may move from `self` to `next`.
    ///
    /// `Matching → Matching` skips a point without a decision. Leaving
    /// `Accepted` or `Fallback` for anything but `Persisted` means the
    /// point stayed unresolved.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Indexing)
                | (Self::Drained, Self::Idle)
                | (Self::Indexing, Self::Matching | Self::Drained)
                | (
                    Self::Matching | Self::Accepted | Self::Fallback | Self::Persisted,
                    Self::Matching | Self::Indexing | Self::Drained
                )
                | (Self::Matching, Self::Accepted | Self::Fallback)
                | (Self::Accepted | Self::Fallback, Self::Persisted)
        )
    }
}

struct StateMachine<'a> {
    partition: &'a str,
    state: LoopState,
}

impl<'a> StateMachine<'a> {
    const fn new(partition: &'a str) -> Self {
        Self {
            partition,
            state: LoopState::Idle,
        }
    }

    fn to(&mut self, next: LoopState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        log::trace!("[{}] {} -> {next}", self.partition, self.state);
        self.state = next;
    }
}

/// Per-partition outcome counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionReport {
    /// Partition key.
    pub partition: String,
    /// Resolved points in the partition when the run started.
    pub resolved_at_start: u64,
    /// Passes run.
    pub passes: u32,
    /// Batches committed.
    pub batches: u64,
    /// Points looked at (across passes).
    pub examined: u64,
    /// Resolved from the nearest neighbour.
    pub accepted: u64,
    /// Resolved by the authoritative geocoder.
    pub authoritative: u64,
    /// Authoritative lookups that gave up.
    pub failed: u64,
    /// Skipped because their coordinates are outside the partition bounds.
    pub skipped_invalid: u64,
    /// Skipped because they have neither coordinates nor an address.
    pub skipped_no_location: u64,
    /// Already resolved by the time the write happened.
    pub already_resolved: u64,
    /// Unresolved points left when the run ended.
    pub remaining: u64,
    /// Whether any neighbour index held fewer points than were resolved.
    pub index_subsampled: bool,
}

impl PartitionReport {
    /// Points that received a tract.
    #[must_use]
    pub const fn resolved(&self) -> u64 {
        self.accepted + self.authoritative
    }
}

impl std::fmt::Display for PartitionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} accepted, {} authoritative, {} failed, {} invalid, {} without location, \
             {} remaining ({} batch(es), {} pass(es))",
            self.partition,
            self.accepted,
            self.authoritative,
            self.failed,
            self.skipped_invalid,
            self.skipped_no_location,
            self.remaining,
            self.batches,
            self.passes,
        )
    }
}

enum Decision {
    Accept(TractGeoid),
    Authoritative(TractGeoid),
    Failed,
    SkipInvalid,
    SkipNoLocation,
}

/// What one batch is resolved against.
struct Context<'a> {
    store: &'a PointStore,
    resolver: &'a Resolver,
    model: Option<&'a ConfidenceModel>,
    partition: &'a Partition,
    k: usize,
}

/// Runs the batch resolution loop for one partition.
///
/// The model comes from `models`. While there is none (a cold partition
/// has nothing to train on) every point goes to the authoritative
/// geocoder, and the loop asks `models` again at each pass start and
/// whenever the resolved set has doubled since the last attempt.
///
/// # Errors
///
/// Returns [`ResolveLoopError::Store`] if the point store fails; the
/// batch in progress is rolled back, earlier batches stay committed.
#[allow(clippy::future_not_send, clippy::too_many_lines)]
pub async fn resolve_partition(
    store: &PointStore,
    resolver: &Resolver,
    models: &mut dyn ModelSource,
    partition: &Partition,
    config: &RunConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<PartitionReport, ResolveLoopError> {
    let key = partition.key();
    let mut report = PartitionReport {
        partition: key.to_string(),
        resolved_at_start: store.count_resolved(key)?,
        ..PartitionReport::default()
    };
    let mut slot = ModelSlot::new(models);

    let initial = store.count_unresolved(key)?;
    progress.set_total(initial);
    log::info!(
        "[{key}] {initial} unresolved point(s), {} resolved",
        report.resolved_at_start
    );

    let mut machine = StateMachine::new(key);

    for pass in 1..=config.resolve.max_passes {
        report.passes = pass;
        let resolved_before = report.resolved();
        if machine.state == LoopState::Drained {
            machine.to(LoopState::Idle);
        }
        slot.refresh(
            store,
            partition,
            config,
            report.resolved_at_start + resolved_before,
            true,
        );
        if slot.current().is_none() {
            log::warn!("[{key}] No confidence model at pass {pass} start, using the geocoder");
        }

        let mut index = None;
        let mut batches = UnresolvedBatches::new(store, key, config.resolve.batch_size);
        let mut batch_num = 0u64;

        loop {
            if batch_num == 0 || config.resolve.rebuild_index_per_batch {
                machine.to(LoopState::Indexing);
                if batch_num > 0 {
                    slot.refresh(
                        store,
                        partition,
                        config,
                        report.resolved_at_start + report.resolved(),
                        false,
                    );
                }
                index = build_index(store, partition, config)?;
                if index.as_ref().is_some_and(NeighborIndex::is_subsampled) {
                    report.index_subsampled = true;
                }
            }

            let remaining = store.count_unresolved(key)?;
            progress.set_position(initial.saturating_sub(remaining));

            let Some(points) = batches.next().transpose()? else {
                machine.to(LoopState::Drained);
                break;
            };
            batch_num += 1;
            log::info!(
                "[{key}] Pass {pass}, batch {batch_num}: {} point(s), {remaining} unresolved",
                points.len()
            );
            progress.set_message(format!("{key} pass {pass} batch {batch_num}"));

            let model = slot.current();
            let ctx = Context {
                store,
                resolver,
                model,
                partition,
                k: model.map_or(config.matcher.k, |m| m.k),
            };

            store.begin()?;
            let outcome =
                resolve_batch(&ctx, index.as_ref(), &points, &mut machine, &mut report).await;
            match outcome {
                Ok(resolved) => {
                    store.commit()?;
                    report.batches += 1;
                    log::info!(
                        "[{key}] Batch {batch_num} committed: {resolved} of {} resolved",
                        points.len()
                    );
                }
                Err(e) => {
                    log::error!("[{key}] Batch {batch_num} failed, rolling back: {e}");
                    if let Err(rollback) = store.rollback() {
                        log::error!("[{key}] Rollback failed: {rollback}");
                    }
                    return Err(e.into());
                }
            }
        }

        let resolved_this_pass = report.resolved() - resolved_before;
        log::info!("[{key}] Pass {pass} drained: {resolved_this_pass} resolved");
        if resolved_this_pass == 0 {
            break;
        }
    }

    report.remaining = store.count_unresolved(key)?;
    progress.set_position(initial.saturating_sub(report.remaining));
    progress.finish(report.to_string());
    log::info!("Finished {report}");

    Ok(report)
}

fn build_index(
    store: &PointStore,
    partition: &Partition,
    config: &RunConfig,
) -> Result<Option<NeighborIndex>, DbError> {
    let resolved = store.get_resolved(partition.key())?;
    let mut rng = config
        .matcher
        .seed
        .map_or_else(|| StdRng::from_rng(&mut rand::rng()), StdRng::seed_from_u64);

    match NeighborIndex::build(&resolved, config.matcher.index_cap, &mut rng) {
        Ok(index) => {
            log::info!(
                "[{}] Indexed {} of {} resolved point(s)",
                partition.key(),
                index.len(),
                index.source_len()
            );
            Ok(Some(index))
        }
        Err(e) => {
            log::info!("[{}] {e}, falling back to the geocoder", partition.key());
            Ok(None)
        }
    }
}

/// Resolves one batch inside an open transaction. Returns the number of
/// points that received a tract.
#[allow(clippy::future_not_send)]
async fn resolve_batch(
    ctx: &Context<'_>,
    index: Option<&NeighborIndex>,
    points: &[UnresolvedPoint],
    machine: &mut StateMachine<'_>,
    report: &mut PartitionReport,
) -> Result<u64, DbError> {
    let mut resolved = 0;

    for point in points {
        machine.to(LoopState::Matching);
        report.examined += 1;

        let (tract, method) = match decide(ctx, index, point, machine).await? {
            Decision::Accept(tract) => (tract, ResolutionMethod::NearestNeighbor),
            Decision::Authoritative(tract) => (tract, ResolutionMethod::Authoritative),
            Decision::Failed => {
                report.failed += 1;
                continue;
            }
            Decision::SkipInvalid => {
                report.skipped_invalid += 1;
                continue;
            }
            Decision::SkipNoLocation => {
                report.skipped_no_location += 1;
                continue;
            }
        };

        match ctx
            .store
            .set_region(&point.point_id, &tract, method, ctx.partition)
        {
            Ok(true) => {
                machine.to(LoopState::Persisted);
                resolved += 1;
                if method == ResolutionMethod::NearestNeighbor {
                    report.accepted += 1;
                } else {
                    report.authoritative += 1;
                }
                log::debug!("[{}] {} -> {tract} ({method})", ctx.partition, point.point_id);
            }
            Ok(false) => {
                machine.to(LoopState::Persisted);
                report.already_resolved += 1;
            }
            Err(DbError::InvalidCoordinate { .. }) => {
                log::warn!(
                    "[{}] Skipping {}: coordinates outside partition bounds",
                    ctx.partition,
                    point.point_id
                );
                report.skipped_invalid += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(resolved)
}

#[allow(clippy::future_not_send)]
async fn decide(
    ctx: &Context<'_>,
    index: Option<&NeighborIndex>,
    point: &UnresolvedPoint,
    machine: &mut StateMachine<'_>,
) -> Result<Decision, DbError> {
    let key = ctx.partition.key();

    let Some((longitude, latitude)) = point.coordinates() else {
        let Some(address) = point.address() else {
            log::debug!("[{key}] Skipping {}: no coordinates or address", point.point_id);
            return Ok(Decision::SkipNoLocation);
        };
        machine.to(LoopState::Fallback);
        return authoritative(
            ctx,
            &point.point_id,
            ctx.resolver
                .resolve_by_address(address, Some(ctx.partition.state_name()))
                .await,
        );
    };

    if !ctx.partition.bounds().contains(longitude, latitude) {
        log::warn!(
            "[{key}] Skipping {}: ({longitude}, {latitude}) outside partition bounds",
            point.point_id
        );
        return Ok(Decision::SkipInvalid);
    }

    if let Some(tract) = nearest_candidate(ctx, index, longitude, latitude) {
        machine.to(LoopState::Accepted);
        return Ok(Decision::Accept(tract));
    }

    machine.to(LoopState::Fallback);
    authoritative(
        ctx,
        &point.point_id,
        ctx.resolver.resolve(longitude, latitude).await,
    )
}

/// The nearest neighbour's tract, if the model accepts it.
fn nearest_candidate(
    ctx: &Context<'_>,
    index: Option<&NeighborIndex>,
    longitude: f64,
    latitude: f64,
) -> Option<TractGeoid> {
    let model = ctx.model?;
    let neighbors = index?.query(longitude, latitude, ctx.k)?;
    match model.predict(&neighbors.distances) {
        Ok(true) => Some(neighbors.region_id),
        Ok(false) => None,
        Err(e) => {
            log::warn!("[{}] Model rejected features: {e}", ctx.partition);
            None
        }
    }
}

/// Records a successful lookup's tract; a failed lookup leaves the point
/// untouched.
fn authoritative(
    ctx: &Context<'_>,
    point_id: &str,
    result: Result<RegionInfo, ResolveError>,
) -> Result<Decision, DbError> {
    match result {
        Ok(region) => {
            ctx.store.record_region(&region)?;
            Ok(Decision::Authoritative(region.tract))
        }
        Err(e) => {
            log::warn!("[{}] Leaving {point_id} unresolved: {e}", ctx.partition);
            Ok(Decision::Failed)
        }
    }
}
