#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Resolves census tracts for every partition listed in the run config.
//!
//! For each partition: drain its unresolved points through the batch
//! resolution loop, with the confidence model loaded from (or trained
//! into) the partition's model artifact. Set
//! `TRACT_MATCH_CONFIG` to use a config file other than
//! `tract_match.toml` at the project root.

use std::time::Instant;

use tract_match_cli_utils::{IndicatifProgress, MultiProgress};
use tract_match_database::{PointStore, paths};
use tract_match_geocoder::{Resolver, RetryPolicy, census::CensusGeocoder, service_registry};
use tract_match_geography_models::Partition;
use tract_match_resolve::{
    ModelArtifact, PartitionReport, ProgressCallback as _, RunConfig, config::config_path,
    resolve_partition,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = tract_match_cli_utils::init_logger();
    let start = Instant::now();

    let config = RunConfig::load(&config_path())?;
    let partitions = config.partitions()?;
    if partitions.is_empty() {
        log::warn!("No partitions configured, nothing to do");
        return Ok(());
    }

    let store = PointStore::open_default()?;

    let service = service_registry::census().with_overrides(&config.geocoder);
    let policy = RetryPolicy::from(&service);
    let geocoder = CensusGeocoder::new(service)?;
    let name = geocoder.service().name.clone();
    let resolver = Resolver::new(geocoder, policy);
    log::info!(
        "Geocoding with {name} ({} attempts, {}ms timeout, up to {}ms jitter)",
        resolver.policy().max_attempts,
        resolver.policy().timeout.as_millis(),
        resolver.policy().max_jitter.as_millis()
    );

    let reports = run_partitions(&multi, &store, &resolver, &partitions, &config).await?;

    let resolved: u64 = reports.iter().map(PartitionReport::resolved).sum();
    let remaining: u64 = reports.iter().map(|r| r.remaining).sum();
    log::info!(
        "Done in {:.1}s: {resolved} point(s) resolved, {remaining} still unresolved",
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

#[allow(clippy::future_not_send)]
async fn run_partitions(
    multi: &MultiProgress,
    store: &PointStore,
    resolver: &Resolver,
    partitions: &[Partition],
    config: &RunConfig,
) -> Result<Vec<PartitionReport>, Box<dyn std::error::Error>> {
    let overall = IndicatifProgress::partitions_bar(multi, partitions.len() as u64);
    let mut reports = Vec::with_capacity(partitions.len());

    for (i, partition) in partitions.iter().enumerate() {
        log::info!("[{partition}] Starting ({})", partition.state_name());

        let mut model = ModelArtifact::new(paths::model_path(partition.key()));
        let progress = IndicatifProgress::partition_bar(multi, partition.key());
        let report =
            resolve_partition(store, resolver, &mut model, partition, config, &progress).await?;

        log::info!("{report}");
        reports.push(report);
        overall.set_position(i as u64 + 1);
    }

    overall.finish(format!("{} partition(s) done", partitions.len()));
    Ok(reports)
}
