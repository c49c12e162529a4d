#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing for the tract matching runner.
//!
//! [`IndicatifProgress`] renders [`ProgressCallback`] updates from the
//! resolution loop as `indicatif` bars, and [`init_logger`] routes `log`
//! output through `indicatif-log-bridge` so log lines don't tear the bars.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tract_match_resolve::ProgressCallback;

pub use indicatif::MultiProgress;

const PARTITION_SPINNER: &str = "{spinner:.cyan} {msg}";
const PARTITION_BAR: &str = "  {msg} {wide_bar:.cyan/dim} {pos}/{len} {percent}% [{eta}]";
const PARTITIONS_BAR: &str = "{msg} {wide_bar:.green/dim} {pos}/{len} partitions [{elapsed_precise}]";

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// An `indicatif` [`ProgressBar`] driven by the resolution loop.
///
/// Partition bars spin while the loop counts unresolved points and turn
/// into a bar once [`ProgressCallback::set_total`] arrives.
pub struct IndicatifProgress {
    bar: ProgressBar,
    counted: ProgressStyle,
}

impl IndicatifProgress {
    /// A bar for one partition's unresolved points.
    #[must_use]
    pub fn partition_bar(multi: &MultiProgress, partition: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::with_template(PARTITION_SPINNER)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message(format!("{partition}: counting unresolved points"));

        Arc::new(Self {
            bar,
            counted: bar_style(PARTITION_BAR),
        })
    }

    /// A bar over the configured partitions. The length is known up front.
    #[must_use]
    pub fn partitions_bar(multi: &MultiProgress, total: u64) -> Arc<dyn ProgressCallback> {
        let style = bar_style(PARTITIONS_BAR);
        let bar = multi.add(ProgressBar::new(total).with_style(style.clone()));
        bar.set_message("Resolving");

        Arc::new(Self {
            bar,
            counted: style,
        })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_style(self.counted.clone());
        self.bar.set_length(total);
        self.bar.reset();
    }

    fn set_position(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.disable_steady_tick();
        self.bar.finish_with_message(msg);
    }
}

/// Installs `pretty_env_logger` behind `indicatif-log-bridge` and returns
/// the [`MultiProgress`] every bar has to be added to.
///
/// The level is `info` unless `RUST_LOG` overrides it. Calling this more
/// than once keeps the first logger.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .build();
    let max_level = logger.filter();

    match indicatif_log_bridge::LogWrapper::new(multi.clone(), logger).try_init() {
        Ok(()) => log::set_max_level(max_level),
        Err(e) => log::debug!("Logger already installed: {e}"),
    }

    multi
}
