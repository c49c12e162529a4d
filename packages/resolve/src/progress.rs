//! Progress reporting for the resolution loop.
//!
//! The loop reports how many of a partition's unresolved points have
//! been dealt with so far. Rendering is left to the caller (`indicatif`
//! bars in the runner, nothing in tests).

use std::sync::Arc;

/// Receives progress from [`crate::resolve_partition`].
///
/// Implementations must be `Send + Sync` so one reporter can be shared
/// behind an `Arc`.
pub trait ProgressCallback: Send + Sync {
    /// Unresolved points at the start of the run.
    fn set_total(&self, total: u64);

    /// Points resolved so far (absolute, not delta).
    fn set_position(&self, pos: u64);

    /// Short status line (partition, pass, batch).
    fn set_message(&self, msg: String);

    /// The run is over; `msg` summarises it.
    fn finish(&self, msg: String);
}

/// A [`ProgressCallback`] that ignores everything.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
