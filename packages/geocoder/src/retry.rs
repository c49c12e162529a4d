//! Timeout and jittered retry around an [`AuthoritativeResolver`].
//!
//! The census service stalls and drops requests under load, so every
//! lookup is attempted up to [`RetryPolicy::max_attempts`] times. Each
//! attempt is bounded by [`RetryPolicy::timeout`]; between attempts the
//! resolver sleeps a uniform random duration in `[0, max_jitter)` so
//! parallel runs don't retry in lockstep. Permanent errors (no address
//! match, 4xx) end the loop early.

use std::{future::Future, time::Duration};

use rand::Rng as _;
use thiserror::Error;
use tract_match_geography_models::RegionInfo;

use crate::{AuthoritativeResolver, GeocodeError, service_registry::CensusService};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3333);

/// Default number of attempts per lookup.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default upper bound of the inter-attempt jitter.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// Raised once a lookup has exhausted its attempts.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Every attempt failed (or a permanent error stopped the loop).
    #[error("Resolution failed after {attempts} attempt(s): {last_error}")]
    ResolutionFailed {
        /// Attempts made before giving up.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last_error: GeocodeError,
    },
}

/// Attempt budget, per-attempt timeout, and jitter bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per lookup. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Upper bound of the uniform sleep between attempts.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl From<&CensusService> for RetryPolicy {
    fn from(service: &CensusService) -> Self {
        Self {
            max_attempts: service.max_attempts,
            timeout: service.timeout(),
            max_jitter: service.max_jitter(),
        }
    }
}

/// An [`AuthoritativeResolver`] with timeouts and retries applied.
pub struct Resolver {
    backend: Box<dyn AuthoritativeResolver>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Wraps `backend` with `policy`.
    #[must_use]
    pub fn new(backend: impl AuthoritativeResolver + 'static, policy: RetryPolicy) -> Self {
        Self {
            backend: Box::new(backend),
            policy,
        }
    }

    /// The retry policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Resolves `(longitude, latitude)` to its tract.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ResolutionFailed`] once attempts are
    /// exhausted or a permanent error is returned.
    pub async fn resolve(&self, longitude: f64, latitude: f64) -> Result<RegionInfo, ResolveError> {
        let what = format!("({longitude}, {latitude})");
        with_retry(&self.policy, &what, move || {
            self.backend.coordinates_to_region(longitude, latitude)
        })
        .await
    }

    /// Resolves a street address to its tract.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ResolutionFailed`] once attempts are
    /// exhausted or a permanent error is returned.
    pub async fn resolve_by_address(
        &self,
        address: &str,
        locality_hint: Option<&str>,
    ) -> Result<RegionInfo, ResolveError> {
        with_retry(&self.policy, address, move || {
            self.backend.address_to_region(address, locality_hint)
        })
        .await
    }
}

async fn with_retry<F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut attempt_fn: F,
) -> Result<RegionInfo, ResolveError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RegionInfo, GeocodeError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let timeout_ms = u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX);
    let mut attempt = 1;

    loop {
        let error = match tokio::time::timeout(policy.timeout, attempt_fn()).await {
            Ok(Ok(region)) => return Ok(region),
            Ok(Err(e)) => e,
            Err(_) => GeocodeError::Timeout { timeout_ms },
        };

        if !error.is_transient() {
            log::debug!("{what}: permanent error on attempt {attempt}: {error}");
            return Err(ResolveError::ResolutionFailed {
                attempts: attempt,
                last_error: error,
            });
        }
        if attempt >= max_attempts {
            log::warn!("{what}: giving up after {attempt} attempt(s): {error}");
            return Err(ResolveError::ResolutionFailed {
                attempts: attempt,
                last_error: error,
            });
        }

        let delay = jitter(policy.max_jitter);
        log::debug!("{what}: attempt {attempt}/{max_attempts} failed ({error}), retrying in {delay:?}");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

/// Uniform random whole-millisecond duration in `[0, max)`.
fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}
