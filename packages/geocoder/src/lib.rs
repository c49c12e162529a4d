#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Authoritative census tract resolution.
//!
//! The US Census Bureau geographies API is the source of truth for
//! which tract a coordinate (or street address) falls in. It is slow
//! and flaky, so every call goes through [`retry::Resolver`], which
//! wraps the raw [`AuthoritativeResolver`] in a per-attempt timeout and
//! jittered retries.
//!
//! Service settings (base URL, benchmark, vintage, timeout, attempts,
//! jitter) are loaded from the TOML files in `services/` via the
//! [`service_registry`].

pub mod census;
pub mod retry;
pub mod service_registry;

use async_trait::async_trait;
use thiserror::Error;
use tract_match_geography_models::RegionInfo;

pub use retry::{ResolveError, Resolver, RetryPolicy};

/// Errors from a single geocoding attempt.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed (transport error or non-success status).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The attempt did not finish within the per-attempt timeout.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// The response parsed but carried no census tract.
    #[error("Response contained no census tract")]
    EmptyResponse,

    /// The service could not match the address at all.
    #[error("No address match for {address:?}")]
    NoMatch {
        /// The address that was looked up.
        address: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The service answered with a client error status.
    #[error("HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
}

impl GeocodeError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Address no-matches and 4xx responses (other than 429) are
    /// permanent. Everything else, including malformed or tract-less
    /// responses, is treated as a hiccup on the service side.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e
                .status()
                .is_none_or(|s| s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS),
            Self::Timeout { .. } | Self::Parse { .. } | Self::EmptyResponse | Self::RateLimited => {
                true
            }
            Self::NoMatch { .. } => false,
            Self::Status { status } => *status == 429 || *status >= 500,
        }
    }
}

/// A source of truth for point-to-tract membership.
///
/// Implementations make a single attempt per call. Timeouts and retries
/// are layered on by [`Resolver`].
#[async_trait]
pub trait AuthoritativeResolver: Send + Sync {
    /// Looks up the tract containing `(longitude, latitude)`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the lookup fails.
    async fn coordinates_to_region(
        &self,
        longitude: f64,
        latitude: f64,
    ) -> Result<RegionInfo, GeocodeError>;

    /// Looks up the tract containing a free-text street address.
    ///
    /// `locality_hint` (typically the partition's state) is appended to
    /// the address when it does not already mention it.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the lookup fails.
    async fn address_to_region(
        &self,
        address: &str,
        locality_hint: Option<&str>,
    ) -> Result<RegionInfo, GeocodeError>;
}
