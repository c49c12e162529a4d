//! Compile-time registry of geocoding service configurations.
//!
//! Each service is defined in a TOML file under `services/`. The
//! registry embeds these at compile time; callers may then layer
//! run-time [`ServiceOverrides`] on top.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A census geographies service configuration loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusService {
    /// Unique identifier (e.g., `"census"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// API base URL (e.g., `"https://geocoding.geo.census.gov/geocoder"`).
    pub base_url: String,
    /// Benchmark name (e.g., `"Public_AR_Current"`).
    pub benchmark: String,
    /// Geography vintage (e.g., `"Current_Current"`).
    pub vintage: String,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Attempts per lookup before giving up.
    pub max_attempts: u32,
    /// Upper bound of the uniform sleep between attempts.
    pub max_jitter_ms: u64,
}

impl CensusService {
    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Upper bound of the inter-attempt jitter.
    #[must_use]
    pub const fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    /// Returns a copy with every `Some` field of `overrides` applied.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &ServiceOverrides) -> Self {
        if let Some(base_url) = &overrides.base_url {
            self.base_url.clone_from(base_url);
        }
        if let Some(benchmark) = &overrides.benchmark {
            self.benchmark.clone_from(benchmark);
        }
        if let Some(vintage) = &overrides.vintage {
            self.vintage.clone_from(vintage);
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.max_attempts = max_attempts;
        }
        if let Some(max_jitter_ms) = overrides.max_jitter_ms {
            self.max_jitter_ms = max_jitter_ms;
        }
        self
    }
}

/// Optional run-time overrides for a [`CensusService`], typically read
/// from the `[geocoder]` section of the run configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceOverrides {
    /// Replaces [`CensusService::base_url`].
    pub base_url: Option<String>,
    /// Replaces [`CensusService::benchmark`].
    pub benchmark: Option<String>,
    /// Replaces [`CensusService::vintage`].
    pub vintage: Option<String>,
    /// Replaces [`CensusService::timeout_ms`].
    pub timeout_ms: Option<u64>,
    /// Replaces [`CensusService::max_attempts`].
    pub max_attempts: Option<u32>,
    /// Replaces [`CensusService::max_jitter_ms`].
    pub max_jitter_ms: Option<u64>,
}

// ── Compile-time embedded TOML files ────────────────────────────────

const CENSUS_TOML: &str = include_str!("../services/census.toml");

/// Returns the embedded census geographies service configuration.
///
/// # Panics
///
/// Panics if the embedded TOML is malformed (it is compiled in, so this
/// is caught by the tests below).
#[must_use]
pub fn census() -> CensusService {
    toml::de::from_str(CENSUS_TOML)
        .unwrap_or_else(|e| panic!("Failed to parse geocoding service 'census': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_census_service() {
        let svc = census();
        assert_eq!(svc.id, "census");
        assert!(!svc.name.is_empty());
        assert!(svc.base_url.starts_with("https://"));
        assert!(!svc.benchmark.is_empty());
        assert!(!svc.vintage.is_empty());
    }

    #[test]
    fn census_defaults_match_service_behaviour() {
        let svc = census();
        assert_eq!(svc.timeout(), Duration::from_millis(3333));
        assert_eq!(svc.max_attempts, 10);
        assert!(svc.max_jitter() < Duration::from_secs(2));
    }

    #[test]
    fn overrides_replace_only_set_fields() {
        let svc = census().with_overrides(&ServiceOverrides {
            base_url: Some("http://localhost:8080/geocoder".to_string()),
            max_attempts: Some(3),
            ..ServiceOverrides::default()
        });
        assert_eq!(svc.base_url, "http://localhost:8080/geocoder");
        assert_eq!(svc.max_attempts, 3);
        assert_eq!(svc.timeout_ms, 3333);
        assert_eq!(svc.vintage, census().vintage);
    }

    #[test]
    fn overrides_reject_unknown_keys() {
        assert!(toml::de::from_str::<ServiceOverrides>("retries = 4").is_err());
        let o: ServiceOverrides = toml::de::from_str("timeout_ms = 500").unwrap();
        assert_eq!(o.timeout_ms, Some(500));
    }
}
