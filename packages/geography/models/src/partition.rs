//! Geographic partitions and their coordinate plausibility bounds.
//!
//! A partition is the unit of work for the resolver: one US state gets
//! one resolved-point index and one confidence model, since point
//! density (and therefore how far a "safe" nearest neighbour can be)
//! varies a lot between states.

use serde::{Deserialize, Serialize};

use crate::fips::{self, StateInfo};

/// Axis-aligned longitude/latitude box that a partition's points must
/// fall inside. Used to reject corrupt upstream rows (swapped axes,
/// zeroed coordinates, points on the wrong side of the antimeridian).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinateBounds {
    /// Minimum longitude (inclusive).
    pub min_lon: f64,
    /// Maximum longitude (inclusive).
    pub max_lon: f64,
    /// Minimum latitude (inclusive).
    pub min_lat: f64,
    /// Maximum latitude (inclusive).
    pub max_lat: f64,
}

impl CoordinateBounds {
    /// Bounds that hold for every US state except Hawaii: west of -50°
    /// longitude, north of 20° latitude.
    pub const US: Self = Self {
        min_lon: -180.0,
        max_lon: -50.0,
        min_lat: 20.0,
        max_lat: 72.0,
    };

    /// Hawaii's southern tip sits at ~18.9°N, below the continental floor.
    pub const HAWAII: Self = Self {
        min_lon: -180.0,
        max_lon: -150.0,
        min_lat: 18.5,
        max_lat: 29.0,
    };

    /// Returns the default bounds for a state FIPS code.
    #[must_use]
    pub fn for_state(fips: &str) -> Self {
        if fips == "15" { Self::HAWAII } else { Self::US }
    }

    /// Whether `(longitude, latitude)` is finite and inside the box.
    #[must_use]
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        longitude.is_finite()
            && latitude.is_finite()
            && (self.min_lon..=self.max_lon).contains(&longitude)
            && (self.min_lat..=self.max_lat).contains(&latitude)
    }
}

/// Error returned when a partition key does not name a known state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown partition: {0:?} (expected a US state abbreviation)")]
pub struct UnknownPartitionError(pub String);

/// A US state partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    state: &'static StateInfo,
    bounds: CoordinateBounds,
}

impl Partition {
    /// Builds a partition from a state abbreviation (case-insensitive),
    /// using the state's default coordinate bounds.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownPartitionError`] if the abbreviation is not one of
    /// the 50 states + DC.
    pub fn from_abbr(abbr: &str) -> Result<Self, UnknownPartitionError> {
        let state = fips::by_abbr(abbr).ok_or_else(|| UnknownPartitionError(abbr.to_string()))?;
        Ok(Self {
            state,
            bounds: CoordinateBounds::for_state(state.fips),
        })
    }

    /// Replaces the coordinate bounds.
    #[must_use]
    pub const fn with_bounds(mut self, bounds: CoordinateBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// The key stored in `points.partition_key` (the state abbreviation).
    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.state.abbr
    }

    /// Two-digit state FIPS code.
    #[must_use]
    pub const fn state_fips(&self) -> &'static str {
        self.state.fips
    }

    /// Full state name, used as a locality hint for address lookups.
    #[must_use]
    pub const fn state_name(&self) -> &'static str {
        self.state.name
    }

    /// Coordinate plausibility bounds for this partition.
    #[must_use]
    pub const fn bounds(&self) -> &CoordinateBounds {
        &self.bounds
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.state.abbr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn us_bounds_reject_corrupt_rows() {
        let b = CoordinateBounds::US;
        assert!(b.contains(-97.74, 30.27));
        // swapped axes
        assert!(!b.contains(30.27, -97.74));
        // null island
        assert!(!b.contains(0.0, 0.0));
        // east of the antimeridian
        assert!(!b.contains(172.5, 52.9));
        assert!(!b.contains(f64::NAN, 30.0));
        assert!(!b.contains(-97.0, f64::INFINITY));
    }

    #[test]
    fn hawaii_relaxes_latitude_floor() {
        let hi = Partition::from_abbr("hi").unwrap();
        assert!(hi.bounds().contains(-155.6, 18.95));
        assert!(!Partition::from_abbr("TX").unwrap().bounds().contains(-155.6, 18.95));
    }

    #[test]
    fn partition_from_abbr() {
        let p = Partition::from_abbr("ny").unwrap();
        assert_eq!(p.key(), "NY");
        assert_eq!(p.state_fips(), "36");
        assert_eq!(p.state_name(), "New York");
        assert_eq!(p.to_string(), "NY");
        assert!(Partition::from_abbr("ZZ").is_err());
    }
}
