#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geographic point and census tract types.
//!
//! These types describe the points (crime incidents and property
//! listings) whose census tract membership the resolver fills in, and
//! the tract identifiers it assigns to them.

pub mod fips;
pub mod partition;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use partition::{CoordinateBounds, Partition, UnknownPartitionError};

/// Number of digits in a census tract GEOID
/// (2 state + 3 county + 6 tract).
pub const TRACT_GEOID_LEN: usize = 11;

/// Error returned when a string is not a well-formed tract GEOID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid census tract GEOID {0:?}: expected 11 digits")]
pub struct InvalidTractGeoid(pub String);

/// A census tract GEOID (e.g. `"48453001100"`).
///
/// Always exactly [`TRACT_GEOID_LEN`] ASCII digits, so the state and
/// county prefixes can be sliced out without further checks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TractGeoid(String);

impl TractGeoid {
    /// Validates and wraps a tract GEOID.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTractGeoid`] unless `value` (after trimming) is
    /// exactly [`TRACT_GEOID_LEN`] ASCII digits.
    pub fn parse(value: &str) -> Result<Self, InvalidTractGeoid> {
        let trimmed = value.trim();
        if trimmed.len() == TRACT_GEOID_LEN && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidTractGeoid(value.to_string()))
        }
    }

    /// The GEOID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-digit state FIPS prefix.
    #[must_use]
    pub fn state_fips(&self) -> &str {
        &self.0[..2]
    }

    /// Five-digit county GEOID prefix (state + county).
    #[must_use]
    pub fn county_geoid(&self) -> &str {
        &self.0[..5]
    }
}

impl TryFrom<String> for TractGeoid {
    type Error = InvalidTractGeoid;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TractGeoid> for String {
    fn from(value: TractGeoid) -> Self {
        value.0
    }
}

impl std::fmt::Display for TractGeoid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a point came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PointSource {
    /// A police crime incident record.
    CrimeIncident,
    /// A short-term rental property listing.
    PropertyListing,
}

/// How a point's tract was determined.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResolutionMethod {
    /// Tract supplied by the upstream data set at ingestion time.
    Seed,
    /// Accepted nearest resolved neighbour's tract.
    NearestNeighbor,
    /// Returned by the external geocoding service.
    Authoritative,
}

/// A point with a known tract, used as reference data for matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPoint {
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Census tract the point lies in.
    pub region_id: TractGeoid,
}

impl ResolvedPoint {
    /// Convenience constructor.
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64, region_id: TractGeoid) -> Self {
        Self {
            longitude,
            latitude,
            region_id,
        }
    }
}

/// A stored point that still needs a tract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedPoint {
    /// Primary key in the point store.
    pub point_id: String,
    /// Longitude, if the source record had one.
    pub longitude: Option<f64>,
    /// Latitude, if the source record had one.
    pub latitude: Option<f64>,
    /// Street address, for records without coordinates.
    pub address: Option<String>,
}

impl UnresolvedPoint {
    /// Returns `(longitude, latitude)` when both are present.
    #[must_use]
    pub const fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.longitude, self.latitude) {
            (Some(lon), Some(lat)) => Some((lon, lat)),
            _ => None,
        }
    }

    /// Returns the address when it is present and non-blank.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

/// A point to be written into the point store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoint {
    /// Primary key (e.g. `"crime:CHI-12345"`).
    pub point_id: String,
    /// Partition key (state abbreviation).
    pub partition_key: String,
    /// Record origin.
    pub source: PointSource,
    /// Longitude, if known.
    pub longitude: Option<f64>,
    /// Latitude, if known.
    pub latitude: Option<f64>,
    /// Street address, if known.
    pub address: Option<String>,
    /// Tract supplied by the source data set, if any.
    pub region_id: Option<TractGeoid>,
}

/// Region hierarchy returned by the authoritative geocoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionInfo {
    /// Census tract GEOID.
    pub tract: TractGeoid,
    /// Five-digit county GEOID.
    pub county_id: String,
    /// Two-digit state FIPS code.
    pub state_id: String,
    /// Census block GEOID, when the service returned one.
    pub block_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tract_geoid_accepts_eleven_digits() {
        let t = TractGeoid::parse(" 11001000100 ").unwrap();
        assert_eq!(t.as_str(), "11001000100");
        assert_eq!(t.state_fips(), "11");
        assert_eq!(t.county_geoid(), "11001");
    }

    #[test]
    fn tract_geoid_rejects_block_groups_and_garbage() {
        // block group (12 digits)
        assert!(TractGeoid::parse("110010001001").is_err());
        // tract code without state/county
        assert!(TractGeoid::parse("000100").is_err());
        assert!(TractGeoid::parse("1100100010A").is_err());
        assert!(TractGeoid::parse("NaN").is_err());
        assert!(TractGeoid::parse("").is_err());
    }

    #[test]
    fn tract_geoid_deserialize_validates() {
        let ok: TractGeoid = serde_json::from_str("\"48453001100\"").unwrap();
        assert_eq!(ok.state_fips(), "48");
        assert!(serde_json::from_str::<TractGeoid>("\"484530011\"").is_err());
    }

    #[test]
    fn point_source_strings() {
        assert_eq!(PointSource::CrimeIncident.as_ref(), "crime_incident");
        assert_eq!(
            "property_listing".parse::<PointSource>().unwrap(),
            PointSource::PropertyListing
        );
        assert_eq!(ResolutionMethod::NearestNeighbor.to_string(), "nearest_neighbor");
    }

    #[test]
    fn unresolved_point_accessors() {
        let p = UnresolvedPoint {
            point_id: "crime:1".to_string(),
            longitude: Some(-97.7),
            latitude: None,
            address: Some("   ".to_string()),
        };
        assert_eq!(p.coordinates(), None);
        assert_eq!(p.address(), None);

        let q = UnresolvedPoint {
            point_id: "crime:2".to_string(),
            longitude: Some(-97.7),
            latitude: Some(30.2),
            address: Some(" 100 Congress Ave ".to_string()),
        };
        assert_eq!(q.coordinates(), Some((-97.7, 30.2)));
        assert_eq!(q.address(), Some("100 Congress Ave"));
    }
}
