#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` storage for tract matching.
//!
//! The point store (`data/points.duckdb`) holds every crime incident and
//! property listing point together with its resolved census tract. The
//! resolver owns one connection per run and controls transaction
//! boundaries explicitly.

pub mod paths;
pub mod point_store;
pub mod tracts;

pub use point_store::PointStore;

/// Errors that can occur during point store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error (e.g. creating the data directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No point with this id exists.
    #[error("Point not found: {point_id}")]
    NotFound {
        /// The id that was looked up.
        point_id: String,
    },

    /// The point's stored coordinates are outside the partition's
    /// plausible range.
    #[error(
        "Invalid coordinate for point {point_id} in partition {partition}: \
         ({longitude}, {latitude})"
    )]
    InvalidCoordinate {
        /// The offending point.
        point_id: String,
        /// Stored longitude.
        longitude: f64,
        /// Stored latitude.
        latitude: f64,
        /// Partition key the bounds came from.
        partition: String,
    },

    /// A point belongs to a different partition than the caller assumed.
    #[error("Point {point_id} belongs to partition {actual}, not {expected}")]
    PartitionMismatch {
        /// The offending point.
        point_id: String,
        /// Partition the caller passed.
        expected: String,
        /// Partition stored on the row.
        actual: String,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}
