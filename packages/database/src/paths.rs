#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the data directory.
//!
//! Everything lives under `data/` at the project root unless the
//! `TRACT_MATCH_DATA_DIR` environment variable points somewhere else.

use std::path::{Path, PathBuf};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "TRACT_MATCH_DATA_DIR";

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`.
///
/// # Panics
///
/// Panics if the project root cannot be resolved.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("Failed to find project root from CARGO_MANIFEST_DIR")
        .to_path_buf()
}

/// Returns the data directory (`$TRACT_MATCH_DATA_DIR` or `<root>/data`).
#[must_use]
pub fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map_or_else(|| project_root().join("data"), PathBuf::from)
}

/// Returns the path of the point store `DuckDB` file.
#[must_use]
pub fn points_db_path() -> PathBuf {
    data_dir().join("points.duckdb")
}

/// Returns the directory holding trained confidence models.
#[must_use]
pub fn models_dir() -> PathBuf {
    data_dir().join("models")
}

/// Returns the artifact path for a partition's confidence model.
#[must_use]
pub fn model_path(partition_key: &str) -> PathBuf {
    models_dir().join(format!("matching_classifier_{partition_key}.json"))
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_path_is_keyed_by_partition() {
        let path = model_path("TX");
        assert!(path.ends_with("models/matching_classifier_TX.json"));
    }

    #[test]
    fn points_db_lives_in_data_dir() {
        assert_eq!(points_db_path().parent(), Some(data_dir().as_path()));
    }
}
