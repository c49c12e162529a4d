//! Census tract parent table.
//!
//! Each tract the authoritative geocoder returns is recorded with its
//! county and state so downstream joins against ACS tables can group
//! points by county/state. The foreign keys are not enforced.

use duckdb::Connection;
use tract_match_geography_models::RegionInfo;

use crate::DbError;

pub(crate) fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS census_tracts (
            census_tract_id TEXT PRIMARY KEY,
            county_id TEXT NOT NULL,
            state_id TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Records a tract and its parents. Existing tracts are left untouched.
///
/// Returns `true` if the tract was new.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub fn upsert(conn: &Connection, region: &RegionInfo) -> Result<bool, DbError> {
    let inserted = conn.execute(
        "INSERT INTO census_tracts (census_tract_id, county_id, state_id)
         VALUES (?, ?, ?)
         ON CONFLICT (census_tract_id) DO NOTHING",
        duckdb::params![
            region.tract.as_str(),
            region.county_id.as_str(),
            region.state_id.as_str(),
        ],
    )?;
    Ok(inserted > 0)
}

#[cfg(test)]
mod tests {
    use tract_match_geography_models::TractGeoid;

    use super::*;

    fn parents(conn: &Connection, tract_id: &str) -> Option<(String, String)> {
        let mut stmt = conn
            .prepare("SELECT county_id, state_id FROM census_tracts WHERE census_tract_id = ?")
            .unwrap();
        match stmt.query_row([tract_id], |row| Ok((row.get(0)?, row.get(1)?))) {
            Ok(v) => Some(v),
            Err(duckdb::Error::QueryReturnedNoRows) => None,
            Err(e) => panic!("{e}"),
        }
    }

    fn region(tract: &str) -> RegionInfo {
        let tract = TractGeoid::parse(tract).unwrap();
        RegionInfo {
            county_id: tract.county_geoid().to_string(),
            state_id: tract.state_fips().to_string(),
            tract,
            block_id: None,
        }
    }

    #[test]
    fn upsert_is_a_noop_on_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();

        assert!(upsert(&conn, &region("48453001100")).unwrap());
        assert!(!upsert(&conn, &region("48453001100")).unwrap());

        assert_eq!(
            parents(&conn, "48453001100"),
            Some(("48453".to_string(), "48".to_string()))
        );
        assert_eq!(parents(&conn, "36061000100"), None);
    }
}
