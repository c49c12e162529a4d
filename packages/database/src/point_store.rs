//! Persistent point store.
//!
//! One `points` table holds every crime incident and property listing
//! point, keyed by `point_id` and partitioned by state. A point's
//! `region_id` is written at most once: updates only ever touch rows
//! whose `region_id` is still `NULL`, so repeated resolution runs
//! converge instead of overwriting earlier answers.
//!
//! Transaction boundaries belong to the caller ([`PointStore::begin`],
//! [`PointStore::commit`], [`PointStore::rollback`]).

use std::collections::BTreeSet;
use std::path::Path;

use duckdb::Connection;
use tract_match_geography_models::{
    NewPoint, Partition, RegionInfo, ResolutionMethod, ResolvedPoint, TractGeoid, UnresolvedPoint,
};

use crate::DbError;

/// Number of rows per INSERT chunk.
const CHUNK_SIZE: usize = 2_000;

/// Handle to the point store. Owns its `DuckDB` connection.
pub struct PointStore {
    conn: Connection,
}

impl PointStore {
    /// Opens (or creates) the point store at `path` and ensures the
    /// schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the directory, connection, or schema
    /// creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "SET threads = 4;
             SET memory_limit = '512MB';",
        )?;

        Self::with_connection(conn)
    }

    /// Opens the point store at the default path.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_default() -> Result<Self, DbError> {
        Self::open(&crate::paths::points_db_path())
    }

    /// Opens a throwaway in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;
        crate::tracts::create_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a transaction is already open or the
    /// statement fails.
    pub fn begin(&self) -> Result<(), DbError> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if no transaction is open or the commit fails.
    pub fn commit(&self) -> Result<(), DbError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if no transaction is open or the rollback fails.
    pub fn rollback(&self) -> Result<(), DbError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Inserts points. A point whose `point_id` already exists is
    /// skipped, not updated and not an error.
    ///
    /// Points carrying a `region_id` are stored as resolved with
    /// [`ResolutionMethod::Seed`].
    ///
    /// Returns the number of rows actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any insert fails.
    pub fn insert_points(&self, points: &[NewPoint]) -> Result<u64, DbError> {
        if points.is_empty() {
            return Ok(0);
        }

        // Keep the first occurrence of each id; later duplicates would be
        // no-ops against the table anyway.
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let deduped: Vec<&NewPoint> = points
            .iter()
            .filter(|p| seen.insert(p.point_id.as_str()))
            .collect();

        if deduped.len() < points.len() {
            log::debug!(
                "Deduplicated INSERT batch: {} -> {} rows",
                points.len(),
                deduped.len()
            );
        }

        let seed_label = ResolutionMethod::Seed.to_string();
        let mut total_inserted = 0u64;

        for chunk in deduped.chunks(CHUNK_SIZE) {
            let mut sql = String::from(
                "INSERT INTO points (
                    point_id, partition_key, source, longitude, latitude,
                    address, region_id, resolved_by, resolved_at
                ) VALUES ",
            );

            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(
                    "(?, ?, ?, ?, ?, ?, ?, ?, CASE WHEN ? THEN CURRENT_TIMESTAMP ELSE NULL END)",
                );
            }
            sql.push_str(" ON CONFLICT (point_id) DO NOTHING");

            let mut stmt = self.conn.prepare(&sql)?;
            let mut param_idx = 1usize;

            for point in chunk {
                let seeded = point.region_id.is_some();
                let resolved_by = seeded.then_some(seed_label.as_str());

                stmt.raw_bind_parameter(param_idx, point.point_id.as_str())?;
                stmt.raw_bind_parameter(param_idx + 1, point.partition_key.as_str())?;
                stmt.raw_bind_parameter(param_idx + 2, point.source.as_ref())?;
                stmt.raw_bind_parameter(param_idx + 3, point.longitude)?;
                stmt.raw_bind_parameter(param_idx + 4, point.latitude)?;
                stmt.raw_bind_parameter(param_idx + 5, point.address.as_deref())?;
                stmt.raw_bind_parameter(
                    param_idx + 6,
                    point.region_id.as_ref().map(TractGeoid::as_str),
                )?;
                stmt.raw_bind_parameter(param_idx + 7, resolved_by)?;
                stmt.raw_bind_parameter(param_idx + 8, seeded)?;

                param_idx += 9;
            }

            let inserted = stmt.raw_execute()?;
            total_inserted += inserted as u64;
        }

        Ok(total_inserted)
    }

    /// Returns up to `limit` unresolved points in `partition_key`,
    /// ordered by `point_id`, starting strictly after `after` when given.
    ///
    /// The keyset cursor lets a caller walk past points that stay
    /// unresolved without fetching them again.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn get_unresolved(
        &self,
        partition_key: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<Vec<UnresolvedPoint>, DbError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let cursor_clause = if after.is_some() {
            " AND point_id > ?"
        } else {
            ""
        };
        let sql = format!(
            "SELECT point_id, longitude, latitude, address
             FROM points
             WHERE partition_key = ?
               AND region_id IS NULL{cursor_clause}
             ORDER BY point_id
             LIMIT {limit}"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        stmt.raw_bind_parameter(1, partition_key)?;
        if let Some(cursor) = after {
            stmt.raw_bind_parameter(2, cursor)?;
        }
        stmt.raw_execute()?;

        let mut results = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            results.push(UnresolvedPoint {
                point_id: row.get(0)?,
                longitude: row.get(1)?,
                latitude: row.get(2)?,
                address: row.get(3)?,
            });
        }

        Ok(results)
    }

    /// Returns every resolved point in `partition_key` that has usable
    /// coordinates.
    ///
    /// Rows with non-finite coordinates or a malformed tract id are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn get_resolved(&self, partition_key: &str) -> Result<Vec<ResolvedPoint>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT longitude, latitude, region_id
             FROM points
             WHERE partition_key = ?
               AND region_id IS NOT NULL
               AND longitude IS NOT NULL
               AND latitude IS NOT NULL
             ORDER BY point_id",
        )?;
        stmt.raw_bind_parameter(1, partition_key)?;
        stmt.raw_execute()?;

        let mut results = Vec::new();
        let mut malformed = 0u64;
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let longitude: f64 = row.get(0)?;
            let latitude: f64 = row.get(1)?;
            let region: String = row.get(2)?;

            if !longitude.is_finite() || !latitude.is_finite() {
                malformed += 1;
                continue;
            }
            let Ok(region_id) = TractGeoid::parse(&region) else {
                malformed += 1;
                continue;
            };

            results.push(ResolvedPoint::new(longitude, latitude, region_id));
        }

        if malformed > 0 {
            log::warn!("Skipped {malformed} malformed resolved points in partition {partition_key}");
        }

        Ok(results)
    }

    /// Writes `region_id` to a point that does not have one yet.
    ///
    /// Returns `true` if the point was updated and `false` if it already
    /// had a tract (which is left unchanged).
    ///
    /// # Errors
    ///
    /// * [`DbError::NotFound`] if `point_id` does not exist.
    /// * [`DbError::PartitionMismatch`] if the point belongs to another
    ///   partition.
    /// * [`DbError::InvalidCoordinate`] if the point's stored coordinates
    ///   fall outside the partition's bounds.
    /// * [`DbError::DuckDb`] if a query fails.
    pub fn set_region(
        &self,
        point_id: &str,
        region_id: &TractGeoid,
        method: ResolutionMethod,
        partition: &Partition,
    ) -> Result<bool, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT partition_key, longitude, latitude, region_id
             FROM points WHERE point_id = ?",
        )?;
        let row = stmt.query_row([point_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        });

        let (stored_partition, longitude, latitude, existing) = match row {
            Ok(v) => v,
            Err(duckdb::Error::QueryReturnedNoRows) => {
                return Err(DbError::NotFound {
                    point_id: point_id.to_string(),
                });
            }
            Err(e) => return Err(DbError::DuckDb(e)),
        };

        if stored_partition != partition.key() {
            return Err(DbError::PartitionMismatch {
                point_id: point_id.to_string(),
                expected: partition.key().to_string(),
                actual: stored_partition,
            });
        }

        if let (Some(lon), Some(lat)) = (longitude, latitude)
            && !partition.bounds().contains(lon, lat)
        {
            return Err(DbError::InvalidCoordinate {
                point_id: point_id.to_string(),
                longitude: lon,
                latitude: lat,
                partition: partition.key().to_string(),
            });
        }

        if existing.is_some() {
            log::trace!("Point {point_id} already resolved, leaving it unchanged");
            return Ok(false);
        }

        let updated = self.conn.execute(
            "UPDATE points
             SET region_id = ?, resolved_by = ?, resolved_at = CURRENT_TIMESTAMP
             WHERE point_id = ? AND region_id IS NULL",
            duckdb::params![region_id.as_str(), method.as_ref(), point_id],
        )?;

        Ok(updated > 0)
    }

    /// Records an authoritative tract and its county/state parents.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    pub fn record_region(&self, region: &RegionInfo) -> Result<bool, DbError> {
        crate::tracts::upsert(&self.conn, region)
    }

    /// Returns the tract recorded for a point, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if the point does not exist, or
    /// [`DbError::Conversion`] if the stored tract id is malformed.
    pub fn region_of(&self, point_id: &str) -> Result<Option<TractGeoid>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT region_id FROM points WHERE point_id = ?")?;
        let result = stmt.query_row([point_id], |row| row.get::<_, Option<String>>(0));

        match result {
            Ok(Some(region)) => TractGeoid::parse(&region)
                .map(Some)
                .map_err(|e| DbError::Conversion {
                    message: e.to_string(),
                }),
            Ok(None) => Ok(None),
            Err(duckdb::Error::QueryReturnedNoRows) => Err(DbError::NotFound {
                point_id: point_id.to_string(),
            }),
            Err(e) => Err(DbError::DuckDb(e)),
        }
    }

    /// Returns how a point's tract was determined, if it is resolved.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if the point does not exist.
    pub fn resolution_method(&self, point_id: &str) -> Result<Option<ResolutionMethod>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT resolved_by FROM points WHERE point_id = ?")?;
        let result = stmt.query_row([point_id], |row| row.get::<_, Option<String>>(0));

        match result {
            Ok(Some(method)) => method
                .parse::<ResolutionMethod>()
                .map(Some)
                .map_err(|e| DbError::Conversion {
                    message: format!("resolved_by {method:?}: {e}"),
                }),
            Ok(None) => Ok(None),
            Err(duckdb::Error::QueryReturnedNoRows) => Err(DbError::NotFound {
                point_id: point_id.to_string(),
            }),
            Err(e) => Err(DbError::DuckDb(e)),
        }
    }

    /// Number of points in `partition_key` still missing a tract.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn count_unresolved(&self, partition_key: &str) -> Result<u64, DbError> {
        self.count(
            "SELECT COUNT(*) FROM points WHERE partition_key = ? AND region_id IS NULL",
            partition_key,
        )
    }

    /// Number of points in `partition_key` with a tract.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn count_resolved(&self, partition_key: &str) -> Result<u64, DbError> {
        self.count(
            "SELECT COUNT(*) FROM points WHERE partition_key = ? AND region_id IS NOT NULL",
            partition_key,
        )
    }

    fn count(&self, sql: &str, partition_key: &str) -> Result<u64, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let count: i64 = stmt.query_row([partition_key], |row| row.get(0))?;
        u64::try_from(count).map_err(|e| DbError::Conversion {
            message: format!("negative row count {count}: {e}"),
        })
    }
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS points (
            point_id TEXT NOT NULL PRIMARY KEY,
            partition_key TEXT NOT NULL,
            source TEXT NOT NULL,
            longitude DOUBLE,
            latitude DOUBLE,
            address TEXT,
            region_id TEXT,
            resolved_by TEXT,
            resolved_at TIMESTAMPTZ
        );",
    )?;
    Ok(())
}
