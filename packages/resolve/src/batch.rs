//! Bounded iterator over a partition's unresolved points.
//!
//! Pages through `points` in `point_id` order with a keyset cursor, so a
//! pass visits every point that was unresolved when the pass reached it
//! exactly once, even if some of them stay unresolved. The cursor is the
//! only in-memory state; a new iterator starts again from the smallest
//! unresolved id.

use tract_match_database::{DbError, PointStore};
use tract_match_geography_models::UnresolvedPoint;

/// Iterator yielding batches of at most `batch_size` unresolved points.
pub struct UnresolvedBatches<'a> {
    store: &'a PointStore,
    partition_key: &'a str,
    batch_size: usize,
    cursor: Option<String>,
    done: bool,
}

impl<'a> UnresolvedBatches<'a> {
    /// Starts a pass over `partition_key`.
    #[must_use]
    pub const fn new(store: &'a PointStore, partition_key: &'a str, batch_size: usize) -> Self {
        Self {
            store,
            partition_key,
            batch_size,
            cursor: None,
            done: batch_size == 0,
        }
    }

    /// The last `point_id` handed out, if any.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }
}

impl Iterator for UnresolvedBatches<'_> {
    type Item = Result<Vec<UnresolvedPoint>, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let batch = match self.store.get_unresolved(
            self.partition_key,
            self.batch_size,
            self.cursor.as_deref(),
        ) {
            Ok(batch) => batch,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let Some(last) = batch.last() else {
            self.done = true;
            return None;
        };
        self.cursor = Some(last.point_id.clone());
        if batch.len() < self.batch_size {
            self.done = true;
        }

        Some(Ok(batch))
    }
}

#[cfg(test)]
mod tests {
    use tract_match_geography_models::{NewPoint, PointSource};

    use super::*;

    fn point(id: &str) -> NewPoint {
        NewPoint {
            point_id: id.to_string(),
            partition_key: "TX".to_string(),
            source: PointSource::CrimeIncident,
            longitude: Some(-97.74),
            latitude: Some(30.27),
            address: None,
            region_id: None,
        }
    }

    #[test]
    fn walks_every_point_once_in_id_order() {
        let store = PointStore::open_in_memory().unwrap();
        let ids = ["a1", "a2", "a3", "b1", "b2", "c1", "c2"];
        store
            .insert_points(&ids.iter().map(|id| point(id)).collect::<Vec<_>>())
            .unwrap();

        let batches: Vec<Vec<String>> = UnresolvedBatches::new(&store, "TX", 3)
            .map(|b| b.unwrap().into_iter().map(|p| p.point_id).collect())
            .collect();

        assert_eq!(
            batches,
            vec![
                vec!["a1", "a2", "a3"],
                vec!["b1", "b2", "c1"],
                vec!["c2"],
            ]
        );
    }

    #[test]
    fn exact_multiple_ends_with_an_empty_fetch() {
        let store = PointStore::open_in_memory().unwrap();
        store
            .insert_points(&[point("p1"), point("p2")])
            .unwrap();

        let mut batches = UnresolvedBatches::new(&store, "TX", 2);
        assert_eq!(batches.next().unwrap().unwrap().len(), 2);
        assert_eq!(batches.cursor(), Some("p2"));
        assert!(batches.next().is_none());
        assert!(batches.next().is_none());
    }

    #[test]
    fn other_partitions_and_empty_store_yield_nothing() {
        let store = PointStore::open_in_memory().unwrap();
        assert!(UnresolvedBatches::new(&store, "TX", 10).next().is_none());

        store.insert_points(&[point("p1")]).unwrap();
        assert!(UnresolvedBatches::new(&store, "NY", 10).next().is_none());
        assert!(UnresolvedBatches::new(&store, "TX", 0).next().is_none());
    }
}
