#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory nearest-neighbour index over resolved points.
//!
//! Built from a partition's resolved points, bulk-loaded into an R-tree
//! and queried for the `k` nearest resolved neighbours of an unresolved
//! point. Distances are planar Euclidean in degrees, which is what the
//! confidence classifier is trained on.
//!
//! Partitions with more than `cap` resolved points are uniformly
//! subsampled before loading so memory stays bounded.

use rand::Rng;
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use thiserror::Error;
use tract_match_geography_models::{ResolvedPoint, TractGeoid};

/// Default upper bound on indexed points per partition.
pub const DEFAULT_INDEX_CAP: usize = 200_000;

/// Errors from building a [`NeighborIndex`].
#[derive(Debug, Error)]
pub enum MatchError {
    /// The index could not be built.
    #[error("Failed to build neighbour index: {reason}")]
    IndexBuildFailed {
        /// Why the build failed.
        reason: String,
    },
}

/// A resolved point stored in the R-tree. `slot` indexes into the
/// owning [`NeighborIndex`]'s region table.
#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedPoint {
    position: [f64; 2],
    slot: usize,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx.mul_add(dx, dy * dy)
    }
}

/// The nearest resolved neighbours of a query point.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbors {
    /// Tract of the nearest neighbour.
    pub region_id: TractGeoid,
    /// Distances to the `k` nearest neighbours, ascending.
    pub distances: Vec<f64>,
}

impl Neighbors {
    /// Distance to the nearest neighbour.
    #[must_use]
    pub fn nearest_distance(&self) -> f64 {
        self.distances.first().copied().unwrap_or(f64::INFINITY)
    }
}

/// Spatial index over a (possibly subsampled) set of resolved points.
pub struct NeighborIndex {
    tree: RTree<IndexedPoint>,
    positions: Vec<[f64; 2]>,
    regions: Vec<TractGeoid>,
    source_len: usize,
}

impl std::fmt::Debug for NeighborIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeighborIndex")
            .field("len", &self.len())
            .field("source_len", &self.source_len)
            .finish_non_exhaustive()
    }
}

impl NeighborIndex {
    /// Builds an index from `points`.
    ///
    /// Points with non-finite coordinates are skipped. When more than
    /// `cap` usable points remain, exactly `cap` of them are drawn
    /// uniformly without replacement using `rng`.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::IndexBuildFailed`] if `cap` is zero or no
    /// usable points remain.
    pub fn build<R: Rng + ?Sized>(
        points: &[ResolvedPoint],
        cap: usize,
        rng: &mut R,
    ) -> Result<Self, MatchError> {
        if cap == 0 {
            return Err(MatchError::IndexBuildFailed {
                reason: "index cap must be positive".to_string(),
            });
        }

        let usable: Vec<&ResolvedPoint> = points
            .iter()
            .filter(|p| p.longitude.is_finite() && p.latitude.is_finite())
            .collect();
        if usable.len() < points.len() {
            log::warn!(
                "Skipping {} resolved point(s) with non-finite coordinates",
                points.len() - usable.len()
            );
        }
        if usable.is_empty() {
            return Err(MatchError::IndexBuildFailed {
                reason: "no resolved points".to_string(),
            });
        }

        let source_len = usable.len();
        let selected: Vec<&ResolvedPoint> = if source_len > cap {
            let mut picks = rand::seq::index::sample(rng, source_len, cap).into_vec();
            picks.sort_unstable();
            log::info!("Subsampling {source_len} resolved points down to {cap}");
            picks.into_iter().map(|i| usable[i]).collect()
        } else {
            usable
        };

        let mut positions = Vec::with_capacity(selected.len());
        let mut regions = Vec::with_capacity(selected.len());
        let mut entries = Vec::with_capacity(selected.len());
        for (slot, p) in selected.into_iter().enumerate() {
            let position = [p.longitude, p.latitude];
            positions.push(position);
            regions.push(p.region_id.clone());
            entries.push(IndexedPoint { position, slot });
        }

        let tree = RTree::bulk_load(entries);
        log::debug!("Built neighbour index with {} points", tree.size());

        Ok(Self {
            tree,
            positions,
            regions,
            source_len,
        })
    }

    /// Number of indexed points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index holds no points (never true for a built index).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Number of usable points offered to [`Self::build`], before
    /// subsampling.
    #[must_use]
    pub const fn source_len(&self) -> usize {
        self.source_len
    }

    /// Whether the index holds a subsample rather than every point.
    #[must_use]
    pub fn is_subsampled(&self) -> bool {
        self.len() < self.source_len
    }

    /// Position of the indexed point in `slot`.
    #[must_use]
    pub fn position(&self, slot: usize) -> Option<[f64; 2]> {
        self.positions.get(slot).copied()
    }

    /// Tract of the indexed point in `slot`.
    #[must_use]
    pub fn region(&self, slot: usize) -> Option<&TractGeoid> {
        self.regions.get(slot)
    }

    /// Returns the `k` nearest indexed neighbours of `(longitude,
    /// latitude)`, or `None` if `k` is zero or fewer than `k` points are
    /// indexed.
    #[must_use]
    pub fn query(&self, longitude: f64, latitude: f64, k: usize) -> Option<Neighbors> {
        self.nearest(&[longitude, latitude], k, None)
    }

    /// Like [`Self::query`], centred on the indexed point in `slot` and
    /// skipping that point itself. Used for leave-one-out training.
    #[must_use]
    pub fn query_excluding(&self, slot: usize, k: usize) -> Option<Neighbors> {
        let position = self.position(slot)?;
        self.nearest(&position, k, Some(slot))
    }

    fn nearest(&self, point: &[f64; 2], k: usize, exclude: Option<usize>) -> Option<Neighbors> {
        if k == 0 || !point[0].is_finite() || !point[1].is_finite() {
            return None;
        }

        let mut nearest_slot = None;
        let mut distances = Vec::with_capacity(k);
        for (entry, distance_2) in self
            .tree
            .nearest_neighbor_iter_with_distance_2(point)
            .filter(|(e, _)| Some(e.slot) != exclude)
            .take(k)
        {
            nearest_slot.get_or_insert(entry.slot);
            distances.push(distance_2.sqrt());
        }

        if distances.len() < k {
            return None;
        }

        Some(Neighbors {
            region_id: self.regions[nearest_slot?].clone(),
            distances,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng as _, rngs::StdRng};

    use super::*;

    fn tract(geoid: &str) -> TractGeoid {
        TractGeoid::parse(geoid).unwrap()
    }

    fn grid(n: usize) -> Vec<ResolvedPoint> {
        (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let (x, y) = ((i % 500) as f64 * 0.001, (i / 500) as f64 * 0.001);
                let t = if x < 0.25 { "48453001100" } else { "48453001200" };
                ResolvedPoint::new(-97.9 + x, 30.1 + y, tract(t))
            })
            .collect()
    }

    #[test]
    fn single_point_nearest_distance() {
        let points = vec![ResolvedPoint::new(0.0, 0.0, tract("11001000100"))];
        let index = NeighborIndex::build(&points, DEFAULT_INDEX_CAP, &mut StdRng::seed_from_u64(1))
            .unwrap();

        let n = index.query(0.1, 0.1, 1).unwrap();
        assert_eq!(n.region_id.as_str(), "11001000100");
        assert!((n.nearest_distance() - 0.141_421).abs() < 1e-6);
    }

    #[test]
    fn fewer_than_k_points_is_none() {
        let points = vec![
            ResolvedPoint::new(0.0, 0.0, tract("11001000100")),
            ResolvedPoint::new(1.0, 1.0, tract("11001000200")),
        ];
        let index = NeighborIndex::build(&points, 10, &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(index.query(0.0, 0.0, 2).is_some());
        assert!(index.query(0.0, 0.0, 3).is_none());
        assert!(index.query(0.0, 0.0, 0).is_none());
        // leave-one-out only sees the other point
        assert!(index.query_excluding(0, 2).is_none());
        let other = index.query_excluding(0, 1).unwrap();
        assert_eq!(other.region_id.as_str(), "11001000200");
    }

    #[test]
    fn empty_input_fails() {
        let err = NeighborIndex::build(&[], 10, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, MatchError::IndexBuildFailed { .. }));

        let nan = vec![ResolvedPoint::new(f64::NAN, 0.0, tract("11001000100"))];
        assert!(NeighborIndex::build(&nan, 10, &mut StdRng::seed_from_u64(1)).is_err());

        let one = vec![ResolvedPoint::new(0.0, 0.0, tract("11001000100"))];
        assert!(NeighborIndex::build(&one, 0, &mut StdRng::seed_from_u64(1)).is_err());
    }

    #[test]
    fn distances_are_ascending_and_k_does_not_move_the_nearest() {
        let points = grid(5_000);
        let index = NeighborIndex::build(&points, DEFAULT_INDEX_CAP, &mut StdRng::seed_from_u64(7))
            .unwrap();

        let first = index.query(-97.7003, 30.1042, 1).unwrap();
        for k in 2..=8 {
            let n = index.query(-97.7003, 30.1042, k).unwrap();
            assert_eq!(n.distances.len(), k);
            assert!(n.distances.windows(2).all(|w| w[0] <= w[1]));
            assert!((n.nearest_distance() - first.nearest_distance()).abs() < 1e-12);
            assert_eq!(n.region_id, first.region_id);
        }
    }

    #[test]
    fn same_seed_same_index() {
        let points = grid(3_000);
        let a = NeighborIndex::build(&points, 1_000, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = NeighborIndex::build(&points, 1_000, &mut StdRng::seed_from_u64(42)).unwrap();

        assert_eq!(a.positions, b.positions);
        for (lon, lat) in [(-97.85, 30.102), (-97.6, 30.105), (-97.75, 30.1)] {
            assert_eq!(a.query(lon, lat, 3), b.query(lon, lat, 3));
        }
    }

    #[test]
    fn oversized_partition_is_subsampled_to_cap() {
        let points = grid(250_000);
        let index = NeighborIndex::build(&points, DEFAULT_INDEX_CAP, &mut StdRng::seed_from_u64(9))
            .unwrap();

        assert_eq!(index.len(), 200_000);
        assert_eq!(index.source_len(), 250_000);
        assert!(index.is_subsampled());
        assert!(index.query(-97.7, 30.2, 8).is_some());
    }
}
