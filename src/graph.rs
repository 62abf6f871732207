//! Path graph: endpoint node index and network queries
//!
//! The graph's nodes are the distinct endpoint coordinates of all paths
//! (within the configured tolerance) and its edges are the paths. The index
//! is a lightweight view rebuilt from the path store in O(P); node
//! coincidence uses quantized coordinate keys rather than exact float
//! equality because re-serialized geometries may differ by rounding.

use crate::geom::{Polyline3, PositionOnLine};
use crate::path::{Path, PathId};
use crate::{EngineError, Result};
use geo::{Intersects, Point};
use rayon::prelude::*;
use std::collections::HashMap;

/// Quantized endpoint coordinate key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeKey(i64, i64);

fn node_key(x: f64, y: f64, tolerance: f64) -> NodeKey {
    NodeKey((x / tolerance).round() as i64, (y / tolerance).round() as i64)
}

/// A proper or touching intersection between a candidate geometry and an
/// existing path
#[derive(Debug, Clone, Copy)]
pub struct Crossing {
    /// The existing path that is crossed
    pub other: PathId,
    /// Intersection coordinate
    pub point: Point<f64>,
    /// Fractional position on the candidate geometry
    pub frac_candidate: f64,
    /// Fractional position on the crossed path
    pub frac_other: f64,
}

/// Endpoint-node index over a set of paths
pub struct PathGraph<'a> {
    entries: Vec<&'a Path>,
    nodes: HashMap<NodeKey, Vec<PathId>>,
    tolerance: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<'a> PathGraph<'a> {
    /// Build the index; O(P) given O(1) coordinate hashing
    pub fn build(paths: impl IntoIterator<Item = &'a Path>, tolerance: f64) -> Self {
        let entries: Vec<&'a Path> = paths.into_iter().collect();
        let mut nodes: HashMap<NodeKey, Vec<PathId>> = HashMap::with_capacity(entries.len());
        for path in &entries {
            let first = path.geometry().first();
            let last = path.geometry().last();
            nodes
                .entry(node_key(first.x, first.y, tolerance))
                .or_default()
                .push(path.id());
            nodes
                .entry(node_key(last.x, last.y, tolerance))
                .or_default()
                .push(path.id());
        }
        Self {
            entries,
            nodes,
            tolerance,
        }
    }

    /// Number of distinct endpoint nodes
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn path_count(&self) -> usize {
        self.entries.len()
    }

    /// Paths incident to the node at `(x, y)`, if any
    ///
    /// A path whose two endpoints coincide (a loop) registers twice.
    pub fn paths_at(&self, x: f64, y: f64) -> &[PathId] {
        self.nodes
            .get(&node_key(x, y, self.tolerance))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of path endpoints meeting at `(x, y)`
    #[inline]
    pub fn degree(&self, x: f64, y: f64) -> usize {
        self.paths_at(x, y).len()
    }

    /// Find the path closest to `point`
    ///
    /// Returns the path plus the fractional position of the closest point
    /// and the signed lateral offset of the query point. Fails with
    /// `NoPathFound` when the path set is empty. Ties break on the lower
    /// path identifier, so the result is deterministic.
    pub fn closest_path(&self, point: Point<f64>) -> Result<(PathId, PositionOnLine)> {
        #[cfg(feature = "profiling")]
        profiling::scope!("graph::closest_path");

        self.entries
            .par_iter()
            .filter_map(|path| {
                path.geometry()
                    .locate_point(point)
                    .ok()
                    .map(|pos| (path.id(), pos))
            })
            .min_by(|a, b| {
                a.1.distance
                    .total_cmp(&b.1.distance)
                    .then_with(|| a.0.cmp(&b.0))
            })
            .ok_or(EngineError::NoPathFound)
    }

    /// All intersections between `candidate` and the indexed paths
    ///
    /// A bounding-box pre-filter skips paths that cannot overlap; it is an
    /// optimization, not a correctness requirement. Endpoint touches are
    /// reported too, and the split planner decides per side whether a touch
    /// is an interior cut. Results are ordered by position on the candidate.
    pub fn find_intersections(
        &self,
        candidate: &Polyline3,
        exclude: Option<PathId>,
    ) -> Vec<Crossing> {
        #[cfg(feature = "profiling")]
        profiling::scope!("graph::find_intersections");

        let bbox = candidate.bounding_rect();
        let mut crossings: Vec<Crossing> = self
            .entries
            .par_iter()
            .filter(|path| exclude != Some(path.id()))
            .filter(|path| path.geometry().bounding_rect().intersects(&bbox))
            .flat_map_iter(|path| {
                candidate
                    .intersections(path.geometry(), self.tolerance)
                    .into_iter()
                    .map(move |hit| Crossing {
                        other: path.id(),
                        point: Point::from(hit.point),
                        frac_candidate: hit.frac_a,
                        frac_other: hit.frac_b,
                    })
            })
            .collect();

        crossings.sort_by(|a, b| {
            a.frac_candidate
                .total_cmp(&b.frac_candidate)
                .then_with(|| a.other.cmp(&b.other))
        });
        crossings
    }
}
