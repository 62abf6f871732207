//! Topology placement module
//!
//! A [`Topology`] places one domain object along the network: either a
//! point on a single path with a lateral offset, or an ordered chain of
//! contiguous path spans. The displayed geometry and total length are
//! derived from the referenced paths and recomputed explicitly after any
//! aggregation mutation; nothing here is reactive, which keeps the cost of
//! the split rewrite bounded and predictable.

use crate::aggregation::{Aggregations, PathAggregation};
use crate::geom::{Coord3, Polyline3};
use crate::path::{Path, PathId};
use crate::{EngineError, Result};
use geo::{Distance, Euclidean};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable topology identifier, issued by the network and never recycled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopologyId(u64);

impl TopologyId {
    #[inline]
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TopologyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Domain kind of the object owning a placement
///
/// Used for reporting and filtering only; no engine operation branches on
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    Signage,
    Infrastructure,
    Intervention,
    Trek,
    PointOfInterest,
    LandEdge,
    ZoningEdge,
}

/// Read access to paths by identifier
///
/// The network's own store implements this; split staging implements it
/// over a not-yet-committed view of the store.
pub trait PathProvider {
    fn path(&self, id: PathId) -> Option<&Path>;
}

impl PathProvider for std::collections::BTreeMap<PathId, Path> {
    #[inline]
    fn path(&self, id: PathId) -> Option<&Path> {
        self.get(&id)
    }
}

/// Derived display geometry of a topology
#[derive(Debug, Clone)]
pub enum TopologyGeometry {
    /// Point placement, lateral offset already applied
    Point(Coord3),
    /// Line placement, concatenated in traversal order
    Line(Polyline3),
}

impl TopologyGeometry {
    #[inline]
    pub fn length(&self) -> f64 {
        match self {
            TopologyGeometry::Point(_) => 0.0,
            TopologyGeometry::Line(line) => line.length(),
        }
    }
}

/// A placement of one domain object along the network
#[derive(Debug, Clone)]
pub struct Topology {
    id: TopologyId,
    kind: TopologyKind,
    /// Signed lateral offset, positive to the left of the path direction
    offset: f64,
    /// Traversal-ordered aggregation list; never empty for a live topology
    aggregations: Aggregations,
    /// Derived display geometry, filled by `recompute_geometry`
    geometry: Option<TopologyGeometry>,
    /// Derived total length (sum over aggregations)
    length: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Topology {
    /// Point placement: a single zero-length aggregation
    pub(crate) fn point(
        id: TopologyId,
        kind: TopologyKind,
        path: PathId,
        position: f64,
        offset: f64,
    ) -> Self {
        let mut aggregations = Aggregations::new();
        aggregations.push(PathAggregation::new(path, position, position, 0));
        Self {
            id,
            kind,
            offset,
            aggregations,
            geometry: None,
            length: 0.0,
        }
    }

    /// Line placement from an already validated, ordered span list
    pub(crate) fn line(
        id: TopologyId,
        kind: TopologyKind,
        aggregations: Aggregations,
        offset: f64,
    ) -> Self {
        Self {
            id,
            kind,
            offset,
            aggregations,
            geometry: None,
            length: 0.0,
        }
    }

    /// Check that consecutive spans join within `tolerance`
    ///
    /// The exit point of span i must coincide with the entry point of span
    /// i+1. Fails with `DisconnectedSpans` naming the first span that does
    /// not join.
    pub(crate) fn validate_contiguity<P: PathProvider>(
        spans: &[PathAggregation],
        provider: &P,
        tolerance: f64,
    ) -> Result<()> {
        for (i, pair) in spans.windows(2).enumerate() {
            let exit_path = provider
                .path(pair[0].path)
                .ok_or(EngineError::PathNotFound {
                    id: pair[0].path.raw(),
                })?;
            let entry_path = provider
                .path(pair[1].path)
                .ok_or(EngineError::PathNotFound {
                    id: pair[1].path.raw(),
                })?;
            let exit = exit_path
                .geometry()
                .point_at_fraction(pair[0].end_position);
            let entry = entry_path
                .geometry()
                .point_at_fraction(pair[1].start_position);
            if Euclidean.distance(exit.point(), entry.point()) > tolerance {
                return Err(EngineError::DisconnectedSpans { index: i + 1 });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn id(&self) -> TopologyId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> TopologyKind {
        self.kind
    }

    #[inline]
    pub fn offset(&self) -> f64 {
        self.offset
    }

    #[inline]
    pub fn aggregations(&self) -> &[PathAggregation] {
        &self.aggregations
    }

    pub(crate) fn aggregations_mut(&mut self) -> &mut Aggregations {
        &mut self.aggregations
    }

    pub(crate) fn set_aggregations(&mut self, aggregations: Aggregations) {
        self.aggregations = aggregations;
    }

    /// Derived display geometry; `None` before the first recomputation
    #[inline]
    pub fn geometry(&self) -> Option<&TopologyGeometry> {
        self.geometry.as_ref()
    }

    /// Derived total length, O(1)
    #[inline]
    pub fn length(&self) -> f64 {
        self.length
    }

    /// True iff there is exactly one aggregation with equal start/end
    #[inline]
    pub fn is_point(&self) -> bool {
        self.aggregations.len() == 1
            && self.aggregations[0].start_position == self.aggregations[0].end_position
    }

    /// Recompute the derived geometry and length from the current
    /// aggregations
    ///
    /// Concatenates the sub-geometry of every aggregation in traversal
    /// order (reversed for spans with start > end) and applies the lateral
    /// offset for point placements. Idempotent: calling it twice without an
    /// intervening mutation yields identical results.
    pub fn recompute_geometry<P: PathProvider>(
        &mut self,
        provider: &P,
        span_epsilon: f64,
        node_tolerance: f64,
    ) -> Result<()> {
        let mut slices: Vec<Polyline3> = Vec::with_capacity(self.aggregations.len());
        for aggregation in &self.aggregations {
            if aggregation.is_point(span_epsilon) {
                continue;
            }
            let path = provider
                .path(aggregation.path)
                .ok_or(EngineError::PathNotFound {
                    id: aggregation.path.raw(),
                })?;
            slices.push(
                path.geometry()
                    .slice(aggregation.start_position, aggregation.end_position)?,
            );
        }

        if slices.is_empty() {
            // Point placement, or a line collapsed to zero length
            let first = self
                .aggregations
                .first()
                .ok_or(EngineError::OrphanTopology { id: self.id.raw() })?;
            let path = provider.path(first.path).ok_or(EngineError::PathNotFound {
                id: first.path.raw(),
            })?;
            let base = path.geometry().point_at_fraction(first.start_position);
            let (dx, dy) = path.geometry().direction_at(first.start_position);
            // Offset along the left normal (-dy, dx)
            let placed = Coord3::new(
                base.x - dy * self.offset,
                base.y + dx * self.offset,
                base.z,
            );
            self.geometry = Some(TopologyGeometry::Point(placed));
            self.length = 0.0;
            return Ok(());
        }

        let mut vertices: Vec<Coord3> = Vec::new();
        let mut total = 0.0;
        for (si, slice) in slices.iter().enumerate() {
            total += slice.length();
            for (vi, vertex) in slice.vertices().iter().enumerate() {
                if si > 0 && vi == 0 {
                    // Joint vertex shared with the previous slice
                    if let Some(prev) = vertices.last() {
                        if Euclidean.distance(prev.point(), vertex.point()) <= node_tolerance {
                            continue;
                        }
                    }
                }
                vertices.push(*vertex);
            }
        }

        self.geometry = Some(TopologyGeometry::Line(Polyline3::new(vertices)?));
        self.length = total;
        Ok(())
    }
}
