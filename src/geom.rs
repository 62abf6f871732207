//! Geometry provider adapter over the `geo` crate
//!
//! This module owns the 3D polyline type used by every path and exposes the
//! polyline operations the engine needs: length, point-at-fraction,
//! closest-point location, sub-polyline extraction and pairwise
//! intersection. All linear referencing is done in 2D arc length on a single
//! planar coordinate system; the z coordinate rides along and is only used
//! for elevation scalars.

use crate::{EngineError, Result};
use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Coord, Distance, Euclidean, Intersects, LineLocatePoint, LineString, Point, Rect};

/// Consecutive vertices closer than this (in coordinate units) collapse into
/// one during construction, so every stored segment has positive length.
const MIN_VERTEX_SPACING: f64 = 1e-12;

/// A single 3D vertex in the fixed planar coordinate system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coord3 {
    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Project to a 2D `geo` point (drops z)
    #[inline]
    pub fn point(&self) -> Point<f64> {
        Point::new(self.x, self.y)
    }

    #[inline]
    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Result of locating a raw coordinate against a polyline
#[derive(Debug, Clone, Copy)]
pub struct PositionOnLine {
    /// Fractional position of the closest point, in [0, 1] of 2D arc length
    pub fraction: f64,
    /// Unsigned 2D distance from the query point to the closest point
    pub distance: f64,
    /// Signed lateral offset: positive when the query point lies to the
    /// left of the polyline direction
    pub offset: f64,
}

/// An intersection between two polylines, located on both
#[derive(Debug, Clone, Copy)]
pub(crate) struct PolyIntersection {
    pub point: Coord<f64>,
    pub frac_a: f64,
    pub frac_b: f64,
}

/// A directed 3D polyline with precomputed arc lengths and bounding box
///
/// The vertex list is immutable after construction; cumulative 2D lengths
/// and the 2D `LineString` used by `geo` algorithms are cached alongside it.
#[derive(Debug, Clone)]
pub struct Polyline3 {
    vertices: Vec<Coord3>,
    /// Cumulative 2D arc length per vertex; `cumulative[0] == 0.0`
    cumulative: Vec<f64>,
    /// Cached 2D projection for `geo` algorithms
    line_string: LineString<f64>,
    /// Precomputed 2D bounding box
    bbox: Rect<f64>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Polyline3 {
    /// Create a polyline from an ordered vertex list
    ///
    /// Consecutive duplicate vertices are collapsed. Fails with
    /// `InvalidGeometry` when fewer than two distinct vertices remain or any
    /// coordinate is non-finite.
    pub fn new(vertices: Vec<Coord3>) -> Result<Self> {
        if vertices.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidGeometry {
                reason: "non-finite coordinate".to_string(),
            });
        }

        let mut deduped: Vec<Coord3> = Vec::with_capacity(vertices.len());
        for v in vertices {
            let duplicate = deduped
                .last()
                .is_some_and(|prev| Euclidean.distance(prev.point(), v.point()) <= MIN_VERTEX_SPACING);
            if !duplicate {
                deduped.push(v);
            }
        }

        if deduped.len() < 2 {
            return Err(EngineError::InvalidGeometry {
                reason: "a polyline needs at least two distinct vertices".to_string(),
            });
        }

        Ok(Self::assemble(deduped))
    }

    /// Construction helper for 2D input (z = 0), mostly used by tests
    pub fn from_xy(points: &[(f64, f64)]) -> Result<Self> {
        Self::new(points.iter().map(|&(x, y)| Coord3::new(x, y, 0.0)).collect())
    }

    /// Construction helper for 3D tuples
    pub fn from_xyz(points: &[(f64, f64, f64)]) -> Result<Self> {
        Self::new(points.iter().map(|&(x, y, z)| Coord3::new(x, y, z)).collect())
    }

    /// Build the caches; `vertices` must already be validated
    fn assemble(vertices: Vec<Coord3>) -> Self {
        let mut cumulative = Vec::with_capacity(vertices.len());
        cumulative.push(0.0);
        for pair in vertices.windows(2) {
            let d = Euclidean.distance(pair[0].point(), pair[1].point());
            cumulative.push(cumulative.last().copied().unwrap_or(0.0) + d);
        }

        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for v in &vertices {
            min_x = min_x.min(v.x);
            min_y = min_y.min(v.y);
            max_x = max_x.max(v.x);
            max_y = max_y.max(v.y);
        }
        let bbox = Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y });

        let line_string: LineString<f64> =
            vertices.iter().map(|v| Coord { x: v.x, y: v.y }).collect();

        Self {
            vertices,
            cumulative,
            line_string,
            bbox,
        }
    }

    #[inline]
    pub fn vertices(&self) -> &[Coord3] {
        &self.vertices
    }

    /// Total 2D arc length
    #[inline]
    pub fn length(&self) -> f64 {
        *self.cumulative.last().unwrap_or(&0.0)
    }

    #[inline]
    pub fn first(&self) -> Coord3 {
        self.vertices[0]
    }

    #[inline]
    pub fn last(&self) -> Coord3 {
        self.vertices[self.vertices.len() - 1]
    }

    /// The cached 2D projection
    #[inline]
    pub fn line_string(&self) -> &LineString<f64> {
        &self.line_string
    }

    #[inline]
    pub fn bounding_rect(&self) -> Rect<f64> {
        self.bbox
    }

    /// Index of the segment containing arc length `d`
    fn segment_index_at(&self, d: f64) -> usize {
        let i = self.cumulative.partition_point(|&c| c <= d);
        i.saturating_sub(1).min(self.vertices.len() - 2)
    }

    /// Interpolate the vertex at arc length `d` (clamped to the polyline)
    fn point_at_length(&self, d: f64) -> Coord3 {
        let d = d.clamp(0.0, self.length());
        let i = self.segment_index_at(d);
        let seg_len = self.cumulative[i + 1] - self.cumulative[i];
        let t = if seg_len > 0.0 {
            ((d - self.cumulative[i]) / seg_len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let a = self.vertices[i];
        let b = self.vertices[i + 1];
        Coord3::new(
            a.x + (b.x - a.x) * t,
            a.y + (b.y - a.y) * t,
            a.z + (b.z - a.z) * t,
        )
    }

    /// Interpolate the vertex at fractional position `fraction` in [0, 1]
    ///
    /// The z coordinate is interpolated linearly along 2D arc length.
    pub fn point_at_fraction(&self, fraction: f64) -> Coord3 {
        self.point_at_length(fraction.clamp(0.0, 1.0) * self.length())
    }

    /// Normalized 2D direction of the segment containing `fraction`
    pub fn direction_at(&self, fraction: f64) -> (f64, f64) {
        let d = fraction.clamp(0.0, 1.0) * self.length();
        let i = self.segment_index_at(d);
        let a = self.vertices[i];
        let b = self.vertices[i + 1];
        let len = self.cumulative[i + 1] - self.cumulative[i];
        ((b.x - a.x) / len, (b.y - a.y) / len)
    }

    /// Locate the closest point on this polyline to `p`
    ///
    /// Returns the fractional position, the unsigned distance and the signed
    /// lateral offset (positive = left of the polyline direction).
    pub fn locate_point(&self, p: Point<f64>) -> Result<PositionOnLine> {
        let fraction =
            self.line_string
                .line_locate_point(&p)
                .ok_or_else(|| EngineError::InvalidGeometry {
                    reason: "cannot locate a point on a degenerate polyline".to_string(),
                })?;
        let snapped = self.point_at_fraction(fraction);
        let distance = Euclidean.distance(snapped.point(), p);
        let (dx, dy) = self.direction_at(fraction);
        let cross = dx * (p.y() - snapped.y) - dy * (p.x() - snapped.x);
        let offset = if cross < 0.0 { -distance } else { distance };
        Ok(PositionOnLine {
            fraction,
            distance,
            offset,
        })
    }

    /// Extract the sub-polyline between two fractional positions
    ///
    /// Direction is preserved: `start > end` yields a reversed sub-polyline.
    /// Fails with `InvalidGeometry` when the requested span is degenerate.
    pub fn slice(&self, start: f64, end: f64) -> Result<Polyline3> {
        if !start.is_finite() || !end.is_finite() {
            return Err(EngineError::InvalidGeometry {
                reason: "non-finite slice fraction".to_string(),
            });
        }
        let reversed = start > end;
        let lo = start.min(end).clamp(0.0, 1.0);
        let hi = start.max(end).clamp(0.0, 1.0);
        let total = self.length();
        let lo_d = lo * total;
        let hi_d = hi * total;

        let mut verts = Vec::new();
        verts.push(self.point_at_length(lo_d));
        for (i, v) in self.vertices.iter().enumerate() {
            if self.cumulative[i] > lo_d && self.cumulative[i] < hi_d {
                verts.push(*v);
            }
        }
        verts.push(self.point_at_length(hi_d));
        if reversed {
            verts.reverse();
        }
        Polyline3::new(verts)
    }

    /// A copy of this polyline traversed in the opposite direction
    pub fn reversed(&self) -> Polyline3 {
        let mut vertices = self.vertices.clone();
        vertices.reverse();
        Self::assemble(vertices)
    }

    /// All single-point intersections with `other`, located on both
    /// polylines, sorted by position on `self`
    ///
    /// Points closer than `tolerance` collapse into one (a crossing exactly
    /// at a shared vertex is reported by both adjacent segments).
    pub(crate) fn intersections(
        &self,
        other: &Polyline3,
        tolerance: f64,
    ) -> Vec<PolyIntersection> {
        if !self.bbox.intersects(&other.bbox) {
            return Vec::new();
        }

        let mut found: Vec<PolyIntersection> = Vec::new();
        for (i, la) in self.line_string.lines().enumerate() {
            for (j, lb) in other.line_string.lines().enumerate() {
                match line_intersection(la, lb) {
                    Some(LineIntersection::SinglePoint { intersection, .. }) => {
                        found.push(PolyIntersection {
                            point: intersection,
                            frac_a: self.fraction_of(i, intersection),
                            frac_b: other.fraction_of(j, intersection),
                        });
                    }
                    Some(LineIntersection::Collinear { .. }) => {
                        // Interior sharing violates the network invariant and
                        // cannot be reduced to cut points.
                        tracing::warn!(
                            "collinear overlap between polylines at segments {} / {}",
                            i,
                            j
                        );
                    }
                    None => {}
                }
            }
        }

        found.sort_by(|a, b| a.frac_a.total_cmp(&b.frac_a));
        found.dedup_by(|a, b| {
            Euclidean.distance(Point::from(a.point), Point::from(b.point)) <= tolerance
        });
        found
    }

    /// Fractional position of a coordinate known to lie on segment `seg`
    fn fraction_of(&self, seg: usize, c: Coord<f64>) -> f64 {
        let d = self.cumulative[seg] + Euclidean.distance(self.vertices[seg].point(), Point::from(c));
        (d / self.length()).clamp(0.0, 1.0)
    }

    /// Per-vertex (distance along the line, elevation) samples
    pub fn elevation_profile(&self) -> Vec<(f64, f64)> {
        self.cumulative
            .iter()
            .zip(&self.vertices)
            .map(|(&d, v)| (d, v.z))
            .collect()
    }
}
