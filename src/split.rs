//! Split and merge planning
//!
//! The split/rebalance algorithm is an explicit, pure, callable operation:
//! planning functions here compute fragment geometries and rewritten
//! aggregations without touching any store, and the network commits a plan
//! atomically or not at all. Persistence layers wrapping this engine stay
//! thin.

use crate::aggregation::{self, Aggregations, PathAggregation};
use crate::geom::{Coord3, Polyline3};
use crate::path::{Path, PathId};
use crate::{EngineError, Result};
use geo::{Distance, Euclidean};

/// One planned fragment of a split path
#[derive(Debug)]
pub(crate) struct FragmentPlan {
    /// Covered range of the original path, `[lo, hi)` in fractions
    pub lo: f64,
    pub hi: f64,
    pub path: Path,
}

/// A validated split of one path into ordered fragments
#[derive(Debug)]
pub(crate) struct SplitPlan {
    pub original: PathId,
    pub fragments: Vec<FragmentPlan>,
}

/// Plan the split of `path` at the given fractional cut points
///
/// Cut points must be strictly increasing and interior; every resulting
/// fragment must be longer than `node_tolerance` in coordinate units.
/// Fragment identifiers are issued consecutively from `first_fragment_id`.
/// Fragments inherit the original's metadata verbatim.
pub(crate) fn plan_split(
    path: &Path,
    cuts: &[f64],
    first_fragment_id: u64,
    node_tolerance: f64,
) -> Result<SplitPlan> {
    #[cfg(feature = "profiling")]
    profiling::scope!("split::plan_split");

    if cuts.is_empty() {
        return Err(EngineError::InvalidSplit {
            reason: "no cut points".to_string(),
        });
    }
    if cuts.iter().any(|c| !c.is_finite()) {
        return Err(EngineError::InvalidSplit {
            reason: "non-finite cut point".to_string(),
        });
    }
    for pair in cuts.windows(2) {
        if pair[0] >= pair[1] {
            return Err(EngineError::InvalidSplit {
                reason: format!("cut points not strictly increasing: {} >= {}", pair[0], pair[1]),
            });
        }
    }

    let mut boundaries = Vec::with_capacity(cuts.len() + 2);
    boundaries.push(0.0);
    boundaries.extend_from_slice(cuts);
    boundaries.push(1.0);

    let length = path.length();
    for pair in boundaries.windows(2) {
        if (pair[1] - pair[0]) * length <= node_tolerance {
            return Err(EngineError::InvalidSplit {
                reason: format!(
                    "fragment [{}, {}] would be shorter than the node tolerance",
                    pair[0], pair[1]
                ),
            });
        }
    }

    let mut fragments = Vec::with_capacity(boundaries.len() - 1);
    for (i, pair) in boundaries.windows(2).enumerate() {
        let geometry = path.geometry().slice(pair[0], pair[1])?;
        fragments.push(FragmentPlan {
            lo: pair[0],
            hi: pair[1],
            path: Path::fragment_of(
                PathId::new(first_fragment_id + i as u64),
                geometry,
                path,
            ),
        });
    }

    Ok(SplitPlan {
        original: path.id(),
        fragments,
    })
}

/// Rewrite one aggregation of the split path into fragment-local spans
///
/// Fractions are rescaled to each overlapping fragment, clamped to [0, 1],
/// preserving the traversal direction (a reversed span stays reversed and
/// its fragments are emitted in reverse order). A point aggregation maps to
/// the single fragment containing it. The result is never empty: a span
/// too short to overlap any fragment degrades to a point on its containing
/// fragment rather than vanishing.
pub(crate) fn rewrite_aggregation(
    aggregation: &PathAggregation,
    plan: &SplitPlan,
    span_epsilon: f64,
) -> Aggregations {
    debug_assert_eq!(aggregation.path, plan.original);

    if aggregation.is_point(span_epsilon) {
        return point_on_fragment(aggregation.start_position, plan);
    }

    let mut rewritten = Aggregations::new();
    let emit = |rewritten: &mut Aggregations, fragment: &FragmentPlan| {
        let probe = PathAggregation::new(aggregation.path, fragment.lo, fragment.hi, 0);
        if !aggregation::same_span(aggregation, &probe, span_epsilon) {
            return;
        }
        let width = fragment.hi - fragment.lo;
        let start = ((aggregation.start_position - fragment.lo) / width).clamp(0.0, 1.0);
        let end = ((aggregation.end_position - fragment.lo) / width).clamp(0.0, 1.0);
        rewritten.push(PathAggregation::new(
            fragment.path.id(),
            start,
            end,
            rewritten.len() as u32,
        ));
    };

    if aggregation.is_reversed() {
        for fragment in plan.fragments.iter().rev() {
            emit(&mut rewritten, fragment);
        }
    } else {
        for fragment in &plan.fragments {
            emit(&mut rewritten, fragment);
        }
    }

    if rewritten.is_empty() {
        // Span shorter than the overlap epsilon; keep the placement alive
        // as a point instead of orphaning the topology.
        tracing::warn!(
            "span [{}, {}] on path {} degraded to a point after split",
            aggregation.start_position,
            aggregation.end_position,
            plan.original
        );
        return point_on_fragment(aggregation.start_position, plan);
    }

    rewritten
}

/// Map a single fraction of the original path onto its containing fragment
fn point_on_fragment(position: f64, plan: &SplitPlan) -> Aggregations {
    let idx = plan
        .fragments
        .iter()
        .position(|f| position < f.hi)
        .unwrap_or(plan.fragments.len() - 1);
    let fragment = &plan.fragments[idx];
    let local =
        ((position - fragment.lo) / (fragment.hi - fragment.lo)).clamp(0.0, 1.0);

    let mut out = Aggregations::new();
    out.push(PathAggregation::new(fragment.path.id(), local, local, 0));
    out
}

/// Affine remap of a fraction on a pre-merge path into the merged path
#[derive(Debug, Clone, Copy)]
pub(crate) struct FractionMap {
    offset: f64,
    scale: f64,
}

impl FractionMap {
    #[inline]
    pub fn apply(&self, fraction: f64) -> f64 {
        (self.offset + self.scale * fraction).clamp(0.0, 1.0)
    }
}

/// A validated merge of two paths sharing exactly one endpoint node
#[derive(Debug)]
pub(crate) struct MergePlan {
    pub a: PathId,
    pub b: PathId,
    pub merged: Path,
    pub a_map: FractionMap,
    pub b_map: FractionMap,
    /// Coordinate of the endpoint node the two paths share
    pub joint: Coord3,
}

/// Plan the merge of `a` and `b` into one path
///
/// The merged geometry runs along `a`'s direction first; `b` is reoriented
/// as needed. Aggregation fractions remap from fragment-local back to the
/// merged-global range via the returned [`FractionMap`]s. The merged path
/// takes `a`'s metadata.
pub(crate) fn plan_merge(
    a: &Path,
    b: &Path,
    new_id: u64,
    node_tolerance: f64,
) -> Result<MergePlan> {
    #[cfg(feature = "profiling")]
    profiling::scope!("split::plan_merge");

    let touches = |p: Coord3, q: Coord3| Euclidean.distance(p.point(), q.point()) <= node_tolerance;

    let ga = a.geometry();
    let gb = b.geometry();
    // (a reversed?, b reversed?) for each of the four endpoint pairings
    let pairings = [
        (touches(ga.last(), gb.first()), false, false),
        (touches(ga.last(), gb.last()), false, true),
        (touches(ga.first(), gb.first()), true, false),
        (touches(ga.first(), gb.last()), true, true),
    ];
    let matches: Vec<(bool, bool)> = pairings
        .iter()
        .filter(|(hit, _, _)| *hit)
        .map(|&(_, ra, rb)| (ra, rb))
        .collect();

    let (reverse_a, reverse_b) = match matches.len() {
        0 => {
            return Err(EngineError::InvalidMerge {
                reason: format!("paths {} and {} share no endpoint", a.id(), b.id()),
            });
        }
        1 => matches[0],
        _ => {
            return Err(EngineError::InvalidMerge {
                reason: format!("paths {} and {} share both endpoints", a.id(), b.id()),
            });
        }
    };

    let oriented_a = if reverse_a { ga.reversed() } else { ga.clone() };
    let oriented_b = if reverse_b { gb.reversed() } else { gb.clone() };
    let joint = oriented_a.last();

    let mut vertices: Vec<Coord3> = oriented_a.vertices().to_vec();
    for (i, v) in oriented_b.vertices().iter().enumerate() {
        if i == 0 && touches(oriented_a.last(), *v) {
            continue;
        }
        vertices.push(*v);
    }
    let merged_geometry = Polyline3::new(vertices)?;
    let total = merged_geometry.length();
    let la = oriented_a.length();
    let lb = oriented_b.length();

    let a_map = if reverse_a {
        FractionMap {
            offset: la / total,
            scale: -la / total,
        }
    } else {
        FractionMap {
            offset: 0.0,
            scale: la / total,
        }
    };
    let b_map = if reverse_b {
        FractionMap {
            offset: 1.0,
            scale: -lb / total,
        }
    } else {
        FractionMap {
            offset: (total - lb) / total,
            scale: lb / total,
        }
    };

    let merged = Path::new(
        PathId::new(new_id),
        merged_geometry,
        a.name().map(str::to_string),
        a.classification().map(str::to_string),
    );

    Ok(MergePlan {
        a: a.id(),
        b: b.id(),
        merged,
        a_map,
        b_map,
        joint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(id: u64, points: &[(f64, f64)]) -> Path {
        Path::new(
            PathId::new(id),
            Polyline3::from_xy(points).unwrap(),
            None,
            None,
        )
    }

    fn agg(path: u64, start: f64, end: f64) -> PathAggregation {
        PathAggregation::new(PathId::new(path), start, end, 0)
    }

    const EPS: f64 = 1e-6;
    const TOL: f64 = 1e-3;

    #[test]
    fn test_plan_split_fragments() {
        let ab = path(1, &[(0.0, 0.0), (4.0, 0.0)]);
        let plan = plan_split(&ab, &[0.5], 10, TOL).unwrap();

        assert_eq!(plan.fragments.len(), 2);
        assert_eq!(plan.fragments[0].path.id(), PathId::new(10));
        assert_eq!(plan.fragments[1].path.id(), PathId::new(11));
        assert!((plan.fragments[0].path.length() - 2.0).abs() < 1e-9);
        assert!((plan.fragments[1].path.length() - 2.0).abs() < 1e-9);
        assert!((plan.fragments[0].path.geometry().last().x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_plan_split_length_conservation() {
        let zig = path(1, &[(0.0, 0.0), (1.0, 1.0), (3.0, 1.0), (4.0, 0.0)]);
        let plan = plan_split(&zig, &[0.21, 0.5, 0.88], 10, TOL).unwrap();
        let total: f64 = plan.fragments.iter().map(|f| f.path.length()).sum();
        assert!((total - zig.length()).abs() < 1e-9);
    }

    #[test]
    fn test_plan_split_rejects_bad_cuts() {
        let ab = path(1, &[(0.0, 0.0), (4.0, 0.0)]);
        assert!(plan_split(&ab, &[], 10, TOL).is_err());
        assert!(plan_split(&ab, &[0.7, 0.3], 10, TOL).is_err());
        assert!(plan_split(&ab, &[0.5, 0.5], 10, TOL).is_err());
        assert!(plan_split(&ab, &[0.0], 10, TOL).is_err());
        assert!(plan_split(&ab, &[1.0], 10, TOL).is_err());
        assert!(plan_split(&ab, &[-0.2], 10, TOL).is_err());
        assert!(plan_split(&ab, &[f64::NAN], 10, TOL).is_err());
    }

    #[test]
    fn test_rewrite_forward_span_across_cut() {
        // Span [0.25, 0.75] on a path cut at 0.5
        let ab = path(1, &[(0.0, 0.0), (4.0, 0.0)]);
        let plan = plan_split(&ab, &[0.5], 10, TOL).unwrap();
        let rewritten = rewrite_aggregation(&agg(1, 0.25, 0.75), &plan, EPS);

        assert_eq!(rewritten.len(), 2);
        assert_eq!(rewritten[0].path, PathId::new(10));
        assert!((rewritten[0].start_position - 0.5).abs() < 1e-9);
        assert!((rewritten[0].end_position - 1.0).abs() < 1e-9);
        assert_eq!(rewritten[1].path, PathId::new(11));
        assert!((rewritten[1].start_position - 0.0).abs() < 1e-9);
        assert!((rewritten[1].end_position - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rewrite_reversed_span_keeps_direction() {
        let ab = path(1, &[(0.0, 0.0), (4.0, 0.0)]);
        let plan = plan_split(&ab, &[0.5], 10, TOL).unwrap();
        let rewritten = rewrite_aggregation(&agg(1, 0.75, 0.25), &plan, EPS);

        // Traversal starts at 0.75, so the later fragment comes first
        assert_eq!(rewritten.len(), 2);
        assert_eq!(rewritten[0].path, PathId::new(11));
        assert!((rewritten[0].start_position - 0.5).abs() < 1e-9);
        assert!((rewritten[0].end_position - 0.0).abs() < 1e-9);
        assert!(rewritten[0].is_reversed());
        assert_eq!(rewritten[1].path, PathId::new(10));
        assert!((rewritten[1].start_position - 1.0).abs() < 1e-9);
        assert!((rewritten[1].end_position - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rewrite_span_inside_single_fragment() {
        let ab = path(1, &[(0.0, 0.0), (4.0, 0.0)]);
        let plan = plan_split(&ab, &[0.5], 10, TOL).unwrap();
        let rewritten = rewrite_aggregation(&agg(1, 0.1, 0.3), &plan, EPS);

        assert_eq!(rewritten.len(), 1);
        assert_eq!(rewritten[0].path, PathId::new(10));
        assert!((rewritten[0].start_position - 0.2).abs() < 1e-9);
        assert!((rewritten[0].end_position - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_rewrite_span_touching_cut_stays_single() {
        // [0.5, 0.75] touches the cut point but only overlaps fragment 2
        let ab = path(1, &[(0.0, 0.0), (4.0, 0.0)]);
        let plan = plan_split(&ab, &[0.5], 10, TOL).unwrap();
        let rewritten = rewrite_aggregation(&agg(1, 0.5, 0.75), &plan, EPS);

        assert_eq!(rewritten.len(), 1);
        assert_eq!(rewritten[0].path, PathId::new(11));
        assert!((rewritten[0].start_position - 0.0).abs() < 1e-9);
        assert!((rewritten[0].end_position - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rewrite_point_aggregation() {
        let ab = path(1, &[(0.0, 0.0), (4.0, 0.0)]);
        let plan = plan_split(&ab, &[0.5], 10, TOL).unwrap();

        let before = rewrite_aggregation(&agg(1, 0.25, 0.25), &plan, EPS);
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].path, PathId::new(10));
        assert!((before[0].start_position - 0.5).abs() < 1e-9);

        // Exactly on the cut belongs to the later fragment
        let on_cut = rewrite_aggregation(&agg(1, 0.5, 0.5), &plan, EPS);
        assert_eq!(on_cut[0].path, PathId::new(11));
        assert!(on_cut[0].start_position.abs() < 1e-9);

        // The very end belongs to the last fragment
        let at_end = rewrite_aggregation(&agg(1, 1.0, 1.0), &plan, EPS);
        assert_eq!(at_end[0].path, PathId::new(11));
        assert!((at_end[0].start_position - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rewrite_position_conservation() {
        // The physical point at a rewritten fraction matches the original
        let zig = path(1, &[(0.0, 0.0), (1.0, 1.0), (3.0, 1.0), (4.0, 0.0)]);
        let plan = plan_split(&zig, &[0.37], 10, TOL).unwrap();
        let original = agg(1, 0.2, 0.9);
        let before_start = zig.geometry().point_at_fraction(0.2);
        let before_end = zig.geometry().point_at_fraction(0.9);

        let rewritten = rewrite_aggregation(&original, &plan, EPS);
        assert_eq!(rewritten.len(), 2);
        let first = &plan.fragments[0].path;
        let second = &plan.fragments[1].path;
        let after_start = first
            .geometry()
            .point_at_fraction(rewritten[0].start_position);
        let after_end = second
            .geometry()
            .point_at_fraction(rewritten[1].end_position);

        assert!((before_start.x - after_start.x).abs() < 1e-9);
        assert!((before_start.y - after_start.y).abs() < 1e-9);
        assert!((before_end.x - after_end.x).abs() < 1e-9);
        assert!((before_end.y - after_end.y).abs() < 1e-9);
    }

    #[test]
    fn test_plan_merge_forward_forward() {
        let a = path(1, &[(0.0, 0.0), (4.0, 0.0)]);
        let b = path(2, &[(4.0, 0.0), (4.0, 4.0)]);
        let plan = plan_merge(&a, &b, 10, TOL).unwrap();

        assert!((plan.merged.length() - 8.0).abs() < 1e-9);
        assert!((plan.merged.geometry().first().x - 0.0).abs() < 1e-9);
        assert!((plan.merged.geometry().last().y - 4.0).abs() < 1e-9);
        // Midpoint of a (fraction 0.5) lands at merged fraction 0.25
        assert!((plan.a_map.apply(0.5) - 0.25).abs() < 1e-9);
        // Midpoint of b lands at merged fraction 0.75
        assert!((plan.b_map.apply(0.5) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_plan_merge_reorients_second_path() {
        let a = path(1, &[(0.0, 0.0), (4.0, 0.0)]);
        // b runs toward the shared node
        let b = path(2, &[(4.0, 4.0), (4.0, 0.0)]);
        let plan = plan_merge(&a, &b, 10, TOL).unwrap();

        assert!((plan.merged.length() - 8.0).abs() < 1e-9);
        // b's start (4,4) is now the merged end: fraction 0 maps to 1
        assert!((plan.b_map.apply(0.0) - 1.0).abs() < 1e-9);
        assert!((plan.b_map.apply(1.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_plan_merge_rejects_disjoint_and_loops() {
        let a = path(1, &[(0.0, 0.0), (4.0, 0.0)]);
        let far = path(2, &[(10.0, 10.0), (20.0, 10.0)]);
        assert!(matches!(
            plan_merge(&a, &far, 10, TOL),
            Err(EngineError::InvalidMerge { .. })
        ));

        // Shares both endpoints: would form a loop
        let back = path(3, &[(4.0, 0.0), (2.0, 2.0), (0.0, 0.0)]);
        assert!(matches!(
            plan_merge(&a, &back, 10, TOL),
            Err(EngineError::InvalidMerge { .. })
        ));
    }

    #[test]
    fn test_merge_keeps_first_paths_metadata() {
        let a = Path::new(
            PathId::new(1),
            Polyline3::from_xy(&[(0.0, 0.0), (4.0, 0.0)]).unwrap(),
            Some("east trail".to_string()),
            None,
        );
        let b = path(2, &[(4.0, 0.0), (8.0, 0.0)]);
        let plan = plan_merge(&a, &b, 10, TOL).unwrap();
        assert_eq!(plan.merged.name(), Some("east trail"));
    }
}
