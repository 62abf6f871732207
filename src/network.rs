//! TrailNetwork - top-level manager for paths, topologies, and mutations
//!
//! Owns the path and topology stores and exposes the engine's inbound API:
//! path creation/edit/split/merge, topology creation, snapping and the
//! accessors the codec builds on. Every mutation is staged completely (new
//! paths, rewritten aggregations, recomputed geometries) before any state
//! changes, so a failed operation leaves the network exactly as it was.
//!
//! Concurrency follows the single-writer model: mutations take
//! `&mut TrailNetwork` and are therefore serialized by the borrow checker,
//! while reads (`&TrailNetwork`) may run concurrently and never observe a
//! half-applied split.

use crate::aggregation::{self, Aggregations, PathAggregation};
use crate::geom::Polyline3;
use crate::graph::PathGraph;
use crate::path::{Path, PathId};
use crate::split::{self, SplitPlan};
use crate::topology::{PathProvider, Topology, TopologyId, TopologyKind};
use crate::{EngineError, Result};
use geo::Point;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Engine tolerances
///
/// `node_tolerance` is in coordinate units and governs endpoint
/// coincidence, span contiguity and the interior/endpoint distinction for
/// crossings. `span_epsilon` is in fraction space and governs when a span
/// counts as zero-length or as overlapping a fragment.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_tolerance: f64,
    pub span_epsilon: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_tolerance: 1e-3,
            span_epsilon: 1e-6,
        }
    }
}

/// O(1) snapshot of the network
#[derive(Debug, Clone, Default)]
pub struct NetworkInfo {
    pub path_count: usize,
    pub topology_count: usize,
    /// Sum of all path lengths
    pub total_length: f64,
}

/// Result of snapping a raw coordinate onto the network
#[derive(Debug, Clone, Copy)]
pub struct Snap {
    pub path: PathId,
    /// Fractional position of the closest point on `path`
    pub position: f64,
    /// Signed lateral offset of the query point (positive = left)
    pub offset: f64,
}

/// Cached statistics, updated incrementally on every commit
#[derive(Debug, Clone, Default)]
struct CachedStats {
    total_length: f64,
}

/// A fully computed mutation, ready to commit
///
/// Building one never touches the network; applying one cannot fail.
struct StagedMutation {
    removed: Vec<PathId>,
    added: Vec<Path>,
    /// Rewritten and already recomputed topology replacements
    topologies: Vec<Topology>,
    next_path_id: u64,
}

/// Path lookup over a staged, not-yet-committed view of the store
struct StagedView<'a> {
    base: &'a BTreeMap<PathId, Path>,
    removed: &'a [PathId],
    added: &'a [Path],
}

impl PathProvider for StagedView<'_> {
    fn path(&self, id: PathId) -> Option<&Path> {
        if let Some(path) = self.added.iter().find(|p| p.id() == id) {
            return Some(path);
        }
        if self.removed.contains(&id) {
            return None;
        }
        self.base.get(&id)
    }
}

/// Top-level manager for the whole trail network
#[derive(Clone)]
pub struct TrailNetwork {
    paths: BTreeMap<PathId, Path>,
    topologies: BTreeMap<TopologyId, Topology>,
    /// Monotonic counters; identifiers are never recycled
    next_path_id: u64,
    next_topology_id: u64,
    config: Config,
    cached_stats: CachedStats,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrailNetwork {
    /// Create an empty network with the given tolerances
    pub fn new(config: Config) -> Self {
        Self {
            paths: BTreeMap::new(),
            topologies: BTreeMap::new(),
            next_path_id: 1,
            next_topology_id: 1,
            config,
            cached_stats: CachedStats::default(),
        }
    }

    // === Path mutations ===

    /// Insert a new path, splitting it and every path it crosses
    ///
    /// Proper interior crossings cut both sides; a touch at an endpoint
    /// only cuts the side whose interior is hit. Returns the identifiers
    /// of the surviving fragments of the inserted geometry, in order. The
    /// whole operation is atomic.
    pub fn add_path(
        &mut self,
        geometry: Polyline3,
        name: Option<String>,
        classification: Option<String>,
    ) -> Result<Vec<PathId>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("network::add_path");

        let candidate = Path::new(PathId::new(self.next_path_id), geometry, name, classification);
        let mut next = self.next_path_id + 1;

        let crossings = self
            .graph()
            .find_intersections(candidate.geometry(), None);

        let mut other_cuts: BTreeMap<PathId, Vec<f64>> = BTreeMap::new();
        let mut self_cuts: Vec<f64> = Vec::new();
        for crossing in &crossings {
            if let Some(other) = self.paths.get(&crossing.other) {
                if self.is_interior(crossing.frac_other, other.length()) {
                    other_cuts
                        .entry(crossing.other)
                        .or_default()
                        .push(crossing.frac_other);
                }
            }
            if self.is_interior(crossing.frac_candidate, candidate.length()) {
                self_cuts.push(crossing.frac_candidate);
            }
        }

        let mut plans = Vec::new();
        for (path_id, mut cuts) in other_cuts {
            let path = self.paths.get(&path_id).ok_or(EngineError::PathNotFound {
                id: path_id.raw(),
            })?;
            self.dedupe_cuts(&mut cuts, path.length());
            if cuts.is_empty() {
                continue;
            }
            let plan = split::plan_split(path, &cuts, next, self.config.node_tolerance)?;
            next += plan.fragments.len() as u64;
            plans.push(plan);
        }

        let mut added = Vec::new();
        let mut result_ids = Vec::new();
        self.dedupe_cuts(&mut self_cuts, candidate.length());
        if self_cuts.is_empty() {
            result_ids.push(candidate.id());
            added.push(candidate);
        } else {
            // The candidate itself is crossed: it is born split, and its
            // provisional identifier is retired unused.
            let plan =
                split::plan_split(&candidate, &self_cuts, next, self.config.node_tolerance)?;
            next += plan.fragments.len() as u64;
            for fragment in plan.fragments {
                result_ids.push(fragment.path.id());
                added.push(fragment.path);
            }
        }

        tracing::debug!(
            "add_path: {} crossing(s), {} existing path(s) split",
            crossings.len(),
            plans.len()
        );

        let staged = self.stage(plans, Vec::new(), added, next, &[])?;
        self.apply(staged);
        Ok(result_ids)
    }

    /// Split one path at explicit fractional cut points
    ///
    /// Rewrites every aggregation referencing the path, retires its
    /// identifier and recomputes every touched topology. Atomic: any
    /// failure leaves the network unchanged.
    pub fn split_path(&mut self, path_id: PathId, cuts: &[f64]) -> Result<Vec<PathId>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("network::split_path");

        let path = self.paths.get(&path_id).ok_or(EngineError::PathNotFound {
            id: path_id.raw(),
        })?;
        let plan = split::plan_split(path, cuts, self.next_path_id, self.config.node_tolerance)?;
        let next = self.next_path_id + plan.fragments.len() as u64;
        let ids: Vec<PathId> = plan.fragments.iter().map(|f| f.path.id()).collect();

        let staged = self.stage(vec![plan], Vec::new(), Vec::new(), next, &[])?;
        self.apply(staged);
        Ok(ids)
    }

    /// Replace a path's geometry, keeping the old one as reference
    ///
    /// Aggregation fractions are preserved (they are proportional, so the
    /// placements follow the new geometry); dependent topologies are
    /// recomputed. New crossings introduced by the edit trigger the same
    /// automatic split as `add_path`.
    pub fn update_path_geometry(
        &mut self,
        path_id: PathId,
        geometry: Polyline3,
    ) -> Result<Vec<PathId>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("network::update_path_geometry");

        let mut updated = self
            .paths
            .get(&path_id)
            .ok_or(EngineError::PathNotFound {
                id: path_id.raw(),
            })?
            .clone();
        updated.replace_geometry(geometry);
        let mut next = self.next_path_id;

        let crossings = self
            .graph()
            .find_intersections(updated.geometry(), Some(path_id));

        let mut other_cuts: BTreeMap<PathId, Vec<f64>> = BTreeMap::new();
        let mut self_cuts: Vec<f64> = Vec::new();
        for crossing in &crossings {
            if let Some(other) = self.paths.get(&crossing.other) {
                if self.is_interior(crossing.frac_other, other.length()) {
                    other_cuts
                        .entry(crossing.other)
                        .or_default()
                        .push(crossing.frac_other);
                }
            }
            if self.is_interior(crossing.frac_candidate, updated.length()) {
                self_cuts.push(crossing.frac_candidate);
            }
        }

        let mut plans = Vec::new();
        for (other_id, mut cuts) in other_cuts {
            let path = self.paths.get(&other_id).ok_or(EngineError::PathNotFound {
                id: other_id.raw(),
            })?;
            self.dedupe_cuts(&mut cuts, path.length());
            if cuts.is_empty() {
                continue;
            }
            let plan = split::plan_split(path, &cuts, next, self.config.node_tolerance)?;
            next += plan.fragments.len() as u64;
            plans.push(plan);
        }

        let mut extra_removed = Vec::new();
        let mut added = Vec::new();
        let mut force_touch = Vec::new();
        let mut result_ids = Vec::new();
        self.dedupe_cuts(&mut self_cuts, updated.length());
        if self_cuts.is_empty() {
            extra_removed.push(path_id);
            force_touch.push(path_id);
            result_ids.push(path_id);
            added.push(updated);
        } else {
            let plan = split::plan_split(&updated, &self_cuts, next, self.config.node_tolerance)?;
            next += plan.fragments.len() as u64;
            result_ids = plan.fragments.iter().map(|f| f.path.id()).collect();
            plans.push(plan);
        }

        let staged = self.stage(plans, extra_removed, added, next, &force_touch)?;
        self.apply(staged);
        Ok(result_ids)
    }

    /// Merge two paths sharing exactly one endpoint node
    ///
    /// The mirror image of a split: geometries are concatenated (the
    /// second path reoriented as needed), aggregation fractions are
    /// remapped from fragment-local back to the merged-global range, both
    /// identifiers are retired and touched topologies recomputed. Only
    /// ever performed on explicit request, never inferred.
    pub fn merge_paths(&mut self, a: PathId, b: PathId) -> Result<PathId> {
        #[cfg(feature = "profiling")]
        profiling::scope!("network::merge_paths");

        if a == b {
            return Err(EngineError::InvalidMerge {
                reason: "cannot merge a path with itself".to_string(),
            });
        }
        let path_a = self.paths.get(&a).ok_or(EngineError::PathNotFound { id: a.raw() })?;
        let path_b = self.paths.get(&b).ok_or(EngineError::PathNotFound { id: b.raw() })?;
        let plan = split::plan_merge(path_a, path_b, self.next_path_id, self.config.node_tolerance)?;

        if self.graph().degree(plan.joint.x, plan.joint.y) != 2 {
            return Err(EngineError::InvalidMerge {
                reason: format!(
                    "other paths meet at the shared node ({}, {})",
                    plan.joint.x, plan.joint.y
                ),
            });
        }

        let merged_id = plan.merged.id();
        let removed = vec![a, b];
        let added = vec![plan.merged];

        let mut staged_topologies: Vec<Topology> = Vec::new();
        for topology in self.topologies.values() {
            if !topology
                .aggregations()
                .iter()
                .any(|agg| agg.path == a || agg.path == b)
            {
                continue;
            }
            let mut updated = topology.clone();
            for agg in updated.aggregations_mut().iter_mut() {
                if agg.path == a {
                    agg.start_position = plan.a_map.apply(agg.start_position);
                    agg.end_position = plan.a_map.apply(agg.end_position);
                    agg.path = merged_id;
                } else if agg.path == b {
                    agg.start_position = plan.b_map.apply(agg.start_position);
                    agg.end_position = plan.b_map.apply(agg.end_position);
                    agg.path = merged_id;
                }
            }
            staged_topologies.push(updated);
        }

        let view = StagedView {
            base: &self.paths,
            removed: &removed,
            added: &added,
        };
        let (span_epsilon, node_tolerance) = (self.config.span_epsilon, self.config.node_tolerance);
        staged_topologies
            .par_iter_mut()
            .try_for_each(|t| t.recompute_geometry(&view, span_epsilon, node_tolerance))?;

        self.apply(StagedMutation {
            removed,
            added,
            topologies: staged_topologies,
            next_path_id: self.next_path_id + 1,
        });
        Ok(merged_id)
    }

    /// Hard-delete a path
    ///
    /// Refused while any topology still references it: dependents must be
    /// deleted or reassigned first, never silently orphaned.
    pub fn remove_path(&mut self, path_id: PathId) -> Result<()> {
        if !self.paths.contains_key(&path_id) {
            return Err(EngineError::PathNotFound {
                id: path_id.raw(),
            });
        }
        let dependents = self
            .topologies
            .values()
            .filter(|t| t.aggregations().iter().any(|a| a.path == path_id))
            .count();
        if dependents > 0 {
            return Err(EngineError::PathInUse {
                id: path_id.raw(),
                count: dependents,
            });
        }
        if let Some(path) = self.paths.remove(&path_id) {
            self.cached_stats.total_length -= path.length();
        }
        Ok(())
    }

    // === Topology operations ===

    /// Place a point topology on a path
    pub fn create_point_topology(
        &mut self,
        kind: TopologyKind,
        path: PathId,
        position: f64,
        offset: f64,
    ) -> Result<TopologyId> {
        Self::validate_position(position)?;
        if !offset.is_finite() {
            return Err(EngineError::InvalidGeometry {
                reason: "non-finite lateral offset".to_string(),
            });
        }
        if !self.paths.contains_key(&path) {
            return Err(EngineError::PathNotFound { id: path.raw() });
        }

        let id = TopologyId::new(self.next_topology_id);
        let mut topology = Topology::point(id, kind, path, position, offset);
        topology.recompute_geometry(
            &self.paths,
            self.config.span_epsilon,
            self.config.node_tolerance,
        )?;
        self.next_topology_id += 1;
        self.topologies.insert(id, topology);
        Ok(id)
    }

    /// Place a line topology over an ordered list of path spans
    ///
    /// Fails with `DisconnectedSpans` when consecutive spans' endpoints do
    /// not coincide within the node tolerance.
    pub fn create_line_topology(
        &mut self,
        kind: TopologyKind,
        spans: &[(PathId, f64, f64)],
        offset: f64,
    ) -> Result<TopologyId> {
        self.create_line_topology_inner(kind, spans, offset, true)
    }

    /// Line topology creation with optional contiguity validation
    ///
    /// The codec uses the lenient form when a dangling wire reference was
    /// substituted and the chain can no longer be expected to join.
    pub(crate) fn create_line_topology_inner(
        &mut self,
        kind: TopologyKind,
        spans: &[(PathId, f64, f64)],
        offset: f64,
        strict: bool,
    ) -> Result<TopologyId> {
        if spans.is_empty() {
            return Err(EngineError::InvalidGeometry {
                reason: "a line topology needs at least one span".to_string(),
            });
        }
        if !offset.is_finite() {
            return Err(EngineError::InvalidGeometry {
                reason: "non-finite lateral offset".to_string(),
            });
        }

        let mut aggregations = Aggregations::new();
        for (i, &(path, start, end)) in spans.iter().enumerate() {
            Self::validate_position(start)?;
            Self::validate_position(end)?;
            if !self.paths.contains_key(&path) {
                return Err(EngineError::PathNotFound { id: path.raw() });
            }
            aggregations.push(PathAggregation::new(path, start, end, i as u32));
        }
        if strict {
            Topology::validate_contiguity(
                &aggregations,
                &self.paths,
                self.config.node_tolerance,
            )?;
        }

        let id = TopologyId::new(self.next_topology_id);
        let mut topology = Topology::line(id, kind, aggregations, offset);
        topology.recompute_geometry(
            &self.paths,
            self.config.span_epsilon,
            self.config.node_tolerance,
        )?;
        self.next_topology_id += 1;
        self.topologies.insert(id, topology);
        Ok(id)
    }

    /// Delete a topology and its aggregations
    pub fn remove_topology(&mut self, topology_id: TopologyId) -> Result<()> {
        self.topologies
            .remove(&topology_id)
            .map(|_| ())
            .ok_or(EngineError::TopologyNotFound {
                id: topology_id.raw(),
            })
    }

    // === Queries ===

    /// Snap a raw coordinate onto the network
    ///
    /// The only place raw coordinates are accepted as topology input; all
    /// other creation is in terms of path + fraction.
    pub fn snap(&self, x: f64, y: f64) -> Result<Snap> {
        let (path, position) = self.graph().closest_path(Point::new(x, y))?;
        Ok(Snap {
            path,
            position: position.fraction,
            offset: position.offset,
        })
    }

    /// Build the endpoint-node graph over the current path set
    pub fn graph(&self) -> PathGraph<'_> {
        PathGraph::build(self.paths.values(), self.config.node_tolerance)
    }

    #[inline]
    pub fn get_path(&self, path_id: PathId) -> Option<&Path> {
        self.paths.get(&path_id)
    }

    #[inline]
    pub fn get_topology(&self, topology_id: TopologyId) -> Option<&Topology> {
        self.topologies.get(&topology_id)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.values()
    }

    pub fn topologies(&self) -> impl Iterator<Item = &Topology> {
        self.topologies.values()
    }

    #[inline]
    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    #[inline]
    pub fn topology_count(&self) -> usize {
        self.topologies.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// O(1) network snapshot; the total length is cached and updated
    /// incrementally
    #[inline]
    pub fn info(&self) -> NetworkInfo {
        NetworkInfo {
            path_count: self.paths.len(),
            topology_count: self.topologies.len(),
            total_length: self.cached_stats.total_length,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // === Staging internals ===

    fn validate_position(position: f64) -> Result<()> {
        if !position.is_finite() || !(0.0..=1.0).contains(&position) {
            return Err(EngineError::InvalidPosition { value: position });
        }
        Ok(())
    }

    /// Whether a crossing fraction is interior to a path of `length`
    fn is_interior(&self, fraction: f64, length: f64) -> bool {
        let tol = self.config.node_tolerance;
        fraction * length > tol && (1.0 - fraction) * length > tol
    }

    /// Sort cut fractions and drop near-duplicates (closer than the node
    /// tolerance in coordinate units)
    fn dedupe_cuts(&self, cuts: &mut Vec<f64>, length: f64) {
        let tol = self.config.node_tolerance;
        cuts.sort_by(f64::total_cmp);
        cuts.dedup_by(|a, b| (*a - *b) * length <= tol);
    }

    /// Stage a set of split plans plus plain additions/removals
    ///
    /// Rewrites the aggregations of every topology referencing a split
    /// path, renumbers their order along the traversal direction, checks
    /// the no-orphan invariant and recomputes every touched topology
    /// against the staged view. Nothing in `self` changes.
    fn stage(
        &self,
        plans: Vec<SplitPlan>,
        extra_removed: Vec<PathId>,
        mut added: Vec<Path>,
        next_path_id: u64,
        force_touch: &[PathId],
    ) -> Result<StagedMutation> {
        #[cfg(feature = "profiling")]
        profiling::scope!("network::stage");

        let mut removed = extra_removed;
        removed.extend(plans.iter().map(|p| p.original));

        let mut staged_topologies: Vec<Topology> = Vec::new();
        for topology in self.topologies.values() {
            let needs_rewrite = topology
                .aggregations()
                .iter()
                .any(|agg| plans.iter().any(|p| p.original == agg.path));
            let needs_recompute = needs_rewrite
                || topology
                    .aggregations()
                    .iter()
                    .any(|agg| force_touch.contains(&agg.path));
            if !needs_recompute {
                continue;
            }

            let mut updated = topology.clone();
            if needs_rewrite {
                let mut ordered = updated.aggregations().to_vec();
                ordered.sort_by_key(|a| a.order);

                let mut rewritten = Aggregations::new();
                for agg in &ordered {
                    match plans.iter().find(|p| p.original == agg.path) {
                        Some(plan) => {
                            for mut fragment_agg in
                                split::rewrite_aggregation(agg, plan, self.config.span_epsilon)
                            {
                                fragment_agg.order = rewritten.len() as u32;
                                rewritten.push(fragment_agg);
                            }
                        }
                        None => {
                            let mut kept = *agg;
                            kept.order = rewritten.len() as u32;
                            rewritten.push(kept);
                        }
                    }
                }
                if rewritten.is_empty() {
                    return Err(EngineError::OrphanTopology {
                        id: topology.id().raw(),
                    });
                }
                aggregation::reorder(&mut rewritten);
                updated.set_aggregations(rewritten);
            }
            staged_topologies.push(updated);
        }

        for plan in plans {
            for fragment in plan.fragments {
                added.push(fragment.path);
            }
        }

        let view = StagedView {
            base: &self.paths,
            removed: &removed,
            added: &added,
        };
        let (span_epsilon, node_tolerance) = (self.config.span_epsilon, self.config.node_tolerance);
        staged_topologies
            .par_iter_mut()
            .try_for_each(|t| t.recompute_geometry(&view, span_epsilon, node_tolerance))?;

        Ok(StagedMutation {
            removed,
            added,
            topologies: staged_topologies,
            next_path_id,
        })
    }

    /// Commit a staged mutation; infallible by construction
    fn apply(&mut self, staged: StagedMutation) {
        for id in &staged.removed {
            if let Some(path) = self.paths.remove(id) {
                self.cached_stats.total_length -= path.length();
            }
        }
        for path in staged.added {
            self.cached_stats.total_length += path.length();
            self.paths.insert(path.id(), path);
        }
        for topology in staged.topologies {
            self.topologies.insert(topology.id(), topology);
        }
        self.next_path_id = staged.next_path_id;
    }
}
