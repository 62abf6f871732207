//! Topology codec: compact wire representation for placements
//!
//! A point placement travels as `{kind, lat, lng}` and is materialized by
//! snapping the coordinate onto the network. A line placement travels as
//! `{kind, offset, start, end, paths}` where `paths` lists path
//! identifiers in traversal order and `start`/`end` are fractions within
//! the first and last listed path only; intermediate paths are fully
//! traversed and their direction is reconstructed from endpoint
//! connectivity.
//!
//! Decoding tolerates identifiers that no longer exist (the path was split
//! or merged since the representation was produced): a deterministic
//! fallback is substituted and the stale identifier is reported in
//! [`Decoded::dangling`] and on the warning channel. This is recovery from
//! a data-quality condition, never silent success.

use crate::geom::Coord3;
use crate::network::TrailNetwork;
use crate::path::PathId;
use crate::topology::{TopologyGeometry, TopologyId, TopologyKind};
use crate::{EngineError, Result};
use geo::{Distance, Euclidean};
use serde::{Deserialize, Serialize};

/// Wire representation of a topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopologyRepr {
    /// Line placement over one or more paths
    Line {
        kind: TopologyKind,
        offset: f64,
        /// Fraction within the first listed path
        start: f64,
        /// Fraction within the last listed path
        end: f64,
        /// Path identifiers in traversal order
        paths: Vec<u64>,
    },
    /// Point placement as a raw coordinate (lng = x, lat = y)
    Point { kind: TopologyKind, lat: f64, lng: f64 },
}

/// Result of decoding a wire representation
#[derive(Debug, Clone)]
pub struct Decoded {
    /// The materialized topology
    pub topology: TopologyId,
    /// Stale path identifiers that were substituted with a fallback;
    /// empty on a clean decode
    pub dangling: Vec<u64>,
}

/// Encode a topology into its wire representation
///
/// A line topology whose aggregations have all collapsed to zero length is
/// emitted in point form rather than as a degenerate line.
pub fn encode(network: &TrailNetwork, topology_id: TopologyId) -> Result<TopologyRepr> {
    let topology = network
        .get_topology(topology_id)
        .ok_or(EngineError::TopologyNotFound {
            id: topology_id.raw(),
        })?;

    let span_epsilon = network.config().span_epsilon;
    let collapsed = topology
        .aggregations()
        .iter()
        .all(|a| a.is_point(span_epsilon));

    if topology.is_point() || collapsed {
        let (lng, lat) = match topology.geometry() {
            Some(TopologyGeometry::Point(p)) => (p.x, p.y),
            Some(TopologyGeometry::Line(line)) => {
                let first = line.first();
                (first.x, first.y)
            }
            None => {
                return Err(EngineError::InvalidGeometry {
                    reason: format!("topology {} has no derived geometry", topology_id),
                });
            }
        };
        return Ok(TopologyRepr::Point {
            kind: topology.kind(),
            lat,
            lng,
        });
    }

    let mut ordered = topology.aggregations().to_vec();
    ordered.sort_by_key(|a| a.order);
    Ok(TopologyRepr::Line {
        kind: topology.kind(),
        offset: topology.offset(),
        start: ordered[0].start_position,
        end: ordered[ordered.len() - 1].end_position,
        paths: ordered.iter().map(|a| a.path.raw()).collect(),
    })
}

/// Encode straight to a JSON string
pub fn encode_json(network: &TrailNetwork, topology_id: TopologyId) -> Result<String> {
    Ok(serde_json::to_string(&encode(network, topology_id)?)?)
}

/// Decode a wire representation, materializing the topology
///
/// Point form snaps the coordinate onto the network. Line form resolves
/// the listed identifiers; each stale identifier is substituted with the
/// lowest surviving path identifier, reported in `dangling` and warned
/// about. Fails with `DanglingReference` only when no fallback exists at
/// all, and with `NoPathFound` when snapping against an empty network.
pub fn decode(network: &mut TrailNetwork, repr: &TopologyRepr) -> Result<Decoded> {
    match repr {
        TopologyRepr::Point { kind, lat, lng } => {
            let snap = network.snap(*lng, *lat)?;
            let topology =
                network.create_point_topology(*kind, snap.path, snap.position, snap.offset)?;
            Ok(Decoded {
                topology,
                dangling: Vec::new(),
            })
        }
        TopologyRepr::Line {
            kind,
            offset,
            start,
            end,
            paths,
        } => {
            if paths.is_empty() {
                return Err(EngineError::InvalidGeometry {
                    reason: "line representation lists no paths".to_string(),
                });
            }

            let fallback = network.paths().map(|p| p.id()).next();
            let mut dangling = Vec::new();
            let mut resolved: Vec<PathId> = Vec::with_capacity(paths.len());
            for &raw in paths {
                let id = PathId::new(raw);
                if network.get_path(id).is_some() {
                    resolved.push(id);
                } else {
                    let substitute =
                        fallback.ok_or(EngineError::DanglingReference { id: raw })?;
                    tracing::warn!(
                        "dangling path reference {} substituted with {}",
                        raw,
                        substitute
                    );
                    dangling.push(raw);
                    resolved.push(substitute);
                }
            }

            let spans = resolve_spans(network, &resolved, *start, *end)?;
            let topology =
                network.create_line_topology_inner(*kind, &spans, *offset, dangling.is_empty())?;
            Ok(Decoded { topology, dangling })
        }
    }
}

/// Decode from a JSON string
pub fn decode_json(network: &mut TrailNetwork, json: &str) -> Result<Decoded> {
    let repr: TopologyRepr = serde_json::from_str(json)?;
    decode(network, &repr)
}

/// Reconstruct per-path spans from the path sequence and boundary
/// fractions
///
/// Intermediate paths are fully traversed; their direction (and the exit
/// side of the first path) follows endpoint connectivity. When a chain
/// does not join (possible after a fallback substitution), forward
/// traversal is assumed.
fn resolve_spans(
    network: &TrailNetwork,
    ids: &[PathId],
    start: f64,
    end: f64,
) -> Result<Vec<(PathId, f64, f64)>> {
    if ids.len() == 1 {
        return Ok(vec![(ids[0], start, end)]);
    }

    let tolerance = network.config().node_tolerance;
    let touches =
        |a: Coord3, b: Coord3| Euclidean.distance(a.point(), b.point()) <= tolerance;
    let geometry = |id: PathId| {
        network
            .get_path(id)
            .map(|p| p.geometry())
            .ok_or(EngineError::PathNotFound { id: id.raw() })
    };

    let mut spans = Vec::with_capacity(ids.len());

    // First path: exits on the side that joins the second path
    let first = geometry(ids[0])?;
    let second = geometry(ids[1])?;
    let joins_second =
        |p: Coord3| touches(p, second.first()) || touches(p, second.last());
    let first_forward = joins_second(first.last()) || !joins_second(first.first());
    let mut cursor = if first_forward { first.last() } else { first.first() };
    spans.push((ids[0], start, if first_forward { 1.0 } else { 0.0 }));

    for (i, &id) in ids.iter().enumerate().skip(1) {
        let geom = geometry(id)?;
        let last = i == ids.len() - 1;
        let (entry, exit_vertex) = if touches(geom.first(), cursor) {
            (0.0, geom.last())
        } else if touches(geom.last(), cursor) {
            (1.0, geom.first())
        } else {
            // Broken chain: assume forward traversal
            (0.0, geom.last())
        };
        if last {
            spans.push((id, entry, end));
        } else {
            spans.push((id, entry, 1.0 - entry));
            cursor = exit_vertex;
        }
    }

    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Polyline3;
    use crate::network::{Config, TrailNetwork};

    fn line(points: &[(f64, f64)]) -> Polyline3 {
        Polyline3::from_xy(points).unwrap()
    }

    /// AB = (0,0) -> (4,0), BC = (4,0) -> (4,4)
    fn network_with_two_paths() -> (TrailNetwork, PathId, PathId) {
        let mut net = TrailNetwork::new(Config::default());
        let ab = net.add_path(line(&[(0.0, 0.0), (4.0, 0.0)]), None, None).unwrap()[0];
        let bc = net.add_path(line(&[(4.0, 0.0), (4.0, 4.0)]), None, None).unwrap()[0];
        (net, ab, bc)
    }

    #[test]
    fn test_point_round_trip() {
        let (mut net, _, _) = network_with_two_paths();
        let repr = TopologyRepr::Point {
            kind: TopologyKind::Signage,
            lat: 0.1,
            lng: 1.9,
        };

        let decoded = decode(&mut net, &repr).unwrap();
        assert!(decoded.dangling.is_empty());
        let topo = net.get_topology(decoded.topology).unwrap();
        assert!(topo.is_point());
        assert!((topo.offset() - 0.1).abs() < 1e-9);

        // Re-encoding reproduces the original coordinate
        match encode(&net, decoded.topology).unwrap() {
            TopologyRepr::Point { lat, lng, kind } => {
                assert_eq!(kind, TopologyKind::Signage);
                assert!((lat - 0.1).abs() < 1e-9);
                assert!((lng - 1.9).abs() < 1e-9);
            }
            other => panic!("expected point form, got {other:?}"),
        }
    }

    #[test]
    fn test_point_decode_empty_network() {
        let mut net = TrailNetwork::new(Config::default());
        let repr = TopologyRepr::Point {
            kind: TopologyKind::Signage,
            lat: 0.0,
            lng: 0.0,
        };
        assert!(matches!(
            decode(&mut net, &repr),
            Err(EngineError::NoPathFound)
        ));
    }

    #[test]
    fn test_line_round_trip_over_two_paths() {
        let (mut net, ab, bc) = network_with_two_paths();
        let topo_id = net
            .create_line_topology(
                TopologyKind::Trek,
                &[(ab, 0.25, 1.0), (bc, 0.0, 0.75)],
                0.0,
            )
            .unwrap();
        let geometry_before = net.get_topology(topo_id).unwrap().length();

        let repr = encode(&net, topo_id).unwrap();
        match &repr {
            TopologyRepr::Line { start, end, paths, .. } => {
                assert!((*start - 0.25).abs() < 1e-9);
                assert!((*end - 0.75).abs() < 1e-9);
                assert_eq!(paths, &vec![ab.raw(), bc.raw()]);
            }
            other => panic!("expected line form, got {other:?}"),
        }

        let decoded = decode(&mut net, &repr).unwrap();
        assert!(decoded.dangling.is_empty());
        let copy = net.get_topology(decoded.topology).unwrap();
        assert_eq!(copy.aggregations().len(), 2);
        assert!((copy.length() - geometry_before).abs() < 1e-9);
    }

    #[test]
    fn test_line_round_trip_reversed_traversal() {
        let (mut net, ab, bc) = network_with_two_paths();
        // From (4,2) down to (4,0), then backwards along AB to (2,0)
        let topo_id = net
            .create_line_topology(
                TopologyKind::Trek,
                &[(bc, 0.5, 0.0), (ab, 1.0, 0.5)],
                0.0,
            )
            .unwrap();

        let repr = encode(&net, topo_id).unwrap();
        let decoded = decode(&mut net, &repr).unwrap();
        let copy = net.get_topology(decoded.topology).unwrap();

        let aggs = copy.aggregations();
        assert_eq!(aggs.len(), 2);
        assert_eq!(aggs[0].path, bc);
        assert!((aggs[0].start_position - 0.5).abs() < 1e-9);
        assert!((aggs[0].end_position - 0.0).abs() < 1e-9);
        assert_eq!(aggs[1].path, ab);
        assert!(aggs[1].is_reversed());
        assert!((copy.length() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_collapsed_line_encodes_as_point() {
        let (mut net, ab, _) = network_with_two_paths();
        let topo_id = net
            .create_line_topology(TopologyKind::Intervention, &[(ab, 0.5, 0.5)], 0.0)
            .unwrap();

        match encode(&net, topo_id).unwrap() {
            TopologyRepr::Point { lat, lng, .. } => {
                assert!((lng - 2.0).abs() < 1e-9);
                assert!(lat.abs() < 1e-9);
            }
            other => panic!("expected point form, got {other:?}"),
        }
    }

    #[test]
    fn test_scenario_d_dangling_reference_recovered() {
        let (mut net, ab, _) = network_with_two_paths();
        let topo_id = net
            .create_line_topology(TopologyKind::Trek, &[(ab, 0.25, 0.75)], 0.0)
            .unwrap();
        let repr = encode(&net, topo_id).unwrap();

        // AB is split away; the stored representation now references a
        // retired identifier
        net.split_path(ab, &[0.5]).unwrap();

        let decoded = decode(&mut net, &repr).unwrap();
        assert_eq!(decoded.dangling, vec![ab.raw()]);
        let recovered = net.get_topology(decoded.topology).unwrap();
        assert!(!recovered.aggregations().is_empty());
        // The fallback is deterministic: the lowest surviving identifier
        let lowest = net.paths().map(|p| p.id()).next().unwrap();
        assert_eq!(recovered.aggregations()[0].path, lowest);
    }

    #[test]
    fn test_decode_dangling_with_empty_network_fails() {
        let mut net = TrailNetwork::new(Config::default());
        let repr = TopologyRepr::Line {
            kind: TopologyKind::Trek,
            offset: 0.0,
            start: 0.0,
            end: 1.0,
            paths: vec![42],
        };
        assert!(matches!(
            decode(&mut net, &repr),
            Err(EngineError::DanglingReference { id: 42 })
        ));
    }

    #[test]
    fn test_decode_rejects_empty_path_list() {
        let (mut net, _, _) = network_with_two_paths();
        let repr = TopologyRepr::Line {
            kind: TopologyKind::Trek,
            offset: 0.0,
            start: 0.0,
            end: 1.0,
            paths: vec![],
        };
        assert!(decode(&mut net, &repr).is_err());
    }

    #[test]
    fn test_json_wire_format() {
        let (mut net, ab, bc) = network_with_two_paths();
        let topo_id = net
            .create_line_topology(
                TopologyKind::PointOfInterest,
                &[(ab, 0.5, 1.0), (bc, 0.0, 0.5)],
                1.5,
            )
            .unwrap();

        let json = encode_json(&net, topo_id).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["kind"], "point_of_interest");
        assert_eq!(value["start"], 0.5);
        assert_eq!(value["end"], 0.5);
        assert_eq!(value["offset"], 1.5);
        assert_eq!(value["paths"][0], ab.raw());

        let decoded = decode_json(&mut net, &json).unwrap();
        assert!(decoded.dangling.is_empty());
        assert_eq!(
            net.get_topology(decoded.topology).unwrap().kind(),
            TopologyKind::PointOfInterest
        );
    }

    #[test]
    fn test_json_point_form_parses() {
        let (mut net, _, _) = network_with_two_paths();
        let decoded = decode_json(
            &mut net,
            r#"{"kind": "signage", "lat": 0.5, "lng": 1.0}"#,
        )
        .unwrap();
        let topo = net.get_topology(decoded.topology).unwrap();
        assert_eq!(topo.kind(), TopologyKind::Signage);
        assert!(topo.is_point());
    }
}
