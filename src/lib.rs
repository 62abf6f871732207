//! Trail Network Library - Linear Referencing Engine for Path Networks
//!
//! This library maintains a network of trail segments ("paths") and lets
//! unrelated domain objects attach themselves to positions *along* that
//! network instead of to raw coordinates. Placements survive edits to the
//! network itself: when a new path crosses an existing one, the crossed path
//! is split into fragments and every placement referencing it has its
//! fractional position rewritten proportionally and losslessly.
//!
//! # Architecture
//!
//! - **[`Path`]**: an atomic directed 3D polyline segment with derived
//!   length and elevation scalars
//! - **[`Topology`]**: a placement along the network, either a point with a
//!   lateral offset or an ordered chain of path spans
//! - **[`PathAggregation`]**: the join record between a topology and one
//!   path, holding normalized start/end fractions and a traversal order
//! - **[`PathGraph`]**: endpoint-node index and spatial queries (closest
//!   path, crossing detection)
//! - **[`TrailNetwork`]**: owning manager that applies splits and merges
//!   atomically and keeps every placement consistent
//! - **[`codec`]**: compact wire representation for placements, including
//!   point-to-network snapping
//!
//! # Consistency model
//!
//! All mutations go through `&mut TrailNetwork` and are staged completely
//! before any state changes, so a failed split or merge leaves the network
//! untouched. Reads (`&TrailNetwork`) never observe a half-applied split.

mod aggregation;
pub mod codec;
mod geom;
mod graph;
mod network;
mod path;
mod split;
mod topology;

// Public API exports
pub use aggregation::{Aggregations, PathAggregation, reorder, same_span};
pub use geom::{Coord3, PositionOnLine, Polyline3};
pub use graph::{Crossing, PathGraph};
pub use network::{Config, NetworkInfo, Snap, TrailNetwork};
pub use path::{Path, PathId};
pub use topology::{PathProvider, Topology, TopologyGeometry, TopologyId, TopologyKind};

/// Error types for the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no path found: the network has no paths to snap to")]
    NoPathFound,

    #[error("disconnected spans: span {index} does not join the previous span")]
    DisconnectedSpans { index: usize },

    #[error("invalid split: {reason}")]
    InvalidSplit { reason: String },

    #[error("dangling reference: path {id} no longer exists")]
    DanglingReference { id: u64 },

    #[error("orphan topology {id}: no aggregations left after rewrite")]
    OrphanTopology { id: u64 },

    #[error("path {id} not found")]
    PathNotFound { id: u64 },

    #[error("topology {id} not found")]
    TopologyNotFound { id: u64 },

    #[error("path {id} is still referenced by {count} topologies")]
    PathInUse { id: u64, count: usize },

    #[error("invalid merge: {reason}")]
    InvalidMerge { reason: String },

    #[error("invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("position {value} outside [0, 1]")]
    InvalidPosition { value: f64 },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn(Config) -> TrailNetwork = TrailNetwork::new;
        let _: fn() -> Config = Config::default;
    }
}
