//! Path storage module
//!
//! A [`Path`] is the atomic directed segment of the trail network, the unit
//! that can be split and merged. Elevation scalars and length are computed
//! once at construction and cached.

use crate::geom::Polyline3;
use std::fmt;

/// Stable path identifier, issued by the network and never recycled
///
/// Retired identifiers stay retired, so historical external references can
/// distinguish "this path no longer exists" from "this identifier was
/// reused".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathId(u64);

impl PathId {
    #[inline]
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier value as used by the wire format
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed trail segment with raw geometry and precomputed metadata
#[derive(Debug, Clone)]
pub struct Path {
    id: PathId,
    geometry: Polyline3,
    /// Previous geometry kept for historical comparison after an edit
    reference_geometry: Option<Polyline3>,
    name: Option<String>,
    classification: Option<String>,
    // Derived scalars, cached at construction
    length: f64,
    ascent: f64,
    descent: f64,
    min_elevation: f64,
    max_elevation: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Path {
    /// Create a path from validated geometry
    pub(crate) fn new(
        id: PathId,
        geometry: Polyline3,
        name: Option<String>,
        classification: Option<String>,
    ) -> Self {
        let (ascent, descent, min_elevation, max_elevation) = elevation_scalars(&geometry);
        let length = geometry.length();
        Self {
            id,
            geometry,
            reference_geometry: None,
            name,
            classification,
            length,
            ascent,
            descent,
            min_elevation,
            max_elevation,
        }
    }

    /// Create a split fragment inheriting `parent`'s metadata verbatim
    ///
    /// Which fragment counts as the "primary" one is a caller policy, not
    /// decided here.
    pub(crate) fn fragment_of(id: PathId, geometry: Polyline3, parent: &Path) -> Self {
        Self::new(
            id,
            geometry,
            parent.name.clone(),
            parent.classification.clone(),
        )
    }

    /// Replace the geometry, keeping the old one as reference geometry
    pub(crate) fn replace_geometry(&mut self, geometry: Polyline3) {
        let old = std::mem::replace(&mut self.geometry, geometry);
        self.reference_geometry = Some(old);
        let (ascent, descent, min_elevation, max_elevation) = elevation_scalars(&self.geometry);
        self.ascent = ascent;
        self.descent = descent;
        self.min_elevation = min_elevation;
        self.max_elevation = max_elevation;
        self.length = self.geometry.length();
    }

    #[inline]
    pub fn id(&self) -> PathId {
        self.id
    }

    #[inline]
    pub fn geometry(&self) -> &Polyline3 {
        &self.geometry
    }

    #[inline]
    pub fn reference_geometry(&self) -> Option<&Polyline3> {
        self.reference_geometry.as_ref()
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn classification(&self) -> Option<&str> {
        self.classification.as_deref()
    }

    /// 2D length, O(1)
    #[inline]
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Cumulative positive elevation change, O(1)
    #[inline]
    pub fn ascent(&self) -> f64 {
        self.ascent
    }

    /// Cumulative negative elevation change (reported positive), O(1)
    #[inline]
    pub fn descent(&self) -> f64 {
        self.descent
    }

    #[inline]
    pub fn min_elevation(&self) -> f64 {
        self.min_elevation
    }

    #[inline]
    pub fn max_elevation(&self) -> f64 {
        self.max_elevation
    }

    /// Per-vertex (distance, elevation) samples along the path
    #[inline]
    pub fn elevation_profile(&self) -> Vec<(f64, f64)> {
        self.geometry.elevation_profile()
    }
}

/// Single pass over the vertices: (ascent, descent, min, max)
fn elevation_scalars(geometry: &Polyline3) -> (f64, f64, f64, f64) {
    let mut ascent = 0.0;
    let mut descent = 0.0;
    let mut min_elevation = f64::INFINITY;
    let mut max_elevation = f64::NEG_INFINITY;

    for pair in geometry.vertices().windows(2) {
        let dz = pair[1].z - pair[0].z;
        if dz > 0.0 {
            ascent += dz;
        } else {
            descent -= dz;
        }
    }
    for v in geometry.vertices() {
        min_elevation = min_elevation.min(v.z);
        max_elevation = max_elevation.max(v.z);
    }

    (ascent, descent, min_elevation, max_elevation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hill() -> Polyline3 {
        Polyline3::from_xyz(&[
            (0.0, 0.0, 100.0),
            (1.0, 0.0, 150.0),
            (2.0, 0.0, 120.0),
            (3.0, 0.0, 180.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_derived_scalars() {
        let path = Path::new(PathId::new(1), hill(), None, None);
        assert!((path.length() - 3.0).abs() < 1e-12);
        assert!((path.ascent() - 110.0).abs() < 1e-9);
        assert!((path.descent() - 30.0).abs() < 1e-9);
        assert!((path.min_elevation() - 100.0).abs() < 1e-9);
        assert!((path.max_elevation() - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_fragment_inherits_metadata() {
        let parent = Path::new(
            PathId::new(1),
            hill(),
            Some("GR 10".to_string()),
            Some("footpath".to_string()),
        );
        let sub = parent.geometry().slice(0.0, 0.5).unwrap();
        let fragment = Path::fragment_of(PathId::new(2), sub, &parent);
        assert_eq!(fragment.name(), Some("GR 10"));
        assert_eq!(fragment.classification(), Some("footpath"));
        assert_eq!(fragment.id().raw(), 2);
    }

    #[test]
    fn test_replace_geometry_keeps_reference() {
        let mut path = Path::new(PathId::new(1), hill(), None, None);
        assert!(path.reference_geometry().is_none());

        let flat = Polyline3::from_xy(&[(0.0, 0.0), (10.0, 0.0)]).unwrap();
        path.replace_geometry(flat);
        assert!((path.length() - 10.0).abs() < 1e-12);
        assert!((path.ascent() - 0.0).abs() < 1e-12);

        let reference = path.reference_geometry().unwrap();
        assert!((reference.length() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_elevation_profile_endpoints() {
        let path = Path::new(PathId::new(1), hill(), None, None);
        let profile = path.elevation_profile();
        assert_eq!(profile.len(), 4);
        assert!((profile[0].1 - 100.0).abs() < 1e-12);
        assert!((profile[3].0 - 3.0).abs() < 1e-12);
    }
}
