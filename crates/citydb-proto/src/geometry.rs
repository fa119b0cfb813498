//! Output geometry representation.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Kind of a materialized geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    MultiCurve,
    Polygon,
    MultiSurface,
    CompositeSurface,
    Solid,
    CompositeSolid,
    TriangulatedSurface,
}

impl GeometryKind {
    /// Whether geometries of this kind aggregate member geometries.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            GeometryKind::MultiPoint
                | GeometryKind::MultiCurve
                | GeometryKind::MultiSurface
                | GeometryKind::CompositeSurface
                | GeometryKind::Solid
                | GeometryKind::CompositeSolid
                | GeometryKind::TriangulatedSurface
        )
    }
}

/// A geometry value attached to a feature property.
///
/// Primitive geometries carry their coordinates as rings (a point is a
/// single ring with one position, a polygon has an exterior ring followed by
/// interior rings). Aggregates carry member geometries instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Stable external identifier, if the stored geometry has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: GeometryKind,
    /// Spatial reference system identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srid: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rings: Vec<Vec<[f64; 3]>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Geometry>,
}

impl Geometry {
    /// Create an empty geometry of the given kind.
    pub fn new(kind: GeometryKind) -> Self {
        Self {
            id: None,
            kind,
            srid: None,
            rings: Vec::new(),
            members: Vec::new(),
        }
    }

    /// Create a point geometry.
    pub fn point(x: f64, y: f64, z: f64) -> Self {
        Self::new(GeometryKind::Point).with_ring(vec![[x, y, z]])
    }

    /// Create a polygon from its exterior ring.
    pub fn polygon(exterior: Vec<[f64; 3]>) -> Self {
        Self::new(GeometryKind::Polygon).with_ring(exterior)
    }

    /// Set the external identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the spatial reference system.
    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = Some(srid);
        self
    }

    /// Append a coordinate ring.
    pub fn with_ring(mut self, ring: Vec<[f64; 3]>) -> Self {
        self.rings.push(ring);
        self
    }

    /// Append a member geometry.
    pub fn with_member(mut self, member: Geometry) -> Self {
        self.members.push(member);
        self
    }

    /// Number of direct members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Visit every position of this geometry and its members.
    pub fn for_each_position_mut(&mut self, f: &mut impl FnMut(&mut [f64; 3])) {
        for ring in &mut self.rings {
            for position in ring.iter_mut() {
                f(position);
            }
        }
        for member in &mut self.members {
            member.for_each_position_mut(f);
        }
    }

    /// Decode a geometry from its JSON encoding.
    pub fn from_json(bytes: &[u8]) -> Result<Self, Error> {
        let geometry: Geometry = serde_json::from_slice(bytes)?;
        geometry.validate()?;
        Ok(geometry)
    }

    /// Encode this geometry as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    fn validate(&self) -> Result<(), Error> {
        if !self.kind.is_aggregate() && self.rings.is_empty() {
            return Err(Error::InvalidGeometry(format!(
                "{:?} without coordinates",
                self.kind
            )));
        }
        if self.kind == GeometryKind::Point && self.rings.iter().map(Vec::len).sum::<usize>() != 1 {
            return Err(Error::InvalidGeometry(
                "point must have exactly one position".to_string(),
            ));
        }
        for member in &self.members {
            member.validate()?;
        }
        Ok(())
    }
}
