//! Collaborators the engine calls out to.
//!
//! Each collaborator is a trait object held by the run. The defaults here
//! cover runs without schema extensions, geometry cells stored as JSON and
//! in-memory result collection.

use std::sync::atomic::{AtomicU64, Ordering};

use citydb_proto::{Geometry, Property, Value};
use parking_lot::Mutex;

use crate::config::IdDerivation;
use crate::error::Error;
use crate::export::ExportOutput;
use crate::projection::ProjectionFilter;

/// Plugin boundary for schema-extension properties.
pub trait ExtensionDelegate: Send + Sync {
    /// Whether some enabled extension handles this hook table or type.
    fn has_support_for(&self, table: &str) -> bool;

    /// Export the extension properties of one owner.
    ///
    /// `hook_tables` lists the hook tables with a row for the owner. Called
    /// once per owner node.
    fn export_properties(
        &self,
        hook_tables: &[&str],
        owner_id: i64,
        owner_type: &str,
        projection: &ProjectionFilter,
    ) -> Result<Vec<Property>, Error>;
}

/// Delegate for runs without schema extensions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExtensions;

impl ExtensionDelegate for NoExtensions {
    fn has_support_for(&self, _table: &str) -> bool {
        false
    }

    fn export_properties(
        &self,
        _hook_tables: &[&str],
        _owner_id: i64,
        _owner_type: &str,
        _projection: &ProjectionFilter,
    ) -> Result<Vec<Property>, Error> {
        Ok(Vec::new())
    }
}

/// Geometry decoding and coordinate transformation.
pub trait GeometryService: Send + Sync {
    /// Decode an encoded geometry cell.
    fn decode(&self, cell: &Value) -> Result<Geometry, Error>;

    /// Transform a decoded geometry into the output reference system.
    fn transform(&self, geometry: Geometry) -> Result<Geometry, Error> {
        Ok(geometry)
    }
}

/// Decodes JSON encoded geometry cells, with an optional translation and
/// target reference system.
#[derive(Debug, Default, Clone)]
pub struct JsonGeometryService {
    translation: Option<[f64; 3]>,
    srid: Option<i32>,
}

impl JsonGeometryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translation(mut self, offset: [f64; 3]) -> Self {
        self.translation = Some(offset);
        self
    }

    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = Some(srid);
        self
    }
}

impl GeometryService for JsonGeometryService {
    fn decode(&self, cell: &Value) -> Result<Geometry, Error> {
        match cell.as_bytes() {
            Some(bytes) => Ok(Geometry::from_json(bytes)?),
            None => Err(Error::Geometry(format!("not an encoded geometry: {cell:?}"))),
        }
    }

    fn transform(&self, mut geometry: Geometry) -> Result<Geometry, Error> {
        if let Some([dx, dy, dz]) = self.translation {
            geometry.for_each_position_mut(&mut |p| {
                p[0] += dx;
                p[1] += dy;
                p[2] += dz;
            });
        }
        if let Some(srid) = self.srid {
            geometry.srid = Some(srid);
        }
        Ok(geometry)
    }
}

/// Source of fresh external identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;

    /// Identifier for a copy of `original`.
    fn derive(&self, original: &str, derivation: IdDerivation) -> String {
        match derivation {
            IdDerivation::Fresh => self.generate(),
            IdDerivation::Append => format!("{original}-{}", self.generate()),
            IdDerivation::Prefix => format!("{}-{original}", self.generate()),
        }
    }
}

/// Random UUID identifiers with a fixed prefix.
#[derive(Debug, Clone)]
pub struct UuidGenerator {
    prefix: String,
}

impl Default for UuidGenerator {
    fn default() -> Self {
        Self::new("UUID_")
    }
}

impl UuidGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        format!("{}{}", self.prefix, uuid::Uuid::new_v4())
    }
}

/// Numbered identifiers (`{prefix}1`, `{prefix}2`, ...), for reproducible output.
#[derive(Debug)]
pub struct SequenceIds {
    prefix: String,
    next: AtomicU64,
}

impl SequenceIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequenceIds {
    fn generate(&self) -> String {
        format!("{}{}", self.prefix, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receives fully materialized top-level features.
pub trait FeatureSink: Send + Sync {
    /// Whether the sink writes sub-features as top-level siblings.
    fn supports_flat_output(&self) -> bool {
        false
    }

    fn write(&self, output: ExportOutput) -> Result<(), Error>;
}

/// Keeps every output in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    flat: bool,
    outputs: Mutex<Vec<ExportOutput>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that asks for flat output.
    pub fn flat() -> Self {
        Self {
            flat: true,
            ..Self::default()
        }
    }

    /// Take all collected outputs.
    pub fn take(&self) -> Vec<ExportOutput> {
        std::mem::take(&mut *self.outputs.lock())
    }

    pub fn len(&self) -> usize {
        self.outputs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.lock().is_empty()
    }
}

impl FeatureSink for CollectingSink {
    fn supports_flat_output(&self) -> bool {
        self.flat
    }

    fn write(&self, output: ExportOutput) -> Result<(), Error> {
        self.outputs.lock().push(output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use citydb_proto::GeometryKind;

    use super::*;

    #[test]
    fn test_json_geometry_decode_and_transform() {
        let cell = Value::String(r#"{"kind":"point","rings":[[[1.0,2.0,3.0]]]}"#.to_string());
        let service = JsonGeometryService::new()
            .with_translation([10.0, 0.0, -1.0])
            .with_srid(25832);

        let geometry = service.transform(service.decode(&cell).unwrap()).unwrap();
        assert_eq!(geometry.kind, GeometryKind::Point);
        assert_eq!(geometry.rings[0][0], [11.0, 2.0, 2.0]);
        assert_eq!(geometry.srid, Some(25832));
    }

    #[test]
    fn test_decode_rejects_non_geometry_cells() {
        let service = JsonGeometryService::new();
        assert!(matches!(service.decode(&Value::Int64(1)), Err(Error::Geometry(_))));
        assert!(matches!(
            service.decode(&Value::String("not json".into())),
            Err(Error::Document(_))
        ));
    }

    #[test]
    fn test_uuid_ids() {
        let ids = UuidGenerator::default();
        let id = ids.generate();
        assert!(id.starts_with("UUID_"));
        assert_ne!(id, ids.generate());
        assert!(ids.derive("B1", IdDerivation::Append).starts_with("B1-UUID_"));
        assert!(ids.derive("B1", IdDerivation::Prefix).ends_with("-B1"));
    }

    #[test]
    fn test_sequence_ids() {
        let ids = SequenceIds::new("ID_");
        assert_eq!(ids.generate(), "ID_1");
        assert_eq!(ids.derive("G", IdDerivation::Append), "G-ID_2");
    }
}
