//! Lazily constructed exporters of one worker.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::feature::FeatureExporter;
use crate::error::Error;
use crate::schema::SchemaRegistry;

/// Exporters by schema name, created on first request.
#[derive(Default)]
pub struct ExporterRegistry {
    exporters: Mutex<HashMap<String, Arc<FeatureExporter>>>,
}

impl ExporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exporter of the schema named `name`.
    pub fn by_name(&self, schemas: &SchemaRegistry, name: &str) -> Result<Arc<FeatureExporter>, Error> {
        if let Some(exporter) = self.exporters.lock().get(name) {
            return Ok(exporter.clone());
        }
        let schema = schemas
            .get(name)
            .ok_or_else(|| Error::InvalidSchema(format!("no export schema named '{name}'")))?;
        Ok(self.insert(schema.name.clone(), FeatureExporter::new(schema)))
    }

    /// Exporter handling the given object class.
    pub fn for_class(&self, schemas: &SchemaRegistry, object_class_id: i32) -> Result<Arc<FeatureExporter>, Error> {
        let schema = schemas
            .for_class(object_class_id)
            .ok_or(Error::NoExporter(object_class_id))?;
        self.by_name(schemas, &schema.name)
    }

    /// Number of exporters constructed so far.
    pub fn len(&self) -> usize {
        self.exporters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.exporters.lock().is_empty()
    }

    fn insert(&self, name: String, exporter: FeatureExporter) -> Arc<FeatureExporter> {
        self.exporters
            .lock()
            .entry(name)
            .or_insert_with(|| Arc::new(exporter))
            .clone()
    }
}
