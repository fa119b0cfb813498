//! Per-worker export sessions.

use std::sync::Arc;

use citydb_proto::Feature;

use super::context::ExportContext;
use super::geometry::GeometryExporter;
use super::registry::ExporterRegistry;
use crate::engine::FeatureNode;
use crate::error::Error;
use crate::policy::{Report, ReportKind};
use crate::query::Connection;
use crate::run::RunServices;

/// One top-level unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub id: i64,
    pub object_class_id: i32,
    /// Partially built node to complete instead of allocating a new one.
    pub node: Option<FeatureNode>,
}

impl ExportRequest {
    pub fn new(id: i64, object_class_id: i32) -> Self {
        Self {
            id,
            object_class_id,
            node: None,
        }
    }

    pub fn with_node(mut self, node: FeatureNode) -> Self {
        self.node = Some(node);
        self
    }
}

/// A materialized top-level feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutput {
    pub feature: Feature,
    /// Features emitted beside `feature` for flat output, each referenced
    /// from its owner by `#id`.
    pub siblings: Vec<Feature>,
}

/// Connection, exporters and geometry resolver of one worker.
pub struct ExportSession {
    pub(crate) services: Arc<RunServices>,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) registry: ExporterRegistry,
    pub(crate) geometry: GeometryExporter,
    flat_output: bool,
}

impl ExportSession {
    pub fn new(services: Arc<RunServices>, connection: Arc<dyn Connection>, flat_output: bool) -> Self {
        Self {
            geometry: GeometryExporter::new(services.clone(), connection.clone()),
            services,
            connection,
            registry: ExporterRegistry::new(),
            flat_output,
        }
    }

    pub fn flat_output(&self) -> bool {
        self.flat_output
    }

    pub fn registry(&self) -> &ExporterRegistry {
        &self.registry
    }

    /// Export one top-level feature.
    ///
    /// Unknown classes and classes without an exporter are reported and
    /// skipped. Returns `None` for skipped requests, missing features and
    /// features already exported by reference.
    pub fn export(&self, request: ExportRequest) -> Result<Option<ExportOutput>, Error> {
        let services = &self.services;
        let ExportRequest {
            id,
            object_class_id,
            node,
        } = request;

        let exporter = match services
            .catalog
            .type_of(object_class_id)
            .and_then(|_| self.registry.for_class(&services.schemas, object_class_id))
        {
            Ok(exporter) => exporter,
            Err(e @ (Error::UnknownObjectClass(_) | Error::NoExporter(_))) => {
                services.metrics.record_root_skipped();
                services.reporter.report(
                    Report::new(ReportKind::Instantiation, e.to_string())
                        .with_object(Some(object_class_id), id),
                )?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut ctx = ExportContext::new(self);
        match exporter.export_one(&mut ctx, id, node)? {
            Some(feature) => {
                services.metrics.record_root_exported();
                tracing::debug!(id, object_class_id, features = feature.tree_size(), "exported feature");
                Ok(Some(ExportOutput {
                    feature,
                    siblings: ctx.take_siblings(),
                }))
            }
            None => {
                services.metrics.record_root_skipped();
                Ok(None)
            }
        }
    }
}
