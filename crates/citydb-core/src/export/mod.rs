//! Exporters, per-call contexts and per-worker sessions.

mod context;
mod feature;
mod geometry;
mod registry;
mod session;

pub use context::ExportContext;
pub use feature::{FeatureExporter, OwnedFeature};
pub use geometry::{AssembledGeometry, GeometryExporter, GEOMETRY_TABLE};
pub use registry::ExporterRegistry;
pub use session::{ExportOutput, ExportRequest, ExportSession};
