//! CityDB Core - Relational-to-hierarchical feature materialization.
//!
//! This crate turns rows of a normalized 3D city database into nested
//! feature documents: projected join queries, single-pass row
//! demultiplexing, deferred batch resolution, identity caches and part-of
//! reassembly.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod batch;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod metrics;
pub mod policy;
pub mod projection;
pub mod query;
pub mod run;
pub mod schema;
pub mod services;

pub use batch::{BatchKey, BatchQuery, BatchSource, BatchStats, DeferredBatch};
pub use cache::{IdentityCache, IdentityCaches, LocalGeometrySet, ObjectIdentity, Sighting, XlinkResolver};
pub use catalog::{FeatureType, TypeCatalog};
pub use config::{
    BatchConfig, ExportConfig, IdDerivation, IdentityCacheConfig, ReferenceMode, SpillConfig,
    XlinkConfig,
};
pub use error::Error;
pub use export::{
    ExportContext, ExportOutput, ExportRequest, ExportSession, ExporterRegistry, FeatureExporter,
    GeometryExporter,
};
pub use metrics::{ExportMetrics, MetricsSnapshot};
pub use policy::{ErrorPolicy, ErrorReporter, Report, ReportKind, Severity};
pub use projection::{ExtensionHook, LodFilter, Projection, ProjectionFilter, ProjectionResolver, QueryMode};
pub use query::{Connection, PreparedQuery, Row, RowCursor, ScriptedConnection};
pub use run::{ExportRun, ExportRunBuilder, RunServices, RunSummary};
pub use schema::{FeatureSchema, SchemaRegistry};
pub use services::{
    CollectingSink, ExtensionDelegate, FeatureSink, GeometryService, IdGenerator,
    JsonGeometryService, NoExtensions, SequenceIds, UuidGenerator,
};

/// Re-export document model types.
pub use citydb_proto as proto;
