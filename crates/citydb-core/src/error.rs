//! Core error types.

use thiserror::Error;

/// Errors raised by the materialization engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Identity spill store error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Document model error.
    #[error("document error: {0}")]
    Document(#[from] citydb_proto::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Query preparation or execution failed.
    #[error("query error: {0}")]
    Query(String),

    /// The connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// The type catalog has no entry for this object class.
    #[error("unknown object class: {0}")]
    UnknownObjectClass(i32),

    /// No exporter handles this object class.
    #[error("no exporter for object class {0}")]
    NoExporter(i32),

    /// An export schema descriptor is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A geometry cell could not be decoded or transformed.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// A schema extension refused or failed to export its properties.
    #[error("extension {extension} failed: {message}")]
    Extension { extension: String, message: String },

    /// The run was aborted by the fail-fast policy.
    #[error("export aborted: {0}")]
    Aborted(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Output sink failure.
    #[error("sink error: {0}")]
    Sink(String),
}

impl Error {
    /// Whether this error comes from the resolution services (queries,
    /// connections, spill store) and must always propagate.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Error::Query(_) | Error::Connection(_) | Error::Storage(_)
        )
    }
}
