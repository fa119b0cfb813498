//! Connection and prepared statement traits.

use std::sync::Arc;

use citydb_proto::Value;

use super::{QuerySpec, Row};
use crate::error::Error;

/// Forward-only cursor over result rows.
pub type RowCursor<'a> = Box<dyn Iterator<Item = Result<Row, Error>> + 'a>;

/// A statement prepared once and executed many times.
pub trait PreparedQuery: Send + Sync {
    /// The query this statement was prepared from.
    fn spec(&self) -> &QuerySpec;

    /// Execute with the given bind parameters.
    ///
    /// Cells of the returned rows follow the column order of
    /// [`QuerySpec::columns`].
    fn execute(&self, params: &[Value]) -> Result<RowCursor<'_>, Error>;
}

/// A database connection owned by one worker.
pub trait Connection: Send + Sync {
    /// Prepare a statement for the given query.
    fn prepare(&self, spec: &QuerySpec) -> Result<Arc<dyn PreparedQuery>, Error>;

    /// Maximum number of bind parameters accepted by one statement.
    fn max_bind_parameters(&self) -> usize;
}
