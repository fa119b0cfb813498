//! SQLite-backed query execution.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::OpenFlags;

use citydb_core::query::QuerySpec;
use citydb_core::{Connection, Error, PreparedQuery, Row, RowCursor};
use citydb_proto::Value;

use crate::sql;

/// Bind parameter limit of the bundled SQLite build.
pub const MAX_BIND_PARAMETERS: usize = 999;

/// Statements kept per connection.
const STATEMENT_CACHE_CAPACITY: usize = 64;

fn query_error(e: rusqlite::Error) -> Error {
    Error::Query(e.to_string())
}

/// One SQLite connection, shared by the statements prepared on it.
#[derive(Clone)]
pub struct SqliteConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteConnection {
    /// Open a database file read-only.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = rusqlite::Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::Connection(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "opened database");
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already open connection.
    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with the underlying connection locked.
    pub fn with<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>) -> Result<T, Error> {
        f(&self.conn.lock()).map_err(query_error)
    }
}

impl Connection for SqliteConnection {
    fn prepare(&self, spec: &QuerySpec) -> Result<Arc<dyn PreparedQuery>, Error> {
        if spec.filter.arity() > MAX_BIND_PARAMETERS {
            return Err(Error::Query(format!(
                "{} needs {} parameters, at most {MAX_BIND_PARAMETERS} allowed",
                spec.name,
                spec.filter.arity()
            )));
        }
        let sql = sql::render(spec);
        self.with(|conn| conn.prepare_cached(&sql).map(|_| ()))?;
        tracing::trace!(query = %spec.name, sql = %sql, "prepared statement");

        Ok(Arc::new(SqliteQuery {
            spec: spec.clone(),
            sql,
            conn: self.conn.clone(),
        }))
    }

    fn max_bind_parameters(&self) -> usize {
        MAX_BIND_PARAMETERS
    }
}

struct SqliteQuery {
    spec: QuerySpec,
    sql: String,
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl PreparedQuery for SqliteQuery {
    fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    // Rows are collected before the lock is released, so nested statements
    // can run on the same connection while the caller consumes them.
    fn execute(&self, params: &[Value]) -> Result<RowCursor<'_>, Error> {
        let width = self.spec.columns.len();
        let conn = self.conn.lock();
        let mut statement = conn.prepare_cached(&self.sql).map_err(query_error)?;
        let mut rows = statement
            .query(rusqlite::params_from_iter(params.iter().map(to_sql)))
            .map_err(query_error)?;

        let mut collected = Vec::new();
        while let Some(row) = rows.next().map_err(query_error)? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(from_sql(row.get_ref(index).map_err(query_error)?));
            }
            collected.push(Row::new(values));
        }
        Ok(Box::new(collected.into_iter().map(Ok)))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int32(i) => SqlValue::Integer(i64::from(*i)),
        Value::Int64(i) => SqlValue::Integer(*i),
        Value::Float64(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}
