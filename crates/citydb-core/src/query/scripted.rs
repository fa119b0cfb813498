//! In-memory connection that answers queries from registered handlers.
//!
//! Handlers synthesize rows from the query's own column set, so tests stay
//! valid when projections add or drop columns. Every execution is logged with
//! its parameters.

use std::collections::HashMap;
use std::sync::Arc;

use citydb_proto::Value;
use parking_lot::Mutex;

use super::{ColumnSet, Connection, PreparedQuery, QuerySpec, Row, RowCursor};
use crate::error::Error;

type Handler = dyn Fn(&QuerySpec, &[Value]) -> Result<Vec<Row>, Error> + Send + Sync;

/// One logged statement execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub name: String,
    pub params: Vec<Value>,
}

/// Scripted [`Connection`] for tests and dry runs.
#[derive(Clone)]
pub struct ScriptedConnection {
    handlers: HashMap<String, Arc<Handler>>,
    max_bind_parameters: usize,
    log: Arc<Mutex<Vec<Execution>>>,
}

impl Default for ScriptedConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            max_bind_parameters: 999,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Limit the number of bind parameters per statement.
    pub fn with_max_bind_parameters(mut self, max: usize) -> Self {
        self.max_bind_parameters = max.max(1);
        self
    }

    /// Answer queries named `name`, or all queries of a schema when `name`
    /// has no `/`.
    pub fn on<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&QuerySpec, &[Value]) -> Vec<Row> + Send + Sync + 'static,
    {
        let handler: Arc<Handler> =
            Arc::new(move |spec: &QuerySpec, params: &[Value]| Ok(handler(spec, params)));
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Like [`ScriptedConnection::on`] but the handler may fail.
    pub fn on_result<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&QuerySpec, &[Value]) -> Result<Vec<Row>, Error> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// All executions so far, across clones of this connection.
    pub fn executions(&self) -> Vec<Execution> {
        self.log.lock().clone()
    }

    /// Executions whose query name starts with `prefix`.
    pub fn executions_of(&self, prefix: &str) -> Vec<Execution> {
        self.log
            .lock()
            .iter()
            .filter(|e| e.name.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn handler_for(&self, name: &str) -> Option<Arc<Handler>> {
        self.handlers
            .get(name)
            .or_else(|| name.split('/').next().and_then(|s| self.handlers.get(s)))
            .cloned()
    }
}

impl Connection for ScriptedConnection {
    fn prepare(&self, spec: &QuerySpec) -> Result<Arc<dyn PreparedQuery>, Error> {
        if spec.filter.arity() > self.max_bind_parameters {
            return Err(Error::Query(format!(
                "{} needs {} parameters, at most {} allowed",
                spec.name,
                spec.filter.arity(),
                self.max_bind_parameters
            )));
        }
        Ok(Arc::new(ScriptedQuery {
            spec: spec.clone(),
            handler: self.handler_for(&spec.name),
            log: self.log.clone(),
        }))
    }

    fn max_bind_parameters(&self) -> usize {
        self.max_bind_parameters
    }
}

struct ScriptedQuery {
    spec: QuerySpec,
    handler: Option<Arc<Handler>>,
    log: Arc<Mutex<Vec<Execution>>>,
}

impl PreparedQuery for ScriptedQuery {
    fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    fn execute(&self, params: &[Value]) -> Result<RowCursor<'_>, Error> {
        if params.len() != self.spec.filter.arity() {
            return Err(Error::Query(format!(
                "{} expects {} parameters, got {}",
                self.spec.name,
                self.spec.filter.arity(),
                params.len()
            )));
        }
        self.log.lock().push(Execution {
            name: self.spec.name.clone(),
            params: params.to_vec(),
        });

        let rows = match &self.handler {
            Some(handler) => handler(&self.spec, params)?,
            None => Vec::new(),
        };
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

/// Builds a [`Row`] for a column set by result alias. Unset cells are null.
pub struct RowBuilder<'a> {
    columns: &'a ColumnSet,
    values: Vec<Value>,
    unknown: Vec<String>,
}

impl<'a> RowBuilder<'a> {
    pub fn new(columns: &'a ColumnSet) -> Self {
        Self {
            columns,
            values: vec![Value::Null; columns.len()],
            unknown: Vec::new(),
        }
    }

    /// Set a cell by alias.
    pub fn set(mut self, alias: &str, value: impl Into<Value>) -> Self {
        match self.columns.index_of(alias) {
            Some(index) => self.values[index] = value.into(),
            None => self.unknown.push(alias.to_string()),
        }
        self
    }

    /// Set a cell only if the query selects it.
    pub fn set_if_present(mut self, alias: &str, value: impl Into<Value>) -> Self {
        if let Some(index) = self.columns.index_of(alias) {
            self.values[index] = value.into();
        }
        self
    }

    /// Finish the row. Fails if an alias was not part of the column set.
    pub fn build(self) -> Result<Row, Error> {
        if !self.unknown.is_empty() {
            return Err(Error::Query(format!(
                "unknown column aliases: {}",
                self.unknown.join(", ")
            )));
        }
        Ok(Row::new(self.values))
    }
}
