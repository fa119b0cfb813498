//! Column sets and query descriptions.

use std::collections::HashMap;

/// Join flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
}

/// A join of `table AS alias ON alias.column = left_alias.left_column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub column: String,
    pub left_alias: String,
    pub left_column: String,
}

/// How a selected column is computed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnExpr {
    /// A plain column of a joined table.
    Field { table: String, column: String },
    /// Whether at least one row of `table` has `column` equal to
    /// `owner_alias.owner_column`. Backends evaluate this with a capped fetch.
    Exists {
        table: String,
        column: String,
        owner_alias: String,
        owner_column: String,
    },
}

/// A selected column and its result alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub alias: String,
    pub expr: ColumnExpr,
}

/// Row filter of a query. Parameters are bound at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryFilter {
    /// `table.column = ?`
    Eq { table: String, column: String },
    /// `table.column IN (?, ...)` with a fixed number of parameters.
    In {
        table: String,
        column: String,
        width: usize,
    },
}

impl QueryFilter {
    /// Number of bind parameters the filter expects.
    pub fn arity(&self) -> usize {
        match self {
            QueryFilter::Eq { .. } => 1,
            QueryFilter::In { width, .. } => *width,
        }
    }
}

/// The projected columns and joins of one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    pub table: String,
    pub alias: String,
    pub joins: Vec<Join>,
    pub columns: Vec<Column>,
    /// Result aliases, primary sort key first.
    pub order_by: Vec<String>,
    index: HashMap<String, usize>,
}

impl ColumnSet {
    /// Start a column set selecting from `table AS alias`.
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            ..Default::default()
        }
    }

    /// Add a join unless one with the same alias exists.
    pub fn join(&mut self, join: Join) {
        if join.alias == self.alias || self.joins.iter().any(|j| j.alias == join.alias) {
            return;
        }
        self.joins.push(join);
    }

    /// Select `table.column` as `{table}_{column}` and return its index.
    pub fn field(&mut self, table: &str, column: &str) -> usize {
        let alias = format!("{table}_{column}");
        self.add(
            alias,
            ColumnExpr::Field {
                table: table.to_string(),
                column: column.to_string(),
            },
        )
    }

    /// Add a column, reusing an existing one with the same alias.
    pub fn add(&mut self, alias: String, expr: ColumnExpr) -> usize {
        if let Some(&index) = self.index.get(&alias) {
            return index;
        }
        let index = self.columns.len();
        self.index.insert(alias.clone(), index);
        self.columns.push(Column { alias, expr });
        index
    }

    /// Append a sort key by result alias.
    pub fn order_by(&mut self, alias: impl Into<String>) {
        let alias = alias.into();
        if !self.order_by.contains(&alias) {
            self.order_by.push(alias);
        }
    }

    /// Position of a column by result alias.
    pub fn index_of(&self, alias: &str) -> Option<usize> {
        self.index.get(alias).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether any column reads from the given table alias.
    pub fn reads_from(&self, alias: &str) -> bool {
        self.columns.iter().any(|c| match &c.expr {
            ColumnExpr::Field { table, .. } => table == alias,
            ColumnExpr::Exists { owner_alias, .. } => owner_alias == alias,
        })
    }
}

/// A complete query: name, projection and filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    /// Stable name, e.g. `Building/by_id`.
    pub name: String,
    pub columns: ColumnSet,
    pub filter: QueryFilter,
}
