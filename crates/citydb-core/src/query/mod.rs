//! Query execution collaborator.
//!
//! The engine describes the columns it needs as a [`ColumnSet`] and talks to
//! the relational backend only through [`Connection`] and [`PreparedQuery`].

mod columns;
mod connection;
mod row;
mod scripted;

pub use columns::{Column, ColumnExpr, ColumnSet, Join, JoinKind, QueryFilter, QuerySpec};
pub use connection::{Connection, PreparedQuery, RowCursor};
pub use row::Row;
pub use scripted::{Execution, RowBuilder, ScriptedConnection};
