//! SQL rendering of query descriptions.

use citydb_core::query::{ColumnExpr, JoinKind, QueryFilter, QuerySpec};

/// Render `spec` as a single SELECT with `?` placeholders.
///
/// Existence probes become correlated `EXISTS` subqueries capped at one row.
/// Rows are ordered by result alias, so `NULL` ids of unmatched left joins
/// sort first within their parent group.
pub fn render(spec: &QuerySpec) -> String {
    let columns = &spec.columns;
    let mut sql = String::from("SELECT ");

    let select: Vec<String> = columns
        .columns
        .iter()
        .map(|column| match &column.expr {
            ColumnExpr::Field { table, column: name } => format!("{table}.{name} AS {}", column.alias),
            ColumnExpr::Exists {
                table,
                column: name,
                owner_alias,
                owner_column,
            } => format!(
                "EXISTS (SELECT 1 FROM {table} WHERE {table}.{name} = {owner_alias}.{owner_column} LIMIT 1) AS {}",
                column.alias
            ),
        })
        .collect();
    sql.push_str(&select.join(", "));

    sql.push_str(&format!(" FROM {} {}", columns.table, columns.alias));
    for join in &columns.joins {
        let kind = match join.kind {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        sql.push_str(&format!(
            " {kind} {} {} ON {}.{} = {}.{}",
            join.table, join.alias, join.alias, join.column, join.left_alias, join.left_column
        ));
    }

    match &spec.filter {
        QueryFilter::Eq { table, column } => sql.push_str(&format!(" WHERE {table}.{column} = ?")),
        QueryFilter::In {
            table,
            column,
            width,
        } => {
            let placeholders = vec!["?"; (*width).max(1)].join(", ");
            sql.push_str(&format!(" WHERE {table}.{column} IN ({placeholders})"));
        }
    }

    if !columns.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&columns.order_by.join(", "));
    }
    sql
}
