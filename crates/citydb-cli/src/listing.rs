//! Selection of the top-level features to export.

use std::collections::BTreeMap;

use citydb_core::{Error, ExportRequest, SchemaRegistry, TypeCatalog};

use crate::sqlite::SqliteConnection;

/// Requests for every top-level feature of the database, ordered by id.
///
/// Only concrete top-level classes with an export schema are listed,
/// restricted to `classes` when it is not empty. Parts are left to their
/// root feature.
pub fn top_level_requests(
    conn: &SqliteConnection,
    catalog: &TypeCatalog,
    schemas: &SchemaRegistry,
    classes: &[i32],
) -> Result<Vec<ExportRequest>, Error> {
    let mut by_schema: BTreeMap<String, Vec<i32>> = BTreeMap::new();
    for feature_type in catalog.top_level_types() {
        let class = feature_type.object_class_id;
        if !classes.is_empty() && !classes.contains(&class) {
            continue;
        }
        match schemas.for_class(class) {
            Some(schema) => by_schema.entry(schema.name.clone()).or_default().push(class),
            None => tracing::debug!(class, name = %feature_type.name, "no exporter for class"),
        }
    }

    let mut requests = Vec::new();
    for (name, classes) in by_schema {
        let Some(schema) = schemas.get(&name) else {
            continue;
        };
        let root = &schema.root;
        let found = match &root.class_column {
            Some(class_column) => {
                let placeholders = vec!["?"; classes.len()].join(", ");
                let mut sql = format!(
                    "SELECT {id}, {class_column} FROM {table} WHERE {class_column} IN ({placeholders})",
                    id = root.id_column,
                    table = root.table,
                );
                if let Some(part_of) = &schema.part_of {
                    sql.push_str(&format!(" AND {} IS NULL", part_of.parent_column));
                }
                conn.with(|c| {
                    let mut statement = c.prepare(&sql)?;
                    let rows = statement.query_map(rusqlite::params_from_iter(&classes), |row| {
                        Ok(ExportRequest::new(row.get(0)?, row.get(1)?))
                    })?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                })?
            }
            None => {
                let Some(class) = root.fixed_class else {
                    continue;
                };
                let sql = format!("SELECT {} FROM {}", root.id_column, root.table);
                conn.with(|c| {
                    let mut statement = c.prepare(&sql)?;
                    let rows = statement.query_map([], |row| Ok(ExportRequest::new(row.get(0)?, class)))?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                })?
            }
        };
        tracing::debug!(schema = %name, features = found.len(), "listed top-level features");
        requests.extend(found);
    }

    requests.sort_by_key(|r| r.id);
    Ok(requests)
}
