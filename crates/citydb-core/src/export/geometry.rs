//! Secondary exporter assembling stored geometry trees.
//!
//! Every geometry property of a feature points at the root row of a tree in
//! the geometry table. Leaves carry an encoded geometry cell; inner rows carry
//! only flags that decide the aggregate kind. Roots are resolved in bulk
//! through a deferred batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use citydb_proto::{Geometry, GeometryKind, Value};
use parking_lot::Mutex;

use crate::batch::{BatchQuery, BatchSource};
use crate::error::Error;
use crate::policy::{Report, ReportKind};
use crate::query::{ColumnSet, Connection, PreparedQuery, QueryFilter, QuerySpec, Row};
use crate::run::RunServices;

/// Table holding geometry trees.
pub const GEOMETRY_TABLE: &str = "surface_geometry";

const ALIAS: &str = "sg";
const COLUMNS: [&str; 9] = [
    "id",
    "gmlid",
    "parent_id",
    "root_id",
    "is_solid",
    "is_composite",
    "is_triangulated",
    "is_xlink",
    "geometry",
];
const ID: usize = 0;
const GMLID: usize = 1;
const PARENT_ID: usize = 2;
const ROOT_ID: usize = 3;
const IS_SOLID: usize = 4;
const IS_COMPOSITE: usize = 5;
const IS_TRIANGULATED: usize = 6;
const IS_XLINK: usize = 7;
const GEOMETRY: usize = 8;

/// A resolved geometry tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledGeometry {
    pub geometry: Geometry,
    /// Marked as referenced from more than one feature.
    pub shared: bool,
}

#[derive(Debug)]
struct GeometryRow {
    id: i64,
    gmlid: Option<String>,
    parent_id: Option<i64>,
    solid: bool,
    composite: bool,
    triangulated: bool,
    xlink: bool,
    cell: Value,
}

impl GeometryRow {
    fn read(row: Row) -> Option<(i64, Self)> {
        let id = row.get_i64(ID)?;
        let root_id = row.get_i64(ROOT_ID)?;
        let flag = |index| row.get_bool(index).unwrap_or(false);
        let geometry_row = GeometryRow {
            id,
            gmlid: row.get_str(GMLID).map(str::to_string),
            parent_id: row.get_i64(PARENT_ID),
            solid: flag(IS_SOLID),
            composite: flag(IS_COMPOSITE),
            triangulated: flag(IS_TRIANGULATED),
            xlink: flag(IS_XLINK),
            cell: row.get(GEOMETRY).clone(),
        };
        Some((root_id, geometry_row))
    }

    fn aggregate_kind(&self) -> GeometryKind {
        match (self.solid, self.composite, self.triangulated) {
            (true, true, _) => GeometryKind::CompositeSolid,
            (true, false, _) => GeometryKind::Solid,
            (false, true, _) => GeometryKind::CompositeSurface,
            (false, false, true) => GeometryKind::TriangulatedSurface,
            (false, false, false) => GeometryKind::MultiSurface,
        }
    }
}

/// Resolves geometry root ids of one worker's connection.
pub struct GeometryExporter {
    services: Arc<RunServices>,
    connection: Arc<dyn Connection>,
    statements: Mutex<HashMap<usize, Arc<dyn PreparedQuery>>>,
}

impl GeometryExporter {
    pub fn new(services: Arc<RunServices>, connection: Arc<dyn Connection>) -> Self {
        Self {
            services,
            connection,
            statements: Mutex::new(HashMap::new()),
        }
    }

    /// Query selecting whole trees by root id, `width` roots at a time.
    pub fn query_spec(width: usize) -> QuerySpec {
        let mut columns = ColumnSet::new(GEOMETRY_TABLE, ALIAS);
        for column in COLUMNS {
            columns.field(ALIAS, column);
        }
        columns.order_by(format!("{ALIAS}_root_id"));
        columns.order_by(format!("{ALIAS}_id"));

        let (name, filter) = if width == 1 {
            (
                "by_root",
                QueryFilter::Eq {
                    table: ALIAS.to_string(),
                    column: "root_id".to_string(),
                },
            )
        } else {
            (
                "by_roots",
                QueryFilter::In {
                    table: ALIAS.to_string(),
                    column: "root_id".to_string(),
                    width,
                },
            )
        };
        QuerySpec {
            name: format!("{GEOMETRY_TABLE}/{name}"),
            columns,
            filter,
        }
    }

    fn statement(&self, width: usize) -> Result<Arc<dyn PreparedQuery>, Error> {
        let mut statements = self.statements.lock();
        if let Some(statement) = statements.get(&width) {
            return Ok(statement.clone());
        }
        let statement = self.connection.prepare(&Self::query_spec(width))?;
        statements.insert(width, statement.clone());
        Ok(statement)
    }

    /// Build the tree below `root_id` from its rows.
    fn assemble(&self, root_id: i64, rows: Vec<GeometryRow>) -> Result<Option<AssembledGeometry>, Error> {
        let mut children: HashMap<i64, Vec<usize>> = HashMap::new();
        let mut root = None;
        for (index, row) in rows.iter().enumerate() {
            match row.parent_id {
                Some(parent) if parent != row.id => children.entry(parent).or_default().push(index),
                _ if row.id == root_id => root = Some(index),
                _ => {}
            }
        }
        let Some(root) = root else {
            tracing::debug!(root_id, "geometry tree without root row");
            return Ok(None);
        };

        let mut visited = HashSet::new();
        let Some(geometry) = self.build(&rows, &children, root, &mut visited)? else {
            return Ok(None);
        };
        let geometry = self.services.geometry.transform(geometry)?;
        Ok(Some(AssembledGeometry {
            geometry,
            shared: rows[root].xlink,
        }))
    }

    fn build(
        &self,
        rows: &[GeometryRow],
        children: &HashMap<i64, Vec<usize>>,
        index: usize,
        visited: &mut HashSet<i64>,
    ) -> Result<Option<Geometry>, Error> {
        let row = &rows[index];
        if !visited.insert(row.id) {
            tracing::warn!(id = row.id, "cycle in geometry tree");
            return Ok(None);
        }

        let geometry = if !row.cell.is_null() {
            match self.services.geometry.decode(&row.cell) {
                Ok(geometry) => geometry,
                Err(e) => {
                    self.services.reporter.report(
                        Report::new(ReportKind::DataIntegrity, format!("undecodable geometry: {e}"))
                            .with_object(None, row.id),
                    )?;
                    return Ok(None);
                }
            }
        } else {
            let mut aggregate = Geometry::new(row.aggregate_kind());
            for &child in children.get(&row.id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(member) = self.build(rows, children, child, visited)? {
                    aggregate = aggregate.with_member(member);
                }
            }
            if aggregate.members.is_empty() {
                return Ok(None);
            }
            aggregate
        };

        Ok(Some(match &row.gmlid {
            Some(gmlid) => geometry.with_id(gmlid.clone()),
            None => geometry,
        }))
    }
}

impl BatchSource<i64, AssembledGeometry> for GeometryExporter {
    fn fetch(&self, query: BatchQuery<i64>) -> Result<Vec<(i64, AssembledGeometry)>, Error> {
        let statement = self.statement(query.keys().len())?;
        self.services.metrics.record_query();
        self.services.metrics.record_batch_flush();

        let mut order = Vec::new();
        let mut trees: HashMap<i64, Vec<GeometryRow>> = HashMap::new();
        for row in statement.execute(&query.params())? {
            let Some((root_id, row)) = GeometryRow::read(row?) else {
                continue;
            };
            trees
                .entry(root_id)
                .or_insert_with(|| {
                    order.push(root_id);
                    Vec::new()
                })
                .push(row);
        }

        let mut resolved = Vec::with_capacity(order.len());
        for root_id in order {
            let rows = trees.remove(&root_id).unwrap_or_default();
            if let Some(geometry) = self.assemble(root_id, rows)? {
                resolved.push((root_id, geometry));
            }
        }
        tracing::trace!(roots = query.keys().len(), resolved = resolved.len(), "geometry batch");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportConfig;
    use crate::query::{RowBuilder, ScriptedConnection};
    use crate::run::ExportRun;

    fn polygon(x: f64) -> Vec<u8> {
        Geometry::polygon(vec![[x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x, 1.0, 0.0], [x, 0.0, 0.0]])
            .to_json()
            .unwrap()
    }

    fn row(spec: &QuerySpec, id: i64, parent: Option<i64>, root: i64) -> RowBuilder<'_> {
        let builder = RowBuilder::new(&spec.columns)
            .set("sg_id", id)
            .set("sg_root_id", root);
        match parent {
            Some(parent) => builder.set("sg_parent_id", parent),
            None => builder,
        }
    }

    fn solid_tree(spec: &QuerySpec, params: &[Value]) -> Vec<Row> {
        if !params.iter().any(|p| p.as_i64() == Some(7001)) {
            return Vec::new();
        }
        vec![
            row(spec, 7001, None, 7001)
                .set("sg_gmlid", "solid-1")
                .set("sg_is_solid", true)
                .build()
                .unwrap(),
            row(spec, 7003, Some(7001), 7001)
                .set("sg_gmlid", "wall-1")
                .set("sg_geometry", polygon(0.0))
                .build()
                .unwrap(),
            row(spec, 7004, Some(7001), 7001)
                .set("sg_geometry", polygon(5.0))
                .build()
                .unwrap(),
        ]
    }

    fn exporter(connection: ScriptedConnection) -> (ExportRun, GeometryExporter) {
        let run = ExportRun::builder(ExportConfig::default()).build().unwrap();
        let exporter = GeometryExporter::new(run.services().clone(), Arc::new(connection));
        (run, exporter)
    }

    #[test]
    fn test_query_spec_width() {
        let single = GeometryExporter::query_spec(1);
        assert_eq!(single.name, "surface_geometry/by_root");
        assert_eq!(single.filter.arity(), 1);

        let bulk = GeometryExporter::query_spec(30);
        assert_eq!(bulk.name, "surface_geometry/by_roots");
        assert_eq!(bulk.filter.arity(), 30);
        assert_eq!(bulk.columns.len(), COLUMNS.len());
    }

    #[test]
    fn test_bulk_fetch_assembles_trees() {
        let connection = ScriptedConnection::new().on(GEOMETRY_TABLE, solid_tree);
        let (run, exporter) = exporter(connection.clone());

        let resolved = exporter
            .fetch(BatchQuery::Bulk(vec![7001, 7002, 0]))
            .unwrap();

        assert_eq!(resolved.len(), 1);
        let (root_id, assembled) = &resolved[0];
        assert_eq!(*root_id, 7001);
        assert!(!assembled.shared);
        assert_eq!(assembled.geometry.kind, GeometryKind::Solid);
        assert_eq!(assembled.geometry.id.as_deref(), Some("solid-1"));
        assert_eq!(assembled.geometry.member_count(), 2);
        assert_eq!(assembled.geometry.members[0].id.as_deref(), Some("wall-1"));
        assert_eq!(assembled.geometry.members[1].kind, GeometryKind::Polygon);

        let executions = connection.executions_of(GEOMETRY_TABLE);
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].params.len(), 3);
        assert_eq!(run.metrics().batch_flushes, 1);
    }

    #[test]
    fn test_undecodable_leaf_is_reported_and_skipped() {
        let connection = ScriptedConnection::new().on(GEOMETRY_TABLE, |spec, _| {
            vec![
                row(spec, 10, None, 10).set("sg_is_composite", true).build().unwrap(),
                row(spec, 11, Some(10), 10).set("sg_geometry", polygon(0.0)).build().unwrap(),
                row(spec, 12, Some(10), 10)
                    .set("sg_geometry", b"not json".to_vec())
                    .build()
                    .unwrap(),
            ]
        });
        let (run, exporter) = exporter(connection);

        let resolved = exporter.fetch(BatchQuery::Single(10)).unwrap();

        assert_eq!(resolved.len(), 1);
        let geometry = &resolved[0].1.geometry;
        assert_eq!(geometry.kind, GeometryKind::CompositeSurface);
        assert_eq!(geometry.member_count(), 1);

        let reports = run.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ReportKind::DataIntegrity);
        assert_eq!(reports[0].surrogate_id, Some(12));
    }

    #[test]
    fn test_empty_aggregate_is_dropped() {
        let connection = ScriptedConnection::new().on(GEOMETRY_TABLE, |spec, _| {
            vec![row(spec, 20, None, 20)
                .set("sg_is_xlink", true)
                .build()
                .unwrap()]
        });
        let (_run, exporter) = exporter(connection);

        assert!(exporter.fetch(BatchQuery::Single(20)).unwrap().is_empty());
    }

    #[test]
    fn test_shared_flag_from_root() {
        let connection = ScriptedConnection::new().on(GEOMETRY_TABLE, |spec, _| {
            vec![
                row(spec, 30, None, 30).set("sg_is_xlink", true).build().unwrap(),
                row(spec, 31, Some(30), 30).set("sg_geometry", polygon(1.0)).build().unwrap(),
            ]
        });
        let (_run, exporter) = exporter(connection);

        let resolved = exporter.fetch(BatchQuery::Single(30)).unwrap();
        assert!(resolved[0].1.shared);
        assert_eq!(resolved[0].1.geometry.kind, GeometryKind::MultiSurface);
    }
}
