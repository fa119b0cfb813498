//! Row demultiplexing.
//!
//! The primary export query joins every level of a schema into one result
//! set, sorted by the chain of level ids. Rows of one level-0 id are
//! contiguous and within them rows of one level-1 id are contiguous, and so
//! on. The [`Demultiplexer`] walks the rows once and builds one node per
//! distinct id per level and parent, no matter how many rows mention it.
//! Properties of a node are read from the first row of its group only.
//!
//! Deferred work found on the way (geometry ids, sub-feature probes) is
//! queued as [`Deferred`] items for the caller to hand to its batches.

use std::collections::HashMap;
use std::sync::Arc;

use citydb_proto::{PropertyValue, Value};

use super::arena::{FeatureArena, FeatureNode, NodeIndex, SlotRef};
use super::codes::split_codes;
use super::hierarchy::InFlight;
use crate::cache::{ObjectIdentity, Sighting, XlinkResolver};
use crate::catalog::TypeCatalog;
use crate::error::Error;
use crate::metrics::ExportMetrics;
use crate::policy::{ErrorReporter, Report, ReportKind};
use crate::projection::{LevelLayout, Projection, QueryLayout};
use crate::query::Row;
use crate::schema::{PropertyKind, SubFeatureSchema};
use crate::services::{ExtensionDelegate, GeometryService};

/// Property recording the identifier a copy was made from.
pub const EXTERNAL_REFERENCE: &str = "externalReference";

/// Run services the demultiplexer reads from.
pub struct DemuxEnv<'a> {
    pub catalog: &'a TypeCatalog,
    pub projection: &'a Projection,
    pub reporter: &'a ErrorReporter,
    pub metrics: &'a ExportMetrics,
    pub xlink: XlinkResolver<'a>,
    pub geometry: &'a dyn GeometryService,
    pub delegate: &'a dyn ExtensionDelegate,
}

/// Work postponed to a deferred batch.
#[derive(Debug, Clone)]
pub enum Deferred {
    /// Resolve the geometry tree rooted at `root_id` into `slot`.
    Geometry { root_id: i64, slot: SlotRef },
    /// Resolve the sub-features `owner_id` holds through `sub_feature`.
    SubFeatures {
        sub_feature: Arc<SubFeatureSchema>,
        owner_id: i64,
        owner: NodeIndex,
        /// Projection key of the owner's level.
        owner_type: String,
    },
}

/// What a level-0 group turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum RootSlot {
    Node(NodeIndex),
    /// Already exported elsewhere in the run.
    Reference {
        id: i64,
        object_class_id: i32,
        href: String,
    },
}

/// A level-0 result, with its owner for owner-keyed queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Root {
    pub owner: Option<i64>,
    pub slot: RootSlot,
}

/// Everything a finished scan produced.
#[derive(Debug, Default)]
pub struct DemuxOutput {
    pub roots: Vec<Root>,
    /// Build state of every materialized level-0 node.
    pub in_flight: Vec<InFlight>,
}

impl DemuxOutput {
    /// Materialized level-0 nodes in scan order.
    pub fn nodes(&self) -> Vec<NodeIndex> {
        self.roots
            .iter()
            .filter_map(|root| match root.slot {
                RootSlot::Node(node) => Some(node),
                RootSlot::Reference { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GroupKey {
    parent: Option<NodeIndex>,
    owner: Option<i64>,
    id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Node(NodeIndex),
    Skipped,
}

/// Single-pass row-to-tree builder for one query layout.
pub struct Demultiplexer<'a> {
    layout: &'a QueryLayout,
    env: DemuxEnv<'a>,
    seen: Vec<HashMap<GroupKey, Visit>>,
    prealloc: Option<FeatureNode>,
    output: DemuxOutput,
    deferred: Vec<Deferred>,
    groups: usize,
}

impl<'a> Demultiplexer<'a> {
    /// Create a demultiplexer. A pre-allocated node is reused for the
    /// level-0 group with the same id.
    pub fn new(layout: &'a QueryLayout, env: DemuxEnv<'a>, prealloc: Option<FeatureNode>) -> Self {
        Self {
            layout,
            env,
            seen: vec![HashMap::new(); layout.levels.len()],
            prealloc,
            output: DemuxOutput::default(),
            deferred: Vec::new(),
            groups: 0,
        }
    }

    /// Consume one row.
    pub fn push_row(&mut self, arena: &mut FeatureArena, row: &Row) -> Result<(), Error> {
        if self.layout.levels.is_empty() {
            return Ok(());
        }
        self.visit(arena, 0, None, row)
    }

    /// Take the deferred work found so far.
    pub fn take_deferred(&mut self) -> Vec<Deferred> {
        std::mem::take(&mut self.deferred)
    }

    /// Number of level-0 groups opened so far.
    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn finish(self) -> DemuxOutput {
        self.output
    }

    fn visit(
        &mut self,
        arena: &mut FeatureArena,
        index: usize,
        parent: Option<(NodeIndex, i32)>,
        row: &Row,
    ) -> Result<(), Error> {
        let layout = self.layout;
        let level = &layout.levels[index];

        // A null id is a left join without a match.
        let Some(id) = row.get_i64(level.id_column) else {
            return Ok(());
        };
        let owner = match parent {
            None => layout.owner_column.and_then(|c| row.get_i64(c)),
            Some(_) => None,
        };
        let key = GroupKey {
            parent: parent.map(|(node, _)| node),
            owner,
            id,
        };

        let visit = match self.seen[index].get(&key) {
            Some(visit) => *visit,
            None => {
                if parent.is_none() {
                    self.groups += 1;
                }
                let visit = self.open(arena, level, parent, owner, id, row)?;
                self.seen[index].insert(key, visit);
                visit
            }
        };

        if let Visit::Node(node) = visit {
            let class = arena.get(node).map(|n| n.object_class_id).unwrap_or_default();
            for &child in &level.children {
                self.visit(arena, child, Some((node, class)), row)?;
            }
        }
        Ok(())
    }

    fn report(&self, kind: ReportKind, class: Option<i32>, id: i64, message: String) -> Result<(), Error> {
        self.env
            .reporter
            .report(Report::new(kind, message).with_object(class, id))
    }

    /// Build the node for the first row of a group.
    fn open(
        &mut self,
        arena: &mut FeatureArena,
        level: &LevelLayout,
        parent: Option<(NodeIndex, i32)>,
        owner: Option<i64>,
        id: i64,
        row: &Row,
    ) -> Result<Visit, Error> {
        let class = match level.fixed_class.or_else(|| level.class_column.and_then(|c| row.get_i32(c))) {
            Some(class) => class,
            None => {
                self.report(
                    ReportKind::Instantiation,
                    None,
                    id,
                    format!("{} row without object class", level.name),
                )?;
                return Ok(Visit::Skipped);
            }
        };
        let type_name = match self.env.catalog.type_of(class) {
            Ok(feature_type) => feature_type.name.clone(),
            Err(_) => {
                self.report(
                    ReportKind::Instantiation,
                    Some(class),
                    id,
                    format!("unknown object class {class}"),
                )?;
                return Ok(Visit::Skipped);
            }
        };

        if let Some((_, parent_class)) = parent {
            if !level.parent_classes.is_empty() && !level.parent_classes.contains(&parent_class) {
                return Ok(Visit::Skipped);
            }
        }

        let collection = level.collection.as_ref().map(|c| c.name_for(class));
        if let (Some(parent_level), Some(name)) = (level.parent, collection) {
            let parent_type = &self.layout.levels[parent_level].type_name;
            if !self.env.projection.requests(parent_type, name) {
                return Ok(Visit::Skipped);
            }
        }

        let external_id = level
            .external_id_column
            .and_then(|c| row.get_str(c))
            .map(str::to_string);
        let mut copied_from = None;
        let mut node_external_id = external_id.clone();
        if let Some(external_id) = external_id {
            match self.env.xlink.feature(ObjectIdentity::new(&external_id, id, class))? {
                Sighting::First => {}
                Sighting::Reference(href) => {
                    match (parent, collection) {
                        (Some((parent_node, _)), Some(name)) => {
                            arena.push_value(parent_node, name, PropertyValue::Reference(href));
                        }
                        _ => self.output.roots.push(Root {
                            owner,
                            slot: RootSlot::Reference {
                                id,
                                object_class_id: class,
                                href,
                            },
                        }),
                    }
                    return Ok(Visit::Skipped);
                }
                Sighting::Copy { id: new_id, original } => {
                    node_external_id = Some(new_id);
                    if self.env.xlink.keep_external_reference() {
                        copied_from = Some(original);
                    }
                }
            }
        }

        let mut node = match self.prealloc.take() {
            Some(node) if parent.is_none() && node.id == id => node,
            other => {
                self.prealloc = other;
                FeatureNode::new(id, class, type_name.as_str())
            }
        };
        node.object_class_id = class;
        node.type_name = type_name.clone();
        if node_external_id.is_some() {
            node.external_id = node_external_id;
        }
        if let Some(original) = copied_from {
            node.push_value(EXTERNAL_REFERENCE, PropertyValue::Value(Value::String(original)));
        }
        let index = arena.insert(node);

        self.populate(arena, level, index, class, id, row)?;

        if parent.is_none() {
            for probe in &level.probes {
                if row.get_bool(probe.column) == Some(true) {
                    self.deferred.push(Deferred::SubFeatures {
                        sub_feature: probe.sub_feature.clone(),
                        owner_id: id,
                        owner: index,
                        owner_type: level.type_name.clone(),
                    });
                }
            }
        }

        let hook_tables: Vec<&str> = level
            .hooks
            .iter()
            .filter(|hook| !row.is_null(hook.column))
            .map(|hook| hook.hook_table.as_str())
            .collect();
        if !hook_tables.is_empty() {
            let filter = self.env.projection.filter_for(&level.type_name);
            match self
                .env
                .delegate
                .export_properties(&hook_tables, id, &type_name, filter)
            {
                Ok(properties) => {
                    for property in properties {
                        arena.push_value(index, &property.name, property.value);
                    }
                }
                Err(e) if e.is_resolution_failure() => return Err(e),
                Err(e) => self.report(ReportKind::Instantiation, Some(class), id, e.to_string())?,
            }
        }

        match (parent, collection) {
            (Some((parent_node, _)), Some(name)) => arena.attach_child(parent_node, name, index),
            _ => {
                self.output.roots.push(Root {
                    owner,
                    slot: RootSlot::Node(index),
                });
                self.output.in_flight.push(InFlight {
                    node: index,
                    id,
                    object_class_id: class,
                    projection_key: level.type_name.clone(),
                    parent_id: level.part_parent_column.and_then(|c| row.get_i64(c)),
                    owner,
                });
            }
        }

        self.env.metrics.record_feature(&type_name);
        tracing::trace!(level = %level.name, id, object_class_id = class, "opened node");
        Ok(Visit::Node(index))
    }

    fn populate(
        &mut self,
        arena: &mut FeatureArena,
        level: &LevelLayout,
        index: NodeIndex,
        class: i32,
        id: i64,
        row: &Row,
    ) -> Result<(), Error> {
        for property in &level.properties {
            let cell = row.get(property.column);
            if cell.is_null() {
                continue;
            }

            match &property.kind {
                PropertyKind::Scalar => {
                    arena.push_value(index, &property.name, PropertyValue::Value(cell.clone()));
                }
                PropertyKind::CodeList { .. } => match cell.as_str() {
                    Some(values) => {
                        let codespaces = property.codespace.and_then(|c| row.get_str(c));
                        for code in split_codes(values, codespaces) {
                            arena.push_value(index, &property.name, PropertyValue::Code(code));
                        }
                    }
                    None => arena.push_value(index, &property.name, PropertyValue::Value(cell.clone())),
                },
                PropertyKind::Geometry { inline: false } => match cell.as_i64() {
                    Some(root_id) => {
                        if let Some(slot) = arena.reserve(index, &property.name) {
                            self.deferred.push(Deferred::Geometry { root_id, slot });
                        }
                    }
                    None => self.report(
                        ReportKind::DataIntegrity,
                        Some(class),
                        id,
                        format!("{}: geometry reference is not an id", property.name),
                    )?,
                },
                PropertyKind::Geometry { inline: true } => {
                    let decoded = self
                        .env
                        .geometry
                        .decode(cell)
                        .and_then(|g| self.env.geometry.transform(g));
                    match decoded {
                        Ok(geometry) => {
                            arena.push_value(index, &property.name, PropertyValue::Geometry(geometry))
                        }
                        Err(e) => self.report(
                            ReportKind::DataIntegrity,
                            Some(class),
                            id,
                            format!("{}: {e}", property.name),
                        )?,
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use citydb_proto::{Code, Feature};

    use super::*;
    use crate::cache::IdentityCaches;
    use crate::config::{IdentityCacheConfig, XlinkConfig};
    use crate::policy::{ErrorPolicy, Severity};
    use crate::projection::{LodFilter, ProjectionResolver, QueryMode, ResolvedQuery};
    use crate::query::RowBuilder;
    use crate::schema::SchemaRegistry;
    use crate::services::{JsonGeometryService, NoExtensions, SequenceIds};

    struct Fixture {
        catalog: TypeCatalog,
        projection: Projection,
        reporter: ErrorReporter,
        metrics: Arc<ExportMetrics>,
        caches: IdentityCaches,
        xlink: XlinkConfig,
        ids: SequenceIds,
        geometry: JsonGeometryService,
        query: ResolvedQuery,
    }

    impl Fixture {
        fn new() -> Self {
            let metrics = Arc::new(ExportMetrics::new());
            let projection = Projection::new();
            let building = SchemaRegistry::citygml().unwrap().get("Building").unwrap();
            let query = ProjectionResolver::new(&LodFilter::all(), &projection, &[], &NoExtensions)
                .resolve(&building, &QueryMode::ById)
                .unwrap();
            Self {
                catalog: TypeCatalog::citygml(),
                projection,
                reporter: ErrorReporter::new(
                    ErrorPolicy::LogAndContinue,
                    Arc::new(AtomicBool::new(false)),
                    metrics.clone(),
                ),
                metrics,
                caches: IdentityCaches::open(&IdentityCacheConfig::default()).unwrap(),
                xlink: XlinkConfig::default(),
                ids: SequenceIds::new("ID_"),
                geometry: JsonGeometryService::new(),
                query,
            }
        }

        fn env(&self) -> DemuxEnv<'_> {
            DemuxEnv {
                catalog: &self.catalog,
                projection: &self.projection,
                reporter: &self.reporter,
                metrics: &self.metrics,
                xlink: XlinkResolver::new(&self.xlink, &self.caches, &self.ids, &self.metrics),
                geometry: &self.geometry,
                delegate: &NoExtensions,
            }
        }

        fn row(&self) -> RowBuilder<'_> {
            RowBuilder::new(&self.query.spec.columns)
        }

        /// Run rows through a fresh demultiplexer.
        fn scan(&self, arena: &mut FeatureArena, rows: &[Row]) -> (DemuxOutput, Vec<Deferred>) {
            let mut demux = Demultiplexer::new(&self.query.layout, self.env(), None);
            for row in rows {
                demux.push_row(arena, row).unwrap();
            }
            let deferred = demux.take_deferred();
            (demux.finish(), deferred)
        }
    }

    fn building_row(f: &Fixture, surface: Option<(i64, i32)>, opening: Option<(i64, i32)>, address: Option<i64>) -> Row {
        let mut row = f
            .row()
            .set("b_id", 100i64)
            .set("b_objectclass_id", 26)
            .set("bco_gmlid", "B100")
            .set("bco_name", "Town hall");
        if let Some((id, class)) = surface {
            row = row.set("ts_id", id).set("ts_objectclass_id", class);
        }
        if let Some((id, class)) = opening {
            row = row.set("op_id", id).set("op_objectclass_id", class);
        }
        if let Some(id) = address {
            row = row.set("adr_id", id);
        }
        row.build().unwrap()
    }

    fn only_root(arena: &mut FeatureArena, output: &DemuxOutput) -> Feature {
        let nodes = output.nodes();
        assert_eq!(nodes.len(), 1);
        arena.take_tree(nodes[0]).unwrap()
    }

    #[test]
    fn test_groups_rows_into_one_tree() {
        let f = Fixture::new();
        let rows = vec![
            building_row(&f, Some((10, 34)), Some((101, 39)), Some(5001)),
            building_row(&f, Some((10, 34)), Some((101, 39)), Some(5002)),
            building_row(&f, Some((10, 34)), Some((102, 38)), None),
            building_row(&f, Some((10, 34)), Some((103, 39)), None),
            building_row(&f, Some((11, 33)), None, None),
        ];
        let mut arena = FeatureArena::new();
        let (output, _) = f.scan(&mut arena, &rows);

        assert_eq!(output.in_flight.len(), 1);
        let building = only_root(&mut arena, &output);
        assert_eq!(building.count("name"), 1);
        assert_eq!(building.external_id.as_deref(), Some("B100"));

        let surfaces: Vec<&Feature> = building.features("boundedBy").collect();
        assert_eq!(surfaces.len(), 2);
        assert_eq!(surfaces[0].type_name, "WallSurface");
        assert_eq!(surfaces[1].type_name, "RoofSurface");

        let openings: Vec<&Feature> = surfaces[0].features("opening").collect();
        assert_eq!(openings.iter().map(|o| o.id).collect::<Vec<_>>(), vec![101, 102, 103]);
        assert_eq!(openings[0].features("address").count(), 2);
        assert_eq!(building.tree_size(), 8);
        assert_eq!(f.metrics.features_of("Door"), 2);
        assert_eq!(f.metrics.features_of("Address"), 2);
    }

    #[test]
    fn test_three_rows_nest_surfaces_openings_addresses() {
        let f = Fixture::new();
        let rows = vec![
            building_row(&f, Some((10, 34)), Some((101, 39)), Some(5001)),
            building_row(&f, Some((10, 34)), Some((102, 39)), None),
            building_row(&f, Some((11, 33)), None, None),
        ];
        let mut arena = FeatureArena::new();
        let (output, _) = f.scan(&mut arena, &rows);

        let building = only_root(&mut arena, &output);
        let surfaces: Vec<&Feature> = building.features("boundedBy").collect();
        assert_eq!(surfaces.len(), 2);
        assert_eq!(surfaces[0].id, 10);
        assert_eq!(surfaces[1].id, 11);

        let openings: Vec<&Feature> = surfaces[0].features("opening").collect();
        assert_eq!(openings.len(), 2);
        assert_eq!(surfaces[1].count("opening"), 0);

        assert_eq!(openings[0].id, 101);
        assert_eq!(openings[0].count("address"), 1);
        assert_eq!(openings[1].id, 102);
        assert_eq!(openings[1].count("address"), 0);
    }

    #[test]
    fn test_unknown_child_class_skips_only_that_child() {
        let f = Fixture::new();
        let rows = vec![
            building_row(&f, Some((10, 999)), Some((101, 39)), None),
            building_row(&f, Some((11, 34)), None, None),
        ];
        let mut arena = FeatureArena::new();
        let (output, _) = f.scan(&mut arena, &rows);

        let building = only_root(&mut arena, &output);
        let surfaces: Vec<i64> = building.features("boundedBy").map(|s| s.id).collect();
        assert_eq!(surfaces, vec![11]);
        assert_eq!(f.reporter.count(Severity::Error), 1);
        assert_eq!(f.reporter.reports()[0].object_class_id, Some(999));
    }

    #[test]
    fn test_addresses_only_under_doors() {
        let f = Fixture::new();
        let rows = vec![
            building_row(&f, Some((10, 34)), Some((101, 38)), Some(5001)),
            building_row(&f, Some((10, 34)), Some((102, 39)), Some(5002)),
        ];
        let mut arena = FeatureArena::new();
        let (output, _) = f.scan(&mut arena, &rows);

        let building = only_root(&mut arena, &output);
        let surface = building.features("boundedBy").next().unwrap();
        let openings: Vec<&Feature> = surface.features("opening").collect();
        assert_eq!(openings[0].count("address"), 0);
        assert_eq!(openings[1].count("address"), 1);
    }

    #[test]
    fn test_code_lists_are_split() {
        let f = Fixture::new();
        let row = f
            .row()
            .set("b_id", 100i64)
            .set("b_objectclass_id", 26)
            .set("b_function", "1000--/\\--2000")
            .set("b_function_codespace", "urn:a--/\\--urn:b")
            .set("b_roof_type", "3100")
            .build()
            .unwrap();
        let mut arena = FeatureArena::new();
        let (output, _) = f.scan(&mut arena, &[row]);

        let building = only_root(&mut arena, &output);
        let functions: Vec<&Code> = building
            .properties_named("function")
            .filter_map(PropertyValue::as_code)
            .collect();
        assert_eq!(
            functions,
            vec![
                &Code::new("1000").with_codespace("urn:a"),
                &Code::new("2000").with_codespace("urn:b")
            ]
        );
        assert_eq!(
            building.property("roofType").and_then(PropertyValue::as_code),
            Some(&Code::new("3100"))
        );
    }

    #[test]
    fn test_repeated_identifiers_become_references() {
        let f = Fixture::new();
        let rows = vec![
            f.row()
                .set("b_id", 100i64)
                .set("b_objectclass_id", 26)
                .set("ts_id", 10i64)
                .set("ts_objectclass_id", 34)
                .set("tsco_gmlid", "S1")
                .build()
                .unwrap(),
            f.row()
                .set("b_id", 100i64)
                .set("b_objectclass_id", 26)
                .set("ts_id", 11i64)
                .set("ts_objectclass_id", 34)
                .set("tsco_gmlid", "S1")
                .build()
                .unwrap(),
        ];
        let mut arena = FeatureArena::new();
        let (output, _) = f.scan(&mut arena, &rows);
        let building = only_root(&mut arena, &output);
        assert_eq!(building.count("boundedBy"), 2);
        assert_eq!(building.features("boundedBy").count(), 1);
        assert_eq!(
            building.properties_named("boundedBy").find_map(PropertyValue::as_reference),
            Some("#S1")
        );

        let root = f
            .row()
            .set("b_id", 100i64)
            .set("b_objectclass_id", 26)
            .set("bco_gmlid", "B100")
            .build()
            .unwrap();
        f.scan(&mut arena, &[root.clone()]);
        let (again, _) = f.scan(&mut arena, &[root]);
        assert!(again.nodes().is_empty());
        assert!(matches!(
            &again.roots[0].slot,
            RootSlot::Reference { href, .. } if href == "#B100"
        ));
        assert_eq!(f.metrics.snapshot().references_emitted, 2);
    }

    #[test]
    fn test_deferred_work() {
        let f = Fixture::new();
        let row = f
            .row()
            .set("b_id", 100i64)
            .set("b_objectclass_id", 26)
            .set("b_building_parent_id", 7i64)
            .set("b_lod2_solid_id", 7001i64)
            .set("b_has_address", true)
            .set("b_lod2_terrain_intersection", "not a geometry")
            .build()
            .unwrap();
        let mut arena = FeatureArena::new();
        let (output, deferred) = f.scan(&mut arena, &[row]);

        assert_eq!(output.in_flight[0].parent_id, Some(7));
        assert!(deferred
            .iter()
            .any(|d| matches!(d, Deferred::Geometry { root_id: 7001, .. })));
        assert!(deferred.iter().any(|d| matches!(
            d,
            Deferred::SubFeatures { sub_feature, owner_id: 100, .. } if sub_feature.key == "address"
        )));
        assert_eq!(f.reporter.count(Severity::Error), 1);

        let building = only_root(&mut arena, &output);
        assert!(building.property("lod2Solid").is_none());
        assert!(building.property("lod2TerrainIntersection").is_none());
    }
}
