//! Integration tests for whole export runs over a scripted city database.

use std::sync::Arc;

use citydb_core::config::SpillConfig;
use citydb_core::proto::{Feature, Geometry, GeometryKind, PropertyValue, Value};
use citydb_core::query::{QuerySpec, RowBuilder};
use citydb_core::{
    BatchConfig, CollectingSink, Connection, Error, ErrorPolicy, ExportConfig, ExportRequest,
    ExportRun, IdentityCacheConfig, LodFilter, Projection, ProjectionFilter, ReferenceMode, Row,
    ScriptedConnection, SequenceIds, XlinkConfig,
};

const BUILDING: i32 = 26;
const BUILDING_PART: i32 = 25;
const ROOF: i32 = 33;
const WALL: i32 = 34;
const DOOR: i32 = 39;

/// A row of the building join, setting only the columns the query selects.
struct JoinRow<'a>(RowBuilder<'a>);

impl<'a> JoinRow<'a> {
    fn building(spec: &'a QuerySpec, id: i64, class: i32, gmlid: &str) -> Self {
        Self(RowBuilder::new(&spec.columns))
            .set("b_id", id)
            .set("b_objectclass_id", class)
            .set("bco_gmlid", gmlid)
    }

    fn set(self, alias: &str, value: impl Into<Value>) -> Self {
        Self(self.0.set_if_present(alias, value))
    }

    fn surface(self, id: i64, class: i32, gmlid: &str, geometry: i64) -> Self {
        self.set("ts_id", id)
            .set("ts_objectclass_id", class)
            .set("tsco_gmlid", gmlid)
            .set("ts_lod2_multi_surface_id", geometry)
    }

    fn opening(self, id: i64, class: i32, gmlid: &str) -> Self {
        self.set("op_id", id)
            .set("op_objectclass_id", class)
            .set("opco_gmlid", gmlid)
    }

    fn address(self, id: i64, gmlid: &str, street: &str) -> Self {
        self.set("adr_id", id)
            .set("adr_gmlid", gmlid)
            .set("adr_street", street)
    }

    fn build(self) -> Row {
        self.0.build().unwrap()
    }
}

fn town_hall(spec: &QuerySpec) -> JoinRow<'_> {
    JoinRow::building(spec, 100, BUILDING, "B100")
        .set("bco_name", "Town hall")
        .set("b_function", "1000--/\\--2000")
        .set("b_lod1_solid_id", 7100i64)
        .set("b_lod2_solid_id", 7001i64)
        .set("b_has_address", false)
}

/// Every building row of the scripted database with its id and root id.
fn building_table(spec: &QuerySpec) -> Vec<(i64, i64, Row)> {
    vec![
        (
            100,
            100,
            town_hall(spec)
                .surface(10, WALL, "WS10", 7002)
                .opening(101, DOOR, "D101")
                .address(5001, "ADR1", "Main St")
                .build(),
        ),
        (100, 100, town_hall(spec).surface(11, ROOF, "RS11", 7003).build()),
        (
            200,
            100,
            JoinRow::building(spec, 200, BUILDING_PART, "BP200")
                .set("bco_name", "Annex")
                .set("b_building_parent_id", 100i64)
                .set("b_lod2_solid_id", 7004i64)
                .build(),
        ),
        (
            300,
            300,
            JoinRow::building(spec, 300, BUILDING, "B300")
                .set("bco_name", "Library")
                .set("b_lod2_solid_id", 7001i64)
                .set("b_has_address", true)
                .build(),
        ),
    ]
}

fn buildings(spec: &QuerySpec, params: &[Value]) -> Vec<Row> {
    let Some(key) = params.first().and_then(Value::as_i64) else {
        return Vec::new();
    };
    let by_root = spec.name.ends_with("by_root");
    building_table(spec)
        .into_iter()
        .filter(|(id, root, _)| if by_root { *root == key } else { *id == key })
        .map(|(_, _, row)| row)
        .collect()
}

fn addresses(spec: &QuerySpec, params: &[Value]) -> Vec<Row> {
    if !params.iter().any(|p| p.as_i64() == Some(300)) {
        return Vec::new();
    }
    vec![RowBuilder::new(&spec.columns)
        .set("own_building_id", 300i64)
        .set("a_id", 5001i64)
        .set("a_gmlid", "ADR1")
        .set_if_present("a_street", "Main St")
        .build()
        .unwrap()]
}

fn polygon(offset: f64) -> Vec<u8> {
    Geometry::polygon(vec![
        [offset, 0.0, 0.0],
        [offset + 1.0, 0.0, 0.0],
        [offset, 1.0, 0.0],
        [offset, 0.0, 0.0],
    ])
    .to_json()
    .unwrap()
}

/// Geometry trees 7001 to 7004 and 7100. Root 7001 is shared.
fn geometries(spec: &QuerySpec, params: &[Value]) -> Vec<Row> {
    let mut rows = Vec::new();
    for root in params.iter().filter_map(Value::as_i64) {
        if !(7001..=7004).contains(&root) && root != 7100 {
            continue;
        }
        let solid = matches!(root, 7001 | 7004 | 7100);
        rows.push(
            RowBuilder::new(&spec.columns)
                .set("sg_id", root)
                .set("sg_root_id", root)
                .set("sg_gmlid", format!("G{root}"))
                .set("sg_is_solid", solid)
                .set("sg_is_xlink", root == 7001)
                .build()
                .unwrap(),
        );
        for leaf in 1..=2 {
            rows.push(
                RowBuilder::new(&spec.columns)
                    .set("sg_id", root * 10 + leaf)
                    .set("sg_parent_id", root)
                    .set("sg_root_id", root)
                    .set("sg_gmlid", format!("P{root}_{leaf}"))
                    .set("sg_geometry", polygon(leaf as f64))
                    .build()
                    .unwrap(),
            );
        }
    }
    rows
}

fn city_db() -> ScriptedConnection {
    ScriptedConnection::new()
        .on("Building", buildings)
        .on("Address", addresses)
        .on("surface_geometry", geometries)
}

fn config() -> ExportConfig {
    ExportConfig::default().with_workers(1)
}

fn run(config: ExportConfig) -> ExportRun {
    ExportRun::builder(config)
        .with_id_generator(Arc::new(SequenceIds::new("COPY_")))
        .build()
        .unwrap()
}

fn export(run: &ExportRun, db: &ScriptedConnection, sink: &CollectingSink, ids: &[(i64, i32)]) {
    let requests = ids
        .iter()
        .map(|(id, class)| ExportRequest::new(*id, *class))
        .collect();
    run.execute(requests, |_| Ok(Arc::new(db.clone()) as Arc<dyn Connection>), sink)
        .unwrap();
}

fn geometry<'a>(feature: &'a Feature, name: &str) -> &'a Geometry {
    feature
        .property(name)
        .and_then(PropertyValue::as_geometry)
        .unwrap_or_else(|| panic!("{name} is not an inline geometry"))
}

#[test]
fn test_building_with_surfaces_openings_and_parts() {
    let db = city_db();
    let run = run(config());
    let sink = CollectingSink::new();

    export(&run, &db, &sink, &[(100, BUILDING)]);

    let outputs = sink.take();
    assert_eq!(outputs.len(), 1);
    let building = &outputs[0].feature;
    assert!(outputs[0].siblings.is_empty());

    assert_eq!(building.type_name, "Building");
    assert_eq!(building.external_id.as_deref(), Some("B100"));
    assert_eq!(building.count("name"), 1);
    assert_eq!(building.count("function"), 2);
    assert_eq!(building.tree_size(), 6);

    let solid = geometry(building, "lod2Solid");
    assert_eq!(solid.kind, GeometryKind::Solid);
    assert_eq!(solid.id.as_deref(), Some("G7001"));
    assert_eq!(solid.member_count(), 2);
    assert_eq!(geometry(building, "lod1Solid").id.as_deref(), Some("G7100"));

    let surfaces: Vec<&Feature> = building.features("boundedBy").collect();
    assert_eq!(surfaces.len(), 2);
    assert_eq!(surfaces[0].type_name, "WallSurface");
    assert_eq!(surfaces[1].type_name, "RoofSurface");
    assert_eq!(
        geometry(surfaces[0], "lod2MultiSurface").kind,
        GeometryKind::MultiSurface
    );

    let door = surfaces[0].features("opening").next().unwrap();
    assert_eq!(door.type_name, "Door");
    let address = door.features("address").next().unwrap();
    assert_eq!(address.external_id.as_deref(), Some("ADR1"));

    let parts: Vec<&Feature> = building.features("consistsOfBuildingPart").collect();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].type_name, "BuildingPart");
    assert_eq!(geometry(parts[0], "lod2Solid").id.as_deref(), Some("G7004"));

    let metrics = run.metrics();
    assert_eq!(metrics.roots_exported, 1);
    assert_eq!(metrics.features_by_type.get("BuildingPart"), Some(&1));
    assert!(run.reports().is_empty());
    assert_eq!(db.executions_of("Building/by_root").len(), 1);
}

#[test]
fn test_repeated_objects_become_references() {
    let db = city_db();
    let run = run(config());
    let sink = CollectingSink::new();

    let requests = vec![
        ExportRequest::new(100, BUILDING),
        ExportRequest::new(300, BUILDING),
        ExportRequest::new(100, BUILDING),
    ];
    let summary = run
        .execute(requests, |_| Ok(Arc::new(db.clone()) as Arc<dyn Connection>), &sink)
        .unwrap();

    assert_eq!(summary.exported, 2);
    assert_eq!(summary.skipped, 1);

    let outputs = sink.take();
    let library = &outputs[1].feature;
    assert_eq!(library.external_id.as_deref(), Some("B300"));
    assert_eq!(
        library.property("lod2Solid").and_then(PropertyValue::as_reference),
        Some("#G7001")
    );
    assert_eq!(
        library.property("address").and_then(PropertyValue::as_reference),
        Some("#ADR1")
    );

    // Town hall and its part on the second request.
    assert_eq!(summary.metrics.references_emitted, 4);
}

#[test]
fn test_copy_mode_rematerializes() {
    let db = city_db();
    let xlink = XlinkConfig::default()
        .with_features(ReferenceMode::Copy)
        .with_geometries(ReferenceMode::Copy)
        .with_external_reference(true);
    let run = run(config().with_xlink(xlink));
    let sink = CollectingSink::new();

    export(&run, &db, &sink, &[(100, BUILDING), (300, BUILDING)]);

    let outputs = sink.take();
    let library = &outputs[1].feature;

    let solid = geometry(library, "lod2Solid");
    assert!(solid.id.as_deref().unwrap().starts_with("COPY_"));
    assert_eq!(solid.member_count(), 2);
    assert!(solid.members.iter().all(|m| m.id.is_none()));

    let address = library.features("address").next().unwrap();
    assert!(address.external_id.as_deref().unwrap().starts_with("COPY_"));
    assert_eq!(
        address.property("externalReference"),
        Some(&PropertyValue::Value(Value::from("ADR1")))
    );
    assert_eq!(run.metrics().copies_made, 2);
}

#[test]
fn test_geometry_batches_follow_width() {
    let db = city_db();
    let run = run(config().with_batch(BatchConfig::default().with_size(2)));
    export(&run, &db, &CollectingSink::new(), &[(100, BUILDING)]);

    // 7100, 7001, 7002, 7003, 7004 in pairs.
    let executions = db.executions_of("surface_geometry");
    assert_eq!(executions.len(), 3);
    assert_eq!(executions[0].params.len(), 2);
    assert_eq!(executions[1].params.len(), 2);
    assert_eq!(executions[2].name, "surface_geometry/by_root");

    let db = city_db();
    let run = self::run(config());
    export(&run, &db, &CollectingSink::new(), &[(100, BUILDING)]);

    let executions = db.executions_of("surface_geometry");
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].params.len(), 30);
    assert_eq!(executions[0].params[5], Value::Int64(0));
}

#[test]
fn test_lod_filter_prunes_levels_and_geometries() {
    let db = city_db();
    let run = run(config().with_lod(LodFilter::only(&[1])));
    let sink = CollectingSink::new();

    export(&run, &db, &sink, &[(100, BUILDING)]);

    let building = &sink.take()[0].feature;
    assert_eq!(building.count("boundedBy"), 0);
    assert!(building.property("lod2Solid").is_none());
    assert_eq!(geometry(building, "lod1Solid").id.as_deref(), Some("G7100"));
    assert_eq!(building.count("consistsOfBuildingPart"), 1);

    let executions = db.executions_of("surface_geometry");
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].params, vec![Value::Int64(7100)]);
}

#[test]
fn test_projection_without_parts_queries_by_id() {
    let db = city_db();
    let projection = Projection::new().with_filter(
        "Building",
        ProjectionFilter::except(["consistsOfBuildingPart", "boundedBy"]),
    );
    let run = run(config().with_projection(projection));
    let sink = CollectingSink::new();

    export(&run, &db, &sink, &[(100, BUILDING)]);

    let building = &sink.take()[0].feature;
    assert_eq!(building.tree_size(), 1);
    assert_eq!(building.count("name"), 1);
    assert!(db.executions_of("Building/by_root").is_empty());
    assert_eq!(db.executions_of("Building/by_id").len(), 1);
}

#[test]
fn test_session_reuses_prepared_statements() {
    let db = city_db();
    let run = run(config());
    let session = run.session(Arc::new(db.clone()), false);

    for id in [100, 300] {
        assert!(session.export(ExportRequest::new(id, BUILDING)).unwrap().is_some());
    }

    let schemas = &run.services().schemas;
    let buildings = session.registry().by_name(schemas, "Building").unwrap();
    assert_eq!(buildings.prepared(), 1);
    assert_eq!(db.executions_of("Building/by_root").len(), 2);

    let addresses = session.registry().by_name(schemas, "Address").unwrap();
    assert_eq!(addresses.prepared(), 1);
}

#[test]
fn test_unknown_class_skipped_or_aborted() {
    let db = city_db();
    let run = run(config());
    let sink = CollectingSink::new();
    let summary = run
        .execute(
            vec![ExportRequest::new(1, 999), ExportRequest::new(300, BUILDING)],
            |_| Ok(Arc::new(db.clone()) as Arc<dyn Connection>),
            &sink,
        )
        .unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.exported, 1);
    assert_eq!(summary.errors, 1);

    let run = self::run(config().with_error_policy(ErrorPolicy::FailFast));
    let sink = CollectingSink::new();
    let result = run.execute(
        vec![ExportRequest::new(1, 999), ExportRequest::new(300, BUILDING)],
        |_| Ok(Arc::new(db.clone()) as Arc<dyn Connection>),
        &sink,
    );
    assert!(matches!(result, Err(Error::Aborted(_))));
    assert!(sink.is_empty());
}

#[test]
fn test_flat_output_lifts_sub_features() {
    let db = city_db();
    let run = run(config());
    let sink = CollectingSink::flat();

    export(&run, &db, &sink, &[(300, BUILDING)]);

    let outputs = sink.take();
    let output = &outputs[0];
    assert_eq!(
        output.feature.property("address").and_then(PropertyValue::as_reference),
        Some("#ADR1")
    );
    assert_eq!(output.siblings.len(), 1);
    assert_eq!(output.siblings[0].type_name, "Address");
    assert_eq!(output.siblings[0].count("street"), 1);
}

/// Building 100 with installation 900. Both carry a non-shared geometry
/// root with the same identifier.
fn installed_db() -> ScriptedConnection {
    ScriptedConnection::new()
        .on("Building", |spec, _| {
            vec![JoinRow::building(spec, 100, BUILDING, "B100")
                .set("b_lod2_solid_id", 8001i64)
                .set("b_has_installation", true)
                .build()]
        })
        .on("BuildingInstallation", |spec, params| {
            if !params.iter().any(|p| p.as_i64() == Some(100)) {
                return Vec::new();
            }
            vec![RowBuilder::new(&spec.columns)
                .set("bi_building_id", 100i64)
                .set("bi_id", 900i64)
                .set("bi_objectclass_id", 27)
                .set_if_present("bico_gmlid", "I900")
                .set_if_present("bi_lod2_brep_id", 8002i64)
                .build()
                .unwrap()]
        })
        .on("surface_geometry", |spec, params| {
            let mut rows = Vec::new();
            for root in params.iter().filter_map(Value::as_i64) {
                rows.push(
                    RowBuilder::new(&spec.columns)
                        .set("sg_id", root)
                        .set("sg_root_id", root)
                        .set("sg_gmlid", "GX")
                        .set("sg_is_solid", root == 8001)
                        .set("sg_is_xlink", false)
                        .build()
                        .unwrap(),
                );
                rows.push(
                    RowBuilder::new(&spec.columns)
                        .set("sg_id", root * 10)
                        .set("sg_parent_id", root)
                        .set("sg_root_id", root)
                        .set("sg_geometry", polygon(0.0))
                        .build()
                        .unwrap(),
                );
            }
            rows
        })
}

#[test]
fn test_local_geometry_ids_shared_with_sub_features() {
    let db = installed_db();
    let run = run(config());
    let sink = CollectingSink::new();

    export(&run, &db, &sink, &[(100, BUILDING)]);

    let outputs = sink.take();
    assert_eq!(outputs.len(), 1);
    let building = &outputs[0].feature;
    assert_eq!(geometry(building, "lod2Solid").id.as_deref(), Some("GX"));

    let installation = building.features("outerBuildingInstallation").next().unwrap();
    assert_eq!(installation.external_id.as_deref(), Some("I900"));
    assert_eq!(
        installation.property("lod2Geometry").and_then(PropertyValue::as_reference),
        Some("#GX")
    );

    let document = building.to_json().unwrap();
    assert_eq!(document.matches("\"GX\"").count(), 1);
    assert_eq!(db.executions_of("BuildingInstallation/by_owners").len(), 1);
}

#[test]
fn test_spilled_identities_still_dedupe() {
    let dir = tempfile::tempdir().unwrap();
    let cache = IdentityCacheConfig::default()
        .with_hot_capacity(1)
        .with_spill(SpillConfig::at(dir.path()));
    let db = city_db();
    let run = run(config().with_identity_cache(cache));
    let sink = CollectingSink::new();

    export(&run, &db, &sink, &[(100, BUILDING), (300, BUILDING)]);

    let outputs = sink.take();
    assert_eq!(
        outputs[1].feature.property("address").and_then(PropertyValue::as_reference),
        Some("#ADR1")
    );
}

#[test]
fn test_parallel_workers_export_everything() {
    let db = city_db();
    let run = run(ExportConfig::default().with_workers(4));
    let sink = CollectingSink::new();

    let requests = (0..8)
        .map(|i| ExportRequest::new(if i % 2 == 0 { 100 } else { 300 }, BUILDING))
        .collect();
    let summary = run
        .execute(requests, |_| Ok(Arc::new(db.clone()) as Arc<dyn Connection>), &sink)
        .unwrap();

    assert_eq!(summary.exported, 2);
    assert_eq!(summary.skipped, 6);
    assert_eq!(summary.remaining, 0);
    assert!(!summary.cancelled);
    assert_eq!(sink.len(), 2);
}
