//! Export schemas of the CityGML 2.0 city database layout.

use super::{
    CollectionNaming, FeatureSchema, LevelJoin, LevelSchema, PropertyMapping, SchemaRegistry,
    SubFeatureSchema,
};
use crate::error::Error;

const ADDRESS_CLASS: i32 = 58;

/// Table and class naming of one construction family.
struct Construction {
    name: &'static str,
    classes: &'static [i32],
    table: &'static str,
    alias: &'static str,
    /// Column of child tables pointing at the construction.
    owner_column: &'static str,
    lods: &'static [u8],
    extra: &'static [(&'static str, &'static str)],
    extra_codes: &'static [(&'static str, &'static str)],
    part_property: &'static str,
    surfaces: Surfaces,
    address: Option<AddressLink>,
    installation: Installation,
    room: Room,
    furniture: Furniture,
}

struct Surfaces {
    type_name: &'static str,
    table: &'static str,
    opening_type: &'static str,
    opening_table: &'static str,
    link_table: &'static str,
    link_surface_column: &'static str,
    link_opening_column: &'static str,
}

struct AddressLink {
    door_class: i32,
    link_table: &'static str,
}

struct Installation {
    schema: &'static str,
    table: &'static str,
    alias: &'static str,
    classes: [(i32, &'static str); 2],
    surface_owner_column: &'static str,
}

struct Room {
    schema: &'static str,
    class: i32,
    table: &'static str,
    alias: &'static str,
    property: &'static str,
    surface_owner_column: &'static str,
}

struct Furniture {
    schema: &'static str,
    class: i32,
    table: &'static str,
    alias: &'static str,
}

const BUILDING: Construction = Construction {
    name: "Building",
    classes: &[24, 25, 26],
    table: "building",
    alias: "b",
    owner_column: "building_id",
    lods: &[0, 1, 2, 3, 4],
    extra: &[
        ("measuredHeight", "measured_height"),
        ("storeysAboveGround", "storeys_above_ground"),
        ("storeysBelowGround", "storeys_below_ground"),
    ],
    extra_codes: &[("roofType", "roof_type")],
    part_property: "consistsOfBuildingPart",
    surfaces: Surfaces {
        type_name: "_BoundarySurface",
        table: "thematic_surface",
        opening_type: "_Opening",
        opening_table: "opening",
        link_table: "opening_to_them_surface",
        link_surface_column: "thematic_surface_id",
        link_opening_column: "opening_id",
    },
    address: Some(AddressLink {
        door_class: 39,
        link_table: "address_to_building",
    }),
    installation: Installation {
        schema: "BuildingInstallation",
        table: "building_installation",
        alias: "bi",
        classes: [(27, "outerBuildingInstallation"), (28, "interiorBuildingInstallation")],
        surface_owner_column: "building_installation_id",
    },
    room: Room {
        schema: "Room",
        class: 41,
        table: "room",
        alias: "r",
        property: "interiorRoom",
        surface_owner_column: "room_id",
    },
    furniture: Furniture {
        schema: "BuildingFurniture",
        class: 40,
        table: "building_furniture",
        alias: "bf",
    },
};

const BRIDGE: Construction = Construction {
    name: "Bridge",
    classes: &[62, 63, 64],
    table: "bridge",
    alias: "br",
    owner_column: "bridge_id",
    lods: &[1, 2, 3, 4],
    extra: &[("isMovable", "is_movable")],
    extra_codes: &[],
    part_property: "consistsOfBridgePart",
    surfaces: Surfaces {
        type_name: "_BridgeBoundarySurface",
        table: "bridge_thematic_surface",
        opening_type: "_BridgeOpening",
        opening_table: "bridge_opening",
        link_table: "bridge_open_to_them_srf",
        link_surface_column: "bridge_thematic_surface_id",
        link_opening_column: "bridge_opening_id",
    },
    address: Some(AddressLink {
        door_class: 79,
        link_table: "address_to_bridge",
    }),
    installation: Installation {
        schema: "BridgeInstallation",
        table: "bridge_installation",
        alias: "bri",
        classes: [(65, "outerBridgeInstallation"), (66, "interiorBridgeInstallation")],
        surface_owner_column: "bridge_installation_id",
    },
    room: Room {
        schema: "BridgeRoom",
        class: 81,
        table: "bridge_room",
        alias: "brr",
        property: "interiorBridgeRoom",
        surface_owner_column: "bridge_room_id",
    },
    furniture: Furniture {
        schema: "BridgeFurniture",
        class: 80,
        table: "bridge_furniture",
        alias: "brf",
    },
};

const TUNNEL: Construction = Construction {
    name: "Tunnel",
    classes: &[83, 84, 85],
    table: "tunnel",
    alias: "tun",
    owner_column: "tunnel_id",
    lods: &[1, 2, 3, 4],
    extra: &[],
    extra_codes: &[],
    part_property: "consistsOfTunnelPart",
    surfaces: Surfaces {
        type_name: "_TunnelBoundarySurface",
        table: "tunnel_thematic_surface",
        opening_type: "_TunnelOpening",
        opening_table: "tunnel_opening",
        link_table: "tunnel_open_to_them_srf",
        link_surface_column: "tunnel_thematic_surface_id",
        link_opening_column: "tunnel_opening_id",
    },
    address: None,
    installation: Installation {
        schema: "TunnelInstallation",
        table: "tunnel_installation",
        alias: "ti",
        classes: [(86, "outerTunnelInstallation"), (87, "interiorTunnelInstallation")],
        surface_owner_column: "tunnel_installation_id",
    },
    room: Room {
        schema: "HollowSpace",
        class: 102,
        table: "tunnel_hollow_space",
        alias: "hs",
        property: "interiorHollowSpace",
        surface_owner_column: "tunnel_hollow_space_id",
    },
    furniture: Furniture {
        schema: "TunnelFurniture",
        class: 101,
        table: "tunnel_furniture",
        alias: "tf",
    },
};

impl SchemaRegistry {
    /// Export schemas for buildings, bridges, tunnels, relief,
    /// transportation and addresses.
    pub fn citygml() -> Result<Self, Error> {
        let mut registry = Self::new();
        for construction in [&BUILDING, &BRIDGE, &TUNNEL] {
            registry.register(construction_schema(construction))?;
            registry.register(installation_schema(construction))?;
            registry.register(room_schema(construction))?;
            registry.register(furniture_schema(construction))?;
        }
        registry.register(bridge_construction_element_schema())?;
        registry.register(address_schema())?;
        registry.register(relief_feature_schema())?;
        registry.register(relief_component_schema())?;
        registry.register(transportation_complex_schema())?;
        registry.check_targets()?;
        Ok(registry)
    }
}

/// Join the shared `cityobject` row and read identifier, name and description.
fn city_object(level: LevelSchema) -> LevelSchema {
    let alias = format!("{}co", level.name);
    level
        .with_companion("cityobject", &alias)
        .with_external_id(&alias, "gmlid")
        .with_property(PropertyMapping::scalar("name", &alias, "name"))
        .with_property(PropertyMapping::scalar("description", &alias, "description"))
}

fn class_function_usage(alias: &str) -> [PropertyMapping; 3] {
    [
        PropertyMapping::codes("class", alias, "class"),
        PropertyMapping::codes("function", alias, "function"),
        PropertyMapping::codes("usage", alias, "usage"),
    ]
}

fn multi_surfaces(alias: &str, lods: impl IntoIterator<Item = u8>) -> Vec<PropertyMapping> {
    lods.into_iter()
        .map(|lod| {
            PropertyMapping::geometry(
                &format!("lod{lod}MultiSurface"),
                alias,
                &format!("lod{lod}_multi_surface_id"),
            )
            .at_lod(lod)
        })
        .collect()
}

fn breps(alias: &str, lods: impl IntoIterator<Item = u8>) -> Vec<PropertyMapping> {
    lods.into_iter()
        .map(|lod| {
            PropertyMapping::geometry(&format!("lod{lod}Geometry"), alias, &format!("lod{lod}_brep_id"))
                .at_lod(lod)
        })
        .collect()
}

fn address_level(alias: &str) -> LevelSchema {
    LevelSchema::new(alias, "Address", "address")
        .with_fixed_class(ADDRESS_CLASS)
        .with_external_id(alias, "gmlid")
        .with_properties([
            PropertyMapping::scalar("street", alias, "street"),
            PropertyMapping::scalar("houseNumber", alias, "house_number"),
            PropertyMapping::scalar("poBox", alias, "po_box"),
            PropertyMapping::scalar("zipCode", alias, "zip_code"),
            PropertyMapping::scalar("city", alias, "city"),
            PropertyMapping::scalar("state", alias, "state"),
            PropertyMapping::scalar("country", alias, "country"),
            PropertyMapping::inline_geometry("multiPoint", alias, "multi_point"),
        ])
}

/// Boundary surfaces owned through `owner_column`, with their openings and
/// door addresses.
fn boundary_surfaces(
    c: &Construction,
    alias: &str,
    owner_column: &str,
    min_lod: u8,
) -> LevelSchema {
    let s = &c.surfaces;
    let opening_alias = format!("{alias}op");
    let opening_alias = if alias == "ts" { "op".to_string() } else { opening_alias };

    let mut opening = city_object(
        LevelSchema::new(&opening_alias, s.opening_type, s.opening_table)
            .joined(
                LevelJoin::Link {
                    table: s.link_table.to_string(),
                    alias: format!("{opening_alias}2s"),
                    parent_column: s.link_surface_column.to_string(),
                    child_column: s.link_opening_column.to_string(),
                },
                CollectionNaming::new("opening"),
            )
            .with_min_lod(3),
    )
    .with_properties(multi_surfaces(&opening_alias, 3..=4));

    if let Some(address) = &c.address {
        let address_alias = if alias == "ts" {
            "adr".to_string()
        } else {
            format!("{opening_alias}adr")
        };
        opening = opening.with_child(
            address_level(&address_alias)
                .joined(
                    LevelJoin::Direct {
                        column: "id".to_string(),
                        parent_column: "address_id".to_string(),
                    },
                    CollectionNaming::new("address"),
                )
                .only_under(&[address.door_class]),
        );
    }

    city_object(
        LevelSchema::new(alias, s.type_name, s.table)
            .joined(
                LevelJoin::Direct {
                    column: owner_column.to_string(),
                    parent_column: "id".to_string(),
                },
                CollectionNaming::new("boundedBy"),
            )
            .with_min_lod(min_lod),
    )
    .with_properties(multi_surfaces(alias, min_lod..=4))
    .with_child(opening)
}

fn construction_schema(c: &Construction) -> FeatureSchema {
    let a = c.alias;
    let mut root = city_object(LevelSchema::new(a, c.name, c.table))
        .with_properties(class_function_usage(a))
        .with_properties([
            PropertyMapping::scalar("yearOfConstruction", a, "year_of_construction"),
            PropertyMapping::scalar("yearOfDemolition", a, "year_of_demolition"),
        ])
        .with_properties(c.extra.iter().map(|(name, column)| PropertyMapping::scalar(name, a, column)))
        .with_properties(c.extra_codes.iter().map(|(name, column)| PropertyMapping::codes(name, a, column)));

    if c.lods.contains(&0) {
        root = root.with_properties([
            PropertyMapping::geometry("lod0FootPrint", a, "lod0_footprint_id").at_lod(0),
            PropertyMapping::geometry("lod0RoofEdge", a, "lod0_roofprint_id").at_lod(0),
        ]);
    }
    for &lod in c.lods.iter().filter(|l| **l >= 1) {
        root = root.with_properties([
            PropertyMapping::geometry(&format!("lod{lod}Solid"), a, &format!("lod{lod}_solid_id")).at_lod(lod),
            PropertyMapping::geometry(
                &format!("lod{lod}MultiSurface"),
                a,
                &format!("lod{lod}_multi_surface_id"),
            )
            .at_lod(lod),
            PropertyMapping::inline_geometry(
                &format!("lod{lod}TerrainIntersection"),
                a,
                &format!("lod{lod}_terrain_intersection"),
            )
            .at_lod(lod),
        ]);
        if lod >= 2 {
            root = root.with_property(
                PropertyMapping::inline_geometry(
                    &format!("lod{lod}MultiCurve"),
                    a,
                    &format!("lod{lod}_multi_curve"),
                )
                .at_lod(lod),
            );
        }
    }

    let surface_alias = if a == "b" { "ts".to_string() } else { format!("{a}ts") };
    root = root.with_child(boundary_surfaces(c, &surface_alias, c.owner_column, 2));

    let mut installations = CollectionNaming::new(c.installation.classes[0].1);
    for (class, name) in c.installation.classes {
        installations = installations.with_class(class, name);
    }

    let mut schema = FeatureSchema::new(c.name, c.classes, root)
        .with_part_of(
            c.part_property,
            &format!("{}_parent_id", c.table),
            &format!("{}_root_id", c.table),
        )
        .with_sub_feature(SubFeatureSchema::owned(
            "installation",
            installations,
            c.installation.schema,
            c.installation.table,
            c.owner_column,
        ))
        .with_sub_feature(SubFeatureSchema::owned(
            "room",
            CollectionNaming::new(c.room.property),
            c.room.schema,
            c.room.table,
            c.owner_column,
        ));

    if let Some(address) = &c.address {
        schema = schema.with_sub_feature(SubFeatureSchema::linked(
            "address",
            CollectionNaming::new("address"),
            "Address",
            "address",
            address.link_table,
            c.owner_column,
            "address_id",
        ));
    }
    if c.name == "Bridge" {
        schema = schema.with_sub_feature(SubFeatureSchema::owned(
            "construction_element",
            CollectionNaming::new("outerBridgeConstruction"),
            "BridgeConstructionElement",
            "bridge_constr_element",
            c.owner_column,
        ));
    }
    schema
}

fn installation_schema(c: &Construction) -> FeatureSchema {
    let i = &c.installation;
    let root = city_object(LevelSchema::new(i.alias, i.schema, i.table))
        .with_properties(class_function_usage(i.alias))
        .with_properties(breps(i.alias, 2..=4))
        .with_child(boundary_surfaces(
            c,
            &format!("{}ts", i.alias),
            i.surface_owner_column,
            2,
        ));
    FeatureSchema::new(i.schema, &[i.classes[0].0, i.classes[1].0], root)
}

fn room_schema(c: &Construction) -> FeatureSchema {
    let r = &c.room;
    let root = city_object(LevelSchema::new(r.alias, r.schema, r.table))
        .with_properties(class_function_usage(r.alias))
        .with_properties([
            PropertyMapping::geometry("lod4Solid", r.alias, "lod4_solid_id").at_lod(4),
            PropertyMapping::geometry("lod4MultiSurface", r.alias, "lod4_multi_surface_id").at_lod(4),
        ])
        .with_child(boundary_surfaces(
            c,
            &format!("{}ts", r.alias),
            r.surface_owner_column,
            4,
        ));

    let owner = r.surface_owner_column;
    FeatureSchema::new(r.schema, &[r.class], root)
        .with_sub_feature(SubFeatureSchema::owned(
            "furniture",
            CollectionNaming::new("interiorFurniture"),
            c.furniture.schema,
            c.furniture.table,
            owner,
        ))
        .with_sub_feature(SubFeatureSchema::owned(
            "installation",
            CollectionNaming::new(match c.name {
                "Bridge" => "bridgeRoomInstallation",
                "Tunnel" => "hollowSpaceInstallation",
                _ => "roomInstallation",
            }),
            c.installation.schema,
            c.installation.table,
            owner,
        ))
}

fn furniture_schema(c: &Construction) -> FeatureSchema {
    let f = &c.furniture;
    let root = city_object(LevelSchema::new(f.alias, f.schema, f.table))
        .with_fixed_class(f.class)
        .with_properties(class_function_usage(f.alias))
        .with_properties(breps(f.alias, 4..=4));
    FeatureSchema::new(f.schema, &[f.class], root)
}

fn bridge_construction_element_schema() -> FeatureSchema {
    let root = city_object(LevelSchema::new("bce", "BridgeConstructionElement", "bridge_constr_element"))
        .with_fixed_class(82)
        .with_properties(class_function_usage("bce"))
        .with_properties(breps("bce", 1..=4));
    FeatureSchema::new("BridgeConstructionElement", &[82], root)
}

fn address_schema() -> FeatureSchema {
    FeatureSchema::new("Address", &[ADDRESS_CLASS], address_level("a"))
}

/// Relief component level with its subtype companions.
fn relief_component_level(alias: &str) -> LevelSchema {
    let tin = format!("{alias}tin");
    let mp = format!("{alias}mp");
    let bl = format!("{alias}bl");
    city_object(LevelSchema::new(alias, "_ReliefComponent", "relief_component"))
        .with_companion("tin_relief", &tin)
        .with_companion("masspoint_relief", &mp)
        .with_companion("breakline_relief", &bl)
        .with_properties([
            PropertyMapping::scalar("lod", alias, "lod"),
            PropertyMapping::inline_geometry("extent", alias, "extent"),
            PropertyMapping::geometry("tin", &tin, "surface_geometry_id"),
            PropertyMapping::scalar("maxLength", &tin, "max_length"),
            PropertyMapping::inline_geometry("stopLines", &tin, "stop_lines"),
            PropertyMapping::inline_geometry("breakLines", &tin, "break_lines"),
            PropertyMapping::inline_geometry("controlPoints", &tin, "control_points"),
            PropertyMapping::inline_geometry("reliefPoints", &mp, "relief_points"),
            PropertyMapping::inline_geometry("ridgeOrValleyLines", &bl, "ridge_or_valley_lines"),
            PropertyMapping::inline_geometry("breaklines", &bl, "break_lines"),
        ])
}

fn relief_feature_schema() -> FeatureSchema {
    let component = relief_component_level("rc").joined(
        LevelJoin::Link {
            table: "relief_feat_to_rel_comp".to_string(),
            alias: "rf2rc".to_string(),
            parent_column: "relief_feature_id".to_string(),
            child_column: "relief_component_id".to_string(),
        },
        CollectionNaming::new("reliefComponent"),
    );
    let root = city_object(LevelSchema::new("rf", "ReliefFeature", "relief_feature"))
        .with_fixed_class(14)
        .with_property(PropertyMapping::scalar("lod", "rf", "lod"))
        .with_child(component);
    FeatureSchema::new("ReliefFeature", &[14], root)
}

fn relief_component_schema() -> FeatureSchema {
    FeatureSchema::new("ReliefComponent", &[15, 16, 17, 18, 19], relief_component_level("rc"))
}

fn transportation_complex_schema() -> FeatureSchema {
    let traffic_area = city_object(
        LevelSchema::new("ta", "TrafficArea", "traffic_area")
            .joined(
                LevelJoin::Direct {
                    column: "transportation_complex_id".to_string(),
                    parent_column: "id".to_string(),
                },
                CollectionNaming::new("trafficArea").with_class(48, "auxiliaryTrafficArea"),
            )
            .with_min_lod(2),
    )
    .with_properties(class_function_usage("ta"))
    .with_property(PropertyMapping::codes("surfaceMaterial", "ta", "surface_material"))
    .with_properties(multi_surfaces("ta", 2..=4));

    let root = city_object(LevelSchema::new("tc", "TransportationComplex", "transportation_complex"))
        .with_properties(class_function_usage("tc"))
        .with_property(PropertyMapping::inline_geometry("lod0Network", "tc", "lod0_network").at_lod(0))
        .with_properties(multi_surfaces("tc", 1..=4))
        .with_child(traffic_area);
    FeatureSchema::new("TransportationComplex", &[42, 43, 44, 45, 46], root)
}
