//! Type catalog lookups.

use std::collections::HashMap;

use super::FeatureType;
use crate::error::Error;

/// Registry of feature types by object-class id and by name.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    types: HashMap<i32, FeatureType>,
    by_name: HashMap<String, i32>,
}

impl TypeCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a feature type, replacing any type with the same id.
    pub fn with_type(mut self, feature_type: FeatureType) -> Self {
        self.insert(feature_type);
        self
    }

    /// Add a feature type in place.
    pub fn insert(&mut self, feature_type: FeatureType) {
        self.by_name
            .insert(feature_type.name.clone(), feature_type.object_class_id);
        self.types.insert(feature_type.object_class_id, feature_type);
    }

    /// Look up a type by object-class id.
    pub fn type_of(&self, object_class_id: i32) -> Result<&FeatureType, Error> {
        self.types
            .get(&object_class_id)
            .ok_or(Error::UnknownObjectClass(object_class_id))
    }

    /// Object-class id of a type name.
    pub fn object_class_id_of(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    /// Whether `object_class_id` equals `ancestor` or inherits from it.
    pub fn is_subtype_of(&self, object_class_id: i32, ancestor: i32) -> bool {
        let mut current = Some(object_class_id);
        let mut depth = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            // Bounded walk; a malformed catalog must not loop forever.
            depth += 1;
            if depth > self.types.len() {
                return false;
            }
            current = self.types.get(&id).and_then(|t| t.supertype);
        }
        false
    }

    /// Whether the type is part-capable. Unknown ids are not.
    pub fn is_part_capable(&self, object_class_id: i32) -> bool {
        self.types
            .get(&object_class_id)
            .map(FeatureType::is_part_capable)
            .unwrap_or(false)
    }

    /// Concrete types that may be exported on their own, sorted by id.
    pub fn top_level_types(&self) -> Vec<&FeatureType> {
        let mut types: Vec<_> = self
            .types
            .values()
            .filter(|t| t.top_level && !t.is_abstract)
            .collect();
        types.sort_by_key(|t| t.object_class_id);
        types
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// CityGML 2.0 object classes as numbered by the relational city database.
    pub fn citygml() -> Self {
        let mut catalog = Self::new();

        // Relief
        catalog.insert(FeatureType::new(14, "ReliefFeature", "relief_feature").top_level());
        catalog.insert(
            FeatureType::new(15, "_ReliefComponent", "relief_component")
                .abstract_type()
                .top_level(),
        );
        for (id, name) in [
            (16, "TINRelief"),
            (17, "MassPointRelief"),
            (18, "BreaklineRelief"),
            (19, "RasterRelief"),
        ] {
            catalog.insert(
                FeatureType::new(id, name, "relief_component")
                    .with_supertype(15)
                    .top_level(),
            );
        }

        // Building
        Self::insert_construction(
            &mut catalog,
            ConstructionIds {
                abstract_id: 24,
                part: (25, "BuildingPart"),
                root: (26, "Building"),
                abstract_name: "_AbstractBuilding",
                table: "building",
                part_property: "consistsOfBuildingPart",
                installations: [(27, "BuildingInstallation"), (28, "IntBuildingInstallation")],
                installation_table: "building_installation",
                surfaces: (
                    29,
                    "_BoundarySurface",
                    &[
                        (30, "CeilingSurface"),
                        (31, "InteriorWallSurface"),
                        (32, "FloorSurface"),
                        (33, "RoofSurface"),
                        (34, "WallSurface"),
                        (35, "GroundSurface"),
                        (36, "ClosureSurface"),
                        (60, "OuterCeilingSurface"),
                        (61, "OuterFloorSurface"),
                    ],
                ),
                surface_table: "thematic_surface",
                openings: (37, "_Opening", [(38, "Window"), (39, "Door")]),
                opening_table: "opening",
                furniture: (40, "BuildingFurniture", "building_furniture"),
                room: (41, "Room", "room"),
            },
        );

        // Transportation
        catalog.insert(
            FeatureType::new(42, "TransportationComplex", "transportation_complex").top_level(),
        );
        for (id, name) in [(43, "Track"), (44, "Railway"), (45, "Road"), (46, "Square")] {
            catalog.insert(
                FeatureType::new(id, name, "transportation_complex")
                    .with_supertype(42)
                    .top_level(),
            );
        }
        catalog.insert(FeatureType::new(47, "TrafficArea", "traffic_area"));
        catalog.insert(FeatureType::new(48, "AuxiliaryTrafficArea", "traffic_area"));

        catalog.insert(FeatureType::new(58, "Address", "address"));

        // Bridge
        Self::insert_construction(
            &mut catalog,
            ConstructionIds {
                abstract_id: 62,
                part: (63, "BridgePart"),
                root: (64, "Bridge"),
                abstract_name: "_AbstractBridge",
                table: "bridge",
                part_property: "consistsOfBridgePart",
                installations: [(65, "BridgeInstallation"), (66, "IntBridgeInstallation")],
                installation_table: "bridge_installation",
                surfaces: (
                    67,
                    "_BridgeBoundarySurface",
                    &[
                        (68, "BridgeCeilingSurface"),
                        (69, "InteriorBridgeWallSurface"),
                        (70, "BridgeFloorSurface"),
                        (71, "BridgeRoofSurface"),
                        (72, "BridgeWallSurface"),
                        (73, "BridgeGroundSurface"),
                        (74, "BridgeClosureSurface"),
                        (75, "OuterBridgeCeilingSurface"),
                        (76, "OuterBridgeFloorSurface"),
                    ],
                ),
                surface_table: "bridge_thematic_surface",
                openings: (77, "_BridgeOpening", [(78, "BridgeWindow"), (79, "BridgeDoor")]),
                opening_table: "bridge_opening",
                furniture: (80, "BridgeFurniture", "bridge_furniture"),
                room: (81, "BridgeRoom", "bridge_room"),
            },
        );
        catalog.insert(FeatureType::new(
            82,
            "BridgeConstructionElement",
            "bridge_constr_element",
        ));

        // Tunnel
        Self::insert_construction(
            &mut catalog,
            ConstructionIds {
                abstract_id: 83,
                part: (84, "TunnelPart"),
                root: (85, "Tunnel"),
                abstract_name: "_AbstractTunnel",
                table: "tunnel",
                part_property: "consistsOfTunnelPart",
                installations: [(86, "TunnelInstallation"), (87, "IntTunnelInstallation")],
                installation_table: "tunnel_installation",
                surfaces: (
                    88,
                    "_TunnelBoundarySurface",
                    &[
                        (89, "TunnelCeilingSurface"),
                        (90, "InteriorTunnelWallSurface"),
                        (91, "TunnelFloorSurface"),
                        (92, "TunnelRoofSurface"),
                        (93, "TunnelWallSurface"),
                        (94, "TunnelGroundSurface"),
                        (95, "TunnelClosureSurface"),
                        (96, "OuterTunnelCeilingSurface"),
                        (97, "OuterTunnelFloorSurface"),
                    ],
                ),
                surface_table: "tunnel_thematic_surface",
                openings: (98, "_TunnelOpening", [(99, "TunnelWindow"), (100, "TunnelDoor")]),
                opening_table: "tunnel_opening",
                furniture: (101, "TunnelFurniture", "tunnel_furniture"),
                room: (102, "HollowSpace", "tunnel_hollow_space"),
            },
        );

        catalog
    }

    fn insert_construction(catalog: &mut Self, ids: ConstructionIds) {
        catalog.insert(
            FeatureType::new(ids.abstract_id, ids.abstract_name, ids.table)
                .abstract_type()
                .with_part_property(ids.part_property),
        );
        for (id, name) in [ids.part, ids.root] {
            let mut feature_type = FeatureType::new(id, name, ids.table)
                .with_supertype(ids.abstract_id)
                .with_part_property(ids.part_property);
            if id == ids.root.0 {
                feature_type = feature_type.top_level();
            }
            catalog.insert(feature_type);
        }

        for (id, name) in ids.installations {
            catalog.insert(FeatureType::new(id, name, ids.installation_table));
        }

        let (surface_id, surface_name, surfaces) = ids.surfaces;
        catalog.insert(FeatureType::new(surface_id, surface_name, ids.surface_table).abstract_type());
        for &(id, name) in surfaces {
            catalog.insert(FeatureType::new(id, name, ids.surface_table).with_supertype(surface_id));
        }

        let (opening_id, opening_name, openings) = ids.openings;
        catalog.insert(FeatureType::new(opening_id, opening_name, ids.opening_table).abstract_type());
        for (id, name) in openings {
            catalog.insert(FeatureType::new(id, name, ids.opening_table).with_supertype(opening_id));
        }

        let (id, name, table) = ids.furniture;
        catalog.insert(FeatureType::new(id, name, table));
        let (id, name, table) = ids.room;
        catalog.insert(FeatureType::new(id, name, table));
    }
}

/// Object-class numbering of one construction family (building, bridge, tunnel).
struct ConstructionIds {
    abstract_id: i32,
    abstract_name: &'static str,
    part: (i32, &'static str),
    root: (i32, &'static str),
    table: &'static str,
    part_property: &'static str,
    installations: [(i32, &'static str); 2],
    installation_table: &'static str,
    surfaces: (i32, &'static str, &'static [(i32, &'static str)]),
    surface_table: &'static str,
    openings: (i32, &'static str, [(i32, &'static str); 2]),
    opening_table: &'static str,
    furniture: (i32, &'static str, &'static str),
    room: (i32, &'static str, &'static str),
}
