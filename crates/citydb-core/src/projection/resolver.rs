//! Projection resolver.
//!
//! Turns an export schema plus the run's LOD filter, property projection and
//! extension hooks into a [`QuerySpec`] and the [`QueryLayout`] the
//! demultiplexer reads rows with. The result is fixed for the lifetime of the
//! prepared statement built from it.

use std::sync::Arc;

use super::{ExtensionHook, LodFilter, Projection};
use crate::error::Error;
use crate::query::{ColumnSet, Join, JoinKind, QueryFilter, QuerySpec};
use crate::schema::{
    CollectionNaming, FeatureSchema, LevelJoin, LevelSchema, PropertyKind, SubFeatureLink,
    SubFeatureSchema,
};
use crate::services::ExtensionDelegate;

/// Alias of the link table joined for owner-keyed queries.
const OWNER_LINK_ALIAS: &str = "own";

/// Which rows of the root table a query selects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryMode {
    /// One root by id.
    ById,
    /// A root and all its parts, by root id.
    ByRoot,
    /// Sub-features of a fixed-width list of owners.
    ByOwners {
        sub_feature: String,
        link: SubFeatureLink,
        width: usize,
    },
}

impl QueryMode {
    /// Owner-keyed mode for a sub-feature.
    pub fn by_owners(sub_feature: &SubFeatureSchema, width: usize) -> Self {
        QueryMode::ByOwners {
            sub_feature: sub_feature.key.clone(),
            link: sub_feature.link.clone(),
            width,
        }
    }

    fn label(&self) -> String {
        match self {
            QueryMode::ById => "by_id".to_string(),
            QueryMode::ByRoot => "by_root".to_string(),
            QueryMode::ByOwners { sub_feature, .. } => format!("by_owners/{sub_feature}"),
        }
    }
}

/// A property read at a level.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyLayout {
    pub name: String,
    pub kind: PropertyKind,
    pub column: usize,
    pub codespace: Option<usize>,
}

/// An existence probe deciding whether a sub-feature batch is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeLayout {
    pub sub_feature: Arc<SubFeatureSchema>,
    pub column: usize,
}

/// Presence column of a joined extension hook table.
#[derive(Debug, Clone, PartialEq)]
pub struct HookLayout {
    pub extension: String,
    pub hook_table: String,
    pub column: usize,
}

/// Column positions of one level in the result rows.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelLayout {
    pub name: String,
    pub type_name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub collection: Option<CollectionNaming>,
    pub parent_classes: Vec<i32>,
    pub id_column: usize,
    pub class_column: Option<usize>,
    pub fixed_class: Option<i32>,
    pub external_id_column: Option<usize>,
    /// Raw part-of parent id, root level only.
    pub part_parent_column: Option<usize>,
    pub properties: Vec<PropertyLayout>,
    pub probes: Vec<ProbeLayout>,
    pub hooks: Vec<HookLayout>,
}

/// How to read result rows of a resolved query. Level 0 is the root.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryLayout {
    pub levels: Vec<LevelLayout>,
    /// Owner id column of owner-keyed queries.
    pub owner_column: Option<usize>,
}

/// A projected query and its row layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub spec: QuerySpec,
    pub layout: QueryLayout,
}

/// Builds projected queries for export schemas.
pub struct ProjectionResolver<'a> {
    lod: &'a LodFilter,
    projection: &'a Projection,
    hooks: &'a [ExtensionHook],
    delegate: &'a dyn ExtensionDelegate,
}

impl<'a> ProjectionResolver<'a> {
    pub fn new(
        lod: &'a LodFilter,
        projection: &'a Projection,
        hooks: &'a [ExtensionHook],
        delegate: &'a dyn ExtensionDelegate,
    ) -> Self {
        Self {
            lod,
            projection,
            hooks,
            delegate,
        }
    }

    /// Resolve the query for `schema` in the given mode.
    pub fn resolve(&self, schema: &FeatureSchema, mode: &QueryMode) -> Result<ResolvedQuery, Error> {
        let root = &schema.root;
        let mut columns = ColumnSet::new(&root.table, &root.name);
        let mut layout = QueryLayout::default();

        let filter = match mode {
            QueryMode::ById => QueryFilter::Eq {
                table: root.name.clone(),
                column: root.id_column.clone(),
            },
            QueryMode::ByRoot => {
                let part_of = schema.part_of.as_ref().ok_or_else(|| {
                    Error::InvalidSchema(format!("{} has no part-of composition", schema.name))
                })?;
                QueryFilter::Eq {
                    table: root.name.clone(),
                    column: part_of.root_column.clone(),
                }
            }
            QueryMode::ByOwners { link, width, .. } => {
                let (table, column) = match link {
                    SubFeatureLink::OwnerColumn { column } => (root.name.clone(), column.clone()),
                    SubFeatureLink::LinkTable {
                        table,
                        owner_column,
                        target_column,
                    } => {
                        columns.join(Join {
                            kind: JoinKind::Inner,
                            table: table.clone(),
                            alias: OWNER_LINK_ALIAS.to_string(),
                            column: target_column.clone(),
                            left_alias: root.name.clone(),
                            left_column: root.id_column.clone(),
                        });
                        (OWNER_LINK_ALIAS.to_string(), owner_column.clone())
                    }
                };
                let index = columns.field(&table, &column);
                columns.order_by(columns.columns[index].alias.clone());
                layout.owner_column = Some(index);
                QueryFilter::In {
                    table,
                    column,
                    width: *width,
                }
            }
        };

        self.resolve_level(schema, root, None, &mut columns, &mut layout);

        Ok(ResolvedQuery {
            spec: QuerySpec {
                name: format!("{}/{}", schema.name, mode.label()),
                columns,
                filter,
            },
            layout,
        })
    }

    fn resolve_level(
        &self,
        schema: &FeatureSchema,
        level: &LevelSchema,
        parent: Option<(usize, &LevelSchema)>,
        columns: &mut ColumnSet,
        layout: &mut QueryLayout,
    ) -> usize {
        let alias = level.name.as_str();

        if let Some((_, parent_level)) = parent {
            match &level.join {
                LevelJoin::Root => {}
                LevelJoin::Direct {
                    column,
                    parent_column,
                } => columns.join(Join {
                    kind: JoinKind::Left,
                    table: level.table.clone(),
                    alias: level.name.clone(),
                    column: column.clone(),
                    left_alias: parent_level.name.clone(),
                    left_column: parent_column.clone(),
                }),
                LevelJoin::Link {
                    table,
                    alias: link_alias,
                    parent_column,
                    child_column,
                } => {
                    columns.join(Join {
                        kind: JoinKind::Left,
                        table: table.clone(),
                        alias: link_alias.clone(),
                        column: parent_column.clone(),
                        left_alias: parent_level.name.clone(),
                        left_column: parent_level.id_column.clone(),
                    });
                    columns.join(Join {
                        kind: JoinKind::Left,
                        table: level.table.clone(),
                        alias: level.name.clone(),
                        column: level.id_column.clone(),
                        left_alias: link_alias.clone(),
                        left_column: child_column.clone(),
                    });
                }
            }
        }

        for companion in &level.companions {
            columns.join(Join {
                kind: JoinKind::Left,
                table: companion.table.clone(),
                alias: companion.alias.clone(),
                column: "id".to_string(),
                left_alias: level.name.clone(),
                left_column: level.id_column.clone(),
            });
        }

        let id_column = columns.field(alias, &level.id_column);
        columns.order_by(columns.columns[id_column].alias.clone());
        let class_column = level.class_column.as_ref().map(|c| columns.field(alias, c));
        let external_id_column = level
            .external_id
            .as_ref()
            .map(|e| columns.field(&e.table, &e.column));
        let part_parent_column = match (&schema.part_of, parent) {
            (Some(part_of), None) => Some(columns.field(alias, &part_of.parent_column)),
            _ => None,
        };

        let filter = self.projection.filter_for(&level.type_name);

        let mut properties = Vec::new();
        for property in &level.properties {
            if !filter.contains_property(&property.name) {
                continue;
            }
            if let Some(lod) = property.lod {
                if !self.lod.is_enabled(lod) {
                    continue;
                }
            }
            let column = columns.field(&property.table, &property.column);
            let codespace = match &property.kind {
                PropertyKind::CodeList {
                    codespace: Some(codespace),
                } => Some(columns.field(&property.table, codespace)),
                _ => None,
            };
            properties.push(PropertyLayout {
                name: property.name.clone(),
                kind: property.kind.clone(),
                column,
                codespace,
            });
        }

        let mut probes = Vec::new();
        if parent.is_none() {
            for sub in &schema.sub_features {
                if !sub.property.names().any(|n| filter.contains_property(n)) {
                    continue;
                }
                let column = columns.add(
                    format!("{alias}_has_{}", sub.key),
                    sub.probe(alias, &level.id_column),
                );
                probes.push(ProbeLayout {
                    sub_feature: sub.clone(),
                    column,
                });
            }
        }

        let mut hooks = Vec::new();
        for (i, hook) in self
            .hooks
            .iter()
            .enumerate()
            .filter(|(_, h)| h.base_table == level.table)
        {
            if !hook.enabled {
                tracing::debug!(extension = %hook.extension, hook_table = %hook.hook_table, "extension disabled, skipping hook");
                continue;
            }
            if !self.delegate.has_support_for(&hook.hook_table) {
                tracing::debug!(extension = %hook.extension, hook_table = %hook.hook_table, "no extension support, skipping hook");
                continue;
            }
            let hook_alias = format!("{alias}x{i}");
            columns.join(Join {
                kind: JoinKind::Left,
                table: hook.hook_table.clone(),
                alias: hook_alias.clone(),
                column: "id".to_string(),
                left_alias: level.name.clone(),
                left_column: level.id_column.clone(),
            });
            let column = columns.field(&hook_alias, "id");
            hooks.push(HookLayout {
                extension: hook.extension.clone(),
                hook_table: hook.hook_table.clone(),
                column,
            });
        }

        let index = layout.levels.len();
        layout.levels.push(LevelLayout {
            name: level.name.clone(),
            type_name: level.type_name.clone(),
            parent: parent.map(|(p, _)| p),
            children: Vec::new(),
            collection: level.collection.clone(),
            parent_classes: level.parent_classes.clone(),
            id_column,
            class_column,
            fixed_class: level.fixed_class,
            external_id_column,
            part_parent_column,
            properties,
            probes,
            hooks,
        });

        for child in &level.children {
            let requested = child
                .collection
                .as_ref()
                .map(|c| c.names().any(|n| filter.contains_property(n)))
                .unwrap_or(false);
            let lod_ok = child
                .min_lod
                .map(|min| self.lod.contains_lod_greater_than_or_equal(min))
                .unwrap_or(true);
            if !requested || !lod_ok {
                tracing::trace!(level = %child.name, requested, lod_ok, "child level not queried");
                continue;
            }
            let child_index = self.resolve_level(schema, child, Some((index, level)), columns, layout);
            layout.levels[index].children.push(child_index);
        }

        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionFilter;
    use crate::query::ColumnExpr;
    use crate::schema::SchemaRegistry;
    use crate::services::NoExtensions;

    struct Supports(&'static str);

    impl ExtensionDelegate for Supports {
        fn has_support_for(&self, table: &str) -> bool {
            table == self.0
        }

        fn export_properties(
            &self,
            _hook_tables: &[&str],
            _owner_id: i64,
            _owner_type: &str,
            _projection: &crate::projection::ProjectionFilter,
        ) -> Result<Vec<citydb_proto::Property>, Error> {
            Ok(Vec::new())
        }
    }

    fn building() -> Arc<FeatureSchema> {
        SchemaRegistry::citygml().unwrap().get("Building").unwrap()
    }

    fn resolve(lod: LodFilter, projection: Projection, mode: QueryMode) -> ResolvedQuery {
        let resolver = ProjectionResolver::new(&lod, &projection, &[], &NoExtensions);
        resolver.resolve(&building(), &mode).unwrap()
    }

    #[test]
    fn test_full_building_query() {
        let resolved = resolve(LodFilter::all(), Projection::new(), QueryMode::ById);
        let columns = &resolved.spec.columns;

        for alias in [
            "b_id",
            "b_objectclass_id",
            "bco_gmlid",
            "ts_id",
            "ts_objectclass_id",
            "op_id",
            "op_objectclass_id",
            "adr_id",
            "b_building_parent_id",
            "b_has_address",
            "b_function_codespace",
        ] {
            assert!(columns.index_of(alias).is_some(), "missing {alias}");
        }
        assert_eq!(columns.order_by, vec!["b_id", "ts_id", "op_id", "adr_id"]);
        assert_eq!(resolved.spec.name, "Building/by_id");
        assert_eq!(resolved.layout.levels.len(), 4);
        assert_eq!(resolved.layout.levels[0].children, vec![1]);
        assert_eq!(resolved.layout.levels[3].parent_classes, vec![39]);
    }

    #[test]
    fn test_lod_gating() {
        let all = resolve(LodFilter::all(), Projection::new(), QueryMode::ById);
        let low = resolve(LodFilter::only(&[0, 1]), Projection::new(), QueryMode::ById);

        let columns = &low.spec.columns;
        assert!(columns.index_of("b_lod1_solid_id").is_some());
        assert!(columns.index_of("b_lod0_footprint_id").is_some());
        assert!(columns.index_of("b_lod2_solid_id").is_none());
        assert!(columns.index_of("ts_id").is_none());
        assert!(columns.index_of("bco_name").is_some());
        assert_eq!(low.layout.levels.len(), 1);

        let restored = resolve(LodFilter::only(&[0, 1]).enable(2), Projection::new(), QueryMode::ById);
        assert!(restored.spec.columns.index_of("b_lod2_solid_id").is_some());
        assert!(restored.spec.columns.index_of("ts_lod2_multi_surface_id").is_some());
        assert!(restored.spec.columns.index_of("ts_lod3_multi_surface_id").is_none());
        assert!(restored.spec.columns.index_of("op_id").is_none());
        assert!(all.spec.columns.len() > restored.spec.columns.len());
    }

    #[test]
    fn test_lod3_only_keeps_surfaces_drops_lod2_columns() {
        let resolved = resolve(LodFilter::only(&[3]), Projection::new(), QueryMode::ById);
        let columns = &resolved.spec.columns;
        assert!(columns.index_of("ts_id").is_some());
        assert!(columns.index_of("ts_lod2_multi_surface_id").is_none());
        assert!(columns.index_of("ts_lod3_multi_surface_id").is_some());
        assert!(columns.index_of("op_lod3_multi_surface_id").is_some());
    }

    #[test]
    fn test_property_projection() {
        let projection = Projection::new().with_filter("Building", ProjectionFilter::only(["name"]));
        let resolved = resolve(LodFilter::all(), projection, QueryMode::ById);
        let columns = &resolved.spec.columns;
        assert!(columns.index_of("bco_name").is_some());
        assert!(columns.index_of("b_function").is_none());
        assert!(columns.index_of("ts_id").is_none());
        assert!(columns.index_of("b_has_address").is_none());
        assert!(columns.index_of("b_building_parent_id").is_some());
    }

    #[test]
    fn test_owner_mode() {
        let registry = SchemaRegistry::citygml().unwrap();
        let building = registry.get("Building").unwrap();
        let address_link = building
            .sub_features
            .iter()
            .find(|s| s.key == "address")
            .unwrap();
        let address = registry.get("Address").unwrap();

        let lod = LodFilter::all();
        let projection = Projection::new();
        let resolver = ProjectionResolver::new(&lod, &projection, &[], &NoExtensions);
        let resolved = resolver
            .resolve(&address, &QueryMode::by_owners(address_link, 5))
            .unwrap();

        assert_eq!(resolved.spec.name, "Address/by_owners/address");
        assert_eq!(resolved.spec.filter.arity(), 5);
        assert_eq!(resolved.spec.columns.order_by[0], "own_building_id");
        assert!(resolved.layout.owner_column.is_some());
        assert_eq!(resolved.spec.columns.joins[0].kind, JoinKind::Inner);
    }

    #[test]
    fn test_by_root_requires_part_of() {
        let registry = SchemaRegistry::citygml().unwrap();
        let lod = LodFilter::all();
        let projection = Projection::new();
        let resolver = ProjectionResolver::new(&lod, &projection, &[], &NoExtensions);
        assert!(resolver
            .resolve(&registry.get("Address").unwrap(), &QueryMode::ByRoot)
            .is_err());
        let resolved = resolver.resolve(&building(), &QueryMode::ByRoot).unwrap();
        assert_eq!(
            resolved.spec.filter,
            QueryFilter::Eq {
                table: "b".into(),
                column: "building_root_id".into()
            }
        );
    }

    #[test]
    fn test_extension_hooks() {
        let hooks = vec![
            ExtensionHook::new("energy", "building", "ng_building"),
            ExtensionHook::new("noise", "building", "noise_building").disabled(),
            ExtensionHook::new("unknown", "building", "xx_building"),
            ExtensionHook::new("energy", "thematic_surface", "ng_thematic_surface"),
        ];
        let lod = LodFilter::all();
        let projection = Projection::new();
        let delegate = Supports("ng_building");
        let resolver = ProjectionResolver::new(&lod, &projection, &hooks, &delegate);
        let resolved = resolver.resolve(&building(), &QueryMode::ById).unwrap();

        let root = &resolved.layout.levels[0];
        assert_eq!(root.hooks.len(), 1);
        assert_eq!(root.hooks[0].hook_table, "ng_building");
        assert!(resolved.spec.columns.index_of("bx0_id").is_some());
        assert!(resolved.spec.columns.joins.iter().all(|j| j.table != "noise_building"));
        assert!(resolved.layout.levels[1].hooks.is_empty());
        assert!(matches!(
            resolved.spec.columns.columns[root.probes[0].column].expr,
            ColumnExpr::Exists { .. }
        ));
    }
}
