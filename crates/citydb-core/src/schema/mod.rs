//! Declarative export schemas.
//!
//! A [`FeatureSchema`] describes how one family of feature types is laid out
//! in the relational store: the root table, the nested levels reachable by
//! left joins, the properties read at each level and the sub-features that
//! are resolved by a second, owner-keyed query.

mod citygml;
mod registry;

use std::collections::HashSet;
use std::sync::Arc;

pub use registry::SchemaRegistry;

use crate::error::Error;
use crate::query::ColumnExpr;

/// How a mapped column becomes a property value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Plain attribute.
    Scalar,
    /// Delimiter-joined code list, with an optional parallel code-space column.
    CodeList { codespace: Option<String> },
    /// Geometry, either as a root id into the geometry table or as an
    /// encoded cell decoded on the spot.
    Geometry { inline: bool },
}

/// A property read from one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyMapping {
    pub name: String,
    /// Table alias the column is read from.
    pub table: String,
    pub column: String,
    pub kind: PropertyKind,
    /// Level of detail this property belongs to.
    pub lod: Option<u8>,
}

impl PropertyMapping {
    pub fn scalar(name: &str, table: &str, column: &str) -> Self {
        Self::new(name, table, column, PropertyKind::Scalar)
    }

    pub fn codes(name: &str, table: &str, column: &str) -> Self {
        Self::new(
            name,
            table,
            column,
            PropertyKind::CodeList {
                codespace: Some(format!("{column}_codespace")),
            },
        )
    }

    pub fn geometry(name: &str, table: &str, column: &str) -> Self {
        Self::new(name, table, column, PropertyKind::Geometry { inline: false })
    }

    pub fn inline_geometry(name: &str, table: &str, column: &str) -> Self {
        Self::new(name, table, column, PropertyKind::Geometry { inline: true })
    }

    fn new(name: &str, table: &str, column: &str, kind: PropertyKind) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            kind,
            lod: None,
        }
    }

    /// Tie the property to a level of detail.
    pub fn at_lod(mut self, lod: u8) -> Self {
        self.lod = Some(lod);
        self
    }
}

/// A table joined one-to-one to a level, e.g. the shared `cityobject` row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Companion {
    pub table: String,
    pub alias: String,
}

/// How a level is joined to its parent level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LevelJoin {
    /// The query root.
    Root,
    /// `child.column = parent.parent_column`.
    Direct { column: String, parent_column: String },
    /// Through a link table: `link.parent_column = parent.id` and
    /// `child.id = link.child_column`.
    Link {
        table: String,
        alias: String,
        parent_column: String,
        child_column: String,
    },
}

/// Property name under which children are attached, by object class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionNaming {
    pub default: String,
    pub by_class: Vec<(i32, String)>,
}

impl CollectionNaming {
    pub fn new(default: &str) -> Self {
        Self {
            default: default.to_string(),
            by_class: Vec::new(),
        }
    }

    pub fn with_class(mut self, object_class_id: i32, name: &str) -> Self {
        self.by_class.push((object_class_id, name.to_string()));
        self
    }

    /// Property name for a child of the given class.
    pub fn name_for(&self, object_class_id: i32) -> &str {
        self.by_class
            .iter()
            .find(|(class, _)| *class == object_class_id)
            .map(|(_, name)| name.as_str())
            .unwrap_or(&self.default)
    }

    /// Every name this collection may use.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.default.as_str()).chain(self.by_class.iter().map(|(_, n)| n.as_str()))
    }
}

/// Where the external identifier of a level lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalIdColumn {
    pub table: String,
    pub column: String,
}

/// One nesting level of an export query.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSchema {
    /// Table alias, unique within a schema.
    pub name: String,
    /// Type name whose projection filter gates this level's columns.
    pub type_name: String,
    pub table: String,
    pub companions: Vec<Companion>,
    pub id_column: String,
    pub external_id: Option<ExternalIdColumn>,
    pub class_column: Option<String>,
    /// Object class of every row, for tables without a class column.
    pub fixed_class: Option<i32>,
    pub join: LevelJoin,
    /// Parent property holding nodes of this level. `None` at the root.
    pub collection: Option<CollectionNaming>,
    /// Attach only below parents of these classes. Empty means any parent.
    pub parent_classes: Vec<i32>,
    /// The level is queried only if some enabled LOD is at least this.
    pub min_lod: Option<u8>,
    pub properties: Vec<PropertyMapping>,
    pub children: Vec<LevelSchema>,
}

impl LevelSchema {
    /// A root level reading `id` and `objectclass_id` from `table`.
    pub fn new(name: &str, type_name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            table: table.to_string(),
            companions: Vec::new(),
            id_column: "id".to_string(),
            external_id: None,
            class_column: Some("objectclass_id".to_string()),
            fixed_class: None,
            join: LevelJoin::Root,
            collection: None,
            parent_classes: Vec::new(),
            min_lod: None,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_companion(mut self, table: &str, alias: &str) -> Self {
        self.companions.push(Companion {
            table: table.to_string(),
            alias: alias.to_string(),
        });
        self
    }

    pub fn with_external_id(mut self, table: &str, column: &str) -> Self {
        self.external_id = Some(ExternalIdColumn {
            table: table.to_string(),
            column: column.to_string(),
        });
        self
    }

    pub fn with_fixed_class(mut self, object_class_id: i32) -> Self {
        self.fixed_class = Some(object_class_id);
        self.class_column = None;
        self
    }

    /// Join below a parent level into the given collection.
    pub fn joined(mut self, join: LevelJoin, collection: CollectionNaming) -> Self {
        self.join = join;
        self.collection = Some(collection);
        self
    }

    pub fn only_under(mut self, classes: &[i32]) -> Self {
        self.parent_classes = classes.to_vec();
        self
    }

    pub fn with_min_lod(mut self, lod: u8) -> Self {
        self.min_lod = Some(lod);
        self
    }

    pub fn with_property(mut self, property: PropertyMapping) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_properties(mut self, properties: impl IntoIterator<Item = PropertyMapping>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_child(mut self, child: LevelSchema) -> Self {
        self.children.push(child);
        self
    }

    /// This level and all levels below it, depth first.
    pub fn walk(&self) -> Vec<&LevelSchema> {
        let mut levels = vec![self];
        for child in &self.children {
            levels.extend(child.walk());
        }
        levels
    }
}

/// Recursive part-of composition of a schema's root level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartOfSchema {
    pub property: String,
    /// Column holding the direct parent id (null or 0 for roots).
    pub parent_column: String,
    /// Column holding the id of the outermost root.
    pub root_column: String,
}

/// How sub-features point at their owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubFeatureLink {
    /// The target table has a column holding the owner id.
    OwnerColumn { column: String },
    /// A link table pairs owner and target ids.
    LinkTable {
        table: String,
        owner_column: String,
        target_column: String,
    },
}

/// Features owned by a schema's root but resolved by a separate query.
#[derive(Debug, Clone, PartialEq)]
pub struct SubFeatureSchema {
    /// Unique key within the owning schema.
    pub key: String,
    pub property: CollectionNaming,
    /// Name of the schema exporting the targets.
    pub target: String,
    pub target_table: String,
    pub link: SubFeatureLink,
}

impl SubFeatureSchema {
    pub fn owned(key: &str, property: CollectionNaming, target: &str, target_table: &str, column: &str) -> Self {
        Self {
            key: key.to_string(),
            property,
            target: target.to_string(),
            target_table: target_table.to_string(),
            link: SubFeatureLink::OwnerColumn {
                column: column.to_string(),
            },
        }
    }

    pub fn linked(
        key: &str,
        property: CollectionNaming,
        target: &str,
        target_table: &str,
        link_table: &str,
        owner_column: &str,
        target_column: &str,
    ) -> Self {
        Self {
            key: key.to_string(),
            property,
            target: target.to_string(),
            target_table: target_table.to_string(),
            link: SubFeatureLink::LinkTable {
                table: link_table.to_string(),
                owner_column: owner_column.to_string(),
                target_column: target_column.to_string(),
            },
        }
    }

    /// Existence probe for owners selected as `owner_alias.owner_id_column`.
    pub fn probe(&self, owner_alias: &str, owner_id_column: &str) -> ColumnExpr {
        let (table, column) = match &self.link {
            SubFeatureLink::OwnerColumn { column } => (self.target_table.clone(), column.clone()),
            SubFeatureLink::LinkTable {
                table,
                owner_column,
                ..
            } => (table.clone(), owner_column.clone()),
        };
        ColumnExpr::Exists {
            table,
            column,
            owner_alias: owner_alias.to_string(),
            owner_column: owner_id_column.to_string(),
        }
    }
}

/// Export layout of one family of feature types.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    pub name: String,
    /// Object classes exported through this schema.
    pub classes: Vec<i32>,
    pub root: LevelSchema,
    pub part_of: Option<PartOfSchema>,
    pub sub_features: Vec<Arc<SubFeatureSchema>>,
}

impl FeatureSchema {
    pub fn new(name: &str, classes: &[i32], root: LevelSchema) -> Self {
        Self {
            name: name.to_string(),
            classes: classes.to_vec(),
            root,
            part_of: None,
            sub_features: Vec::new(),
        }
    }

    pub fn with_part_of(mut self, property: &str, parent_column: &str, root_column: &str) -> Self {
        self.part_of = Some(PartOfSchema {
            property: property.to_string(),
            parent_column: parent_column.to_string(),
            root_column: root_column.to_string(),
        });
        self
    }

    pub fn with_sub_feature(mut self, sub_feature: SubFeatureSchema) -> Self {
        self.sub_features.push(Arc::new(sub_feature));
        self
    }

    /// Check structural consistency.
    pub fn validate(&self) -> Result<(), Error> {
        if self.classes.is_empty() {
            return Err(Error::InvalidSchema(format!("{} exports no classes", self.name)));
        }
        if self.root.join != LevelJoin::Root || self.root.collection.is_some() {
            return Err(Error::InvalidSchema(format!(
                "{}: root level must not be joined",
                self.name
            )));
        }

        let mut aliases = HashSet::new();
        for level in self.root.walk() {
            let mut level_aliases = vec![level.name.as_str()];
            level_aliases.extend(level.companions.iter().map(|c| c.alias.as_str()));
            if let LevelJoin::Link { alias, .. } = &level.join {
                level_aliases.push(alias);
            }
            for alias in level_aliases {
                if !aliases.insert(alias.to_string()) {
                    return Err(Error::InvalidSchema(format!(
                        "{}: duplicate table alias '{alias}'",
                        self.name
                    )));
                }
            }
            if level.class_column.is_none() && level.fixed_class.is_none() {
                return Err(Error::InvalidSchema(format!(
                    "{}: level '{}' has no object class",
                    self.name, level.name
                )));
            }
            for child in &level.children {
                if child.join == LevelJoin::Root || child.collection.is_none() {
                    return Err(Error::InvalidSchema(format!(
                        "{}: level '{}' is not joined to its parent",
                        self.name, child.name
                    )));
                }
            }
        }

        let mut keys = HashSet::new();
        for sub in &self.sub_features {
            if !keys.insert(sub.key.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "{}: duplicate sub-feature '{}'",
                    self.name, sub.key
                )));
            }
        }
        Ok(())
    }
}
