//! Property projection.

use std::collections::{HashMap, HashSet};

/// Which properties of one feature type are exported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProjectionFilter {
    #[default]
    All,
    Only(HashSet<String>),
    Except(HashSet<String>),
}

impl ProjectionFilter {
    pub fn only<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        ProjectionFilter::Only(names.into_iter().map(str::to_string).collect())
    }

    pub fn except<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        ProjectionFilter::Except(names.into_iter().map(str::to_string).collect())
    }

    /// Whether the property is requested.
    pub fn contains_property(&self, name: &str) -> bool {
        match self {
            ProjectionFilter::All => true,
            ProjectionFilter::Only(names) => names.contains(name),
            ProjectionFilter::Except(names) => !names.contains(name),
        }
    }
}

/// Projection filters by feature type name. Types without a filter export
/// every property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    filters: HashMap<String, ProjectionFilter>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, type_name: &str, filter: ProjectionFilter) -> Self {
        self.filters.insert(type_name.to_string(), filter);
        self
    }

    pub fn filter_for(&self, type_name: &str) -> &ProjectionFilter {
        static ALL: ProjectionFilter = ProjectionFilter::All;
        self.filters.get(type_name).unwrap_or(&ALL)
    }

    /// Whether `type_name` requests property `name`.
    pub fn requests(&self, type_name: &str, name: &str) -> bool {
        self.filter_for(type_name).contains_property(name)
    }
}

/// A schema-extension table joined to a base table when enabled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtensionHook {
    pub extension: String,
    pub base_table: String,
    pub hook_table: String,
    pub enabled: bool,
}

impl ExtensionHook {
    pub fn new(extension: &str, base_table: &str, hook_table: &str) -> Self {
        Self {
            extension: extension.to_string(),
            base_table: base_table.to_string(),
            hook_table: hook_table.to_string(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
