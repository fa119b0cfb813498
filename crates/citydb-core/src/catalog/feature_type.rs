//! Feature type descriptors.

/// Immutable description of one feature type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureType {
    pub object_class_id: i32,
    pub name: String,
    pub supertype: Option<i32>,
    pub is_abstract: bool,
    /// Whether instances may be exported as top-level features.
    pub top_level: bool,
    /// Name of the recursive part-of property, for part-capable types.
    pub part_property: Option<String>,
    /// Backing table.
    pub table: String,
}

impl FeatureType {
    /// Create a concrete, nested-only feature type.
    pub fn new(object_class_id: i32, name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            object_class_id,
            name: name.into(),
            supertype: None,
            is_abstract: false,
            top_level: false,
            part_property: None,
            table: table.into(),
        }
    }

    /// Set the supertype.
    pub fn with_supertype(mut self, supertype: i32) -> Self {
        self.supertype = Some(supertype);
        self
    }

    /// Mark as abstract.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Mark as exportable on its own.
    pub fn top_level(mut self) -> Self {
        self.top_level = true;
        self
    }

    /// Declare the part-of composition property.
    pub fn with_part_property(mut self, property: impl Into<String>) -> Self {
        self.part_property = Some(property.into());
        self
    }

    /// Whether this type participates in a part-of composition.
    pub fn is_part_capable(&self) -> bool {
        self.part_property.is_some()
    }
}
