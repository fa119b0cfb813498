//! Materialized feature documents.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::geometry::Geometry;
use crate::value::Value;

/// A coded value with an optional code space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codespace: Option<String>,
}

impl Code {
    /// Create a code without a code space.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            codespace: None,
        }
    }

    /// Set the code space.
    pub fn with_codespace(mut self, codespace: impl Into<String>) -> Self {
        self.codespace = Some(codespace.into());
        self
    }
}

/// The value held by one property of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// Simple attribute.
    Value(Value),
    /// Coded attribute (class, function, usage).
    Code(Code),
    /// Inline geometry.
    Geometry(Geometry),
    /// Nested feature.
    Feature(Box<Feature>),
    /// By-reference link to an object emitted elsewhere (`#id`).
    Reference(String),
}

impl PropertyValue {
    /// The nested feature, if this is a feature property.
    pub fn as_feature(&self) -> Option<&Feature> {
        match self {
            PropertyValue::Feature(f) => Some(f),
            _ => None,
        }
    }

    /// The geometry, if this is a geometry property.
    pub fn as_geometry(&self) -> Option<&Geometry> {
        match self {
            PropertyValue::Geometry(g) => Some(g),
            _ => None,
        }
    }

    /// The link target, if this is a reference.
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            PropertyValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// The code, if this is a coded property.
    pub fn as_code(&self) -> Option<&Code> {
        match self {
            PropertyValue::Code(c) => Some(c),
            _ => None,
        }
    }

    /// The simple value, if this is a simple attribute.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            PropertyValue::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A named property of a feature. Names may repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

/// A fully materialized feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Surrogate id in the source database.
    pub id: i64,
    pub object_class_id: i32,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl Feature {
    /// Create an empty feature.
    pub fn new(id: i64, object_class_id: i32, type_name: impl Into<String>) -> Self {
        Self {
            id,
            object_class_id,
            type_name: type_name.into(),
            external_id: None,
            properties: Vec::new(),
        }
    }

    /// Set the external identifier.
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Append a property.
    pub fn push(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.push(Property {
            name: name.into(),
            value,
        });
    }

    /// First property with the given name.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// All properties with the given name, in insertion order.
    pub fn properties_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a PropertyValue> + 'a {
        self.properties
            .iter()
            .filter(move |p| p.name == name)
            .map(|p| &p.value)
    }

    /// Nested features held by properties with the given name.
    pub fn features<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Feature> + 'a {
        self.properties_named(name).filter_map(PropertyValue::as_feature)
    }

    /// Number of properties with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.properties_named(name).count()
    }

    /// Total number of features in this tree, including this one.
    pub fn tree_size(&self) -> usize {
        1 + self
            .properties
            .iter()
            .filter_map(|p| p.value.as_feature())
            .map(Feature::tree_size)
            .sum::<usize>()
    }

    /// Encode as a single JSON document.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn building() -> Feature {
        let mut surface = Feature::new(10, 34, "WallSurface");
        surface.push("class", PropertyValue::Code(Code::new("1000")));

        let mut building = Feature::new(100, 26, "Building").with_external_id("BLDG_1");
        building.push("name", PropertyValue::Value(Value::from("Town hall")));
        building.push("storeysAboveGround", PropertyValue::Value(Value::Int64(3)));
        building.push("thumbnail", PropertyValue::Value(Value::Bytes(vec![0x89, 0x50, 0x4e])));
        building.push("boundedBy", PropertyValue::Feature(Box::new(surface)));
        building.push("boundedBy", PropertyValue::Reference("#WALL_2".into()));
        building
    }

    #[test]
    fn test_named_lookups() {
        let b = building();
        assert_eq!(b.count("boundedBy"), 2);
        assert_eq!(b.features("boundedBy").count(), 1);
        assert_eq!(
            b.property("name").and_then(PropertyValue::as_value),
            Some(&Value::String("Town hall".into()))
        );
        assert!(b.property("function").is_none());
        assert_eq!(b.tree_size(), 2);
    }

    #[test]
    fn test_json_shape() {
        let b = building();
        let json = b.to_json().unwrap();
        assert!(json.contains(r##""kind":"reference","value":"#WALL_2""##));
        assert!(json.contains(r#""external_id":"BLDG_1""#));
        assert!(json.contains(r#"{"type":"int64","value":3}"#));

        let decoded = Feature::from_json(&json).unwrap();
        assert_eq!(decoded, b);
    }

    #[test]
    fn test_code_with_codespace() {
        let code = Code::new("1000").with_codespace("http://example.org/codes");
        let json = serde_json::to_string(&code).unwrap();
        assert!(json.contains("codespace"));
        assert!(!serde_json::to_string(&Code::new("1")).unwrap().contains("codespace"));
    }
}
