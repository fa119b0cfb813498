//! Schema lookup by name and object class.

use std::collections::HashMap;
use std::sync::Arc;

use super::FeatureSchema;
use crate::error::Error;

/// Export schemas of a run, indexed by name and by object class.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<FeatureSchema>>,
    by_class: HashMap<i32, String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema. Fails if it is invalid, its name is taken, or one
    /// of its classes is already claimed.
    pub fn register(&mut self, schema: FeatureSchema) -> Result<(), Error> {
        schema.validate()?;
        if self.schemas.contains_key(&schema.name) {
            return Err(Error::InvalidSchema(format!(
                "schema '{}' registered twice",
                schema.name
            )));
        }
        if let Some(class) = schema.classes.iter().find(|c| self.by_class.contains_key(*c)) {
            return Err(Error::InvalidSchema(format!(
                "object class {class} claimed by '{}' and '{}'",
                self.by_class[class], schema.name
            )));
        }

        for class in &schema.classes {
            self.by_class.insert(*class, schema.name.clone());
        }
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
        Ok(())
    }

    /// Builder-style [`SchemaRegistry::register`].
    pub fn with_schema(mut self, schema: FeatureSchema) -> Result<Self, Error> {
        self.register(schema)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<FeatureSchema>> {
        self.schemas.get(name).cloned()
    }

    /// Schema exporting the given object class.
    pub fn for_class(&self, object_class_id: i32) -> Option<Arc<FeatureSchema>> {
        self.by_class
            .get(&object_class_id)
            .and_then(|name| self.get(name))
    }

    /// Check that every sub-feature target is registered.
    pub fn check_targets(&self) -> Result<(), Error> {
        for schema in self.schemas.values() {
            for sub in &schema.sub_features {
                if !self.schemas.contains_key(&sub.target) {
                    return Err(Error::InvalidSchema(format!(
                        "{}: sub-feature '{}' targets unknown schema '{}'",
                        schema.name, sub.key, sub.target
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
