//! Index-linked storage for features under construction.
//!
//! Nodes refer to their children by [`NodeIndex`], so parts can be attached
//! to their parents after the scan without shared ownership. Deferred
//! properties are reserved as [`Slot::Pending`] and filled when their batch
//! resolves; slots that never resolve are dropped when the tree is taken.

use citydb_proto::{Feature, PropertyValue};

/// Position of a node in a [`FeatureArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(usize);

/// A reserved property slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub node: NodeIndex,
    position: usize,
}

/// Content of a property slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Value(PropertyValue),
    Child(NodeIndex),
    /// Waiting for a deferred batch.
    Pending,
}

/// A feature under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureNode {
    pub id: i64,
    pub object_class_id: i32,
    pub type_name: String,
    pub external_id: Option<String>,
    properties: Vec<(String, Slot)>,
}

impl FeatureNode {
    pub fn new(id: i64, object_class_id: i32, type_name: impl Into<String>) -> Self {
        Self {
            id,
            object_class_id,
            type_name: type_name.into(),
            external_id: None,
            properties: Vec::new(),
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Builder-style [`FeatureNode::push_value`].
    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.push_value(name, value);
        self
    }

    pub fn push_value(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.push((name.into(), Slot::Value(value)));
    }

    pub fn properties(&self) -> &[(String, Slot)] {
        &self.properties
    }

    /// Number of slots with the given name, pending ones included.
    pub fn count(&self, name: &str) -> usize {
        self.properties.iter().filter(|(n, _)| n == name).count()
    }
}

/// All nodes of one export call.
#[derive(Debug, Default)]
pub struct FeatureArena {
    nodes: Vec<Option<FeatureNode>>,
}

impl FeatureArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: FeatureNode) -> NodeIndex {
        self.nodes.push(Some(node));
        NodeIndex(self.nodes.len() - 1)
    }

    /// Node at `index`, unless it was already taken.
    pub fn get(&self, index: NodeIndex) -> Option<&FeatureNode> {
        self.nodes.get(index.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: NodeIndex) -> Option<&mut FeatureNode> {
        self.nodes.get_mut(index.0).and_then(Option::as_mut)
    }

    pub fn push_value(&mut self, index: NodeIndex, name: &str, value: PropertyValue) {
        if let Some(node) = self.get_mut(index) {
            node.push_value(name, value);
        }
    }

    /// Reserve a slot to be filled by a deferred batch.
    pub fn reserve(&mut self, index: NodeIndex, name: &str) -> Option<SlotRef> {
        let node = self.get_mut(index)?;
        node.properties.push((name.to_string(), Slot::Pending));
        Some(SlotRef {
            node: index,
            position: node.properties.len() - 1,
        })
    }

    /// Fill a reserved slot. Returns `false` if the slot is gone.
    pub fn fill(&mut self, slot: SlotRef, value: PropertyValue) -> bool {
        match self
            .get_mut(slot.node)
            .and_then(|node| node.properties.get_mut(slot.position))
        {
            Some((_, content @ Slot::Pending)) => {
                *content = Slot::Value(value);
                true
            }
            _ => false,
        }
    }

    /// Hold `child` in property `name` of `parent`.
    pub fn attach_child(&mut self, parent: NodeIndex, name: &str, child: NodeIndex) {
        if let Some(node) = self.get_mut(parent) {
            node.properties.push((name.to_string(), Slot::Child(child)));
        }
    }

    /// Remove a node and everything attached below it, as a [`Feature`].
    pub fn take_tree(&mut self, index: NodeIndex) -> Option<Feature> {
        let node = self.nodes.get_mut(index.0)?.take()?;
        let mut feature = Feature::new(node.id, node.object_class_id, node.type_name);
        feature.external_id = node.external_id;

        for (name, slot) in node.properties {
            match slot {
                Slot::Value(value) => feature.push(name, value),
                Slot::Child(child) => {
                    if let Some(child) = self.take_tree(child) {
                        feature.push(name, PropertyValue::Feature(Box::new(child)));
                    }
                }
                Slot::Pending => {}
            }
        }
        Some(feature)
    }

    /// Number of nodes ever inserted.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use citydb_proto::Value;

    use super::*;

    #[test]
    fn test_take_tree() {
        let mut arena = FeatureArena::new();
        let root = arena.insert(FeatureNode::new(100, 26, "Building").with_external_id("B"));
        let surface = arena.insert(FeatureNode::new(10, 34, "WallSurface"));
        arena.push_value(root, "name", PropertyValue::Value(Value::from("Town hall")));
        arena.attach_child(root, "boundedBy", surface);

        let feature = arena.take_tree(root).unwrap();
        assert_eq!(feature.external_id.as_deref(), Some("B"));
        assert_eq!(feature.features("boundedBy").count(), 1);
        assert_eq!(feature.tree_size(), 2);
        assert!(arena.get(surface).is_none());
        assert!(arena.take_tree(root).is_none());
    }

    #[test]
    fn test_pending_slots() {
        let mut arena = FeatureArena::new();
        let root = arena.insert(FeatureNode::new(1, 26, "Building"));
        let filled = arena.reserve(root, "lod2Solid").unwrap();
        let _unresolved = arena.reserve(root, "lod3Solid").unwrap();

        assert!(arena.fill(filled, PropertyValue::Reference("#G1".into())));
        assert!(!arena.fill(filled, PropertyValue::Reference("#G2".into())));

        let feature = arena.take_tree(root).unwrap();
        assert_eq!(feature.property("lod2Solid").and_then(PropertyValue::as_reference), Some("#G1"));
        assert!(feature.property("lod3Solid").is_none());
    }
}
