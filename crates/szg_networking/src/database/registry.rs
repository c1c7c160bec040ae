//! Type-name to constructor table used by `make node` and `insert`.

use std::collections::HashMap;

use crate::database::node::NodeKind;
use crate::database::payload::NodePayload;

/// Builds the initial payload of a new node.
pub type NodeConstructor = fn() -> NodePayload;

/// Maps type names to node kinds and constructors.
#[derive(Clone, Debug)]
pub struct NodeRegistry {
    entries: HashMap<String, (NodeKind, NodeConstructor)>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// Registry with every built-in kind except the root.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self { entries: HashMap::new() };
        registry.register("name", NodeKind::Name, || NodePayload::Empty);
        registry.register("transform", NodeKind::Transform, || NodePayload::empty_for(NodeKind::Transform));
        registry.register("points", NodeKind::Points, || NodePayload::empty_for(NodeKind::Points));
        registry.register("color4", NodeKind::Color4, || NodePayload::empty_for(NodeKind::Color4));
        registry.register("index", NodeKind::Index, || NodePayload::empty_for(NodeKind::Index));
        registry.register("texture", NodeKind::Texture, || NodePayload::empty_for(NodeKind::Texture));
        registry.register("material", NodeKind::Material, || NodePayload::empty_for(NodeKind::Material));
        registry.register("visibility", NodeKind::Visibility, || NodePayload::empty_for(NodeKind::Visibility));
        registry.register("bounding sphere", NodeKind::BoundingSphere, || {
            NodePayload::empty_for(NodeKind::BoundingSphere)
        });
        registry.register("drawable", NodeKind::Drawable, || NodePayload::empty_for(NodeKind::Drawable));
        registry.register("graphics state", NodeKind::GraphicsState, || {
            NodePayload::empty_for(NodeKind::GraphicsState)
        });
        registry
    }

    /// Adds or replaces a type name.
    pub fn register(&mut self, name: &str, kind: NodeKind, constructor: NodeConstructor) {
        self.entries.insert(name.to_owned(), (kind, constructor));
    }

    /// Kind and fresh payload for a type name.
    #[must_use]
    pub fn construct(&self, name: &str) -> Option<(NodeKind, NodePayload)> {
        self.entries.get(name).map(|(kind, ctor)| (*kind, ctor()))
    }

    /// Whether the type name is known.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = NodeRegistry::new();
        for kind in NodeKind::ALL.into_iter().skip(1) {
            let (k, payload) = registry.construct(kind.name()).unwrap();
            assert_eq!(k, kind);
            assert_eq!(payload, NodePayload::empty_for(kind));
        }
        assert!(!registry.contains("root"));
        assert!(registry.construct("teapot").is_none());
    }

    #[test]
    fn test_alias() {
        let mut registry = NodeRegistry::new();
        registry.register("light", NodeKind::Transform, || NodePayload::empty_for(NodeKind::Transform));
        assert_eq!(registry.construct("light").map(|(k, _)| k), Some(NodeKind::Transform));
    }
}
