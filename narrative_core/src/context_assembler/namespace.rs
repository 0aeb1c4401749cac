//! Layered namespace: an ordered list of immutable layer snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use story_graph::{Locals, Scope, Uid};

use crate::capability::Tier;

/// One tier's contribution to a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub tier: Tier,
    /// Owning node for NODE and ANCESTORS layers.
    pub owner: Option<Uid>,
    /// Human-readable name for tracing (`global`, a domain name, a node label).
    pub name: String,
    pub values: Locals,
}

impl Layer {
    pub fn new(tier: Tier, name: impl Into<String>) -> Self {
        Self {
            tier,
            owner: None,
            name: name.into(),
            values: Locals::new(),
        }
    }

    pub fn owned_by(mut self, owner: Uid) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Merge `values` into this layer; incoming keys overwrite.
    pub fn merge(&mut self, values: Locals) {
        self.values.extend(values);
    }
}

/// Read-only view over layers, narrowest first. Lookup returns the first hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayeredNamespace {
    layers: Vec<Layer>,
}

impl LayeredNamespace {
    /// Create a new empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer that shadows every existing one.
    pub fn push_inner(&mut self, layer: Layer) {
        self.layers.insert(0, layer);
    }

    /// Layers, narrowest first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.find(key).map(|(_, value)| value)
    }

    /// The layer that answers for `key`.
    pub fn source_of(&self, key: &str) -> Option<&Layer> {
        self.find(key).map(|(layer, _)| layer)
    }

    fn find(&self, key: &str) -> Option<(&Layer, &Value)> {
        self.layers
            .iter()
            .find_map(|layer| layer.values.get(key).map(|value| (layer, value)))
    }

    /// Collapse into a single map with shadowing applied.
    pub fn flatten(&self) -> Locals {
        let mut flat = Locals::new();
        for layer in self.layers.iter().rev() {
            flat.extend(layer.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        flat
    }
}

impl Scope for LayeredNamespace {
    fn lookup(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(tier: Tier, values: &[(&str, Value)]) -> Layer {
        let mut layer = Layer::new(tier, format!("{:?}", tier));
        for (key, value) in values {
            layer.values.insert(key.to_string(), value.clone());
        }
        layer
    }

    #[test]
    fn test_narrowest_wins() {
        let mut ns = LayeredNamespace::new();
        ns.push_inner(layer(Tier::Global, &[("mood", json!("calm")), ("gold", json!(1))]));
        ns.push_inner(layer(Tier::Graph, &[("mood", json!("tense"))]));
        ns.push_inner(layer(Tier::Node, &[("gold", json!(9))]));

        assert_eq!(ns.get("mood"), Some(&json!("tense")));
        assert_eq!(ns.get("gold"), Some(&json!(9)));
        assert_eq!(ns.source_of("gold").map(|l| l.tier), Some(Tier::Node));
        assert_eq!(ns.get("missing"), None);
        assert_eq!(ns.layers()[0].tier, Tier::Node);
    }

    #[test]
    fn test_flatten_applies_shadowing() {
        let mut ns = LayeredNamespace::new();
        ns.push_inner(layer(Tier::Global, &[("a", json!(1)), ("b", json!(1))]));
        ns.push_inner(layer(Tier::Node, &[("b", json!(2))]));

        let flat = ns.flatten();
        assert_eq!(flat.get("a"), Some(&json!(1)));
        assert_eq!(flat.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_dotted_resolve_through_layers() {
        let mut ns = LayeredNamespace::new();
        ns.push_inner(layer(Tier::Node, &[("actor", json!({ "label": "Bob" }))]));

        assert_eq!(ns.resolve("actor.label"), Some(&json!("Bob")));
        assert_eq!(ns.resolve("actor.age"), None);
    }
}
