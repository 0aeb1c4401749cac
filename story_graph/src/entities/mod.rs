//! Entity definitions for the story graph.

mod edge;
mod node;

pub use edge::*;
pub use node::*;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::provision::ProvisionKey;
use crate::registry::ScopePath;

/// Ad-hoc key/value data attached to an entity, a graph, a domain or the engine.
pub type Locals = BTreeMap<String, Value>;

/// Stable unique identifier for every entity in a graph or registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub Uuid);

impl Uid {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an identifier from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create a nil identifier (useful for placeholders in tests).
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// First eight hex digits, used as a path segment for unlabeled entities.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Common surface of everything stored in a [`Registry`](crate::registry::Registry).
///
/// Identity (`uid`) never changes after creation; every other attribute may.
pub trait Entity {
    fn uid(&self) -> Uid;

    fn label(&self) -> Option<&str>;

    /// Type discriminator used by `Criteria::kind` (the `is_instance` filter).
    fn kind(&self) -> &str;

    fn tags(&self) -> &BTreeSet<String>;

    /// Provision keys this entity satisfies.
    fn provides(&self) -> &BTreeSet<ProvisionKey>;

    /// Hierarchical address when the entity knows it without outside help.
    ///
    /// A graph node's path depends on the graph's containment edges and is
    /// computed by [`Graph::path`](crate::graph::Graph::path).
    fn path(&self) -> Option<ScopePath> {
        None
    }

    /// Check that every tag in `tags` is present on this entity.
    fn has_tags(&self, tags: &BTreeSet<String>) -> bool {
        tags.is_subset(self.tags())
    }

    /// Check if this entity satisfies a provision key.
    fn provides_key(&self, key: &ProvisionKey) -> bool {
        self.provides().contains(key)
    }
}
