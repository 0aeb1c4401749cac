//! Node definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use super::{Entity, Locals, Uid};
use crate::mechanics::Effect;
use crate::provision::{ProvisionKey, Requirement, RequirementId};
use crate::registry::ScopePath;

/// Marks a node as the end of a subroutine: arriving here pops the call stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnSink {
    /// Only return when the top call frame was pushed with this call type.
    pub call_type: Option<String>,
}

/// A graph-resident entity: a block of content, an actor, a scene, a prop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub uid: Uid,
    pub label: Option<String>,

    /// Free-form type name (`"block"`, `"actor"`, `"scene"`...).
    pub kind: String,

    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub locals: Locals,

    /// Capability keys this node satisfies when it is used as a provider.
    #[serde(default)]
    pub provides: BTreeSet<ProvisionKey>,

    /// Outstanding needs that must be resolved before the node is ready.
    #[serde(default)]
    pub requires: Vec<Requirement>,

    /// Lazily rendered content, handed to the renderer during UPDATE_JOURNAL.
    pub content_template: Option<String>,

    /// Applied during APPLY_EFFECTS.
    #[serde(default)]
    pub effects: Vec<Effect>,

    /// Applied during BOOK_KEEPING.
    #[serde(default)]
    pub post_effects: Vec<Effect>,

    pub return_sink: Option<ReturnSink>,

    /// How many times the cursor has completed BOOK_KEEPING on this node.
    #[serde(default)]
    pub visits: u32,

    /// Address of a node kept outside a graph, such as in a resource
    /// registry. Graph nodes take their path from containment instead.
    #[serde(default)]
    pub scope: Option<ScopePath>,
}

impl Node {
    /// Create a new node with the given label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::anonymous()
        }
    }

    /// Create a node without a label.
    pub fn anonymous() -> Self {
        Self {
            uid: Uid::new(),
            label: None,
            kind: "node".to_string(),
            tags: BTreeSet::new(),
            locals: Locals::new(),
            provides: BTreeSet::new(),
            requires: Vec::new(),
            content_template: None,
            effects: Vec::new(),
            post_effects: Vec::new(),
            return_sink: None,
            visits: 0,
            scope: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_local(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.locals.insert(key.into(), value.into());
        self
    }

    /// Declare a provision key this node satisfies.
    pub fn providing(mut self, key: ProvisionKey) -> Self {
        self.provides.insert(key);
        self
    }

    /// Declare a requirement.
    pub fn requiring(mut self, requirement: Requirement) -> Self {
        self.requires.push(requirement);
        self
    }

    pub fn with_content(mut self, template: impl Into<String>) -> Self {
        self.content_template = Some(template.into());
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_post_effect(mut self, effect: Effect) -> Self {
        self.post_effects.push(effect);
        self
    }

    pub fn in_scope(mut self, scope: ScopePath) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Make this node pop the call stack when reached.
    pub fn returning(mut self, call_type: Option<String>) -> Self {
        self.return_sink = Some(ReturnSink { call_type });
        self
    }

    pub fn requirement(&self, id: RequirementId) -> Option<&Requirement> {
        self.requires.iter().find(|r| r.id == id)
    }

    pub fn requirement_mut(&mut self, id: RequirementId) -> Option<&mut Requirement> {
        self.requires.iter_mut().find(|r| r.id == id)
    }

    /// A node is ready once every hard requirement is resolved.
    pub fn is_ready(&self) -> bool {
        self.requires
            .iter()
            .filter(|r| r.hard)
            .all(|r| r.is_resolved())
    }

    /// Segment used for this node in scope paths.
    pub fn path_segment(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.uid.short())
    }

    /// Copy of this node with a fresh identity and pristine requirements.
    ///
    /// Used when a template stamps out a new provider from a blueprint.
    pub fn instantiate(&self) -> Self {
        let mut node = self.clone();
        node.uid = Uid::new();
        node.visits = 0;
        node.requires = self.requires.iter().map(Requirement::instantiate).collect();
        node
    }
}

impl Entity for Node {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn provides(&self) -> &BTreeSet<ProvisionKey> {
        &self.provides
    }

    fn path(&self) -> Option<ScopePath> {
        self.scope.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::RequirementStatus;

    #[test]
    fn test_new_node() {
        let node = Node::new("square").with_kind("scene").with_tag("outdoor");
        assert_eq!(node.label(), Some("square"));
        assert_eq!(node.kind(), "scene");
        assert!(node.tags.contains("outdoor"));
        assert!(node.is_ready());
    }

    #[test]
    fn test_readiness_ignores_soft_requirements() {
        let hard = Requirement::new(ProvisionKey::new("actor", "guard"));
        let soft = Requirement::new(ProvisionKey::new("prop", "lamp")).soft();
        let hard_id = hard.id;
        let mut node = Node::new("gate").requiring(hard).requiring(soft);

        assert!(!node.is_ready());

        node.requirement_mut(hard_id)
            .unwrap()
            .mark_resolved(Uid::new());
        assert!(node.is_ready());
    }

    #[test]
    fn test_instantiate_resets_identity() {
        let mut blueprint =
            Node::new("bob").requiring(Requirement::new(ProvisionKey::new("item", "apron")));
        blueprint.visits = 3;
        blueprint.requires[0].mark_resolved(Uid::new());

        let copy = blueprint.instantiate();
        assert_ne!(copy.uid, blueprint.uid);
        assert_eq!(copy.visits, 0);
        assert_ne!(copy.requires[0].id, blueprint.requires[0].id);
        assert_eq!(copy.requires[0].status, RequirementStatus::Unresolved);
        assert_eq!(copy.label, blueprint.label);
    }

    #[test]
    fn test_path_segment_falls_back_to_uid() {
        let node = Node::anonymous();
        assert_eq!(node.path_segment(), node.uid.short());
    }
}
