//! Templates - registered factories that build providers on demand.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::{ProvisionKey, Requirement};
use crate::entities::{Entity, Node, Uid};
use crate::graph::Graph;
use crate::registry::ScopePath;

/// Custom build callable.
pub type BuildFn = Arc<dyn Fn(&BuildContext<'_>) -> Node + Send + Sync>;

/// Everything a template can look at while building.
pub struct BuildContext<'a> {
    pub template: &'a Template,
    pub requirement: &'a Requirement,
    /// The node that owns the requirement, when the requirer is a node.
    pub requirer: Option<&'a Node>,
    pub graph: &'a Graph,
}

/// How a template produces its node.
#[derive(Clone)]
pub enum Builder {
    /// Stamp a fresh copy of a prototype node.
    Blueprint(Box<Node>),
    /// Run a callable.
    Custom(BuildFn),
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Builder::Blueprint(node) => f.debug_tuple("Blueprint").field(&node.label).finish(),
            Builder::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A factory that can build a [`Node`] satisfying its declared provision keys.
///
/// Templates are immutable once registered.
#[derive(Debug, Clone)]
pub struct Template {
    pub uid: Uid,
    pub label: Option<String>,
    pub kind: String,
    pub tags: BTreeSet<String>,
    pub provides: BTreeSet<ProvisionKey>,
    /// Requirements stamped onto every built node.
    pub requires: Vec<Requirement>,
    /// Labels of the enclosing scopes this template was registered under.
    /// A template only serves requirers whose path starts with its scope.
    pub scope: ScopePath,
    pub builder: Builder,
}

impl Template {
    /// Create a template that stamps copies of `blueprint`.
    pub fn blueprint(label: impl Into<String>, blueprint: Node) -> Self {
        let kind = blueprint.kind.clone();
        Self::with_builder(label, kind, Builder::Blueprint(Box::new(blueprint)))
    }

    /// Create a template backed by a custom callable.
    pub fn custom<F>(label: impl Into<String>, build: F) -> Self
    where
        F: Fn(&BuildContext<'_>) -> Node + Send + Sync + 'static,
    {
        Self::with_builder(label, "node", Builder::Custom(Arc::new(build)))
    }

    fn with_builder(label: impl Into<String>, kind: impl Into<String>, builder: Builder) -> Self {
        Self {
            uid: Uid::new(),
            label: Some(label.into()),
            kind: kind.into(),
            tags: BTreeSet::new(),
            provides: BTreeSet::new(),
            requires: Vec::new(),
            scope: ScopePath::root(),
            builder,
        }
    }

    pub fn providing(mut self, key: ProvisionKey) -> Self {
        self.provides.insert(key);
        self
    }

    pub fn requiring(mut self, requirement: Requirement) -> Self {
        self.requires.push(requirement);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn in_scope(mut self, scope: ScopePath) -> Self {
        self.scope = scope;
        self
    }

    /// Specificity of this template for a requirer at `requirer_path`,
    /// or `None` when the template's scope does not enclose the requirer.
    pub fn specificity(&self, requirer_path: &ScopePath) -> Option<usize> {
        requirer_path
            .starts_with(&self.scope)
            .then(|| self.scope.len())
    }

    /// Build a new node. The caller adds it to the graph.
    pub fn build(&self, ctx: &BuildContext<'_>) -> Node {
        let mut node = match &self.builder {
            Builder::Blueprint(blueprint) => blueprint.instantiate(),
            Builder::Custom(build) => build(ctx),
        };
        node.provides.extend(self.provides.iter().cloned());
        node.requires
            .extend(self.requires.iter().map(Requirement::instantiate));
        if node.label.is_none() {
            node.label = self.label.clone();
        }
        node
    }
}

impl Entity for Template {
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
        let mut path = self.scope.clone();
        if let Some(label) = &self.label {
            path.push(label.clone());
        }
        Some(path)
    }
}
