//! Provisioning vocabulary: what nodes need, what satisfies it, and the
//! templates that can build a missing provider.

mod template;

pub use template::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{EdgeKind, Uid};
use crate::registry::Criteria;

/// A `(kind, name)` pair identifying a capability class, e.g. `("actor", "shopkeeper")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProvisionKey {
    pub kind: String,
    pub name: String,
}

impl ProvisionKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ProvisionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Unique identifier for requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequirementId(pub Uuid);

impl RequirementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequirementId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequirementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a requirement may be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Only an entity that already exists may satisfy the requirement.
    #[default]
    Existing,
    /// Prefer an existing provider, fall back to building one from a template.
    Create,
    /// Always build a fresh provider from a template.
    CreateTemplate,
}

impl ResolutionPolicy {
    pub fn searches_existing(&self) -> bool {
        matches!(self, ResolutionPolicy::Existing | ResolutionPolicy::Create)
    }

    pub fn builds_from_template(&self) -> bool {
        matches!(self, ResolutionPolicy::Create | ResolutionPolicy::CreateTemplate)
    }
}

/// Resolution state of a single requirement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequirementStatus {
    #[default]
    Unresolved,
    Resolved { provider: Uid },
    Unresolvable { reason: String },
}

/// A declared need for a provider of some [`ProvisionKey`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: RequirementId,

    /// Name the provider is bound to in the owner's namespace.
    /// Defaults to the provision key's name.
    pub label: Option<String>,

    pub key: ProvisionKey,

    #[serde(default)]
    pub policy: ResolutionPolicy,

    /// Hard requirements block progression; soft ones may be waived.
    pub hard: bool,

    /// Narrows acceptable providers (label, tags, path pattern).
    #[serde(default)]
    pub criteria: Criteria,

    /// When set, resolving the requirement also links requirer -> provider
    /// with a transition of this kind.
    pub link: Option<EdgeKind>,

    #[serde(default)]
    pub status: RequirementStatus,
}

impl Requirement {
    /// Create a new hard requirement with the `Existing` policy.
    pub fn new(key: ProvisionKey) -> Self {
        Self {
            id: RequirementId::new(),
            label: None,
            key,
            policy: ResolutionPolicy::Existing,
            hard: true,
            criteria: Criteria::default(),
            link: None,
            status: RequirementStatus::Unresolved,
        }
    }

    /// Make this requirement soft (waivable).
    pub fn soft(mut self) -> Self {
        self.hard = false;
        self
    }

    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Link the requirer to the provider with a transition once resolved.
    pub fn linked_as(mut self, kind: EdgeKind) -> Self {
        self.link = Some(kind);
        self
    }

    /// The provider currently bound to this requirement.
    pub fn satisfied_by(&self) -> Option<Uid> {
        match self.status {
            RequirementStatus::Resolved { provider } => Some(provider),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.status, RequirementStatus::Resolved { .. })
    }

    pub fn is_unresolvable(&self) -> bool {
        matches!(self.status, RequirementStatus::Unresolvable { .. })
    }

    /// Name used when binding the provider into a namespace.
    pub fn binding_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key.name)
    }

    pub fn mark_resolved(&mut self, provider: Uid) {
        self.status = RequirementStatus::Resolved { provider };
    }

    pub fn mark_unresolvable(&mut self, reason: impl Into<String>) {
        self.status = RequirementStatus::Unresolvable {
            reason: reason.into(),
        };
    }

    /// Copy with a fresh id and no resolution state.
    pub fn instantiate(&self) -> Self {
        Self {
            id: RequirementId::new(),
            status: RequirementStatus::Unresolved,
            ..self.clone()
        }
    }

    /// Short human description, e.g. `hard actor:shopkeeper`.
    pub fn describe(&self) -> String {
        let severity = if self.hard { "hard" } else { "soft" };
        match &self.label {
            Some(label) if label != &self.key.name => {
                format!("{} {} ({})", severity, self.key, label)
            }
            _ => format!("{} {}", severity, self.key),
        }
    }
}
