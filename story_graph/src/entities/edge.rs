//! Edge definitions - directed, kinded relations between nodes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{Entity, Uid};
use crate::mechanics::Condition;
use crate::provision::{ProvisionKey, Requirement, RequirementId};

static NO_PROVISIONS: BTreeSet<ProvisionKey> = BTreeSet::new();

/// Relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Manual transition offered to the player.
    Choice,
    /// Automatic transition followed before effects run.
    Redirect,
    /// Automatic transition followed after the journal is written.
    Continue,
    /// Structural parent -> child relation; defines ancestry and scope paths.
    Contains,
    /// Requirer -> provider binding recorded by the resolver.
    Requires,
    /// Provider -> requirer, the reverse of `Requires`.
    Fulfills,
}

impl EdgeKind {
    /// Whether the cursor can travel along this kind of edge.
    pub fn is_transition(&self) -> bool {
        matches!(self, EdgeKind::Choice | EdgeKind::Redirect | EdgeKind::Continue)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Choice => "choice",
            EdgeKind::Redirect => "redirect",
            EdgeKind::Continue => "continue",
            EdgeKind::Contains => "contains",
            EdgeKind::Requires => "requires",
            EdgeKind::Fulfills => "fulfills",
        }
    }
}

/// Subroutine call attached to a transition.
///
/// Following the edge pushes a call frame; the next return sink pops it and
/// jumps to `return_to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSpec {
    pub call_type: Option<String>,
    pub return_to: Uid,
}

/// A directed relation between two node UIDs owned by the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub uid: Uid,
    pub label: Option<String>,
    pub kind: EdgeKind,
    pub source: Uid,
    pub destination: Uid,
    pub tags: BTreeSet<String>,

    /// All must hold for a transition to be available.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Hard requirements gate the transition; they never block the source node.
    #[serde(default)]
    pub requires: Vec<Requirement>,

    pub call: Option<CallSpec>,
}

impl Edge {
    /// Create a new edge.
    pub fn new(source: Uid, destination: Uid, kind: EdgeKind) -> Self {
        Self {
            uid: Uid::new(),
            label: None,
            kind,
            source,
            destination,
            tags: BTreeSet::new(),
            conditions: Vec::new(),
            requires: Vec::new(),
            call: None,
        }
    }

    pub fn choice(source: Uid, destination: Uid, label: impl Into<String>) -> Self {
        Self::new(source, destination, EdgeKind::Choice).with_label(label)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn requiring(mut self, requirement: Requirement) -> Self {
        self.requires.push(requirement);
        self
    }

    /// Make following this edge a subroutine call returning to `return_to`.
    pub fn calling(mut self, call_type: Option<String>, return_to: Uid) -> Self {
        self.call = Some(CallSpec {
            call_type,
            return_to,
        });
        self
    }

    /// The node on the other side of `uid`, if `uid` is an endpoint.
    pub fn other(&self, uid: Uid) -> Option<Uid> {
        if self.source == uid {
            Some(self.destination)
        } else if self.destination == uid {
            Some(self.source)
        } else {
            None
        }
    }

    pub fn touches(&self, uid: Uid) -> bool {
        self.source == uid || self.destination == uid
    }

    pub fn requirement(&self, id: RequirementId) -> Option<&Requirement> {
        self.requires.iter().find(|r| r.id == id)
    }

    pub fn requirement_mut(&mut self, id: RequirementId) -> Option<&mut Requirement> {
        self.requires.iter_mut().find(|r| r.id == id)
    }

    /// Display text for choice menus.
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("{} -> {}", self.kind.as_str(), self.destination.short()))
    }
}

impl Entity for Edge {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn kind(&self) -> &str {
        self.kind.as_str()
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn provides(&self) -> &BTreeSet<ProvisionKey> {
        &NO_PROVISIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_kinds() {
        assert!(EdgeKind::Choice.is_transition());
        assert!(EdgeKind::Redirect.is_transition());
        assert!(EdgeKind::Continue.is_transition());
        assert!(!EdgeKind::Contains.is_transition());
        assert!(!EdgeKind::Requires.is_transition());
        assert!(!EdgeKind::Fulfills.is_transition());
    }

    #[test]
    fn test_other_endpoint() {
        let a = Uid::new();
        let b = Uid::new();
        let edge = Edge::new(a, b, EdgeKind::Contains);

        assert_eq!(edge.other(a), Some(b));
        assert_eq!(edge.other(b), Some(a));
        assert_eq!(edge.other(Uid::new()), None);
        assert!(edge.touches(a));
    }

    #[test]
    fn test_display_label() {
        let edge = Edge::choice(Uid::new(), Uid::nil(), "Open the door");
        assert_eq!(edge.display_label(), "Open the door");

        let unlabeled = Edge::new(Uid::new(), Uid::nil(), EdgeKind::Redirect);
        assert_eq!(unlabeled.display_label(), "redirect -> 00000000");
    }

    #[test]
    fn test_edge_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EdgeKind::Redirect).unwrap();
        assert_eq!(json, "\"redirect\"");
    }
}
