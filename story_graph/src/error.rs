//! Error types for graph structure and effect application.

use crate::entities::Uid;
use crate::provision::RequirementId;

/// Structural invariant violations. Fatal and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate id: {0}")]
    DuplicateId(Uid),

    #[error("edge {edge} references missing node {missing}")]
    DanglingEdge { edge: Uid, missing: Uid },

    #[error("node not found: {0}")]
    NodeNotFound(Uid),

    #[error("edge not found: {0}")]
    EdgeNotFound(Uid),

    #[error("requirement not found: {0}")]
    RequirementNotFound(RequirementId),

    #[error("node {node} still has {count} edge(s)")]
    NodeHasEdges { node: Uid, count: usize },

    #[error("invalid path pattern: {0}")]
    InvalidPathPattern(String),
}

/// Failures while applying an [`Effect`](crate::mechanics::Effect).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EffectError {
    #[error("cannot add to non-numeric value at '{key}'")]
    NotNumeric { key: String },

    #[error("effect target node not found: {0}")]
    TargetNotFound(Uid),
}
