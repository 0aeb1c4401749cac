//! Error types for the execution core.
//!
//! Structural violations come from `story_graph`; everything else that can
//! stop a step is collected in [`EngineError`].

use story_graph::{EffectError, GraphError, RequirementId, Uid};

use crate::capability::Phase;
use crate::render::RenderError;

/// Main error type for the execution core.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Graph invariant violation
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// A capability was registered for a phase its handler cannot serve
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// A hard requirement could not be satisfied
    #[error("Resolution failure: {0}")]
    Resolution(#[from] ResolutionFailure),

    /// The per-turn auto-transition loop ran past its budget
    #[error("Cycle guard exceeded: {budget} steps in one turn (last cursor {cursor})")]
    CycleGuardExceeded { budget: usize, cursor: Uid },

    /// A capability's apply function failed
    #[error("Handler '{capability}' failed during {phase:?}: {source}")]
    Handler {
        capability: String,
        phase: Phase,
        #[source]
        source: HandlerError,
    },

    /// The caller picked a transition that is not on offer
    #[error("Invalid choice {edge}: {reason}")]
    InvalidChoice { edge: Uid, reason: String },

    #[error("Cannot remove node {0}: it is under the cursor")]
    CursorRemoval(Uid),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Capability registration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability '{name}' cannot run in phase {phase:?} (handler is {handler})")]
    PhaseMismatch {
        name: String,
        phase: Phase,
        handler: &'static str,
    },
}

/// One or more hard requirements on a node could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("node {node} has {} unresolved hard requirement(s): {}", .unresolved_hard_requirements.len(), .reasons.join("; "))]
pub struct ResolutionFailure {
    pub node: Uid,
    pub unresolved_hard_requirements: Vec<RequirementId>,
    pub reasons: Vec<String>,
}

/// Popping an empty call stack. Logged by the driver, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("call stack underflow")]
pub struct CallStackUnderflow;

/// Error returned by a capability's apply function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Effect(#[from] EffectError),

    #[error(transparent)]
    Render(#[from] RenderError),

    /// Any other failure reported by a script-provided handler.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Key-value store failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("no ledger stored under '{0}'")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}
