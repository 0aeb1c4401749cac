use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of the fixed per-turn execution sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    GatherContext,
    Resolve,
    Redirect,
    ApplyEffects,
    UpdateJournal,
    BookKeeping,
    Continues,
    Block,
}

/// Phases in execution order.
pub const PHASE_ORDER: [Phase; 8] = [
    Phase::GatherContext,
    Phase::Resolve,
    Phase::Redirect,
    Phase::ApplyEffects,
    Phase::UpdateJournal,
    Phase::BookKeeping,
    Phase::Continues,
    Phase::Block,
];

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::GatherContext => "GATHER_CONTEXT",
            Phase::Resolve => "RESOLVE",
            Phase::Redirect => "REDIRECT",
            Phase::ApplyEffects => "APPLY_EFFECTS",
            Phase::UpdateJournal => "UPDATE_JOURNAL",
            Phase::BookKeeping => "BOOK_KEEPING",
            Phase::Continues => "CONTINUES",
            Phase::Block => "BLOCK",
        }
    }

    /// REDIRECT and CONTINUES may move the cursor.
    pub fn is_transition(&self) -> bool {
        matches!(self, Phase::Redirect | Phase::Continues)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability ownership scope, narrowest first.
///
/// `Ancestors` is virtual: it has no bucket of its own and expands to the
/// `Node`-tier capabilities owned by each ancestor of the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Node,
    Ancestors,
    Graph,
    Domain,
    Global,
}
