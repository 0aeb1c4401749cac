//! Capabilities - behavior hooks tagged with (phase, tier, priority).
//!
//! A capability pairs an optional `should_run` predicate with one of a closed
//! set of handler variants. The cache stores them in per-(phase, tier)
//! buckets kept in dispatch order: descending priority, ties by registration.

mod phase;

pub use phase::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use story_graph::{Graph, Locals, Node, Uid};

use crate::context_assembler::LayeredNamespace;
use crate::error::{CapabilityError, HandlerError};
use crate::journal::Fragment;
use crate::render::Renderer;

/// Well-known priorities. Higher runs first.
pub mod priority {
    pub const FIRST: i32 = 100;
    pub const EARLY: i32 = 75;
    pub const NORMAL: i32 = 50;
    pub const LATE: i32 = 25;
    pub const LAST: i32 = 0;
}

/// Read-only view handed to predicates and non-mutating handlers.
pub struct HandlerCtx<'a> {
    pub graph: &'a Graph,
    /// The node under the cursor.
    pub node: &'a Node,
    /// For GATHER handlers: the outer layers assembled so far.
    pub namespace: &'a LayeredNamespace,
    pub phase: Phase,
    pub renderer: &'a dyn Renderer,
}

/// Mutable view handed to effect handlers.
pub struct EffectCtx<'a> {
    pub graph: &'a mut Graph,
    pub cursor: Uid,
    pub namespace: &'a LayeredNamespace,
    pub phase: Phase,
}

pub type Predicate = Arc<dyn Fn(&HandlerCtx<'_>) -> bool + Send + Sync>;
pub type GatherFn = Arc<dyn Fn(&HandlerCtx<'_>) -> Locals + Send + Sync>;
pub type EffectFn = Arc<dyn Fn(&mut EffectCtx<'_>) -> Result<(), HandlerError> + Send + Sync>;
pub type JournalFn = Arc<dyn Fn(&HandlerCtx<'_>) -> Result<Vec<Fragment>, HandlerError> + Send + Sync>;
pub type TransitionFn = Arc<dyn Fn(&HandlerCtx<'_>) -> Option<Transition> + Send + Sync>;

/// Where a transition handler wants the cursor to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub destination: Uid,
    /// The edge being followed, if any. Edges with a call spec push a call frame.
    pub edge: Option<Uid>,
}

impl Transition {
    /// Jump straight to a node without following an edge.
    pub fn jump(destination: Uid) -> Self {
        Self {
            destination,
            edge: None,
        }
    }

    pub fn along(edge: &story_graph::Edge) -> Self {
        Self {
            destination: edge.destination,
            edge: Some(edge.uid),
        }
    }
}

/// The closed set of things a capability can do.
#[derive(Clone)]
pub enum Handler {
    /// Contribute namespace entries (GATHER_CONTEXT).
    Gather(GatherFn),
    /// Mutate graph state (APPLY_EFFECTS, BOOK_KEEPING).
    Effect(EffectFn),
    /// Produce journal fragments (UPDATE_JOURNAL).
    Journal(JournalFn),
    /// Pick a node to jump to (REDIRECT, CONTINUES).
    Transition(TransitionFn),
}

impl Handler {
    pub fn name(&self) -> &'static str {
        match self {
            Handler::Gather(_) => "gather",
            Handler::Effect(_) => "effect",
            Handler::Journal(_) => "journal",
            Handler::Transition(_) => "transition",
        }
    }

    /// Whether this handler variant can serve `phase`.
    pub fn accepts(&self, phase: Phase) -> bool {
        match self {
            Handler::Gather(_) => phase == Phase::GatherContext,
            Handler::Effect(_) => matches!(phase, Phase::ApplyEffects | Phase::BookKeeping),
            Handler::Journal(_) => phase == Phase::UpdateJournal,
            Handler::Transition(_) => matches!(phase, Phase::Redirect | Phase::Continues),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler::{}", self.name())
    }
}

/// Who a capability belongs to. The owner fixes the tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    Node(Uid),
    Graph,
    Domain(String),
    Global,
}

impl Owner {
    pub fn tier(&self) -> Tier {
        match self {
            Owner::Node(_) => Tier::Node,
            Owner::Graph => Tier::Graph,
            Owner::Domain(_) => Tier::Domain,
            Owner::Global => Tier::Global,
        }
    }
}

/// A registered behavior hook.
#[derive(Clone)]
pub struct Capability {
    pub name: String,
    pub phase: Phase,
    pub owner: Owner,
    pub priority: i32,
    pub predicate: Option<Predicate>,
    pub handler: Handler,
}

impl Capability {
    /// Create a capability with normal priority and no predicate.
    pub fn new(name: impl Into<String>, phase: Phase, owner: Owner, handler: Handler) -> Self {
        Self {
            name: name.into(),
            phase,
            owner,
            priority: priority::NORMAL,
            predicate: None,
            handler,
        }
    }

    pub fn gather<F>(name: impl Into<String>, owner: Owner, gather: F) -> Self
    where
        F: Fn(&HandlerCtx<'_>) -> Locals + Send + Sync + 'static,
    {
        Self::new(name, Phase::GatherContext, owner, Handler::Gather(Arc::new(gather)))
    }

    pub fn effect<F>(name: impl Into<String>, phase: Phase, owner: Owner, effect: F) -> Self
    where
        F: Fn(&mut EffectCtx<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self::new(name, phase, owner, Handler::Effect(Arc::new(effect)))
    }

    pub fn journal<F>(name: impl Into<String>, owner: Owner, journal: F) -> Self
    where
        F: Fn(&HandlerCtx<'_>) -> Result<Vec<Fragment>, HandlerError> + Send + Sync + 'static,
    {
        Self::new(name, Phase::UpdateJournal, owner, Handler::Journal(Arc::new(journal)))
    }

    pub fn transition<F>(name: impl Into<String>, phase: Phase, owner: Owner, pick: F) -> Self
    where
        F: Fn(&HandlerCtx<'_>) -> Option<Transition> + Send + Sync + 'static,
    {
        Self::new(name, phase, owner, Handler::Transition(Arc::new(pick)))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Only run when `predicate` holds. Evaluated on every invocation.
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&HandlerCtx<'_>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn tier(&self) -> Tier {
        self.owner.tier()
    }

    pub fn should_run(&self, ctx: &HandlerCtx<'_>) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(ctx))
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .field("predicate", &self.predicate.is_some())
            .field("handler", &self.handler)
            .finish()
    }
}

/// Append-only store of capabilities, bucketed by (phase, tier).
#[derive(Debug, Clone, Default)]
pub struct CapabilityCache {
    buckets: HashMap<(Phase, Tier), Vec<Capability>>,
    len: usize,
}

impl CapabilityCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Never removed afterwards.
    pub fn register(&mut self, capability: Capability) -> Result<(), CapabilityError> {
        if !capability.handler.accepts(capability.phase) {
            return Err(CapabilityError::PhaseMismatch {
                name: capability.name,
                phase: capability.phase,
                handler: capability.handler.name(),
            });
        }

        let bucket = self
            .buckets
            .entry((capability.phase, capability.tier()))
            .or_default();
        // Insert after every entry of equal or higher priority: keeps the
        // bucket sorted and registration order stable among equals.
        let position = bucket.partition_point(|c| c.priority >= capability.priority);
        bucket.insert(position, capability);
        self.len += 1;
        Ok(())
    }

    /// Capabilities for (phase, tier) in dispatch order.
    pub fn iter_phase(&self, phase: Phase, tier: Tier) -> impl Iterator<Item = &Capability> {
        self.buckets
            .get(&(phase, tier))
            .map(|bucket| bucket.as_slice())
            .unwrap_or(&[])
            .iter()
    }

    /// Capabilities for (phase, owner) in dispatch order.
    pub fn owned_by<'a>(&'a self, phase: Phase, owner: &'a Owner) -> impl Iterator<Item = &'a Capability> {
        self.iter_phase(phase, owner.tier())
            .filter(move |c| &c.owner == owner)
    }

    /// Every capability that applies to a node in `phase`, merged across
    /// tiers in dispatch order: descending priority, then narrowest tier
    /// (node, nearest ancestor first, graph, domains innermost first, global),
    /// then registration order.
    pub fn dispatch_order(
        &self,
        phase: Phase,
        node: Uid,
        ancestors: &[Uid],
        domains: &[String],
    ) -> Vec<&Capability> {
        let mut owners: Vec<Owner> = Vec::with_capacity(ancestors.len() + domains.len() + 3);
        owners.push(Owner::Node(node));
        owners.extend(ancestors.iter().map(|uid| Owner::Node(*uid)));
        owners.push(Owner::Graph);
        owners.extend(domains.iter().rev().map(|d| Owner::Domain(d.clone())));
        owners.push(Owner::Global);

        let mut ranked: Vec<(usize, usize, &Capability)> = Vec::new();
        for (scope_rank, owner) in owners.iter().enumerate() {
            for (seq, capability) in self.iter_phase(phase, owner.tier()).enumerate() {
                if &capability.owner == owner {
                    ranked.push((scope_rank, seq, capability));
                }
            }
        }
        ranked.sort_by(|a, b| {
            b.2.priority
                .cmp(&a.2.priority)
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });
        ranked.into_iter().map(|(_, _, c)| c).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
