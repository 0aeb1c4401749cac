//! Frame - the per-turn cursor driver.
//!
//! A turn runs the fixed phase sequence for the node under the cursor:
//!
//! `GATHER_CONTEXT -> RESOLVE -> REDIRECT -> APPLY_EFFECTS -> UPDATE_JOURNAL
//!  -> BOOK_KEEPING -> CONTINUES -> BLOCK`
//!
//! REDIRECT and CONTINUES may move the cursor, in which case the sequence
//! starts over on the new node within the same turn. The driver loops rather
//! than recursing and trips the cycle guard after `step_budget` visits.
//! A hard resolution failure stops the turn with the cursor in place.
//!
//! Frames are cheap and meant to be dropped after the turn; keep one around
//! only to inspect its receipts.

mod call_stack;

pub use call_stack::*;

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use story_graph::{EdgeKind, GraphError, Node, Uid};

use crate::builtins::availability;
use crate::capability::{Capability, EffectCtx, Handler, HandlerCtx, Phase, Transition, PHASE_ORDER};
use crate::context_assembler::LayeredNamespace;
use crate::engine::EngineContext;
use crate::error::{EngineError, ResolutionFailure};
use crate::journal::Fragment;
use crate::ledger::Ledger;
use crate::resolver::{BuildReceipt, PlanningReceipt, Resolver};

/// Audit record of something that happened during a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Receipt {
    Gathered { node: Uid, layers: usize },
    Resolution(BuildReceipt),
    Handler { capability: String, node: Uid },
    Journal { seq: u64 },
    Transition { from: Uid, to: Uid, edge: Option<Uid> },
    Call(CallFrame),
    Return { from: Uid, to: Uid },
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// Waiting on the player; holds the available choice edges.
    AwaitingChoice { choices: Vec<Uid> },
    /// No way forward from the cursor.
    Ended,
}

/// Summary handed back to the caller after a turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub step: u64,
    pub status: TurnStatus,
    /// Cursor position at the end of the turn.
    pub cursor: Uid,
    /// Nodes visited this turn, in order.
    pub visited: Vec<Uid>,
    pub planning: PlanningReceipt,
    /// Fragments journaled this turn.
    pub fragments: Vec<Fragment>,
}

enum Flow {
    Next,
    Move(Transition),
    Block(TurnStatus),
}

enum Visit {
    /// The phase that picked the transition, and the transition.
    Moved(Phase, Transition),
    Blocked(TurnStatus),
}

pub struct Frame<'a> {
    ctx: &'a EngineContext,
    ledger: &'a mut Ledger,
    resolver: Resolver,
    namespace: LayeredNamespace,
    phase_receipts: BTreeMap<Phase, Vec<Receipt>>,
    trace: Vec<(Uid, Phase)>,
    planning: PlanningReceipt,
    fragments: Vec<Fragment>,
    visited: Vec<Uid>,
}

impl<'a> Frame<'a> {
    pub fn new(ctx: &'a EngineContext, ledger: &'a mut Ledger) -> Self {
        Self {
            ctx,
            ledger,
            resolver: Resolver::new(ctx.config.max_resolution_depth),
            namespace: LayeredNamespace::new(),
            phase_receipts: BTreeMap::new(),
            trace: Vec::new(),
            planning: PlanningReceipt::default(),
            fragments: Vec::new(),
            visited: Vec::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        self.ledger
    }

    pub fn cursor(&self) -> Uid {
        self.ledger.cursor
    }

    /// Namespace of the node under the cursor as last assembled.
    pub fn namespace(&self) -> &LayeredNamespace {
        &self.namespace
    }

    pub fn phase_receipts(&self) -> &BTreeMap<Phase, Vec<Receipt>> {
        &self.phase_receipts
    }

    pub fn receipts(&self, phase: Phase) -> &[Receipt] {
        self.phase_receipts
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every (node, phase) executed this turn, in order.
    pub fn trace(&self) -> &[(Uid, Phase)] {
        &self.trace
    }

    /// Run one turn from the current cursor.
    pub fn run_turn(&mut self) -> Result<TurnReport, EngineError> {
        self.begin_turn();
        self.drive()
    }

    /// Follow a manual choice out of the cursor node, then run the turn
    /// from its destination.
    pub fn choose(&mut self, edge: Uid) -> Result<TurnReport, EngineError> {
        let cursor = self.ledger.cursor;
        let invalid = |reason: &str| EngineError::InvalidChoice {
            edge,
            reason: reason.to_string(),
        };

        let graph = &self.ledger.graph;
        let choice = graph.edge(edge).ok_or_else(|| invalid("no such edge"))?;
        if choice.source != cursor {
            return Err(invalid("not offered at the current node"));
        }
        if choice.kind != EdgeKind::Choice {
            return Err(invalid("not a choice"));
        }
        let namespace = self.ctx.assembler().gather(graph, cursor)?;
        availability(choice, &namespace).map_err(|reason| invalid(&reason))?;
        let transition = Transition::along(choice);

        self.begin_turn();
        self.follow(transition, Phase::Block)?;
        self.drive()
    }

    /// Run a single phase for the node under the cursor.
    ///
    /// A transition picked by REDIRECT or CONTINUES is followed. Returns
    /// the fragments this phase wrote to the journal.
    pub fn run_phase(&mut self, phase: Phase) -> Result<Vec<Fragment>, EngineError> {
        let before = self.fragments.len();
        if let Flow::Move(transition) = self.execute(phase)? {
            self.follow(transition, phase)?;
        }
        Ok(self.fragments[before..].to_vec())
    }

    fn begin_turn(&mut self) {
        self.resolver.begin_epoch();
        self.ledger.step += 1;
        self.ledger.journal.begin_step(self.ledger.step);

        self.phase_receipts.clear();
        self.trace.clear();
        self.planning = PlanningReceipt::default();
        self.fragments.clear();
        self.visited.clear();
    }

    fn drive(&mut self) -> Result<TurnReport, EngineError> {
        let budget = self.ctx.config.step_budget;
        loop {
            let cursor = self.ledger.cursor;
            if self.visited.len() >= budget {
                warn!(node = %cursor, budget, "cycle guard tripped");
                return Err(EngineError::CycleGuardExceeded { budget, cursor });
            }
            self.visited.push(cursor);

            match self.visit()? {
                Visit::Moved(phase, transition) => self.follow(transition, phase)?,
                Visit::Blocked(status) => {
                    info!(
                        step = self.ledger.step,
                        node = %cursor,
                        visited = self.visited.len(),
                        status = ?status,
                        "turn complete"
                    );
                    return Ok(TurnReport {
                        step: self.ledger.step,
                        status,
                        cursor,
                        visited: self.visited.clone(),
                        planning: self.planning.clone(),
                        fragments: self.fragments.clone(),
                    });
                }
            }
        }
    }

    fn visit(&mut self) -> Result<Visit, EngineError> {
        for phase in PHASE_ORDER {
            match self.execute(phase)? {
                Flow::Next => {}
                Flow::Move(transition) => return Ok(Visit::Moved(phase, transition)),
                Flow::Block(status) => return Ok(Visit::Blocked(status)),
            }
        }
        Ok(Visit::Blocked(TurnStatus::Ended))
    }

    fn execute(&mut self, phase: Phase) -> Result<Flow, EngineError> {
        let cursor = self.ledger.cursor;
        debug!(node = %cursor, phase = %phase, "phase");
        self.trace.push((cursor, phase));

        match phase {
            Phase::GatherContext => {
                self.gather()?;
                let layers = self.namespace.len();
                self.record(phase, Receipt::Gathered { node: cursor, layers });
                Ok(Flow::Next)
            }
            Phase::Resolve => self.resolve(),
            Phase::Redirect | Phase::Continues => self.transition(phase),
            Phase::ApplyEffects | Phase::BookKeeping => {
                let ran = self.effects(phase)?;
                if ran && phase == Phase::ApplyEffects {
                    self.gather()?;
                }
                Ok(Flow::Next)
            }
            Phase::UpdateJournal => {
                self.journal()?;
                Ok(Flow::Next)
            }
            Phase::Block => Ok(Flow::Block(self.block_status()?)),
        }
    }

    fn gather(&mut self) -> Result<(), GraphError> {
        let ctx: &'a EngineContext = self.ctx;
        self.namespace = ctx.assembler().gather(&self.ledger.graph, self.ledger.cursor)?;
        Ok(())
    }

    fn resolve(&mut self) -> Result<Flow, EngineError> {
        let cursor = self.ledger.cursor;
        let ctx: &'a EngineContext = self.ctx;
        let sources = ctx.sources();

        let mut planning = self
            .resolver
            .resolve_node(&mut self.ledger.graph, cursor, &sources)?;
        planning.merge(
            self.resolver
                .resolve_edges(&mut self.ledger.graph, cursor, &sources)?,
        );

        for receipt in &planning.receipts {
            self.record(Phase::Resolve, Receipt::Resolution(receipt.clone()));
        }
        let failure = planning.is_blocked().then(|| ResolutionFailure {
            node: cursor,
            unresolved_hard_requirements: planning.unresolved_hard_requirements.clone(),
            reasons: planning.hard_failure_reasons(),
        });
        self.planning.merge(planning);

        if let Some(failure) = failure {
            warn!(node = %cursor, error = %failure, "hard requirements unresolved");
            return Err(failure.into());
        }

        // Newly bound providers show up in the namespace.
        self.gather()?;
        Ok(Flow::Next)
    }

    fn transition(&mut self, phase: Phase) -> Result<Flow, EngineError> {
        if phase == Phase::Continues {
            if let Some(transition) = self.try_return()? {
                return Ok(Flow::Move(transition));
            }
        }

        let capabilities = self.dispatch(phase);
        let picked = {
            let node = self.cursor_node()?;
            let ctx = self.handler_ctx(node, phase);
            capabilities.into_iter().find_map(|capability| match &capability.handler {
                Handler::Transition(pick) if capability.should_run(&ctx) => {
                    pick(&ctx).map(|transition| (capability.name.clone(), transition))
                }
                _ => None,
            })
        };

        match picked {
            Some((capability, transition)) => {
                let node = self.ledger.cursor;
                self.record(phase, Receipt::Handler { capability, node });
                Ok(Flow::Move(transition))
            }
            None => Ok(Flow::Next),
        }
    }

    /// Pop the call stack when the cursor sits on a return sink.
    fn try_return(&mut self) -> Result<Option<Transition>, EngineError> {
        let cursor = self.ledger.cursor;
        let Some(sink) = self.cursor_node()?.return_sink.clone() else {
            return Ok(None);
        };

        match self.ledger.call_stack.pop_for(&sink) {
            Ok(Some(frame)) => {
                self.record(
                    Phase::Continues,
                    Receipt::Return {
                        from: cursor,
                        to: frame.return_to,
                    },
                );
                Ok(Some(Transition::jump(frame.return_to)))
            }
            Ok(None) => {
                debug!(node = %cursor, call_type = ?sink.call_type, "return sink does not match the top call");
                Ok(None)
            }
            Err(underflow) => {
                warn!(node = %cursor, error = %underflow, "return sink reached with no pending call");
                Ok(None)
            }
        }
    }

    /// Run the effect handlers of `phase`. Returns whether any ran.
    fn effects(&mut self, phase: Phase) -> Result<bool, EngineError> {
        let cursor = self.ledger.cursor;
        let mut ran = false;

        for capability in self.dispatch(phase) {
            let Handler::Effect(apply) = &capability.handler else {
                continue;
            };
            let should_run = {
                let node = self.cursor_node()?;
                capability.should_run(&self.handler_ctx(node, phase))
            };
            if !should_run {
                continue;
            }

            let mut ctx = EffectCtx {
                graph: &mut self.ledger.graph,
                cursor,
                namespace: &self.namespace,
                phase,
            };
            apply(&mut ctx).map_err(|err| EngineError::Handler {
                capability: capability.name.clone(),
                phase,
                source: err,
            })?;
            self.record(
                phase,
                Receipt::Handler {
                    capability: capability.name.clone(),
                    node: cursor,
                },
            );
            ran = true;
        }
        Ok(ran)
    }

    fn journal(&mut self) -> Result<(), EngineError> {
        let cursor = self.ledger.cursor;
        let capabilities = self.dispatch(Phase::UpdateJournal);

        let mut produced: Vec<(String, Vec<Fragment>)> = Vec::new();
        {
            let node = self.cursor_node()?;
            let ctx = self.handler_ctx(node, Phase::UpdateJournal);
            for capability in capabilities {
                let Handler::Journal(write) = &capability.handler else {
                    continue;
                };
                if !capability.should_run(&ctx) {
                    continue;
                }
                let fragments = write(&ctx).map_err(|err| EngineError::Handler {
                    capability: capability.name.clone(),
                    phase: Phase::UpdateJournal,
                    source: err,
                })?;
                produced.push((capability.name.clone(), fragments));
            }
        }

        for (capability, fragments) in produced {
            self.record(
                Phase::UpdateJournal,
                Receipt::Handler {
                    capability,
                    node: cursor,
                },
            );
            for fragment in fragments {
                let seq = self.ledger.journal.append(fragment.clone());
                self.record(Phase::UpdateJournal, Receipt::Journal { seq });
                self.fragments.push(fragment);
            }
        }
        Ok(())
    }

    fn block_status(&self) -> Result<TurnStatus, EngineError> {
        let cursor = self.ledger.cursor;
        let choices: Vec<Uid> = self
            .ledger
            .graph
            .edges_out(cursor)
            .filter(|edge| edge.kind == EdgeKind::Choice)
            .filter(|edge| availability(edge, &self.namespace).is_ok())
            .map(|edge| edge.uid)
            .collect();

        if choices.is_empty() {
            Ok(TurnStatus::Ended)
        } else {
            Ok(TurnStatus::AwaitingChoice { choices })
        }
    }

    fn follow(&mut self, transition: Transition, phase: Phase) -> Result<(), EngineError> {
        let from = self.ledger.cursor;
        let graph = &self.ledger.graph;
        if !graph.contains_node(transition.destination) {
            return Err(GraphError::NodeNotFound(transition.destination).into());
        }

        let call = transition
            .edge
            .and_then(|edge| graph.edge(edge))
            .and_then(|edge| edge.call.clone());
        if let Some(call) = call {
            let frame = CallFrame {
                call_type: call.call_type,
                caller: from,
                return_to: call.return_to,
            };
            self.ledger.call_stack.push(frame.clone());
            self.record(phase, Receipt::Call(frame));
        }

        self.ledger.cursor = transition.destination;
        debug!(from = %from, to = %transition.destination, "cursor moved");
        self.record(
            phase,
            Receipt::Transition {
                from,
                to: transition.destination,
                edge: transition.edge,
            },
        );
        Ok(())
    }

    fn dispatch(&self, phase: Phase) -> Vec<&'a Capability> {
        let ctx: &'a EngineContext = self.ctx;
        let cursor = self.ledger.cursor;
        let ancestors: Vec<Uid> = self
            .ledger
            .graph
            .iter_ancestors(cursor)
            .iter()
            .map(|node| node.uid)
            .collect();
        ctx.capabilities
            .dispatch_order(phase, cursor, &ancestors, &self.ledger.graph.domains)
    }

    fn cursor_node(&self) -> Result<&Node, GraphError> {
        let cursor = self.ledger.cursor;
        self.ledger
            .graph
            .node(cursor)
            .ok_or(GraphError::NodeNotFound(cursor))
    }

    fn handler_ctx<'f>(&'f self, node: &'f Node, phase: Phase) -> HandlerCtx<'f> {
        HandlerCtx {
            graph: &self.ledger.graph,
            node,
            namespace: &self.namespace,
            phase,
            renderer: self.ctx.renderer(),
        }
    }

    fn record(&mut self, phase: Phase, receipt: Receipt) {
        self.phase_receipts.entry(phase).or_default().push(receipt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{priority, Owner};
    use crate::config::EngineConfig;
    use crate::error::HandlerError;
    use crate::render::RenderError;
    use serde_json::json;
    use story_graph::{Condition, Edge, Effect, EffectError, EffectTarget, Graph, Locals};

    fn engine() -> EngineContext {
        EngineContext::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_single_node_turn() {
        let mut graph = Graph::new();
        let start = graph
            .add_node(Node::new("start").with_local("name", "Ada").with_content("Hello, {name}."))
            .unwrap();
        let mut ledger = Ledger::new(graph, start).unwrap();
        let ctx = engine();

        let mut frame = Frame::new(&ctx, &mut ledger);
        let report = frame.run_turn().unwrap();

        assert_eq!(report.step, 1);
        assert_eq!(report.status, TurnStatus::Ended);
        assert_eq!(report.visited, vec![start]);
        assert_eq!(report.fragments, vec![Fragment::content(start, "Hello, Ada.")]);

        let phases: Vec<Phase> = frame.trace().iter().map(|(_, p)| *p).collect();
        assert_eq!(phases, PHASE_ORDER.to_vec());
        assert_eq!(frame.receipts(Phase::GatherContext).len(), 1);

        drop(frame);
        assert_eq!(ledger.graph.node(start).unwrap().visits, 1);
        assert_eq!(ledger.journal.last_content(), Some("Hello, Ada."));
    }

    #[test]
    fn test_redirect_reruns_phases() {
        let mut graph = Graph::new();
        let hub = graph.add_node(Node::new("hub").with_content("never shown")).unwrap();
        let room = graph.add_node(Node::new("room").with_content("A room.")).unwrap();
        graph.connect(hub, room, EdgeKind::Redirect).unwrap();
        let mut ledger = Ledger::new(graph, hub).unwrap();
        let ctx = engine();

        let report = Frame::new(&ctx, &mut ledger).run_turn().unwrap();
        assert_eq!(report.visited, vec![hub, room]);
        assert_eq!(report.cursor, room);
        assert_eq!(ledger.cursor, room);

        let texts: Vec<_> = ledger
            .journal
            .current_step_records()
            .iter()
            .filter_map(|r| r.fragment.text())
            .collect();
        assert_eq!(texts, vec!["A room."]);
        // REDIRECT fires before effects and bookkeeping.
        assert_eq!(ledger.graph.node(hub).unwrap().visits, 0);
    }

    #[test]
    fn test_moves_are_filed_under_their_phase() {
        let mut graph = Graph::new();
        let hub = graph.add_node(Node::new("hub")).unwrap();
        let room = graph.add_node(Node::new("room")).unwrap();
        let yard = graph.add_node(Node::new("yard")).unwrap();
        let redirect = graph.connect(hub, room, EdgeKind::Redirect).unwrap();
        let onward = graph.connect(room, yard, EdgeKind::Continue).unwrap();
        let mut ledger = Ledger::new(graph, hub).unwrap();
        let ctx = engine();

        let mut frame = Frame::new(&ctx, &mut ledger);
        frame.run_turn().unwrap();

        let moves = |phase| -> Vec<Receipt> {
            frame
                .receipts(phase)
                .iter()
                .filter(|r| matches!(r, Receipt::Transition { .. }))
                .cloned()
                .collect()
        };
        assert_eq!(
            moves(Phase::Redirect),
            vec![Receipt::Transition {
                from: hub,
                to: room,
                edge: Some(redirect),
            }]
        );
        assert_eq!(
            moves(Phase::Continues),
            vec![Receipt::Transition {
                from: room,
                to: yard,
                edge: Some(onward),
            }]
        );
    }

    #[test]
    fn test_continue_after_journal() {
        let mut graph = Graph::new();
        let intro = graph.add_node(Node::new("intro").with_content("Once upon a time.")).unwrap();
        let scene = graph.add_node(Node::new("scene").with_content("The end.")).unwrap();
        graph.connect(intro, scene, EdgeKind::Continue).unwrap();
        let mut ledger = Ledger::new(graph, intro).unwrap();
        let ctx = engine();

        let report = Frame::new(&ctx, &mut ledger).run_turn().unwrap();
        let texts: Vec<_> = report.fragments.iter().filter_map(Fragment::text).collect();
        assert_eq!(texts, vec!["Once upon a time.", "The end."]);
        assert_eq!(ledger.graph.node(intro).unwrap().visits, 1);
    }

    #[test]
    fn test_cycle_guard() {
        let mut graph = Graph::new();
        let a = graph.add_node(Node::new("a")).unwrap();
        let b = graph.add_node(Node::new("b")).unwrap();
        graph.connect(a, b, EdgeKind::Continue).unwrap();
        graph.connect(b, a, EdgeKind::Continue).unwrap();
        let mut ledger = Ledger::new(graph, a).unwrap();

        let config = EngineConfig {
            step_budget: 5,
            ..EngineConfig::default()
        };
        let ctx = EngineContext::new(config).unwrap();
        let err = Frame::new(&ctx, &mut ledger).run_turn().unwrap_err();
        assert!(matches!(err, EngineError::CycleGuardExceeded { budget: 5, .. }));
    }

    #[test]
    fn test_ambiguous_continue_blocks() {
        let mut graph = Graph::new();
        let fork = graph.add_node(Node::new("fork")).unwrap();
        let left = graph.add_node(Node::new("left")).unwrap();
        let right = graph.add_node(Node::new("right")).unwrap();
        graph.connect(fork, left, EdgeKind::Continue).unwrap();
        graph.connect(fork, right, EdgeKind::Continue).unwrap();
        let mut ledger = Ledger::new(graph, fork).unwrap();
        let ctx = engine();

        let report = Frame::new(&ctx, &mut ledger).run_turn().unwrap();
        assert_eq!(report.cursor, fork);
        assert_eq!(report.status, TurnStatus::Ended);
    }

    #[test]
    fn test_choose_follows_edge() {
        let mut graph = Graph::new();
        let door = graph.add_node(Node::new("door").with_content("A door.")).unwrap();
        let inside = graph.add_node(Node::new("inside").with_content("Dark inside.")).unwrap();
        let open = graph.add_edge(Edge::choice(door, inside, "Open it")).unwrap();
        let locked = graph
            .add_edge(Edge::choice(door, inside, "Pick the lock").when(Condition::truthy("lockpick")))
            .unwrap();
        let mut ledger = Ledger::new(graph, door).unwrap();
        let ctx = engine();

        let report = Frame::new(&ctx, &mut ledger).run_turn().unwrap();
        assert_eq!(report.status, TurnStatus::AwaitingChoice { choices: vec![open] });

        let err = Frame::new(&ctx, &mut ledger).choose(locked).unwrap_err();
        assert!(matches!(err, EngineError::InvalidChoice { reason, .. } if reason.contains("lockpick")));
        assert_eq!(ledger.step, 1);

        let report = Frame::new(&ctx, &mut ledger).choose(open).unwrap();
        assert_eq!(report.step, 2);
        assert_eq!(report.cursor, inside);
        assert_eq!(ledger.journal.last_content(), Some("Dark inside."));

        let err = Frame::new(&ctx, &mut ledger).choose(open).unwrap_err();
        assert!(matches!(err, EngineError::InvalidChoice { .. }));
    }

    #[test]
    fn test_call_and_return() {
        let mut graph = Graph::new();
        let town = graph.add_node(Node::new("town").with_content("Town.")).unwrap();
        let shop = graph.add_node(Node::new("shop").with_content("Shop.")).unwrap();
        let back = graph.add_node(Node::new("back").with_content("Back in town.")).unwrap();
        let exit = graph
            .add_node(Node::new("exit").returning(Some("visit".into())))
            .unwrap();
        let enter = graph
            .add_edge(Edge::choice(town, shop, "Shop").calling(Some("visit".into()), back))
            .unwrap();
        graph.connect(shop, exit, EdgeKind::Continue).unwrap();
        let mut ledger = Ledger::new(graph, town).unwrap();
        let ctx = engine();

        Frame::new(&ctx, &mut ledger).run_turn().unwrap();
        let mut frame = Frame::new(&ctx, &mut ledger);
        let report = frame.choose(enter).unwrap();

        assert_eq!(report.visited, vec![shop, exit, back]);
        assert!(frame
            .receipts(Phase::Continues)
            .iter()
            .any(|r| matches!(r, Receipt::Return { to, .. } if *to == back)));
        drop(frame);
        assert!(ledger.call_stack.is_empty());
    }

    #[test]
    fn test_return_without_call_is_noop() {
        let mut graph = Graph::new();
        let sink = graph.add_node(Node::new("sink").returning(None)).unwrap();
        let mut ledger = Ledger::new(graph, sink).unwrap();
        let ctx = engine();

        let report = Frame::new(&ctx, &mut ledger).run_turn().unwrap();
        assert_eq!(report.status, TurnStatus::Ended);
        assert_eq!(report.cursor, sink);
    }

    #[test]
    fn test_handler_error_surfaces() {
        let mut graph = Graph::new();
        let node = graph.add_node(Node::new("fragile")).unwrap();
        let mut ledger = Ledger::new(graph, node).unwrap();
        let mut ctx = engine();
        ctx.register(Capability::effect("explode", Phase::BookKeeping, Owner::Graph, |_| {
            Err(HandlerError::new("boom"))
        }))
        .unwrap();

        let err = Frame::new(&ctx, &mut ledger).run_turn().unwrap_err();
        match err {
            EngineError::Handler {
                capability,
                phase,
                source,
            } => {
                assert_eq!(capability, "explode");
                assert_eq!(phase, Phase::BookKeeping);
                assert_eq!(source, HandlerError::new("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_effect_failure_keeps_its_kind() {
        let mut graph = Graph::new();
        let node = graph
            .add_node(
                Node::new("ledger")
                    .with_local("coins", "many")
                    .with_effect(Effect::add(EffectTarget::Node, "coins", 1.0)),
            )
            .unwrap();
        let mut ledger = Ledger::new(graph, node).unwrap();
        let ctx = engine();

        let err = Frame::new(&ctx, &mut ledger).run_turn().unwrap_err();
        assert!(matches!(
            err,
            EngineError::Handler {
                phase: Phase::ApplyEffects,
                source: HandlerError::Effect(EffectError::NotNumeric { .. }),
                ..
            }
        ));
    }

    #[test]
    fn test_strict_render_failure_keeps_its_kind() {
        let mut graph = Graph::new();
        let node = graph
            .add_node(Node::new("letter").with_content("Dear {recipient},"))
            .unwrap();
        let mut ledger = Ledger::new(graph, node).unwrap();
        let config = EngineConfig {
            strict_rendering: true,
            ..EngineConfig::default()
        };
        let ctx = EngineContext::new(config).unwrap();

        let err = Frame::new(&ctx, &mut ledger).run_turn().unwrap_err();
        assert!(matches!(
            err,
            EngineError::Handler {
                source: HandlerError::Render(RenderError::MissingKey(_)),
                ..
            }
        ));
    }

    #[test]
    fn test_effects_visible_to_journal() {
        let mut graph = Graph::new();
        let node = graph
            .add_node(
                Node::new("mine")
                    .with_local("gold", 1)
                    .with_effect(Effect::add(EffectTarget::Node, "gold", 2.0))
                    .with_content("You have {gold} gold."),
            )
            .unwrap();
        let mut ledger = Ledger::new(graph, node).unwrap();
        let ctx = engine();

        Frame::new(&ctx, &mut ledger).run_turn().unwrap();
        assert_eq!(ledger.journal.last_content(), Some("You have 3 gold."));
    }

    #[test]
    fn test_custom_capabilities_by_priority() {
        let mut graph = Graph::new();
        let node = graph.add_node(Node::new("stage").with_content("Main text.")).unwrap();
        let mut ledger = Ledger::new(graph, node).unwrap();
        let mut ctx = engine();
        ctx.register(
            Capability::journal("header", Owner::Node(node), |ctx| {
                Ok(vec![Fragment::content(ctx.node.uid, "Header.")])
            })
            .with_priority(priority::FIRST),
        )
        .unwrap();
        ctx.register(Capability::gather("weather", Owner::Global, |_| {
            let mut locals = Locals::new();
            locals.insert("weather".into(), json!("fog"));
            locals
        }))
        .unwrap();

        let mut frame = Frame::new(&ctx, &mut ledger);
        let report = frame.run_turn().unwrap();
        let texts: Vec<_> = report.fragments.iter().filter_map(Fragment::text).collect();
        assert_eq!(texts, vec!["Header.", "Main text."]);
        assert_eq!(frame.namespace().get("weather"), Some(&json!("fog")));
    }
}
