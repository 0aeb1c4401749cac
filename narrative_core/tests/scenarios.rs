//! End-to-end scenarios driving the engine through whole turns.

use proptest::prelude::*;
use serde_json::json;

use narrative_core::{
    Capability, CapabilityCache, EngineConfig, EngineContext, EngineError, Fragment, Frame,
    InMemoryStore, Ledger, Owner, Phase, Requirer, Resolver, TurnStatus, PHASE_ORDER,
};
use story_graph::{
    Condition, Edge, EdgeKind, Effect, EffectTarget, Graph, Node, ProvisionKey, Requirement,
    ResolutionPolicy, Template, Uid,
};

fn engine() -> EngineContext {
    EngineContext::new(EngineConfig::default()).unwrap()
}

fn key(kind: &str, name: &str) -> ProvisionKey {
    ProvisionKey::new(kind, name)
}

#[test]
fn test_shopkeeper_scene_is_built_on_demand() {
    let mut ctx = engine();
    ctx.add_template(
        Template::blueprint(
            "tpl_scene",
            Node::new("square")
                .with_kind("scene")
                .with_content("The {shopkeeper} greets you."),
        )
        .providing(key("scene", "square"))
        .requiring(Requirement::new(key("actor", "shopkeeper")).with_policy(ResolutionPolicy::Create)),
    )
    .unwrap();
    ctx.add_template(
        Template::blueprint("tpl_actor", Node::new("Bob").with_kind("actor"))
            .providing(key("actor", "shopkeeper")),
    )
    .unwrap();

    let mut graph = Graph::new();
    let root = graph
        .add_node(
            Node::new("root").requiring(
                Requirement::new(key("scene", "square"))
                    .with_policy(ResolutionPolicy::Create)
                    .linked_as(EdgeKind::Redirect),
            ),
        )
        .unwrap();
    let mut ledger = Ledger::new(graph, root).unwrap();

    let report = ctx.step(&mut ledger).unwrap();

    assert_eq!(report.status, TurnStatus::Ended);
    assert_eq!(report.planning.builds().count(), 2);
    assert_eq!(report.visited.len(), 2);
    assert_eq!(ledger.graph.node(report.cursor).unwrap().label.as_deref(), Some("square"));
    assert!(ledger.graph.find_by_label("Bob").is_some());
    assert_eq!(ledger.journal.last_content(), Some("The Bob greets you."));
}

#[test]
fn test_locked_door_menu() {
    let ctx = engine();
    let mut graph = Graph::new();
    let hall = graph.add_node(Node::new("hall").with_content("A long hall.")).unwrap();
    let stairs = graph.add_node(Node::new("stairs")).unwrap();
    let lab = graph.add_node(Node::new("lab")).unwrap();
    let walk = graph
        .add_edge(Edge::choice(hall, stairs, "Take the stairs").when(Condition::truthy("alarm").negate()))
        .unwrap();
    let swipe = graph
        .add_edge(
            Edge::choice(hall, lab, "Swipe into the lab")
                .requiring(Requirement::new(key("item", "keycard")).with_label("keycard")),
        )
        .unwrap();
    let mut ledger = Ledger::new(graph, hall).unwrap();

    let report = ctx.step(&mut ledger).unwrap();

    let choices: Vec<&Fragment> = report
        .fragments
        .iter()
        .filter(|f| matches!(f, Fragment::Choice { .. }))
        .collect();
    assert_eq!(choices.len(), 2);

    match (choices[0], choices[1]) {
        (
            Fragment::Choice { edge: first, active: true, .. },
            Fragment::Choice {
                edge: second,
                active: false,
                unavailable_reason: Some(reason),
                ..
            },
        ) => {
            assert_eq!(*first, walk);
            assert_eq!(*second, swipe);
            assert!(reason.contains("keycard"), "reason was {reason}");
        }
        other => panic!("unexpected menu: {other:?}"),
    }
    assert_eq!(report.status, TurnStatus::AwaitingChoice { choices: vec![walk] });
    assert_eq!(report.planning.unavailable_transitions, vec![swipe]);
    assert!(matches!(
        ctx.choose(&mut ledger, swipe),
        Err(EngineError::InvalidChoice { .. })
    ));
}

#[test]
fn test_unresolved_hard_requirement_blocks() {
    let ctx = engine();
    let mut graph = Graph::new();
    let gate = graph.add_node(Node::new("gate")).unwrap();
    let requirement = Requirement::new(key("item", "passport"));
    let id = requirement.id;
    let border = graph
        .add_node(Node::new("border").requiring(requirement).with_content("Welcome."))
        .unwrap();
    graph.connect(gate, border, EdgeKind::Continue).unwrap();
    let mut ledger = Ledger::new(graph, gate).unwrap();

    let mut frame = Frame::new(&ctx, &mut ledger);
    match frame.run_turn() {
        Err(EngineError::Resolution(failure)) => {
            assert_eq!(failure.node, border);
            assert_eq!(failure.unresolved_hard_requirements, vec![id]);
            assert!(failure.reasons[0].contains("passport"));
        }
        other => panic!("expected a resolution failure, got {other:?}"),
    }
    assert_eq!(frame.cursor(), border);
    assert_eq!(frame.trace().last(), Some(&(border, Phase::Resolve)));
    drop(frame);

    assert_eq!(ledger.journal.last_content(), None);
    assert_eq!(ledger.graph.node(border).unwrap().visits, 0);
}

#[test]
fn test_resolution_precedes_effects() {
    let ctx = engine();
    let mut graph = Graph::new().with_local("gold", 10);
    graph
        .add_node(Node::new("purse").providing(key("item", "wallet")))
        .unwrap();
    let market = graph
        .add_node(
            Node::new("market")
                .requiring(Requirement::new(key("item", "wallet")))
                .with_effect(Effect::add(EffectTarget::Graph, "gold", -3.0))
                .with_content("You spend 3 gold, {gold} left."),
        )
        .unwrap();
    let mut ledger = Ledger::new(graph, market).unwrap();

    let mut frame = Frame::new(&ctx, &mut ledger);
    frame.run_turn().unwrap();

    assert!(!frame.receipts(Phase::Resolve).is_empty());
    assert!(!frame.receipts(Phase::ApplyEffects).is_empty());
    let position = |phase| frame.trace().iter().position(|(_, p)| *p == phase).unwrap();
    assert!(position(Phase::Resolve) < position(Phase::ApplyEffects));
    drop(frame);

    assert_eq!(ledger.graph.locals.get("gold"), Some(&json!(7)));
    assert_eq!(ledger.journal.last_content(), Some("You spend 3 gold, 7 left."));
}

#[test]
fn test_node_shadows_global_and_parent_shadows_grandparent() {
    let mut ctx = engine();
    ctx.set_global("mood", "calm");

    let mut graph = Graph::new();
    let book = graph.add_node(Node::new("book").with_local("place", "kingdom")).unwrap();
    let chapter = graph
        .add_child(book, Node::new("chapter").with_local("place", "castle"))
        .unwrap();
    let scene = graph
        .add_child(chapter, Node::new("scene").with_local("mood", "tense"))
        .unwrap();

    let ns = ctx.gather(&graph, scene).unwrap();
    assert_eq!(ns.get("mood"), Some(&json!("tense")));
    assert_eq!(ns.get("place"), Some(&json!("castle")));
}

#[test]
fn test_resolution_is_idempotent_within_a_turn() {
    let mut ctx = engine();
    ctx.add_template(Template::blueprint("tpl_lamp", Node::new("lamp")).providing(key("item", "lamp")))
        .unwrap();

    let mut graph = Graph::new();
    let requirement = Requirement::new(key("item", "lamp")).with_policy(ResolutionPolicy::Create);
    let id = requirement.id;
    let cave = graph.add_node(Node::new("cave").requiring(requirement)).unwrap();

    let mut resolver = Resolver::new(ctx.config.max_resolution_depth);
    resolver.begin_epoch();
    let first = resolver
        .resolve_requirement(&mut graph, Requirer::Node(cave), id, &ctx.sources())
        .unwrap()
        .unwrap();
    let nodes = graph.node_count();
    let second = resolver
        .resolve_requirement(&mut graph, Requirer::Node(cave), id, &ctx.sources())
        .unwrap()
        .unwrap();

    assert_eq!(first.provider, second.provider);
    assert_eq!(graph.node_count(), nodes);
    assert_eq!(
        graph.node(cave).unwrap().requirement(id).unwrap().satisfied_by(),
        Some(first.provider)
    );
}

#[test]
fn test_story_survives_save_and_load() {
    let ctx = engine();
    let mut graph = Graph::new();
    let inn = graph.add_node(Node::new("inn").with_content("The inn is warm.")).unwrap();
    let road = graph.add_node(Node::new("road").with_content("The road is cold.")).unwrap();
    let leave = graph.add_edge(Edge::choice(inn, road, "Leave")).unwrap();
    let mut ledger = Ledger::new(graph, inn).unwrap();
    ctx.step(&mut ledger).unwrap();

    let mut store = InMemoryStore::new();
    ledger.save(&mut store).unwrap();
    let mut restored = Ledger::load(&store, ledger.uid).unwrap();

    let report = ctx.choose(&mut restored, leave).unwrap();
    assert_eq!(report.step, 2);
    assert_eq!(report.cursor, road);
    assert_eq!(restored.journal.last_content(), Some("The road is cold."));
    assert_eq!(restored.journal.step_records(1).count(), ledger.journal.len());
}

#[test]
fn test_subroutine_returns_to_caller() {
    let ctx = engine();
    let mut graph = Graph::new();
    let camp = graph.add_node(Node::new("camp")).unwrap();
    let fight = graph.add_node(Node::new("fight").with_content("Steel rings.")).unwrap();
    let done = graph
        .add_node(Node::new("done").returning(Some("combat".into())))
        .unwrap();
    let after = graph.add_node(Node::new("after").with_content("Quiet again.")).unwrap();
    graph
        .add_edge(Edge::new(camp, fight, EdgeKind::Continue).calling(Some("combat".into()), after))
        .unwrap();
    graph.connect(fight, done, EdgeKind::Continue).unwrap();
    let mut ledger = Ledger::new(graph, camp).unwrap();

    let report = ctx.step(&mut ledger).unwrap();
    assert_eq!(report.visited, vec![camp, fight, done, after]);
    let texts: Vec<&str> = report.fragments.iter().filter_map(Fragment::text).collect();
    assert_eq!(texts, vec!["Steel rings.", "Quiet again."]);
    assert!(ledger.call_stack.is_empty());
}

#[test]
fn test_redirect_loop_trips_cycle_guard() {
    let ctx = EngineContext::new(EngineConfig::from_toml_str("step_budget = 4").unwrap()).unwrap();
    let mut graph = Graph::new();
    let a = graph.add_node(Node::new("a")).unwrap();
    let b = graph.add_node(Node::new("b")).unwrap();
    graph.connect(a, b, EdgeKind::Redirect).unwrap();
    graph.connect(b, a, EdgeKind::Redirect).unwrap();
    let mut ledger = Ledger::new(graph, a).unwrap();

    assert!(matches!(
        ctx.step(&mut ledger),
        Err(EngineError::CycleGuardExceeded { budget: 4, .. })
    ));
}

fn phase_strategy() -> impl Strategy<Value = Phase> {
    (0..PHASE_ORDER.len()).prop_map(|i| PHASE_ORDER[i])
}

proptest! {
    #[test]
    fn prop_run_phase_keeps_journal_append_only(phases in prop::collection::vec(phase_strategy(), 1..24)) {
        let ctx = engine();
        let mut graph = Graph::new();
        let room = graph
            .add_node(Node::new("room").with_content("A room."))
            .unwrap();
        let exit = graph.add_node(Node::new("exit")).unwrap();
        graph.add_edge(Edge::choice(room, exit, "Out")).unwrap();
        let mut ledger = Ledger::new(graph, room).unwrap();

        let mut frame = Frame::new(&ctx, &mut ledger);
        let mut previous = 0;
        for phase in phases {
            frame.run_phase(phase).unwrap();
            let journal = &frame.ledger().journal;
            prop_assert!(journal.len() >= previous);
            previous = journal.len();
            prop_assert!(journal.records().windows(2).all(|w| w[0].seq < w[1].seq));
        }
    }

    #[test]
    fn prop_dispatch_is_priority_then_registration(priorities in prop::collection::vec(-5i32..5, 1..16)) {
        let mut cache = CapabilityCache::new();
        for (i, priority) in priorities.iter().enumerate() {
            cache
                .register(
                    Capability::journal(format!("cap{i}"), Owner::Global, |_| Ok(Vec::new()))
                        .with_priority(*priority),
                )
                .unwrap();
        }

        let order = cache.dispatch_order(Phase::UpdateJournal, Uid::new(), &[], &[]);
        prop_assert_eq!(order.len(), priorities.len());
        for pair in order.windows(2) {
            let index = |c: &Capability| c.name[3..].parse::<usize>().unwrap();
            prop_assert!(pair[0].priority >= pair[1].priority);
            if pair[0].priority == pair[1].priority {
                prop_assert!(index(pair[0]) < index(pair[1]));
            }
        }
    }
}
