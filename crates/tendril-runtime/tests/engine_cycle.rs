//! Engine Cycle Integration
//!
//! Drives full cycles through the public engine API:
//! 1. Resource spreads into neighbours and strengthens the edges it used
//! 2. Quotas and turns follow the budget
//! 3. Overlapping agents raise a merge candidate once per episode
//! 4. Snapshots and configs survive serialization

use tendril_runtime::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn node(graph: &mut PetResourceGraph, seed: u64) -> NodeId {
    graph.add_node(NodeData::new(NodeId::from_seed(seed))).unwrap()
}

fn new_agent() -> InjectionTarget {
    InjectionTarget::New { signature: None }
}

/// Hub with three leaves of differing weight.
fn star() -> (PetResourceGraph, NodeId, Vec<NodeId>) {
    let mut graph = PetResourceGraph::new();
    let hub = node(&mut graph, 0);
    let leaves: Vec<NodeId> = (1..=3).map(|i| node(&mut graph, i)).collect();
    for (leaf, w) in leaves.iter().zip([0.9, 0.5, 0.1]) {
        graph.add_edge(hub, *leaf, w).unwrap();
    }
    (graph, hub, leaves)
}

#[test]
fn hub_fills_its_leaves_over_a_cycle() {
    init_tracing();
    let (graph, hub, leaves) = star();
    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    let agent = engine.inject_resource(new_agent(), hub, 2.0).unwrap().agent.unwrap();

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.quotas.get(&agent), Some(&64));
    assert_eq!(report.turns, 64);

    // The two strongest edges carry the first turn
    let extent = engine.active_extent(agent).unwrap();
    assert!(extent.contains(&leaves[0]));
    assert!(extent.contains(&leaves[1]));
    for leaf in &leaves {
        assert!(engine.resource(agent, *leaf) <= 0.1 + 1e-9, "targets never overshoot");
    }
    assert!(engine.resource(agent, hub) >= 0.1);
    assert!((engine.ledger().agent_total(agent) - 2.0).abs() < 1e-9);
}

#[test]
fn used_edges_strengthen_by_learning_rate_times_amount() {
    let mut graph = PetResourceGraph::new();
    let a = node(&mut graph, 0);
    let b = node(&mut graph, 1);
    let c = node(&mut graph, 2);
    let ab = graph.add_edge(a, b, 0.5).unwrap();
    let cb = graph.add_edge(c, b, 0.5).unwrap();

    let mut config = EngineConfig::default();
    config.budget.stride_budget = 1;
    let mut engine = Engine::new(graph, config).unwrap();
    engine.inject_resource(new_agent(), a, 1.0).unwrap();

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.transfers, 1);
    assert!((report.resource_moved - 0.1).abs() < 1e-12);

    let lr = engine.config().transport.learning_rate;
    let strengthened = engine.graph().edge(ab).unwrap();
    assert!((strengthened.weight - (0.5 + lr * 0.1)).abs() < 1e-12);
    assert_eq!(strengthened.usage.traversal_count, 1);
    assert_eq!(strengthened.usage.last_used_cycle, Some(1));

    let untouched = engine.graph().edge(cb).unwrap();
    assert_eq!(untouched.weight, 0.5);
    assert_eq!(untouched.usage.traversal_count, 0);
}

#[test]
fn weights_never_exceed_ceiling() {
    let (graph, hub, _) = star();
    let mut config = EngineConfig::default();
    config.transport.learning_rate = 50.0;
    let ceiling = config.transport.weight_ceiling;
    let mut engine = Engine::new(graph, config).unwrap();
    engine.inject_resource(new_agent(), hub, 5.0).unwrap();
    engine.run(3).unwrap();
    for edge in engine.graph().all_edges() {
        assert!(edge.weight <= ceiling, "{} above ceiling", edge.weight);
    }
}

#[test]
fn budget_is_split_between_agents() {
    let mut graph = PetResourceGraph::new();
    let a = node(&mut graph, 0);
    let b = node(&mut graph, 1);
    let mut config = EngineConfig::default();
    config.budget.stride_budget = 9;
    let mut engine = Engine::new(graph, config).unwrap();
    let first = engine.inject_resource(new_agent(), a, 1.0).unwrap().agent.unwrap();
    let second = engine.inject_resource(new_agent(), b, 1.0).unwrap().agent.unwrap();

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.quotas.values().sum::<u32>(), 9);
    // Equal extents: remainder to the lower id
    assert_eq!(report.quotas[&first], 5);
    assert_eq!(report.quotas[&second], 4);
}

#[test]
fn overlapping_agents_signal_merge_once() {
    init_tracing();
    let mut graph = PetResourceGraph::new();
    let a = node(&mut graph, 0);
    let b = node(&mut graph, 1);
    graph.add_edge(a, b, 0.5).unwrap();

    let mut config = EngineConfig::default();
    config.budget.stride_budget = 4;
    config.lifecycle.raised_valence_floor = config.lifecycle.base_valence_floor;
    config.coordinator.sustain_cycles = 3;
    let mut engine = Engine::new(graph, config).unwrap();
    let x = engine.inject_resource(new_agent(), a, 1.0).unwrap().agent.unwrap();
    let y = engine.inject_resource(new_agent(), a, 1.0).unwrap().agent.unwrap();

    let reports = engine.run(2).unwrap();
    assert!(reports.iter().all(|r| r.merge_candidates().next().is_none()));
    assert_eq!(engine.overlap(x, y).unwrap(), 1.0);

    let third = engine.run_cycle().unwrap();
    let candidates: Vec<_> = third.merge_candidates().collect();
    assert_eq!(candidates.len(), 1);
    assert_eq!((candidates[0].a, candidates[0].b), (x, y));
    assert_eq!(engine.agent_state(x), Some(LifecycleState::PendingMerge));
    assert_eq!(engine.agent_state(y), Some(LifecycleState::PendingMerge));

    // Pending agents keep working and are not re-signalled
    let fourth = engine.run_cycle().unwrap();
    assert!(fourth.merge_candidates().next().is_none());
    assert!(fourth.quotas.contains_key(&x));

    // Acknowledging the signal releases both agents until overlap is sustained again
    assert!(engine.clear_merge_signal(y, x));
    engine.run_cycle().unwrap();
    assert_eq!(engine.agent_state(x), Some(LifecycleState::Active));
    let again = engine.run(2).unwrap();
    assert_eq!(again[1].merge_candidates().count(), 1);
}

#[test]
fn resource_queries_see_every_agent() {
    let mut graph = PetResourceGraph::new();
    let a = node(&mut graph, 0);
    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    let x = engine.inject_resource(new_agent(), a, 0.4).unwrap().agent.unwrap();
    let y = engine.inject_resource(new_agent(), a, 0.6).unwrap().agent.unwrap();

    assert!((engine.total_resource(a) - 1.0).abs() < 1e-12);
    assert!((engine.resource_excluding(a, x) - 0.6).abs() < 1e-12);
    assert!((engine.resource_excluding(a, y) - 0.4).abs() < 1e-12);
}

#[test]
fn goal_pulls_resource_toward_matching_neighbour() {
    let mut graph = PetResourceGraph::new();
    let hub = graph
        .add_node(NodeData::new(NodeId::from_seed(0)).with_embedding(vec![0.0, 0.0, 1.0]))
        .unwrap();
    let near = graph
        .add_node(NodeData::new(NodeId::from_seed(1)).with_embedding(vec![1.0, 0.0, 0.0]))
        .unwrap();
    let far = graph
        .add_node(NodeData::new(NodeId::from_seed(2)).with_embedding(vec![0.0, 1.0, 0.0]))
        .unwrap();
    graph.add_edge(hub, near, 0.5).unwrap();
    graph.add_edge(hub, far, 0.5).unwrap();

    let mut config = EngineConfig::default();
    config.budget.stride_budget = 1;
    let signatures = StaticSignatures {
        goal: Some(vec![1.0, 0.0, 0.0]),
        ..Default::default()
    };
    let mut engine = Engine::new(graph, config)
        .unwrap()
        .with_signature_source(signatures);
    let agent = engine.inject_resource(new_agent(), hub, 1.0).unwrap().agent.unwrap();

    engine.run_cycle().unwrap();
    assert!(engine.resource(agent, near) >= engine.resource(agent, far));
    assert!(engine.resource(agent, near) > 0.0);
}

#[test]
fn degraded_collaborators_are_reported_not_fatal() {
    let mut graph = PetResourceGraph::new();
    let a = graph
        .add_node(NodeData::new(NodeId::from_seed(0)).with_embedding(vec![1.0, 0.0]))
        .unwrap();
    let b = graph
        .add_node(NodeData::new(NodeId::from_seed(1)).with_embedding(vec![0.0, 1.0]))
        .unwrap();
    graph.add_edge(a, b, 0.5).unwrap();
    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    let agent = engine.inject_resource(new_agent(), a, 1.0).unwrap().agent.unwrap();

    let report = engine.run_cycle().unwrap();
    assert!(report.transfers > 0);
    assert!(report
        .degradations
        .contains(&Degradation::InstabilityUnavailable { agent }));
    assert!(report.degradations.contains(&Degradation::DriveUnavailable {
        agent,
        drive: Drive::Goal
    }));
    assert!(!report.degradations.contains(&Degradation::DriveUnavailable {
        agent,
        drive: Drive::Novelty
    }));
}

#[test]
fn snapshot_and_history_serialize() {
    let (graph, hub, _) = star();
    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    engine.inject_resource(new_agent(), hub, 1.0).unwrap();
    engine.run(2).unwrap();

    let snapshot = engine.snapshot();
    let json = serde_json::to_string_pretty(&snapshot).unwrap();
    assert!(json.contains("\"cycle\": 2"));
    assert_eq!(snapshot.agents.len(), 1);
    assert_eq!(snapshot.stats.total_created, 1);

    let history = serde_json::to_value(engine.event_history()).unwrap();
    assert!(history.as_array().unwrap().len() >= 3);
    assert!(matches!(
        engine.event_history().last(),
        Some((2, EngineEvent::CycleComplete { cycle: 2, .. }))
    ));
}

#[test]
fn engine_runs_from_toml_config() {
    let config = EngineConfig::from_toml_str(
        r#"
        [budget]
        stride_budget = 3

        [transport]
        default_threshold = 0.25
        "#,
    )
    .unwrap();
    let (graph, hub, leaves) = star();
    let mut engine = Engine::new(graph, config).unwrap();

    // Below the configured threshold: nothing is created
    let out = engine.inject_resource(new_agent(), hub, 0.2).unwrap();
    assert!(out.agent.is_none());

    let agent = engine.inject_resource(new_agent(), hub, 1.0).unwrap().agent.unwrap();
    let report = engine.run_cycle().unwrap();
    assert_eq!(report.turns, 3);
    assert!(engine.resource(agent, leaves[0]) <= 0.25 + 1e-9);
}
