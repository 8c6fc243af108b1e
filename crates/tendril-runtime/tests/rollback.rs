//! Cycle Rollback
//!
//! A cycle either lands completely or not at all. Graph stores that refuse
//! writes must leave the ledger, weights, agents and cycle counter as they
//! were before the cycle started.

use tendril_runtime::prelude::*;

/// Which write the wrapped store refuses.
#[derive(Debug, Clone, Copy)]
enum Refuse {
    Weights,
    Usage,
}

/// A store that refuses one kind of write.
struct Refusing {
    inner: PetResourceGraph,
    refuse: Refuse,
}

impl GraphView for Refusing {
    fn get_node(&self, id: &NodeId) -> Option<&NodeData> {
        self.inner.get_node(id)
    }

    fn node_ids(&self) -> Vec<NodeId> {
        self.inner.node_ids()
    }

    fn outgoing_edges(&self, node: &NodeId) -> Vec<&EdgeData> {
        self.inner.outgoing_edges(node)
    }

    fn edge(&self, id: EdgeId) -> Option<&EdgeData> {
        self.inner.edge(id)
    }

    fn update_edge_weight(&mut self, id: EdgeId, weight: f64) -> Result<()> {
        match self.refuse {
            Refuse::Weights => Err(GraphError::EdgeNotFound(id).into()),
            Refuse::Usage => self.inner.update_edge_weight(id, weight),
        }
    }

    fn record_edge_usage(&mut self, id: EdgeId, usage: UsageRecord) -> Result<()> {
        match self.refuse {
            Refuse::Usage => Err(GraphError::EdgeNotFound(id).into()),
            Refuse::Weights => self.inner.record_edge_usage(id, usage),
        }
    }

    fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }
}

fn chain(refuse: Refuse) -> (Refusing, NodeId, NodeId, EdgeId) {
    let mut inner = PetResourceGraph::new();
    let a = inner.add_node(NodeData::new(NodeId::from_seed(0))).unwrap();
    let b = inner.add_node(NodeData::new(NodeId::from_seed(1))).unwrap();
    let edge = inner.add_edge(a, b, 0.5).unwrap();
    (Refusing { inner, refuse }, a, b, edge)
}

fn single_turn() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.budget.stride_budget = 1;
    config
}

#[test]
fn refused_weight_write_rolls_back_the_cycle() {
    let (graph, a, b, edge) = chain(Refuse::Weights);
    let mut engine = Engine::new(graph, single_turn()).unwrap();
    let agent = engine
        .inject_resource(InjectionTarget::New { signature: None }, a, 1.0)
        .unwrap()
        .agent
        .unwrap();

    assert!(engine.run_cycle().is_err());
    assert_eq!(engine.cycle(), 0);
    assert_eq!(engine.resource(agent, a), 1.0);
    assert_eq!(engine.resource(agent, b), 0.0);
    assert_eq!(engine.ledger().staged_len(), 0);

    let data = engine.graph().edge(edge).unwrap();
    assert_eq!(data.weight, 0.5);
    assert_eq!(data.usage.traversal_count, 0);
    assert!(engine.event_history().iter().all(|(_, e)| !matches!(e, EngineEvent::CycleComplete { .. })));

    // Nothing half-applied: a retry fails the same way from the same state
    assert!(engine.run_cycle().is_err());
    assert_eq!(engine.resource(agent, a), 1.0);
}

#[test]
fn refused_usage_record_degrades_without_failing() {
    let (graph, a, b, edge) = chain(Refuse::Usage);
    let mut engine = Engine::new(graph, single_turn()).unwrap();
    let agent = engine
        .inject_resource(InjectionTarget::New { signature: None }, a, 1.0)
        .unwrap()
        .agent
        .unwrap();

    let report = engine.run_cycle().unwrap();
    assert_eq!(engine.cycle(), 1);
    assert!((engine.resource(agent, b) - 0.1).abs() < 1e-12);
    assert!(report
        .degradations
        .contains(&Degradation::UsageUnrecorded { edge }));

    let data = engine.graph().edge(edge).unwrap();
    assert!(data.weight > 0.5);
    assert_eq!(data.usage.traversal_count, 0);
}

#[test]
fn out_of_bounds_edge_added_between_cycles_is_rejected() {
    let mut graph = PetResourceGraph::new();
    let a = graph.add_node(NodeData::new(NodeId::from_seed(0))).unwrap();
    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    let agent = engine
        .inject_resource(InjectionTarget::New { signature: None }, a, 1.0)
        .unwrap()
        .agent
        .unwrap();
    engine.run_cycle().unwrap();

    let ceiling = engine.config().transport.weight_ceiling;
    let b = engine
        .graph_mut()
        .add_node(NodeData::new(NodeId::from_seed(1)))
        .unwrap();
    engine.graph_mut().add_edge(a, b, ceiling * 2.0).unwrap();

    let err = engine.run_cycle().unwrap_err();
    assert!(matches!(err, TendrilError::Graph(GraphError::InvalidWeight(_))));
    assert_eq!(engine.cycle(), 1);
    assert_eq!(engine.resource(agent, a), 1.0);
}
