//! Concrete implementation of the GraphView trait using petgraph.
//!
//! A directed `Graph` is the backing store, with HashMap indices for O(1)
//! node and edge lookup by ID. Edge ids are handed out sequentially.

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use tendril_core::error::{GraphError, Result};
use tendril_core::graph::GraphView;
use tendril_core::types::*;

/// Petgraph-backed resource graph.
#[derive(Debug, Clone, Default)]
pub struct PetResourceGraph {
    graph: DiGraph<NodeData, EdgeData>,
    /// Map from our NodeId to petgraph's internal index.
    node_index: HashMap<NodeId, NodeIndex>,
    edge_index: HashMap<EdgeId, EdgeIndex>,
    next_edge: u64,
}

impl PetResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Ids must be unique.
    pub fn add_node(&mut self, data: NodeData) -> Result<NodeId> {
        let id = data.id;
        if self.node_index.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id).into());
        }
        let idx = self.graph.add_node(data);
        self.node_index.insert(id, idx);
        Ok(id)
    }

    /// Add a directed edge and return its id. Parallel edges are allowed.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, weight: f64) -> Result<EdgeId> {
        self.add_edge_with_metadata(from, to, weight, None)
    }

    pub fn add_edge_with_metadata(
        &mut self,
        from: NodeId,
        to: NodeId,
        weight: f64,
        metadata: Option<serde_json::Value>,
    ) -> Result<EdgeId> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(GraphError::InvalidWeight(weight).into());
        }
        let from_idx = *self
            .node_index
            .get(&from)
            .ok_or(GraphError::NodeNotFound(from))?;
        let to_idx = *self
            .node_index
            .get(&to)
            .ok_or(GraphError::NodeNotFound(to))?;

        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        let data = EdgeData {
            id,
            source: from,
            target: to,
            weight,
            usage: EdgeUsage::default(),
            metadata,
        };
        let idx = self.graph.add_edge(from_idx, to_idx, data);
        self.edge_index.insert(id, idx);
        Ok(id)
    }

    /// Set the threshold `node` applies to `agent`.
    pub fn set_threshold(&mut self, node: NodeId, agent: AgentId, threshold: f64) -> Result<()> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(tendril_core::error::TendrilError::invalid_config(
                "threshold",
                threshold,
                "must be non-negative and finite",
            ));
        }
        let data = self
            .get_node_mut(&node)
            .ok_or(GraphError::NodeNotFound(node))?;
        data.thresholds.insert(agent, threshold);
        Ok(())
    }

    pub fn get_node_mut(&mut self, id: &NodeId) -> Option<&mut NodeData> {
        self.node_index
            .get(id)
            .copied()
            .map(|idx| &mut self.graph[idx])
    }

    /// All edges, ordered by id.
    pub fn all_edges(&self) -> Vec<&EdgeData> {
        let mut edges: Vec<&EdgeData> = self.graph.edge_weights().collect();
        edges.sort_by_key(|e| e.id);
        edges
    }

    fn edge_mut(&mut self, id: EdgeId) -> Result<&mut EdgeData> {
        let idx = *self.edge_index.get(&id).ok_or(GraphError::EdgeNotFound(id))?;
        Ok(&mut self.graph[idx])
    }
}

impl GraphView for PetResourceGraph {
    fn get_node(&self, id: &NodeId) -> Option<&NodeData> {
        self.node_index.get(id).map(|idx| &self.graph[*idx])
    }

    fn node_ids(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx].id)
            .collect()
    }

    fn outgoing_edges(&self, node: &NodeId) -> Vec<&EdgeData> {
        let Some(&idx) = self.node_index.get(node) else {
            return Vec::new();
        };
        let mut edges: Vec<&EdgeData> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.weight())
            .collect();
        edges.sort_by_key(|e| e.id);
        edges
    }

    fn edge(&self, id: EdgeId) -> Option<&EdgeData> {
        self.edge_index.get(&id).map(|idx| &self.graph[*idx])
    }

    fn update_edge_weight(&mut self, id: EdgeId, weight: f64) -> Result<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(GraphError::InvalidWeight(weight).into());
        }
        self.edge_mut(id)?.weight = weight;
        Ok(())
    }

    fn record_edge_usage(&mut self, id: EdgeId, usage: UsageRecord) -> Result<()> {
        self.edge_mut(id)?.usage.record(&usage);
        Ok(())
    }

    fn forget_agent(&mut self, agent: AgentId) {
        for node in self.graph.node_weights_mut() {
            node.thresholds.remove(&agent);
        }
    }

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendril_core::error::TendrilError;

    fn graph_with(n: u64) -> (PetResourceGraph, Vec<NodeId>) {
        let mut graph = PetResourceGraph::new();
        let ids = (0..n)
            .map(|i| graph.add_node(NodeData::new(NodeId::from_seed(i))).unwrap())
            .collect();
        (graph, ids)
    }

    #[test]
    fn add_and_retrieve_nodes() {
        let (graph, ids) = graph_with(2);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.get_node(&ids[1]).unwrap().id, ids[1]);
    }

    #[test]
    fn duplicate_node_rejected() {
        let (mut graph, ids) = graph_with(1);
        let err = graph.add_node(NodeData::new(ids[0])).unwrap_err();
        assert!(matches!(err, TendrilError::Graph(GraphError::DuplicateNode(_))));
    }

    #[test]
    fn outgoing_edges_are_directed_and_ordered() {
        let (mut graph, ids) = graph_with(3);
        let e2 = graph.add_edge(ids[0], ids[2], 0.5).unwrap();
        let e1 = graph.add_edge(ids[0], ids[1], 1.0).unwrap();
        graph.add_edge(ids[1], ids[0], 1.0).unwrap();

        let out: Vec<EdgeId> = graph.outgoing_edges(&ids[0]).iter().map(|e| e.id).collect();
        assert_eq!(out, vec![e2, e1]);
        assert!(graph.outgoing_edges(&ids[2]).is_empty());
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn edge_to_unknown_node_fails() {
        let (mut graph, ids) = graph_with(1);
        let err = graph.add_edge(ids[0], NodeId::from_seed(99), 1.0).unwrap_err();
        assert!(matches!(err, TendrilError::Graph(GraphError::NodeNotFound(_))));
    }

    #[test]
    fn weight_updates_and_usage() {
        let (mut graph, ids) = graph_with(2);
        let e = graph.add_edge(ids[0], ids[1], 0.3).unwrap();
        graph.update_edge_weight(e, 0.6).unwrap();
        assert!(graph.update_edge_weight(e, f64::NAN).is_err());
        graph
            .record_edge_usage(
                e,
                UsageRecord {
                    agent: AgentId::new(0, 0),
                    magnitude: 0.2,
                    cycle: 4,
                },
            )
            .unwrap();

        let edge = graph.edge(e).unwrap();
        assert_eq!(edge.weight, 0.6);
        assert_eq!(edge.usage.traversal_count, 1);
        assert_eq!(edge.usage.last_used_cycle, Some(4));
        assert!(graph.update_edge_weight(EdgeId(77), 0.1).is_err());
    }

    #[test]
    fn forgetting_an_agent_drops_only_its_thresholds() {
        let (mut graph, ids) = graph_with(2);
        let edge = graph.add_edge(ids[0], ids[1], 0.5).unwrap();
        let gone = AgentId::new(0, 0);
        let kept = AgentId::new(1, 0);
        graph.set_threshold(ids[0], gone, 0.7).unwrap();
        graph.set_threshold(ids[1], gone, 0.3).unwrap();
        graph.set_threshold(ids[0], kept, 0.4).unwrap();
        graph
            .record_edge_usage(edge, UsageRecord { agent: gone, magnitude: 0.1, cycle: 1 })
            .unwrap();

        graph.forget_agent(gone);
        assert!(graph.get_node(&ids[0]).unwrap().thresholds.get(&gone).is_none());
        assert!(graph.get_node(&ids[1]).unwrap().thresholds.is_empty());
        assert_eq!(graph.threshold(&ids[0], kept, 0.1), 0.4);
        assert_eq!(graph.edge(edge).unwrap().usage.per_agent[&gone], 1);
    }

    #[test]
    fn thresholds_fall_back_to_default() {
        let (mut graph, ids) = graph_with(1);
        let agent = AgentId::new(2, 0);
        graph.set_threshold(ids[0], agent, 0.7).unwrap();
        assert_eq!(graph.threshold(&ids[0], agent, 0.1), 0.7);
        assert_eq!(graph.threshold(&ids[0], AgentId::new(3, 0), 0.1), 0.1);
        assert_eq!(graph.threshold(&NodeId::from_seed(50), agent, 0.2), 0.2);
    }
}
