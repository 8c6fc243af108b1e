//! Graph view — the engine's window onto the weighted directed graph.
//!
//! The engine reads nodes and edges through this trait and writes back only
//! two things: edge weights and edge usage. Graph construction lives with
//! the concrete store.

use crate::error::Result;
use crate::types::*;

/// Read accessors plus the two write operations the engine needs.
///
/// Implementations must return `outgoing_edges` in ascending `EdgeId` order
/// so that frontier iteration is reproducible.
pub trait GraphView {
    /// Get node data by ID.
    fn get_node(&self, id: &NodeId) -> Option<&NodeData>;

    /// All node IDs.
    fn node_ids(&self) -> Vec<NodeId>;

    /// Outgoing edges of a node, ordered by edge id.
    fn outgoing_edges(&self, node: &NodeId) -> Vec<&EdgeData>;

    /// Get edge data by ID.
    fn edge(&self, id: EdgeId) -> Option<&EdgeData>;

    /// Replace an edge's weight.
    fn update_edge_weight(&mut self, id: EdgeId, weight: f64) -> Result<()>;

    /// Append a usage observation to an edge.
    fn record_edge_usage(&mut self, id: EdgeId, usage: UsageRecord) -> Result<()>;

    /// Drop per-agent settings held for a reclaimed agent. Shared edge
    /// statistics are kept. Stores without per-agent settings do nothing.
    fn forget_agent(&mut self, _agent: AgentId) {}

    /// Number of nodes.
    fn node_count(&self) -> usize;

    /// Number of edges.
    fn edge_count(&self) -> usize;

    /// Threshold `node` applies to `agent`, falling back to `default` for
    /// unknown nodes and agents without an override.
    fn threshold(&self, node: &NodeId, agent: AgentId, default: f64) -> f64 {
        self.get_node(node)
            .map(|n| n.threshold_for(agent, default))
            .unwrap_or(default)
    }
}
