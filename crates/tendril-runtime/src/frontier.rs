//! Extent and frontier helpers.
//!
//! An agent's extent is every node where it holds at least its threshold.
//! The frontier is the set of outgoing edges of extent nodes.

use crate::ledger::{ChannelView, ResourceLedger};
use crate::valence::Candidate;
use std::collections::BTreeSet;
use tendril_core::graph::GraphView;
use tendril_core::semantic::{affect_centroid, centroid};
use tendril_core::types::{AgentId, NodeId};

/// Threshold comparisons allow this much slack so that a transfer sized
/// to exactly fill a gap counts as crossing.
pub const THRESHOLD_SLACK: f64 = 1e-12;

/// Extent of a working view, sorted.
pub fn view_extent<G: GraphView + ?Sized>(
    view: &ChannelView<'_>,
    graph: &G,
    default_threshold: f64,
) -> Vec<NodeId> {
    let agent = view.agent();
    view.held_nodes()
        .into_iter()
        .filter(|n| view.get(*n) + THRESHOLD_SLACK >= graph.threshold(n, agent, default_threshold))
        .collect()
}

/// Extent from committed ledger state.
pub fn committed_extent<G: GraphView + ?Sized>(
    ledger: &ResourceLedger,
    agent: AgentId,
    graph: &G,
    default_threshold: f64,
) -> BTreeSet<NodeId> {
    view_extent(&ChannelView::new(ledger, agent), graph, default_threshold)
        .into_iter()
        .collect()
}

/// Outgoing edges of the given nodes, ordered by edge id.
pub fn frontier_candidates<G: GraphView + ?Sized>(graph: &G, extent: &[NodeId]) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = extent
        .iter()
        .flat_map(|n| graph.outgoing_edges(n))
        .map(|e| Candidate {
            edge: e.id,
            source: e.source,
            target: e.target,
            weight: e.weight,
        })
        .collect();
    candidates.sort_by_key(|c| c.edge);
    candidates.dedup_by_key(|c| c.edge);
    candidates
}

/// Semantic summary of an extent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtentProfile {
    pub centroid: Option<Vec<f32>>,
    pub affect: Option<[f64; 2]>,
}

impl ExtentProfile {
    pub fn of<G: GraphView + ?Sized>(graph: &G, extent: &[NodeId]) -> Self {
        let nodes: Vec<_> = extent.iter().filter_map(|n| graph.get_node(n)).collect();
        Self {
            centroid: centroid(nodes.iter().filter_map(|n| n.embedding.as_deref())),
            affect: affect_centroid(nodes.iter().filter_map(|n| n.affect.as_ref())),
        }
    }
}
