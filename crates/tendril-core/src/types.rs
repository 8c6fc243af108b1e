//! Shared types used across the Tendril crates.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Cycle counter. Cycle 0 is the state before the first `run_cycle`.
pub type Cycle = u64;

/// Number of recent flow magnitudes kept per edge.
pub const FLOW_HISTORY_WINDOW: usize = 10;

/// Unique identifier for a node in the resource graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id, useful for tests and reproducible runs.
    pub fn from_seed(seed: u64) -> Self {
        Self(Uuid::from_u128(seed as u128))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a directed edge. Assigned sequentially by the
/// graph store so that ordering by id is insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Generational agent handle.
///
/// A slot index plus the generation that was live when the handle was
/// issued. Once a slot is reclaimed its generation moves on, so an old
/// handle can never alias the agent that later reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId {
    index: u32,
    generation: u32,
}

impl AgentId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Pack into a single integer (index in the high half).
    pub fn to_bits(self) -> u64 {
        ((self.index as u64) << 32) | self.generation as u64
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: (bits >> 32) as u32,
            generation: bits as u32,
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent-{}v{}", self.index, self.generation)
    }
}

// Serialized as a packed integer so that agent-keyed maps stay valid JSON.
impl Serialize for AgentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.to_bits())
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(AgentId::from_bits)
    }
}

/// Data stored at each node of the resource graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    /// Semantic embedding, if the node has one.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Two-dimensional affect (valence, arousal), if known.
    #[serde(default)]
    pub affect: Option<[f32; 2]>,
    /// Per-agent activation thresholds. Agents without an entry use the
    /// engine default.
    #[serde(default)]
    pub thresholds: HashMap<AgentId, f64>,
}

impl NodeData {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            embedding: None,
            affect: None,
            thresholds: HashMap::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_affect(mut self, valence: f32, arousal: f32) -> Self {
        self.affect = Some([valence, arousal]);
        self
    }

    /// Threshold this node applies to `agent`.
    pub fn threshold_for(&self, agent: AgentId, default: f64) -> f64 {
        self.thresholds.get(&agent).copied().unwrap_or(default)
    }
}

/// One usage observation recorded against an edge after a committed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub agent: AgentId,
    pub magnitude: f64,
    pub cycle: Cycle,
}

/// Accumulated traversal statistics for an edge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeUsage {
    pub traversal_count: u64,
    /// Most recent flow magnitudes, oldest first.
    pub flow_history: VecDeque<f64>,
    pub last_used_cycle: Option<Cycle>,
    pub per_agent: HashMap<AgentId, u64>,
}

impl EdgeUsage {
    pub fn record(&mut self, usage: &UsageRecord) {
        self.traversal_count += 1;
        if self.flow_history.len() == FLOW_HISTORY_WINDOW {
            self.flow_history.pop_front();
        }
        self.flow_history.push_back(usage.magnitude);
        self.last_used_cycle = Some(usage.cycle);
        *self.per_agent.entry(usage.agent).or_insert(0) += 1;
    }

    /// Mean of the recorded flow window, 0 when empty.
    pub fn mean_flow(&self) -> f64 {
        if self.flow_history.is_empty() {
            return 0.0;
        }
        self.flow_history.iter().sum::<f64>() / self.flow_history.len() as f64
    }
}

/// Data stored on each directed edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeData {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub weight: f64,
    #[serde(default)]
    pub usage: EdgeUsage,
    /// Opaque caller metadata. Never interpreted by the engine.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Receives quota and transports resource.
    Active,
    /// Stopped expanding; resumes when a frontier edge looks worthwhile again.
    Converged,
    /// Holds no resource. Only an injection brings it back.
    Dissolved,
    /// Active, but flagged as a sustained merge candidate.
    PendingMerge,
}

impl LifecycleState {
    /// Whether the allocator hands this agent quota.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::PendingMerge)
    }

    pub fn is_dissolved(&self) -> bool {
        matches!(self, LifecycleState::Dissolved)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Active => "active",
            LifecycleState::Converged => "converged",
            LifecycleState::Dissolved => "dissolved",
            LifecycleState::PendingMerge => "pending-merge",
        };
        f.write_str(name)
    }
}

/// Result of a single transport turn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportOutcome {
    /// Total resource moved during the turn.
    pub magnitude: f64,
    /// Whether the turn pushed some target across its threshold.
    pub newly_activated: bool,
}

/// Two agents whose extents overlapped for long enough to consider merging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub a: AgentId,
    pub b: AgentId,
    pub overlap_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_bits_roundtrip_and_order() {
        let a = AgentId::new(3, 7);
        assert_eq!(AgentId::from_bits(a.to_bits()), a);
        assert!(AgentId::new(1, 9) < AgentId::new(2, 0));
        assert!(AgentId::new(2, 0) < AgentId::new(2, 1));
    }

    #[test]
    fn agent_keyed_map_serializes_to_json() {
        let mut node = NodeData::new(NodeId::from_seed(1));
        node.thresholds.insert(AgentId::new(0, 1), 0.4);
        let json = serde_json::to_string(&node).unwrap();
        let back: NodeData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.threshold_for(AgentId::new(0, 1), 0.1), 0.4);
        assert_eq!(back.threshold_for(AgentId::new(0, 2), 0.1), 0.1);
    }

    #[test]
    fn flow_history_is_bounded() {
        let mut usage = EdgeUsage::default();
        let agent = AgentId::new(0, 0);
        for i in 0..25 {
            usage.record(&UsageRecord {
                agent,
                magnitude: i as f64,
                cycle: i,
            });
        }
        assert_eq!(usage.traversal_count, 25);
        assert_eq!(usage.flow_history.len(), FLOW_HISTORY_WINDOW);
        assert_eq!(usage.flow_history.front().copied(), Some(15.0));
        assert_eq!(usage.last_used_cycle, Some(24));
        assert_eq!(usage.per_agent[&agent], 25);
    }
}
