//! External collaborators consulted at cycle boundaries.
//!
//! Both are optional. When a collaborator has nothing to say the engine
//! falls back to neutral values and reports a degradation instead of
//! failing the cycle.

use crate::types::{AgentId, NodeId};

/// Instability reading used when no estimator answers.
pub const NEUTRAL_INSTABILITY: f64 = 1.0;

/// Estimates local instability (ρ) over a region of the graph.
///
/// Values near 1.0 are neutral. Larger values dampen transport and lower
/// the agent's allocation weight.
pub trait InstabilityEstimator: Send + Sync {
    fn estimate_local_instability(&self, region: &[NodeId]) -> Option<f64>;
}

/// Source of identity, goal, and stimulus signatures.
pub trait SignatureSource: Send + Sync {
    /// Identity signature of an agent, if one is known.
    fn identity_signature(&self, _agent: AgentId) -> Option<Vec<f32>> {
        None
    }

    /// Current goal signature, if any.
    fn goal_signature(&self) -> Option<Vec<f32>> {
        None
    }

    /// Embeddings of recent stimuli, newest last.
    fn recent_stimuli(&self) -> Vec<Vec<f32>> {
        Vec::new()
    }
}

/// Collaborator that never answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Neutral;

impl InstabilityEstimator for Neutral {
    fn estimate_local_instability(&self, _region: &[NodeId]) -> Option<f64> {
        None
    }
}

impl SignatureSource for Neutral {}

/// Instability estimator returning a fixed reading.
#[derive(Debug, Clone, Copy)]
pub struct FixedInstability(pub f64);

impl InstabilityEstimator for FixedInstability {
    fn estimate_local_instability(&self, _region: &[NodeId]) -> Option<f64> {
        Some(self.0)
    }
}

/// Signature source backed by plain values.
#[derive(Debug, Clone, Default)]
pub struct StaticSignatures {
    pub goal: Option<Vec<f32>>,
    pub stimuli: Vec<Vec<f32>>,
    pub identities: std::collections::HashMap<AgentId, Vec<f32>>,
}

impl SignatureSource for StaticSignatures {
    fn identity_signature(&self, agent: AgentId) -> Option<Vec<f32>> {
        self.identities.get(&agent).cloned()
    }

    fn goal_signature(&self) -> Option<Vec<f32>> {
        self.goal.clone()
    }

    fn recent_stimuli(&self) -> Vec<Vec<f32>> {
        self.stimuli.clone()
    }
}
