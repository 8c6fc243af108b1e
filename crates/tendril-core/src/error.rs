//! Error types for Tendril operations.
//!
//! Invariant violations abort the current cycle. Nothing the cycle proposed
//! is committed when one is returned.

use crate::types::{AgentId, EdgeId, NodeId};
use thiserror::Error;

/// Result type for Tendril operations.
pub type Result<T> = std::result::Result<T, TendrilError>;

/// Errors that can occur while building or driving an engine.
#[derive(Error, Debug, Clone)]
pub enum TendrilError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Invalid injection: {0}")]
    Injection(String),
}

impl TendrilError {
    /// Invariant violations mean the cycle was rolled back.
    pub fn is_invariant(&self) -> bool {
        matches!(self, TendrilError::Invariant(_))
    }

    pub fn node_not_found(id: NodeId) -> Self {
        TendrilError::Graph(GraphError::NodeNotFound(id))
    }

    pub fn agent_not_found(id: AgentId) -> Self {
        TendrilError::Agent(AgentError::NotFound(id))
    }

    pub fn invalid_config(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        TendrilError::Config(ConfigError::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        })
    }
}

/// Configuration errors.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("{field} out of range: {value} (must be {min}-{max})")]
    OutOfRange {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Broken engine invariants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    #[error("negative resource {value} for {agent} at node {node}")]
    NegativeResource {
        agent: AgentId,
        node: NodeId,
        value: f64,
    },

    #[error("quotas sum to {actual}, budget is {expected}")]
    QuotaSumMismatch { expected: u64, actual: u64 },

    #[error("staged deltas for {agent} do not conserve resource (residual {residual})")]
    ConservationBroken { agent: AgentId, residual: f64 },

    #[error("edge {edge} weight {weight} outside [{floor}, {ceiling}]")]
    WeightOutOfBounds {
        edge: EdgeId,
        weight: f64,
        floor: f64,
        ceiling: f64,
    },

    #[error("non-finite value in {0}")]
    NonFinite(String),
}

/// Graph-related errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("Duplicate node: {0}")]
    DuplicateNode(NodeId),

    #[error("Invalid weight: {0}")]
    InvalidWeight(f64),
}

/// Agent-related errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(AgentId),

    #[error("Agent handle is stale, slot was reclaimed: {0}")]
    Stale(AgentId),
}
