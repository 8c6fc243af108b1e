//! Tendril Core Prelude — convenient imports for common usage.
//!
//! ```rust
//! use tendril_core::prelude::*;
//! ```

pub use crate::types::{
    AgentId, Cycle, EdgeData, EdgeId, EdgeUsage, LifecycleState, MergeCandidate, NodeData,
    NodeId, TransportOutcome, UsageRecord,
};

pub use crate::graph::GraphView;

pub use crate::collaborators::{
    FixedInstability, InstabilityEstimator, Neutral, SignatureSource, StaticSignatures,
};

pub use crate::config::{
    BudgetConfig, CoordinatorConfig, EngineConfig, LedgerConfig, LifecycleConfig,
    TransportConfig, ValenceConfig,
};

pub use crate::stats::RollingStats;

pub use crate::error::{
    AgentError, ConfigError, GraphError, InvariantViolation, Result, TendrilError,
};
