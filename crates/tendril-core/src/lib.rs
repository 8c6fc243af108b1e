//! # Tendril Core
//!
//! Core traits and types for multi-agent resource propagation.
//!
//! Agents hold a scalar resource at nodes of a weighted directed graph and
//! push it along edges, one quota-bounded turn at a time. This crate holds
//! the pieces shared by every engine implementation:
//!
//! - **types** — node, edge, and generational agent identifiers plus graph data
//! - **graph** — the `GraphView` trait the engine reads and writes through
//! - **collaborators** — optional instability and signature sources
//! - **stats** — the rolling mean/deviation used by baselines and health checks
//! - **semantic** — cosine similarity and centroids over embeddings
//! - **config** — `EngineConfig` with TOML loading and validation
//! - **error** — `TendrilError` and friends
//!
//! ## Quick Start
//!
//! ```rust
//! use tendril_core::prelude::*;
//!
//! // Deterministic ids for tests
//! let node = NodeData::new(NodeId::from_seed(1)).with_affect(0.5, 0.1);
//! assert_eq!(node.threshold_for(AgentId::new(0, 0), 0.1), 0.1);
//!
//! let config = EngineConfig::default();
//! config.validate().unwrap();
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod graph;
pub mod prelude;
pub mod semantic;
pub mod stats;
pub mod types;
