//! # Tendril
//!
//! Multi-agent resource propagation over self-strengthening weighted graphs.
//!
//! Agents are born where resource is injected. Each cycle they spend a
//! quota of turns pushing their surplus along outgoing edges toward
//! neighbours that are still below threshold, and the edges that carry
//! resource into fresh territory grow stronger.
//!
//! ## Quick Start
//!
//! ```rust
//! use tendril::prelude::*;
//!
//! let mut graph = PetResourceGraph::new();
//! let a = graph.add_node(NodeData::new(NodeId::from_seed(1))).unwrap();
//! let b = graph.add_node(NodeData::new(NodeId::from_seed(2))).unwrap();
//! graph.add_edge(a, b, 0.5).unwrap();
//!
//! let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
//! let outcome = engine
//!     .inject_resource(InjectionTarget::New { signature: None }, a, 1.0)
//!     .unwrap();
//! let agent = outcome.agent.unwrap();
//!
//! let report = engine.run_cycle().unwrap();
//! assert!(report.transfers > 0);
//! assert!(engine.active_extent(agent).unwrap().contains(&b));
//! ```
//!
//! ## Architecture
//!
//! - [`tendril_core`] - Shared types, the `GraphView` trait, config and errors
//! - [`tendril_runtime`] - The engine, ledger, allocator, scheduler, scorer,
//!   selector, transport, lifecycle monitor and coordinator
//!
//! ## Cycle
//!
//! | Step | What happens |
//! |------|--------------|
//! | Allocate | Budget split into per-agent quotas, favouring small extents |
//! | Schedule | Quotas interleaved so no agent runs twice while others wait |
//! | Score | Seven drives gated by how surprising each one is right now |
//! | Select | Highest-valence edges until entropy-scaled coverage is met |
//! | Transport | Slack moved into gaps, damped by local instability |
//! | Commit | Every plan applied at once, or none at all |
//! | Lifecycle | Dissolve, converge, resume |
//! | Coordinate | Sustained overlap raises merge candidates |

pub use tendril_core;
pub use tendril_runtime;

pub mod prelude {
    pub use tendril_runtime::prelude::*;
}
