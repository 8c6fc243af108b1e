//! # Tendril Runtime
//!
//! The propagation engine, its resource ledger, and the per-cycle machinery.
//!
//! The engine owns a graph and a set of agents. Every cycle it splits a
//! fixed budget of turns between agents, lets each agent plan transfers
//! against the committed state, then commits every plan at once. Agents
//! that run dry dissolve; agents that stop finding anything worth doing
//! converge; agents that keep covering the same ground are flagged for
//! merging.

pub mod topology_impl;
pub mod ledger;
pub mod arena;
pub mod allocator;
pub mod scheduler;
pub mod valence;
pub mod selector;
pub mod frontier;
pub mod transport;
pub mod lifecycle;
pub mod coordinator;
pub mod engine;
pub mod prelude;
