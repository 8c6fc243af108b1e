//! Tendril Runtime Prelude — convenient imports for common usage.
//!
//! ```rust
//! use tendril_runtime::prelude::*;
//! ```

// Re-export engine
pub use crate::engine::{
    AgentSnapshot, CycleContext, CycleReport, Degradation, Engine, EngineEvent, EngineSnapshot, EngineStats,
    InjectionOutcome, InjectionTarget, StateChangeCause,
};

// Re-export graph store
pub use crate::topology_impl::PetResourceGraph;

// Re-export ledger
pub use crate::ledger::{ChannelView, CommitSummary, PreparedCommit, ResourceLedger};

// Re-export per-cycle machinery
pub use crate::allocator::{allocate, Allocation, AllocationInput, ModulationFactors};
pub use crate::arena::AgentState;
pub use crate::coordinator::{overlap_ratio, MergeTracker};
pub use crate::lifecycle::{ConvergeReason, LifecycleMonitor, Transition};
pub use crate::scheduler::{schedule, Turn};
pub use crate::selector::{select_edges, Selection};
pub use crate::valence::{Drive, DriveBaselines};

// Re-export core types
pub use tendril_core::prelude::*;
