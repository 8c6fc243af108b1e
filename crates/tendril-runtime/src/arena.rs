//! Agent arena — slot storage with generational handles.
//!
//! Removing an agent bumps its slot's generation and frees the slot for
//! reuse. Handles from before the removal no longer resolve.

use crate::lifecycle::OutcomeWindow;
use crate::valence::DriveBaselines;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tendril_core::config::EngineConfig;
use tendril_core::stats::RollingStats;
use tendril_core::types::{AgentId, Cycle, LifecycleState, NodeId};

/// Everything the engine tracks about one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub id: AgentId,
    pub state: LifecycleState,
    /// Nodes where the agent holds at least its threshold.
    pub extent: BTreeSet<NodeId>,
    pub baselines: DriveBaselines,
    pub signature: Option<Vec<f32>>,
    /// Quota granted in the most recent cycle.
    pub quota: u32,
    pub outcomes: OutcomeWindow,
    /// Rolling instability readings for the health guard.
    pub instability: RollingStats,
    /// Smoothed instability used for damping and allocation health.
    pub rho_local: f64,
    /// Consecutive cycles spent below the minimum total resource.
    pub empty_streak: u32,
    pub valence_floor: f64,
    pub created_at: Cycle,
    pub dissolved_at: Option<Cycle>,
}

impl AgentState {
    pub fn new(id: AgentId, signature: Option<Vec<f32>>, created_at: Cycle, config: &EngineConfig) -> Self {
        Self {
            id,
            state: LifecycleState::Active,
            extent: BTreeSet::new(),
            baselines: DriveBaselines::new(config.valence.baseline_alpha),
            signature,
            quota: 0,
            outcomes: OutcomeWindow::new(config.lifecycle.outcome_window),
            instability: RollingStats::new(config.lifecycle.instability_alpha),
            rho_local: tendril_core::collaborators::NEUTRAL_INSTABILITY,
            empty_streak: 0,
            valence_floor: config.lifecycle.base_valence_floor,
            created_at,
            dissolved_at: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    agent: Option<AgentState>,
}

/// Generational slot map of agents.
#[derive(Debug, Clone, Default)]
pub struct AgentArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl AgentArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle and store the agent built for it.
    pub fn insert_with(&mut self, build: impl FnOnce(AgentId) -> AgentState) -> AgentId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    agent: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = AgentId::new(index, slot.generation);
        slot.agent = Some(build(id));
        id
    }

    pub fn get(&self, id: AgentId) -> Option<&AgentState> {
        self.slots
            .get(id.index() as usize)
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.agent.as_ref())
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut AgentState> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.agent.as_mut())
    }

    /// Whether `id` points at a slot that has since been reclaimed.
    pub fn is_stale(&self, id: AgentId) -> bool {
        self.slots
            .get(id.index() as usize)
            .is_some_and(|s| s.generation != id.generation() || s.agent.is_none())
    }

    /// Remove an agent and retire its handle.
    pub fn remove(&mut self, id: AgentId) -> Option<AgentState> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let agent = slot.agent.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        Some(agent)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.agent.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live agents in id order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentState> {
        self.slots.iter().filter_map(|s| s.agent.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AgentState> {
        self.slots.iter_mut().filter_map(|s| s.agent.as_mut())
    }

    /// Live agent ids in ascending order.
    pub fn ids(&self) -> Vec<AgentId> {
        self.iter().map(|a| a.id).collect()
    }
}
