//! Convergence and lifecycle monitor.
//!
//! Checked per agent once per cycle, after the commit:
//!
//! 1. Zero quota: nothing happens.
//! 2. Dissolution: total resource below the minimum for `dissolution_patience`
//!    consecutive cycles.
//! 3. Health guard: instability above the agent's own rolling mean by more
//!    than the margin converges the agent at once.
//! 4. Convergence: once recent transport has stalled the valence floor is
//!    raised, and an agent whose best frontier edge falls below it converges.
//!
//! Converged agents are only checked for dissolution and for resuming. They
//! take no turns, so their outcome window ages by one entry per cycle
//! instead; once too few outcomes remain the floor drops back to base and
//! any frontier edge above it brings the agent back.

use crate::arena::AgentState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tendril_core::config::LifecycleConfig;
use tendril_core::types::{LifecycleState, TransportOutcome};

/// Bounded ring of recent transport outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeWindow {
    capacity: usize,
    outcomes: VecDeque<TransportOutcome>,
}

impl OutcomeWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            outcomes: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, outcome: TransportOutcome) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
    }

    /// Forget the oldest outcome.
    pub fn age(&mut self) {
        self.outcomes.pop_front();
    }

    pub fn mean_magnitude(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.outcomes.iter().map(|o| o.magnitude).sum::<f64>() / self.outcomes.len() as f64
    }

    /// Fraction of outcomes that activated a new node.
    pub fn activation_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.outcomes.iter().filter(|o| o.newly_activated).count() as f64
            / self.outcomes.len() as f64
    }
}

/// Why an agent converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergeReason {
    HealthGuard,
    LowValence,
}

/// Outcome of one lifecycle check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transition {
    None,
    Dissolved,
    Converged { reason: ConvergeReason, floor: f64 },
    Resumed { floor: f64 },
}

/// Per-cycle readings fed to the monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecycleInput {
    pub quota: u32,
    pub total_resource: f64,
    /// `None` when no estimator answered.
    pub instability: Option<f64>,
    /// Best valence on the agent's current frontier, 0 without a frontier.
    pub max_frontier_valence: f64,
}

#[derive(Debug, Clone)]
pub struct LifecycleMonitor {
    config: LifecycleConfig,
}

impl LifecycleMonitor {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    /// Floor a frontier's best valence must clear to keep an agent active.
    pub fn valence_floor(&self, outcomes: &OutcomeWindow) -> f64 {
        let stalled = outcomes.len() >= self.config.min_outcomes
            && outcomes.mean_magnitude() < self.config.magnitude_epsilon
            && outcomes.activation_rate() < self.config.activation_rate_epsilon;
        if stalled {
            self.config.raised_valence_floor
        } else {
            self.config.base_valence_floor
        }
    }

    /// Run the checks for one agent and apply the resulting state change.
    ///
    /// Clearing ledger channels on dissolution is left to the caller.
    pub fn evaluate(&self, agent: &mut AgentState, input: &LifecycleInput) -> Transition {
        match agent.state {
            LifecycleState::Dissolved => Transition::None,
            LifecycleState::Converged => self.evaluate_converged(agent, input),
            LifecycleState::Active | LifecycleState::PendingMerge => {
                self.evaluate_active(agent, input)
            }
        }
    }

    fn dissolution_due(&self, agent: &mut AgentState, total_resource: f64) -> bool {
        if total_resource < self.config.min_total_resource {
            agent.empty_streak += 1;
        } else {
            agent.empty_streak = 0;
        }
        agent.empty_streak >= self.config.dissolution_patience
    }

    fn evaluate_active(&self, agent: &mut AgentState, input: &LifecycleInput) -> Transition {
        if input.quota == 0 {
            return Transition::None;
        }

        if self.dissolution_due(agent, input.total_resource) {
            agent.state = LifecycleState::Dissolved;
            return Transition::Dissolved;
        }

        let floor = self.valence_floor(&agent.outcomes);
        agent.valence_floor = floor;

        if let Some(x) = input.instability.filter(|x| x.is_finite()) {
            let tripped = agent.instability.has_history()
                && x > agent.instability.mean() + self.config.health_margin;
            agent.instability.observe(x);
            if tripped {
                agent.state = LifecycleState::Converged;
                return Transition::Converged {
                    reason: ConvergeReason::HealthGuard,
                    floor,
                };
            }
        }

        if floor > self.config.base_valence_floor && input.max_frontier_valence < floor {
            agent.state = LifecycleState::Converged;
            return Transition::Converged {
                reason: ConvergeReason::LowValence,
                floor,
            };
        }
        Transition::None
    }

    fn evaluate_converged(&self, agent: &mut AgentState, input: &LifecycleInput) -> Transition {
        if self.dissolution_due(agent, input.total_resource) {
            agent.state = LifecycleState::Dissolved;
            return Transition::Dissolved;
        }
        if let Some(x) = input.instability.filter(|x| x.is_finite()) {
            agent.instability.observe(x);
        }
        agent.outcomes.age();
        let floor = self.valence_floor(&agent.outcomes);
        agent.valence_floor = floor;
        if input.max_frontier_valence > floor {
            agent.state = LifecycleState::Active;
            return Transition::Resumed { floor };
        }
        Transition::None
    }
}
