//! Resource ledger — per-(agent, node) resource with staged commits.
//!
//! Transfers are staged during a cycle and applied together at the
//! barrier. A commit either applies every staged delta or none of them.
//! Injections are the only way resource enters the ledger, and they credit
//! directly.

use std::collections::{BTreeMap, HashMap};
use tendril_core::error::{InvariantViolation, Result, TendrilError};
use tendril_core::types::{AgentId, NodeId};
use tracing::debug;

/// Summary of a successful commit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CommitSummary {
    pub deltas: usize,
    pub pruned: usize,
}

/// Staged deltas that passed validation, resolved to final values.
#[derive(Debug)]
#[must_use = "dropping a prepared commit discards the staged deltas"]
pub struct PreparedCommit {
    updates: Vec<(AgentId, NodeId, f64)>,
}

impl PreparedCommit {
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ResourceLedger {
    channels: HashMap<AgentId, HashMap<NodeId, f64>>,
    staged: BTreeMap<(AgentId, NodeId), f64>,
    prune_epsilon: f64,
    tolerance: f64,
}

impl ResourceLedger {
    pub fn new(prune_epsilon: f64, tolerance: f64) -> Self {
        Self {
            channels: HashMap::new(),
            staged: BTreeMap::new(),
            prune_epsilon,
            tolerance,
        }
    }

    /// Values below this are dropped on write.
    pub fn prune_epsilon(&self) -> f64 {
        self.prune_epsilon
    }

    /// Committed resource; absent entries read as 0.
    pub fn get(&self, agent: AgentId, node: NodeId) -> f64 {
        self.channels
            .get(&agent)
            .and_then(|m| m.get(&node))
            .copied()
            .unwrap_or(0.0)
    }

    /// Total committed resource at a node across agents.
    pub fn total(&self, node: NodeId) -> f64 {
        self.channels
            .values()
            .filter_map(|m| m.get(&node))
            .sum()
    }

    /// Resource at `node` held by everyone except `agent`.
    pub fn total_excluding(&self, node: NodeId, agent: AgentId) -> f64 {
        self.channels
            .iter()
            .filter(|(a, _)| **a != agent)
            .filter_map(|(_, m)| m.get(&node))
            .sum()
    }

    /// Total resource an agent holds across all nodes.
    pub fn agent_total(&self, agent: AgentId) -> f64 {
        self.channels
            .get(&agent)
            .map(|m| m.values().sum())
            .unwrap_or(0.0)
    }

    /// All (node, amount) entries of an agent, in no particular order.
    pub fn agent_channels(&self, agent: AgentId) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.channels
            .get(&agent)
            .into_iter()
            .flat_map(|m| m.iter().map(|(n, v)| (*n, *v)))
    }

    /// Sum over every entry in the ledger.
    pub fn grand_total(&self) -> f64 {
        self.channels.values().flat_map(|m| m.values()).sum()
    }

    /// Number of stored entries.
    pub fn entry_count(&self) -> usize {
        self.channels.values().map(|m| m.len()).sum()
    }

    /// Stage a delta for the next commit. Deltas on the same channel add up.
    pub fn stage_delta(&mut self, agent: AgentId, node: NodeId, delta: f64) -> Result<()> {
        if !delta.is_finite() {
            return Err(InvariantViolation::NonFinite(format!(
                "staged delta for {agent} at {node}"
            ))
            .into());
        }
        *self.staged.entry((agent, node)).or_insert(0.0) += delta;
        Ok(())
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Drop everything staged without applying it.
    pub fn discard_staged(&mut self) {
        self.staged.clear();
    }

    /// Apply all staged deltas atomically.
    ///
    /// Fails without touching committed state if any agent's staged deltas
    /// do not sum to zero or if any entry would go negative. Staged deltas
    /// are dropped either way.
    pub fn commit(&mut self) -> Result<CommitSummary> {
        let prepared = self.prepare_commit()?;
        Ok(self.apply_commit(prepared))
    }

    /// Validate and take the staged deltas without applying them.
    ///
    /// The returned commit cannot fail to apply. Dropping it discards the
    /// staged work and leaves committed state as it was.
    pub fn prepare_commit(&mut self) -> Result<PreparedCommit> {
        let staged = std::mem::take(&mut self.staged);

        let mut residuals: BTreeMap<AgentId, f64> = BTreeMap::new();
        for ((agent, _), delta) in &staged {
            *residuals.entry(*agent).or_insert(0.0) += delta;
        }
        for (agent, residual) in residuals {
            if residual.abs() > self.tolerance {
                return Err(InvariantViolation::ConservationBroken { agent, residual }.into());
            }
        }

        let mut updates = Vec::with_capacity(staged.len());
        for ((agent, node), delta) in staged {
            let value = self.get(agent, node) + delta;
            if value < -self.tolerance {
                return Err(TendrilError::Invariant(InvariantViolation::NegativeResource {
                    agent,
                    node,
                    value,
                }));
            }
            updates.push((agent, node, value));
        }
        Ok(PreparedCommit { updates })
    }

    /// Write a validated commit.
    pub fn apply_commit(&mut self, prepared: PreparedCommit) -> CommitSummary {
        let mut summary = CommitSummary {
            deltas: prepared.updates.len(),
            pruned: 0,
        };
        for (agent, node, value) in prepared.updates {
            if self.write(agent, node, value) {
                summary.pruned += 1;
            }
        }
        debug!(deltas = summary.deltas, pruned = summary.pruned, "ledger commit");
        summary
    }

    /// Add resource directly. Used for injections at cycle boundaries.
    pub fn credit(&mut self, agent: AgentId, node: NodeId, amount: f64) -> Result<()> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TendrilError::Injection(format!(
                "credit amount must be non-negative and finite, got {amount}"
            )));
        }
        let value = self.get(agent, node) + amount;
        self.write(agent, node, value);
        Ok(())
    }

    /// Remove every entry of an agent, returning how much it held.
    pub fn clear_agent(&mut self, agent: AgentId) -> f64 {
        self.channels
            .remove(&agent)
            .map(|m| m.values().sum())
            .unwrap_or(0.0)
    }

    /// Store a value, pruning it when below epsilon. Returns true if pruned.
    fn write(&mut self, agent: AgentId, node: NodeId, value: f64) -> bool {
        if value < self.prune_epsilon {
            if let Some(m) = self.channels.get_mut(&agent) {
                m.remove(&node);
                if m.is_empty() {
                    self.channels.remove(&agent);
                }
            }
            true
        } else {
            self.channels.entry(agent).or_default().insert(node, value);
            false
        }
    }
}

/// One agent's private view during proposal: committed values plus its own
/// not-yet-committed deltas.
#[derive(Debug, Clone)]
pub struct ChannelView<'a> {
    ledger: &'a ResourceLedger,
    agent: AgentId,
    overlay: HashMap<NodeId, f64>,
}

impl<'a> ChannelView<'a> {
    pub fn new(ledger: &'a ResourceLedger, agent: AgentId) -> Self {
        Self {
            ledger,
            agent,
            overlay: HashMap::new(),
        }
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }

    pub fn ledger(&self) -> &'a ResourceLedger {
        self.ledger
    }

    pub fn get(&self, node: NodeId) -> f64 {
        self.ledger.get(self.agent, node) + self.overlay.get(&node).copied().unwrap_or(0.0)
    }

    pub fn apply(&mut self, node: NodeId, delta: f64) {
        *self.overlay.entry(node).or_insert(0.0) += delta;
    }

    /// Nodes where this view holds a positive amount, sorted.
    pub fn held_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .ledger
            .agent_channels(self.agent)
            .map(|(n, _)| n)
            .chain(self.overlay.keys().copied())
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes.retain(|n| self.get(*n) > 0.0);
        nodes
    }
}
