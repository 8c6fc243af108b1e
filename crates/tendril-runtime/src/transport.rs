//! Transport executor — slack/gap transfers with damping and Hebbian wiring.
//!
//! For each selected edge the source gives up part of its slack above
//! threshold and the target receives at most its gap below threshold.
//! Transfers are planned against an agent's private working view and only
//! become real when the engine commits the cycle.
//!
//! Strengthening follows the newly-activating rule: a transfer into a
//! target that was still below threshold adds weight in proportion to the
//! amount moved. Transfers between two already active endpoints never do.

use crate::frontier::THRESHOLD_SLACK;
use crate::ledger::ChannelView;
use crate::valence::Candidate;
use serde::{Deserialize, Serialize};
use tendril_core::graph::GraphView;
use tendril_core::types::{EdgeId, NodeId};

/// Stability damping `α = min(1, ρ_target / max(ρ_local, ε))`.
///
/// Non-finite or missing readings are treated as neutral and yield 1.
pub fn damping_factor(rho_target: f64, rho_local: f64, epsilon: f64) -> f64 {
    if !rho_local.is_finite() || !rho_target.is_finite() {
        return 1.0;
    }
    (rho_target / rho_local.max(epsilon)).clamp(0.0, 1.0)
}

/// Whether each endpoint was at or above threshold before a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationPair {
    pub source_active: bool,
    pub target_active: bool,
}

/// Co-active pairs are not reinforced.
pub fn strengthens(pre: ActivationPair) -> bool {
    !(pre.source_active && pre.target_active)
}

/// New weight after strengthening by `learning_rate * amount`, kept within
/// `[floor, ceiling]`.
pub fn strengthened_weight(current: f64, amount: f64, learning_rate: f64, floor: f64, ceiling: f64) -> f64 {
    let increment = (learning_rate * amount).max(0.0);
    (current + increment).min(ceiling).max(floor)
}

/// A transfer planned during the propose phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlannedTransfer {
    pub edge: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    /// Damped amount, already applied to the working view.
    pub amount: f64,
    pub pre: ActivationPair,
    /// Target reached its threshold through this transfer.
    pub crossed: bool,
}

impl PlannedTransfer {
    pub fn strengthens(&self) -> bool {
        strengthens(self.pre)
    }
}

/// Plan transfers for one turn's selected edges.
///
/// Shares are computed from the pre-turn view of each source: weight share
/// times gap share across that source's selected edges. Each transfer is
/// then capped by the current gap and current slack, so the source never
/// drops below threshold and the target never overshoots it. Transfers
/// that would leave either endpoint holding less than the ledger's prune
/// epsilon are skipped.
pub fn plan_transfers<G: GraphView + ?Sized>(
    graph: &G,
    view: &mut ChannelView<'_>,
    selected: &[Candidate],
    default_threshold: f64,
    alpha: f64,
) -> Vec<PlannedTransfer> {
    let agent = view.agent();
    let prune_epsilon = view.ledger().prune_epsilon();
    let theta = |n: &NodeId| graph.threshold(n, agent, default_threshold);

    // Group by source, keeping first-seen order.
    let mut sources: Vec<NodeId> = Vec::new();
    for c in selected {
        if !sources.contains(&c.source) {
            sources.push(c.source);
        }
    }

    let mut planned = Vec::new();
    for source in sources {
        let group: Vec<&Candidate> = selected.iter().filter(|c| c.source == source).collect();
        let theta_src = theta(&source);
        let slack_pre = (view.get(source) - theta_src).max(0.0);
        if slack_pre <= 0.0 {
            continue;
        }

        let gaps_pre: Vec<f64> = group
            .iter()
            .map(|c| (theta(&c.target) - view.get(c.target)).max(0.0))
            .collect();
        let weight_sum: f64 = group.iter().map(|c| c.weight.max(0.0)).sum();
        let gap_sum: f64 = gaps_pre.iter().sum();
        if weight_sum <= 0.0 || gap_sum <= 0.0 {
            continue;
        }

        for (c, gap_pre) in group.iter().zip(&gaps_pre) {
            if *gap_pre <= 0.0 {
                continue;
            }
            let share = (c.weight.max(0.0) / weight_sum) * (gap_pre / gap_sum);
            let theta_tgt = theta(&c.target);
            let src_now = view.get(source);
            let tgt_now = view.get(c.target);
            let slack_now = (src_now - theta_src).max(0.0);
            let gap_now = (theta_tgt - tgt_now).max(0.0);

            let amount = (slack_pre * share).min(gap_now).min(slack_now) * alpha;
            if !amount.is_finite() || amount <= 0.0 {
                continue;
            }
            // The ledger prunes entries below epsilon on commit.
            let src_after = src_now - amount;
            if tgt_now + amount < prune_epsilon || (src_after > 0.0 && src_after < prune_epsilon) {
                continue;
            }

            let pre = ActivationPair {
                source_active: src_now + THRESHOLD_SLACK >= theta_src,
                target_active: tgt_now + THRESHOLD_SLACK >= theta_tgt,
            };
            view.apply(source, -amount);
            view.apply(c.target, amount);
            let crossed = !pre.target_active && view.get(c.target) + THRESHOLD_SLACK >= theta_tgt;

            planned.push(PlannedTransfer {
                edge: c.edge,
                source,
                target: c.target,
                amount,
                pre,
                crossed,
            });
        }
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ResourceLedger;
    use crate::topology_impl::PetResourceGraph;
    use tendril_core::types::{AgentId, NodeData};

    struct Star {
        graph: PetResourceGraph,
        hub: NodeId,
        leaves: Vec<NodeId>,
        candidates: Vec<Candidate>,
    }

    fn star(weights: &[f64]) -> Star {
        let mut graph = PetResourceGraph::new();
        let hub = graph.add_node(NodeData::new(NodeId::from_seed(0))).unwrap();
        let mut leaves = Vec::new();
        let mut candidates = Vec::new();
        for (i, w) in weights.iter().enumerate() {
            let leaf = graph.add_node(NodeData::new(NodeId::from_seed(i as u64 + 1))).unwrap();
            let edge = graph.add_edge(hub, leaf, *w).unwrap();
            leaves.push(leaf);
            candidates.push(Candidate { edge, source: hub, target: leaf, weight: *w });
        }
        Star { graph, hub, leaves, candidates }
    }

    #[test]
    fn damping() {
        assert_eq!(damping_factor(1.0, 1.0, 1e-9), 1.0);
        assert_eq!(damping_factor(1.0, 0.5, 1e-9), 1.0);
        assert_eq!(damping_factor(1.0, 4.0, 1e-9), 0.25);
        assert_eq!(damping_factor(1.0, f64::NAN, 1e-9), 1.0);
        assert_eq!(damping_factor(1.0, 0.0, 1e-9), 1.0);
    }

    #[test]
    fn shares_follow_weight_and_gap() {
        let s = star(&[3.0, 1.0]);
        let agent = AgentId::new(0, 0);
        let mut ledger = ResourceLedger::new(1e-3, 1e-9);
        ledger.credit(agent, s.hub, 0.5).unwrap();
        let mut view = ChannelView::new(&ledger, agent);

        let planned = plan_transfers(&s.graph, &mut view, &s.candidates, 0.1, 1.0);
        // slack 0.4, equal gaps: 0.4*0.75/2 = 0.15 capped at gap 0.1; 0.4*0.25/2 = 0.05
        assert_eq!(planned.len(), 2);
        assert!((planned[0].amount - 0.1).abs() < 1e-12);
        assert!((planned[1].amount - 0.05).abs() < 1e-12);
        assert!(planned[0].crossed);
        assert!(!planned[1].crossed);
        assert!((view.get(s.hub) - 0.35).abs() < 1e-12);
        assert!(view.get(s.hub) >= 0.1);
    }

    #[test]
    fn damping_scales_amount() {
        let s = star(&[1.0]);
        let agent = AgentId::new(0, 0);
        let mut ledger = ResourceLedger::new(1e-3, 1e-9);
        ledger.credit(agent, s.hub, 1.0).unwrap();
        let mut view = ChannelView::new(&ledger, agent);
        let planned = plan_transfers(&s.graph, &mut view, &s.candidates, 0.1, 0.5);
        assert!((planned[0].amount - 0.05).abs() < 1e-12);
        assert!(!planned[0].crossed);
    }

    #[test]
    fn no_slack_or_no_gap_moves_nothing() {
        let s = star(&[1.0]);
        let agent = AgentId::new(0, 0);
        let mut ledger = ResourceLedger::new(1e-3, 1e-9);
        ledger.credit(agent, s.hub, 0.1).unwrap();
        let mut view = ChannelView::new(&ledger, agent);
        assert!(plan_transfers(&s.graph, &mut view, &s.candidates, 0.1, 1.0).is_empty());

        ledger.credit(agent, s.hub, 1.0).unwrap();
        ledger.credit(agent, s.leaves[0], 0.3).unwrap();
        let mut view = ChannelView::new(&ledger, agent);
        assert!(plan_transfers(&s.graph, &mut view, &s.candidates, 0.1, 1.0).is_empty());
    }

    #[test]
    fn dust_below_prune_epsilon_stays_put() {
        let s = star(&[1.0]);
        let agent = AgentId::new(0, 0);
        let mut ledger = ResourceLedger::new(1e-3, 1e-9);
        ledger.credit(agent, s.hub, 1.0).unwrap();
        let mut view = ChannelView::new(&ledger, agent);
        // Heavy damping shrinks the move to 5e-5, which a commit would prune
        assert!(plan_transfers(&s.graph, &mut view, &s.candidates, 0.1, 0.0005).is_empty());
        assert_eq!(view.get(s.hub), 1.0);
        assert_eq!(view.get(s.leaves[0]), 0.0);
    }

    #[test]
    fn hebbian_asymmetry() {
        let fresh = ActivationPair { source_active: true, target_active: false };
        let coactive = ActivationPair { source_active: true, target_active: true };
        assert!(strengthens(fresh));
        assert!(!strengthens(coactive));

        let w = strengthened_weight(0.5, 0.1, 0.1, 0.01, 1.0);
        assert!(w > 0.5 && w <= 0.5 + 0.01 + 1e-12);
        assert_eq!(strengthened_weight(0.99, 5.0, 0.1, 0.01, 1.0), 1.0);
    }
}
