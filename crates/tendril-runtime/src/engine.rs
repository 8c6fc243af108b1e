//! Engine — the cycle driver.
//!
//! The engine owns the graph, the ledger, and every agent. Each cycle:
//! 1. Instability readings and signatures are gathered at the boundary
//! 2. The stride budget is split into quotas and interleaved into turns
//! 3. Agents propose transfers in parallel against the committed state
//! 4. Proposals are staged in turn order and committed in one step
//! 5. Extents are recomputed and lifecycle checks run
//! 6. Overlap between agents is tracked for merge signals
//! 7. The cycle counter advances
//!
//! If anything fails before the ledger commit, nothing the cycle proposed
//! is applied and the engine is left exactly as it was.

use crate::allocator::{allocate, normalize_modulation, AllocationInput, ModulationFactors};
use crate::arena::{AgentArena, AgentState};
use crate::coordinator::{overlap_ratio, MergeTracker};
use crate::frontier::{committed_extent, frontier_candidates, view_extent, ExtentProfile};
use crate::ledger::{ChannelView, ResourceLedger};
use crate::lifecycle::{ConvergeReason, LifecycleInput, LifecycleMonitor, Transition};
use crate::scheduler::{schedule, Turn};
use crate::selector::select_edges;
use crate::topology_impl::PetResourceGraph;
use crate::transport::{damping_factor, plan_transfers, strengthened_weight, PlannedTransfer};
use crate::valence::{score_frontier, Candidate, Drive, DriveBaselines, FrontierScore, ScoringContext};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tendril_core::collaborators::{
    InstabilityEstimator, Neutral, SignatureSource, NEUTRAL_INSTABILITY,
};
use tendril_core::config::EngineConfig;
use tendril_core::error::{AgentError, GraphError, InvariantViolation, Result, TendrilError};
use tendril_core::graph::GraphView;
use tendril_core::semantic::cosine_similarity;
use tendril_core::types::*;
use tracing::{debug, info, instrument, warn};

/// Who receives an injection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InjectionTarget {
    /// Create a new agent if the amount reaches the node's threshold.
    New { signature: Option<Vec<f32>> },
    /// Re-energize an existing agent, reviving it if dissolved.
    Existing(AgentId),
}

/// What an injection did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InjectionOutcome {
    /// Receiving agent, `None` when the amount was below threshold.
    pub agent: Option<AgentId>,
    pub created: bool,
    pub reactivated: bool,
}

/// Why an agent changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StateChangeCause {
    ResourceExhausted,
    HealthGuard,
    LowValence,
    ValenceRecovered,
    SustainedOverlap,
    OverlapEnded,
    Reinjected,
}

/// Event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineEvent {
    /// An injection created an agent.
    AgentCreated { agent: AgentId, node: NodeId, amount: f64 },
    /// An injection credited an existing agent.
    Injected { agent: AgentId, node: NodeId, amount: f64 },
    /// An injection was too small to create an agent.
    InjectionBelowThreshold { node: NodeId, amount: f64, threshold: f64 },
    /// An agent moved between lifecycle states.
    StateChanged {
        agent: AgentId,
        from: LifecycleState,
        to: LifecycleState,
        cause: StateChangeCause,
    },
    /// Two agents overlapped for long enough to consider merging.
    MergeCandidate(MergeCandidate),
    /// A dissolved agent's slot was freed.
    AgentReclaimed { agent: AgentId },
    /// A cycle completed.
    CycleComplete {
        cycle: Cycle,
        active: usize,
        transfers: usize,
        moved: f64,
    },
}

/// Collaborator data that was missing and replaced by a neutral default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Degradation {
    /// No instability estimate; damping ran neutral.
    InstabilityUnavailable { agent: AgentId },
    /// A drive had no data and was gated out.
    DriveUnavailable { agent: AgentId, drive: Drive },
    /// The graph refused a usage record after the cycle committed.
    UsageUnrecorded { edge: EdgeId },
}

/// Inputs gathered at the start of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleContext {
    pub cycle: Cycle,
    /// Agents competing for the budget, in id order.
    pub eligible: Vec<AgentId>,
    /// Instability reading per live agent, `None` when unavailable.
    pub instability: BTreeMap<AgentId, Option<f64>>,
}

/// What happened during one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: Cycle,
    pub context: CycleContext,
    pub quotas: BTreeMap<AgentId, u32>,
    pub turns: usize,
    pub transfers: usize,
    pub resource_moved: f64,
    pub strengthened_edges: usize,
    pub events: Vec<EngineEvent>,
    pub degradations: Vec<Degradation>,
}

impl CycleReport {
    fn new(cycle: Cycle) -> Self {
        Self {
            cycle,
            context: CycleContext::default(),
            quotas: BTreeMap::new(),
            turns: 0,
            transfers: 0,
            resource_moved: 0.0,
            strengthened_edges: 0,
            events: Vec::new(),
            degradations: Vec::new(),
        }
    }

    /// Merge candidates raised this cycle.
    pub fn merge_candidates(&self) -> impl Iterator<Item = &MergeCandidate> {
        self.events.iter().filter_map(|e| match e {
            EngineEvent::MergeCandidate(c) => Some(c),
            _ => None,
        })
    }
}

/// Statistics about the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub cycle: Cycle,
    pub agents_total: usize,
    pub active: usize,
    pub converged: usize,
    pub dissolved: usize,
    pub pending_merge: usize,
    pub total_created: usize,
    pub total_dissolved: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub total_resource: f64,
    pub ledger_entries: usize,
}

/// A serializable snapshot of an agent's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub state: LifecycleState,
    pub extent: Vec<NodeId>,
    pub total_resource: f64,
    pub quota: u32,
    pub valence_floor: f64,
    pub rho_local: f64,
    pub created_at: Cycle,
}

/// A complete serializable snapshot of the engine at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub cycle: Cycle,
    pub agents: Vec<AgentSnapshot>,
    pub stats: EngineStats,
}

/// One agent's read-only inputs for the propose phase.
struct ProposalJob<'a> {
    state: &'a AgentState,
    quota: u32,
    alpha: f64,
    identity: Option<&'a [f32]>,
}

#[derive(Debug, Clone)]
struct TurnPlan {
    transfers: Vec<PlannedTransfer>,
    outcome: TransportOutcome,
}

#[derive(Debug, Clone)]
struct AgentProposal {
    agent: AgentId,
    turns: Vec<TurnPlan>,
    baselines: DriveBaselines,
    missing: BTreeSet<Drive>,
}

#[derive(Debug, Default)]
struct StagedCycle {
    weights: BTreeMap<EdgeId, f64>,
    usage: Vec<(EdgeId, UsageRecord)>,
    transfers: usize,
    moved: f64,
}

/// The propagation engine.
pub struct Engine<G: GraphView = PetResourceGraph> {
    graph: G,
    ledger: ResourceLedger,
    agents: AgentArena,
    config: EngineConfig,
    monitor: LifecycleMonitor,
    merges: MergeTracker,
    instability: Box<dyn InstabilityEstimator>,
    signatures: Box<dyn SignatureSource>,
    cycle: Cycle,
    event_history: Vec<(Cycle, EngineEvent)>,
    total_created: usize,
    total_dissolved: usize,
}

impl<G: GraphView + Sync> Engine<G> {
    /// Build an engine over `graph`. The config is validated and every
    /// edge weight must already sit within the configured bounds.
    pub fn new(graph: G, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        check_weight_bounds(&graph, &config)?;

        Ok(Self {
            graph,
            ledger: ResourceLedger::new(config.ledger.prune_epsilon, config.ledger.tolerance),
            agents: AgentArena::new(),
            monitor: LifecycleMonitor::new(config.lifecycle.clone()),
            merges: MergeTracker::new(config.coordinator.clone()),
            config,
            instability: Box::new(Neutral),
            signatures: Box::new(Neutral),
            cycle: 0,
            event_history: Vec::new(),
            total_created: 0,
            total_dissolved: 0,
        })
    }

    pub fn with_instability_estimator(mut self, estimator: impl InstabilityEstimator + 'static) -> Self {
        self.instability = Box::new(estimator);
        self
    }

    pub fn with_signature_source(mut self, source: impl SignatureSource + 'static) -> Self {
        self.signatures = Box::new(source);
        self
    }

    /// Add resource at `node`. The only way agents come into existence.
    ///
    /// A new agent is created only when `amount` reaches the node's
    /// threshold; smaller amounts return `Ok` with no agent. Injecting into
    /// a dissolved agent revives it.
    pub fn inject_resource(
        &mut self,
        target: InjectionTarget,
        node: NodeId,
        amount: f64,
    ) -> Result<InjectionOutcome> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(TendrilError::Injection(format!(
                "amount must be positive and finite, got {amount}"
            )));
        }
        if self.graph.get_node(&node).is_none() {
            return Err(TendrilError::node_not_found(node));
        }
        let default_threshold = self.config.transport.default_threshold;

        match target {
            InjectionTarget::New { signature } => {
                let threshold = default_threshold;
                if amount < threshold {
                    debug!(%node, amount, threshold, "injection below threshold");
                    self.record(EngineEvent::InjectionBelowThreshold {
                        node,
                        amount,
                        threshold,
                    });
                    return Ok(InjectionOutcome {
                        agent: None,
                        created: false,
                        reactivated: false,
                    });
                }

                let cycle = self.cycle;
                let config = &self.config;
                let id = self
                    .agents
                    .insert_with(|id| AgentState::new(id, signature, cycle, config));
                self.ledger.credit(id, node, amount)?;
                let extent = committed_extent(&self.ledger, id, &self.graph, default_threshold);
                let from_source = self.signatures.identity_signature(id);
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.extent = extent;
                    if agent.signature.is_none() {
                        agent.signature = from_source;
                    }
                }
                self.total_created += 1;
                info!(agent = %id, %node, amount, "agent created");
                self.record(EngineEvent::AgentCreated {
                    agent: id,
                    node,
                    amount,
                });
                Ok(InjectionOutcome {
                    agent: Some(id),
                    created: true,
                    reactivated: false,
                })
            }
            InjectionTarget::Existing(id) => {
                if self.agents.is_stale(id) {
                    return Err(AgentError::Stale(id).into());
                }
                if self.agents.get(id).is_none() {
                    return Err(TendrilError::agent_not_found(id));
                }
                self.ledger.credit(id, node, amount)?;
                let extent = committed_extent(&self.ledger, id, &self.graph, default_threshold);

                let mut revived = None;
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.outcomes.clear();
                    agent.empty_streak = 0;
                    agent.extent = extent;
                    if agent.state.is_dissolved() {
                        revived = Some(agent.state);
                        agent.state = LifecycleState::Active;
                        agent.dissolved_at = None;
                    }
                }

                self.record(EngineEvent::Injected {
                    agent: id,
                    node,
                    amount,
                });
                if let Some(from) = revived {
                    info!(agent = %id, "agent revived by injection");
                    self.record(EngineEvent::StateChanged {
                        agent: id,
                        from,
                        to: LifecycleState::Active,
                        cause: StateChangeCause::Reinjected,
                    });
                }
                Ok(InjectionOutcome {
                    agent: Some(id),
                    created: false,
                    reactivated: revived.is_some(),
                })
            }
        }
    }

    /// Run one full cycle.
    ///
    /// On error the cycle is rolled back: the ledger, graph, and agents are
    /// unchanged and the cycle counter does not advance. Edge weights are
    /// written before the ledger commit and restored if any write fails.
    /// Usage records are written last; a refused one is reported as
    /// [`Degradation::UsageUnrecorded`] and does not fail the cycle.
    #[instrument(skip_all, fields(cycle = self.cycle + 1))]
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        check_weight_bounds(&self.graph, &self.config)?;
        let cycle = self.cycle + 1;
        let mut report = CycleReport::new(cycle);
        let eps = self.config.transport.damping_epsilon;
        let rho_target = self.config.transport.rho_target;
        let rho_alpha = self.config.transport.rho_alpha;

        // 1. Boundary readings
        let live: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|a| !a.state.is_dissolved())
            .map(|a| a.id)
            .collect();

        let mut readings: BTreeMap<AgentId, Option<f64>> = BTreeMap::new();
        let mut rho_next: BTreeMap<AgentId, f64> = BTreeMap::new();
        let mut identities: BTreeMap<AgentId, Option<Vec<f32>>> = BTreeMap::new();
        for agent in self.agents.iter().filter(|a| !a.state.is_dissolved()) {
            let region: Vec<NodeId> = agent.extent.iter().copied().collect();
            let reading = self
                .instability
                .estimate_local_instability(&region)
                .filter(|x| x.is_finite() && *x >= 0.0);
            match reading {
                Some(x) => {
                    rho_next.insert(agent.id, agent.rho_local + rho_alpha * (x - agent.rho_local));
                }
                None => {
                    report
                        .degradations
                        .push(Degradation::InstabilityUnavailable { agent: agent.id });
                }
            }
            readings.insert(agent.id, reading);
            identities.insert(
                agent.id,
                self.signatures
                    .identity_signature(agent.id)
                    .or_else(|| agent.signature.clone()),
            );
        }
        let context = CycleContext {
            cycle,
            eligible: self
                .agents
                .iter()
                .filter(|a| a.state.is_schedulable())
                .map(|a| a.id)
                .collect(),
            instability: readings,
        };
        let goal = self.signatures.goal_signature();
        let stimuli = self.signatures.recent_stimuli();
        let rho_for = |id: AgentId| rho_next.get(&id).copied().unwrap_or(NEUTRAL_INSTABILITY);

        // 2. Allocation and schedule
        let mut inputs: Vec<AllocationInput> = context
            .eligible
            .iter()
            .filter_map(|id| self.agents.get(*id))
            .map(|a| AllocationInput {
                agent: a.id,
                extent_size: a.extent.len(),
                factors: ModulationFactors {
                    urgency: urgency(identities.get(&a.id).and_then(|s| s.as_deref()), &stimuli),
                    reachability: 1.0,
                    health: 1.0 / rho_for(a.id).max(eps),
                },
            })
            .collect();
        normalize_modulation(&mut inputs);
        let allocation = allocate(self.config.budget.stride_budget, &inputs)?;
        let turns = schedule(&allocation);
        report.quotas = allocation.iter().collect();
        report.turns = turns.len();

        // 3. Propose in parallel against the committed state
        let proposals: Vec<AgentProposal> = {
            let jobs: Vec<ProposalJob<'_>> = allocation
                .iter()
                .filter(|(_, q)| *q > 0)
                .filter_map(|(id, quota)| {
                    let state = self.agents.get(id)?;
                    Some(ProposalJob {
                        state,
                        quota,
                        alpha: damping_factor(rho_target, rho_for(id), eps),
                        identity: identities.get(&id).and_then(|s| s.as_deref()),
                    })
                })
                .collect();
            let graph = &self.graph;
            let ledger = &self.ledger;
            let config = &self.config;
            let goal = goal.as_deref();
            jobs.par_iter()
                .map(|job| propose(graph, ledger, config, goal, job))
                .collect()
        };

        // 4. Stage in turn order and commit
        let staged = match self.stage_proposals(&turns, &proposals, cycle) {
            Ok(staged) => staged,
            Err(e) => {
                self.ledger.discard_staged();
                warn!(error = %e, "cycle rolled back before commit");
                return Err(e);
            }
        };
        let prepared = match self.ledger.prepare_commit() {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "cycle rolled back at commit");
                return Err(e);
            }
        };
        if let Err(e) = self.write_weights(&staged.weights) {
            warn!(error = %e, "cycle rolled back at weight update");
            return Err(e);
        }
        self.ledger.apply_commit(prepared);
        for (edge, usage) in &staged.usage {
            if let Err(e) = self.graph.record_edge_usage(*edge, *usage) {
                warn!(edge = %edge, error = %e, "edge usage not recorded");
                report
                    .degradations
                    .push(Degradation::UsageUnrecorded { edge: *edge });
            }
        }
        report.transfers = staged.transfers;
        report.resource_moved = staged.moved;
        report.strengthened_edges = staged.weights.len();

        for proposal in proposals {
            if let Some(agent) = self.agents.get_mut(proposal.agent) {
                agent.baselines = proposal.baselines;
                for plan in &proposal.turns {
                    agent.outcomes.push(plan.outcome);
                }
            }
            for drive in proposal.missing {
                report.degradations.push(Degradation::DriveUnavailable {
                    agent: proposal.agent,
                    drive,
                });
            }
        }
        for id in &live {
            if let Some(agent) = self.agents.get_mut(*id) {
                agent.quota = allocation.get(*id);
                if let Some(rho) = rho_next.get(id) {
                    agent.rho_local = *rho;
                }
            }
        }

        // 5. Extents and lifecycle
        let default_threshold = self.config.transport.default_threshold;
        for id in &live {
            let extent = committed_extent(&self.ledger, *id, &self.graph, default_threshold);
            let Some(agent) = self.agents.get(*id) else {
                continue;
            };
            let peak = peak_valence(
                &self.graph,
                &self.ledger,
                &self.config,
                agent,
                &extent,
                goal.as_deref(),
                identities.get(id).and_then(|s| s.as_deref()),
            );
            let input = LifecycleInput {
                quota: allocation.get(*id),
                total_resource: self.ledger.agent_total(*id),
                instability: context.instability.get(id).copied().flatten(),
                max_frontier_valence: peak,
            };

            let Some(agent) = self.agents.get_mut(*id) else {
                continue;
            };
            agent.extent = extent;
            let from = agent.state;
            let transition = self.monitor.evaluate(agent, &input);
            let to = agent.state;

            let cause = match transition {
                Transition::None => continue,
                Transition::Dissolved => {
                    agent.dissolved_at = Some(cycle);
                    agent.extent.clear();
                    let cleared = self.ledger.clear_agent(*id);
                    self.merges.forget(*id);
                    self.total_dissolved += 1;
                    info!(agent = %id, cleared, "agent dissolved");
                    StateChangeCause::ResourceExhausted
                }
                Transition::Converged { reason, floor } => {
                    info!(agent = %id, ?reason, floor, peak, "agent converged");
                    match reason {
                        ConvergeReason::HealthGuard => StateChangeCause::HealthGuard,
                        ConvergeReason::LowValence => StateChangeCause::LowValence,
                    }
                }
                Transition::Resumed { floor } => {
                    debug!(agent = %id, floor, peak, "agent resumed");
                    StateChangeCause::ValenceRecovered
                }
            };
            report.events.push(EngineEvent::StateChanged {
                agent: *id,
                from,
                to,
                cause,
            });
        }

        // 6. Overlap tracking
        let include_converged = self.config.coordinator.include_converged;
        let observation = {
            let extents: Vec<(AgentId, &BTreeSet<NodeId>)> = self
                .agents
                .iter()
                .filter(|a| {
                    a.state.is_schedulable()
                        || (include_converged && a.state == LifecycleState::Converged)
                })
                .map(|a| (a.id, &a.extent))
                .collect();
            self.merges.observe(&extents)
        };
        for candidate in &observation.new_candidates {
            info!(a = %candidate.a, b = %candidate.b, ratio = candidate.overlap_ratio, "merge candidate");
            report.events.push(EngineEvent::MergeCandidate(*candidate));
        }
        for agent in self.agents.iter_mut() {
            let pending = observation.pending.contains(&agent.id);
            let (to, cause) = match agent.state {
                LifecycleState::Active if pending => {
                    (LifecycleState::PendingMerge, StateChangeCause::SustainedOverlap)
                }
                LifecycleState::PendingMerge if !pending => {
                    (LifecycleState::Active, StateChangeCause::OverlapEnded)
                }
                _ => continue,
            };
            report.events.push(EngineEvent::StateChanged {
                agent: agent.id,
                from: agent.state,
                to,
                cause,
            });
            agent.state = to;
        }

        // Reclaim long-dissolved slots
        let reclaim_after = self.config.lifecycle.reclaim_after_cycles;
        if reclaim_after > 0 {
            let expired: Vec<AgentId> = self
                .agents
                .iter()
                .filter(|a| {
                    a.state.is_dissolved()
                        && a.dissolved_at.is_some_and(|d| cycle.saturating_sub(d) >= reclaim_after)
                })
                .map(|a| a.id)
                .collect();
            for id in expired {
                self.agents.remove(id);
                self.graph.forget_agent(id);
                debug!(agent = %id, "agent slot reclaimed");
                report.events.push(EngineEvent::AgentReclaimed { agent: id });
            }
        }

        if !report.degradations.is_empty() {
            warn!(
                count = report.degradations.len(),
                "cycle ran degraded, neutral defaults used"
            );
        }

        // 7. Advance
        report.context = context;
        let active = self
            .agents
            .iter()
            .filter(|a| a.state.is_schedulable())
            .count();
        report.events.push(EngineEvent::CycleComplete {
            cycle,
            active,
            transfers: report.transfers,
            moved: report.resource_moved,
        });
        self.cycle = cycle;
        for event in &report.events {
            self.event_history.push((cycle, event.clone()));
        }
        debug!(
            turns = report.turns,
            transfers = report.transfers,
            moved = report.resource_moved,
            degradations = report.degradations.len(),
            "cycle complete"
        );
        Ok(report)
    }

    /// Run `cycles` cycles, stopping at the first error.
    pub fn run(&mut self, cycles: u64) -> Result<Vec<CycleReport>> {
        let mut reports = Vec::with_capacity(cycles as usize);
        for _ in 0..cycles {
            reports.push(self.run_cycle()?);
        }
        Ok(reports)
    }

    /// Write new edge weights, restoring the earlier ones if any write fails.
    fn write_weights(&mut self, weights: &BTreeMap<EdgeId, f64>) -> Result<()> {
        let previous: Vec<(EdgeId, f64)> = weights
            .keys()
            .map(|edge| {
                self.graph
                    .edge(*edge)
                    .map(|e| (*edge, e.weight))
                    .ok_or_else(|| GraphError::EdgeNotFound(*edge).into())
            })
            .collect::<Result<_>>()?;

        for (done, (edge, weight)) in weights.iter().enumerate() {
            if let Err(e) = self.graph.update_edge_weight(*edge, *weight) {
                for (edge, old) in previous[..done].iter().rev() {
                    if let Err(undo) = self.graph.update_edge_weight(*edge, *old) {
                        warn!(edge = %edge, error = %undo, "edge weight not restored");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn stage_proposals(
        &mut self,
        turns: &[Turn],
        proposals: &[AgentProposal],
        cycle: Cycle,
    ) -> Result<StagedCycle> {
        let t = &self.config.transport;
        let by_agent: HashMap<AgentId, &AgentProposal> =
            proposals.iter().map(|p| (p.agent, p)).collect();
        let mut staged = StagedCycle::default();

        for turn in turns {
            let Some(plan) = by_agent
                .get(&turn.agent)
                .and_then(|p| p.turns.get(turn.index as usize))
            else {
                continue;
            };
            for transfer in &plan.transfers {
                let current = match staged.weights.get(&transfer.edge) {
                    Some(w) => *w,
                    None => {
                        self.graph
                            .edge(transfer.edge)
                            .ok_or(GraphError::EdgeNotFound(transfer.edge))?
                            .weight
                    }
                };
                self.ledger
                    .stage_delta(turn.agent, transfer.source, -transfer.amount)?;
                self.ledger
                    .stage_delta(turn.agent, transfer.target, transfer.amount)?;
                staged.usage.push((
                    transfer.edge,
                    UsageRecord {
                        agent: turn.agent,
                        magnitude: transfer.amount,
                        cycle,
                    },
                ));
                staged.transfers += 1;
                staged.moved += transfer.amount;

                if transfer.strengthens() {
                    let weight = strengthened_weight(
                        current,
                        transfer.amount,
                        t.learning_rate,
                        t.weight_floor,
                        t.weight_ceiling,
                    );
                    if !(t.weight_floor..=t.weight_ceiling).contains(&weight) {
                        return Err(InvariantViolation::WeightOutOfBounds {
                            edge: transfer.edge,
                            weight,
                            floor: t.weight_floor,
                            ceiling: t.weight_ceiling,
                        }
                        .into());
                    }
                    staged.weights.insert(transfer.edge, weight);
                }
            }
        }
        Ok(staged)
    }

    fn record(&mut self, event: EngineEvent) {
        self.event_history.push((self.cycle, event));
    }

    /// Nodes where `agent` currently holds at least its threshold.
    pub fn active_extent(&self, agent: AgentId) -> Result<BTreeSet<NodeId>> {
        self.lookup(agent).map(|a| a.extent.clone())
    }

    pub fn agent(&self, agent: AgentId) -> Option<&AgentState> {
        self.agents.get(agent)
    }

    pub fn agent_state(&self, agent: AgentId) -> Option<LifecycleState> {
        self.agents.get(agent).map(|a| a.state)
    }

    /// All live agents in id order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentState> {
        self.agents.iter()
    }

    /// Committed resource of `agent` at `node`.
    pub fn resource(&self, agent: AgentId, node: NodeId) -> f64 {
        self.ledger.get(agent, node)
    }

    /// Resource at `node` across all agents.
    pub fn total_resource(&self, node: NodeId) -> f64 {
        self.ledger.total(node)
    }

    /// Resource at `node` held by everyone but `agent`.
    pub fn resource_excluding(&self, node: NodeId, agent: AgentId) -> f64 {
        self.ledger.total_excluding(node, agent)
    }

    /// Jaccard overlap of two agents' current extents.
    pub fn overlap(&self, a: AgentId, b: AgentId) -> Result<f64> {
        Ok(overlap_ratio(&self.lookup(a)?.extent, &self.lookup(b)?.extent))
    }

    /// Acknowledge a merge candidate. The pair must sustain overlap again
    /// before it is re-signalled.
    pub fn clear_merge_signal(&mut self, a: AgentId, b: AgentId) -> bool {
        self.merges.clear_pair(a, b)
    }

    fn lookup(&self, agent: AgentId) -> Result<&AgentState> {
        if self.agents.is_stale(agent) {
            return Err(AgentError::Stale(agent).into());
        }
        self.agents
            .get(agent)
            .ok_or_else(|| TendrilError::agent_not_found(agent))
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    /// Mutable graph access between cycles.
    ///
    /// Edge weights must stay within the configured floor and ceiling; the
    /// next cycle fails with [`GraphError::InvalidWeight`] otherwise.
    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// Get the full event history with cycle numbers.
    pub fn event_history(&self) -> &[(Cycle, EngineEvent)] {
        &self.event_history
    }

    pub fn stats(&self) -> EngineStats {
        let count = |s: LifecycleState| self.agents.iter().filter(|a| a.state == s).count();
        EngineStats {
            cycle: self.cycle,
            agents_total: self.agents.len(),
            active: count(LifecycleState::Active),
            converged: count(LifecycleState::Converged),
            dissolved: count(LifecycleState::Dissolved),
            pending_merge: count(LifecycleState::PendingMerge),
            total_created: self.total_created,
            total_dissolved: self.total_dissolved,
            graph_nodes: self.graph.node_count(),
            graph_edges: self.graph.edge_count(),
            total_resource: self.ledger.grand_total(),
            ledger_entries: self.ledger.entry_count(),
        }
    }

    /// Take a serializable snapshot of the engine's current state.
    pub fn snapshot(&self) -> EngineSnapshot {
        let agents = self
            .agents
            .iter()
            .map(|a| AgentSnapshot {
                id: a.id,
                state: a.state,
                extent: a.extent.iter().copied().collect(),
                total_resource: self.ledger.agent_total(a.id),
                quota: a.quota,
                valence_floor: a.valence_floor,
                rho_local: a.rho_local,
                created_at: a.created_at,
            })
            .collect();
        EngineSnapshot {
            cycle: self.cycle,
            agents,
            stats: self.stats(),
        }
    }
}

/// Urgency from the best match between an agent's identity and recent
/// stimuli. Neutral when either is missing.
fn urgency(identity: Option<&[f32]>, stimuli: &[Vec<f32>]) -> f64 {
    match identity {
        Some(sig) if !stimuli.is_empty() => stimuli
            .iter()
            .filter_map(|s| cosine_similarity(sig, s))
            .fold(0.0, f64::max),
        _ => 1.0,
    }
}

fn score_view<G: GraphView + ?Sized>(
    graph: &G,
    view: &ChannelView<'_>,
    config: &EngineConfig,
    baselines: &DriveBaselines,
    extent: &[NodeId],
    goal: Option<&[f32]>,
    identity: Option<&[f32]>,
) -> Option<(Vec<Candidate>, FrontierScore)> {
    let candidates = frontier_candidates(graph, extent);
    if candidates.is_empty() {
        return None;
    }
    let profile = ExtentProfile::of(graph, extent);
    let ctx = ScoringContext {
        graph,
        view,
        default_threshold: config.transport.default_threshold,
        identity,
        goal,
        extent_centroid: profile.centroid.as_deref(),
        affect_centroid: profile.affect,
    };
    let score = score_frontier(&ctx, &candidates, baselines, config.valence.surprise_epsilon);
    Some((candidates, score))
}

/// Every edge weight must lie within the configured bounds.
fn check_weight_bounds<G: GraphView + ?Sized>(graph: &G, config: &EngineConfig) -> Result<()> {
    let t = &config.transport;
    for node in graph.node_ids() {
        for edge in graph.outgoing_edges(&node) {
            if edge.weight < t.weight_floor || edge.weight > t.weight_ceiling {
                return Err(GraphError::InvalidWeight(edge.weight).into());
            }
        }
    }
    Ok(())
}

/// Best frontier valence on committed state, without touching baselines.
fn peak_valence<G: GraphView + ?Sized>(
    graph: &G,
    ledger: &ResourceLedger,
    config: &EngineConfig,
    agent: &AgentState,
    extent: &BTreeSet<NodeId>,
    goal: Option<&[f32]>,
    identity: Option<&[f32]>,
) -> f64 {
    let view = ChannelView::new(ledger, agent.id);
    let nodes: Vec<NodeId> = extent.iter().copied().collect();
    score_view(graph, &view, config, &agent.baselines, &nodes, goal, identity)
        .map(|(_, score)| score.max_valence())
        .unwrap_or(0.0)
}

/// Plan every turn of one agent against its private working view.
fn propose<G: GraphView + ?Sized>(
    graph: &G,
    ledger: &ResourceLedger,
    config: &EngineConfig,
    goal: Option<&[f32]>,
    job: &ProposalJob<'_>,
) -> AgentProposal {
    let agent = job.state;
    let threshold = config.transport.default_threshold;
    let mut view = ChannelView::new(ledger, agent.id);
    let mut baselines = agent.baselines.clone();
    let mut turns = Vec::with_capacity(job.quota as usize);
    let mut missing = BTreeSet::new();

    for _ in 0..job.quota {
        let extent = view_extent(&view, graph, threshold);
        let Some((candidates, score)) =
            score_view(graph, &view, config, &baselines, &extent, goal, job.identity)
        else {
            turns.push(TurnPlan {
                transfers: Vec::new(),
                outcome: TransportOutcome {
                    magnitude: 0.0,
                    newly_activated: false,
                },
            });
            continue;
        };
        baselines.observe(&score.levels, &score.available);
        missing.extend(score.unavailable());

        let selection = select_edges(&score.valences);
        let selected: Vec<Candidate> = selection
            .edges
            .iter()
            .filter_map(|e| candidates.iter().find(|c| c.edge == *e).copied())
            .collect();
        let transfers = plan_transfers(graph, &mut view, &selected, threshold, job.alpha);
        let outcome = TransportOutcome {
            magnitude: transfers.iter().map(|t| t.amount).sum(),
            newly_activated: transfers.iter().any(|t| t.crossed),
        };
        turns.push(TurnPlan { transfers, outcome });
    }

    AgentProposal {
        agent: agent.id,
        turns,
        baselines,
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendril_core::collaborators::FixedInstability;

    /// a -> b -> c chain with unit weights.
    fn chain() -> (PetResourceGraph, Vec<NodeId>) {
        let mut graph = PetResourceGraph::new();
        let ids: Vec<NodeId> = (0..3)
            .map(|i| graph.add_node(NodeData::new(NodeId::from_seed(i))).unwrap())
            .collect();
        graph.add_edge(ids[0], ids[1], 0.5).unwrap();
        graph.add_edge(ids[1], ids[2], 0.5).unwrap();
        (graph, ids)
    }

    fn engine() -> (Engine, Vec<NodeId>) {
        let (graph, ids) = chain();
        let mut config = EngineConfig::default();
        config.budget.stride_budget = 4;
        (Engine::new(graph, config).unwrap(), ids)
    }

    fn new_agent() -> InjectionTarget {
        InjectionTarget::New { signature: None }
    }

    #[test]
    fn injection_below_threshold_creates_nothing() {
        let (mut engine, ids) = engine();
        let out = engine.inject_resource(new_agent(), ids[0], 0.05).unwrap();
        assert_eq!(out.agent, None);
        assert_eq!(engine.stats().agents_total, 0);
        assert!(matches!(
            engine.event_history().last(),
            Some((0, EngineEvent::InjectionBelowThreshold { .. }))
        ));
    }

    #[test]
    fn invalid_injections_are_errors() {
        let (mut engine, ids) = engine();
        assert!(engine.inject_resource(new_agent(), ids[0], -1.0).is_err());
        assert!(engine.inject_resource(new_agent(), ids[0], f64::NAN).is_err());
        assert!(engine
            .inject_resource(new_agent(), NodeId::from_seed(99), 1.0)
            .is_err());
        assert!(engine
            .inject_resource(InjectionTarget::Existing(AgentId::new(3, 0)), ids[0], 1.0)
            .is_err());
    }

    #[test]
    fn cycle_spreads_resource_and_conserves_it() {
        let (mut engine, ids) = engine();
        let agent = engine
            .inject_resource(new_agent(), ids[0], 1.0)
            .unwrap()
            .agent
            .unwrap();
        assert_eq!(engine.active_extent(agent).unwrap().len(), 1);

        let report = engine.run_cycle().unwrap();
        assert_eq!(report.quotas[&agent], 4);
        assert!(report.transfers > 0);
        assert!((engine.ledger().agent_total(agent) - 1.0).abs() < 1e-9);
        assert!(engine.active_extent(agent).unwrap().contains(&ids[1]));
        assert!(engine.resource(agent, ids[0]) >= 0.1);
        assert_eq!(engine.cycle(), 1);
    }

    #[test]
    fn newly_activating_transfer_strengthens_edge() {
        let (mut engine, ids) = engine();
        engine.inject_resource(new_agent(), ids[0], 1.0).unwrap();
        let before = engine.graph().outgoing_edges(&ids[0])[0].weight;
        let report = engine.run_cycle().unwrap();
        let edge = engine.graph().outgoing_edges(&ids[0])[0];
        assert!(report.strengthened_edges >= 1);
        assert!(edge.weight > before);
        assert!(edge.weight <= engine.config().transport.weight_ceiling);
        assert!(edge.usage.traversal_count >= 1);
    }

    #[test]
    fn missing_instability_is_a_degradation() {
        let (mut engine, ids) = engine();
        let agent = engine.inject_resource(new_agent(), ids[0], 1.0).unwrap().agent.unwrap();
        let report = engine.run_cycle().unwrap();
        assert!(report
            .degradations
            .contains(&Degradation::InstabilityUnavailable { agent }));
    }

    #[test]
    fn high_instability_damps_transport() {
        let (graph, ids) = chain();
        let mut config = EngineConfig::default();
        config.budget.stride_budget = 1;
        config.transport.rho_alpha = 1.0;
        let mut engine = Engine::new(graph, config)
            .unwrap()
            .with_instability_estimator(FixedInstability(4.0));
        let agent = engine.inject_resource(new_agent(), ids[0], 1.0).unwrap().agent.unwrap();
        let report = engine.run_cycle().unwrap();
        // Full gap would be 0.1; damped by 1/4
        assert!((report.resource_moved - 0.025).abs() < 1e-12, "moved {}", report.resource_moved);
        assert!((engine.agent(agent).unwrap().rho_local - 4.0).abs() < 1e-12);
    }

    #[test]
    fn zero_budget_is_a_no_op() {
        let (graph, ids) = chain();
        let mut config = EngineConfig::default();
        config.budget.stride_budget = 0;
        let mut engine = Engine::new(graph, config).unwrap();
        let agent = engine.inject_resource(new_agent(), ids[0], 1.0).unwrap().agent.unwrap();
        for _ in 0..5 {
            let report = engine.run_cycle().unwrap();
            assert_eq!(report.turns, 0);
        }
        assert_eq!(engine.agent_state(agent), Some(LifecycleState::Active));
        assert_eq!(engine.resource(agent, ids[0]), 1.0);
    }

    #[test]
    fn out_of_bounds_weights_rejected_at_startup() {
        let mut graph = PetResourceGraph::new();
        let a = graph.add_node(NodeData::new(NodeId::from_seed(0))).unwrap();
        let b = graph.add_node(NodeData::new(NodeId::from_seed(1))).unwrap();
        graph.add_edge(a, b, 3.0).unwrap();
        assert!(Engine::new(graph, EngineConfig::default()).is_err());
    }

    #[test]
    fn invalid_config_rejected_at_startup() {
        let (graph, _) = chain();
        let mut config = EngineConfig::default();
        config.budget.stride_budget = -2;
        assert!(matches!(
            Engine::new(graph, config),
            Err(TendrilError::Config(_))
        ));
    }

    #[test]
    fn snapshot_serializes() {
        let (mut engine, ids) = engine();
        engine.inject_resource(new_agent(), ids[0], 1.0).unwrap();
        engine.run_cycle().unwrap();
        let json = serde_json::to_value(engine.snapshot()).unwrap();
        assert_eq!(json["cycle"], 1);
        assert_eq!(json["agents"].as_array().unwrap().len(), 1);
        assert_eq!(json["stats"]["agents_total"], 1);
    }

    #[test]
    fn urgency_defaults_to_neutral() {
        assert_eq!(urgency(None, &[vec![1.0]]), 1.0);
        assert_eq!(urgency(Some(&[1.0, 0.0]), &[]), 1.0);
        let u = urgency(Some(&[1.0, 0.0]), &[vec![0.0, 1.0], vec![1.0, 1.0]]);
        assert!((u - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }
}
