//! Valence scorer — self-calibrating edge scores from seven drives.
//!
//! Every drive yields a bounded signal in [0, 1] per frontier edge. An
//! agent keeps a rolling baseline of each drive's aggregate level; the
//! drive whose level sits furthest above its own baseline gets the largest
//! gate. Without history all available drives share the weight evenly.
//!
//! Scoring is a pure function of its inputs. Baselines are only updated by
//! the caller, from the returned drive levels.

use crate::ledger::ChannelView;
use serde::{Deserialize, Serialize};
use tendril_core::graph::GraphView;
use tendril_core::semantic::cosine_similarity;
use tendril_core::stats::RollingStats;
use tendril_core::types::{EdgeId, NodeId};

pub const DRIVE_COUNT: usize = 7;

/// One value per drive, indexed by `Drive::index`.
pub type DriveVector = [f64; DRIVE_COUNT];

const SIGNAL_EPSILON: f64 = 1e-9;

/// Named signals that make up a valence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Drive {
    /// Target's gap relative to the source's slack.
    GapFill,
    /// Similarity of the target to the current goal.
    Goal,
    /// Similarity of the target to the agent's identity signature.
    Identity,
    /// Distance of the target from the extent's centroid.
    Novelty,
    /// Affective contrast between target and extent.
    Opposition,
    /// Share of the target's resource held by other agents.
    Integration,
    /// Edge weight relative to siblings from the same source.
    Ease,
}

impl Drive {
    pub const ALL: [Drive; DRIVE_COUNT] = [
        Drive::GapFill,
        Drive::Goal,
        Drive::Identity,
        Drive::Novelty,
        Drive::Opposition,
        Drive::Integration,
        Drive::Ease,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Drive::GapFill => "gap_fill",
            Drive::Goal => "goal",
            Drive::Identity => "identity",
            Drive::Novelty => "novelty",
            Drive::Opposition => "opposition",
            Drive::Integration => "integration",
            Drive::Ease => "ease",
        }
    }
}

impl std::fmt::Display for Drive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Rolling baseline per drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveBaselines {
    stats: [RollingStats; DRIVE_COUNT],
}

impl DriveBaselines {
    pub fn new(alpha: f64) -> Self {
        Self {
            stats: [RollingStats::new(alpha); DRIVE_COUNT],
        }
    }

    pub fn stats(&self, drive: Drive) -> &RollingStats {
        &self.stats[drive.index()]
    }

    /// Whether any drive has been observed.
    pub fn has_history(&self) -> bool {
        self.stats.iter().any(|s| s.has_history())
    }

    /// Fold in the levels of available drives.
    pub fn observe(&mut self, levels: &DriveVector, available: &[bool; DRIVE_COUNT]) {
        for drive in Drive::ALL {
            let i = drive.index();
            if available[i] {
                self.stats[i].observe(levels[i]);
            }
        }
    }

    /// Surprise gates for the given levels.
    ///
    /// `g = relu(z) / (Σ relu(z) + ε)` over available drives. Falls back to
    /// an even split when no available drive has history or none is
    /// positively surprising. Unavailable drives always get 0.
    pub fn gates(
        &self,
        levels: &DriveVector,
        available: &[bool; DRIVE_COUNT],
        epsilon: f64,
    ) -> DriveVector {
        let mut gates = [0.0; DRIVE_COUNT];
        let n_available = available.iter().filter(|a| **a).count();
        if n_available == 0 {
            return gates;
        }

        let any_history = Drive::ALL
            .iter()
            .any(|d| available[d.index()] && self.stats[d.index()].has_history());

        let mut relu = [0.0; DRIVE_COUNT];
        if any_history {
            for drive in Drive::ALL {
                let i = drive.index();
                if !available[i] {
                    continue;
                }
                let z = self.stats[i].z_score(levels[i], epsilon).unwrap_or(0.0);
                relu[i] = if z.is_finite() { z.max(0.0) } else { 0.0 };
            }
        }

        let total: f64 = relu.iter().sum();
        if total <= epsilon {
            let uniform = 1.0 / n_available as f64;
            for (i, g) in gates.iter_mut().enumerate() {
                if available[i] {
                    *g = uniform;
                }
            }
            return gates;
        }

        for i in 0..DRIVE_COUNT {
            gates[i] = relu[i] / (total + epsilon);
        }
        gates
    }
}

/// An outgoing frontier edge under consideration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub edge: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub weight: f64,
}

/// Everything a score depends on.
pub struct ScoringContext<'a, G: GraphView + ?Sized> {
    pub graph: &'a G,
    /// The scoring agent's resource, committed plus its own pending deltas.
    pub view: &'a ChannelView<'a>,
    pub default_threshold: f64,
    pub identity: Option<&'a [f32]>,
    pub goal: Option<&'a [f32]>,
    pub extent_centroid: Option<&'a [f32]>,
    pub affect_centroid: Option<[f64; 2]>,
}

/// Scores for one frontier.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierScore {
    /// Valence per candidate, in candidate order.
    pub valences: Vec<(EdgeId, f64)>,
    /// Aggregate level of each drive across the frontier.
    pub levels: DriveVector,
    pub available: [bool; DRIVE_COUNT],
    pub gates: DriveVector,
}

impl FrontierScore {
    pub fn max_valence(&self) -> f64 {
        self.valences.iter().map(|(_, v)| *v).fold(0.0, f64::max)
    }

    /// Drives that had no data to work with.
    pub fn unavailable(&self) -> impl Iterator<Item = Drive> + '_ {
        Drive::ALL.into_iter().filter(|d| !self.available[d.index()])
    }
}

/// Score every candidate. Valences are finite and non-negative.
pub fn score_frontier<G: GraphView + ?Sized>(
    ctx: &ScoringContext<'_, G>,
    candidates: &[Candidate],
    baselines: &DriveBaselines,
    epsilon: f64,
) -> FrontierScore {
    let available = availability(ctx, candidates);
    let signals: Vec<DriveVector> = candidates
        .iter()
        .map(|c| drive_signals(ctx, c, candidates, &available))
        .collect();

    let mut levels = [0.0; DRIVE_COUNT];
    if !signals.is_empty() {
        for s in &signals {
            for i in 0..DRIVE_COUNT {
                levels[i] += s[i];
            }
        }
        for level in levels.iter_mut() {
            *level /= signals.len() as f64;
        }
    }

    let gates = baselines.gates(&levels, &available, epsilon);
    let valences = candidates
        .iter()
        .zip(&signals)
        .map(|(c, s)| {
            let v: f64 = gates.iter().zip(s).map(|(g, x)| g * x).sum();
            (c.edge, if v.is_finite() { v.max(0.0) } else { 0.0 })
        })
        .collect();

    FrontierScore {
        valences,
        levels,
        available,
        gates,
    }
}

fn availability<G: GraphView + ?Sized>(
    ctx: &ScoringContext<'_, G>,
    candidates: &[Candidate],
) -> [bool; DRIVE_COUNT] {
    let any_embedding = candidates.iter().any(|c| {
        ctx.graph
            .get_node(&c.target)
            .is_some_and(|n| n.embedding.is_some())
    });
    let any_affect = candidates.iter().any(|c| {
        ctx.graph
            .get_node(&c.target)
            .is_some_and(|n| n.affect.is_some())
    });

    let mut available = [false; DRIVE_COUNT];
    available[Drive::GapFill.index()] = true;
    available[Drive::Goal.index()] = ctx.goal.is_some() && any_embedding;
    available[Drive::Identity.index()] = ctx.identity.is_some() && any_embedding;
    available[Drive::Novelty.index()] = ctx.extent_centroid.is_some() && any_embedding;
    available[Drive::Opposition.index()] = ctx.affect_centroid.is_some() && any_affect;
    available[Drive::Integration.index()] = true;
    available[Drive::Ease.index()] = true;
    available
}

fn drive_signals<G: GraphView + ?Sized>(
    ctx: &ScoringContext<'_, G>,
    c: &Candidate,
    all: &[Candidate],
    available: &[bool; DRIVE_COUNT],
) -> DriveVector {
    let mut s = [0.0; DRIVE_COUNT];
    let agent = ctx.view.agent();
    let target = ctx.graph.get_node(&c.target);
    let embedding = target.and_then(|n| n.embedding.as_deref());

    let theta_src = ctx.graph.threshold(&c.source, agent, ctx.default_threshold);
    let theta_tgt = ctx.graph.threshold(&c.target, agent, ctx.default_threshold);
    let own_target = ctx.view.get(c.target);
    let slack = (ctx.view.get(c.source) - theta_src).max(0.0);
    let gap = (theta_tgt - own_target).max(0.0);
    s[Drive::GapFill.index()] = gap / (slack + gap + SIGNAL_EPSILON);

    if available[Drive::Goal.index()] {
        s[Drive::Goal.index()] = similarity(embedding, ctx.goal).max(0.0);
    }
    if available[Drive::Identity.index()] {
        s[Drive::Identity.index()] = similarity(embedding, ctx.identity).max(0.0);
    }
    if available[Drive::Novelty.index()] && embedding.is_some() {
        let sim = similarity(embedding, ctx.extent_centroid);
        s[Drive::Novelty.index()] = (1.0 - sim).clamp(0.0, 1.0);
    }
    if available[Drive::Opposition.index()] {
        if let (Some(t), Some(centroid)) = (target.and_then(|n| n.affect), ctx.affect_centroid) {
            let dot = -(t[0] as f64 * centroid[0] + t[1] as f64 * centroid[1]);
            s[Drive::Opposition.index()] = ((dot + 2.0) / 4.0).clamp(0.0, 1.0);
        }
    }

    let others = ctx.view.ledger().total_excluding(c.target, agent);
    s[Drive::Integration.index()] = (others / (others + own_target + SIGNAL_EPSILON)).clamp(0.0, 1.0);

    let max_sibling = all
        .iter()
        .filter(|o| o.source == c.source)
        .map(|o| o.weight)
        .fold(0.0, f64::max);
    if max_sibling > 0.0 {
        s[Drive::Ease.index()] = (c.weight / max_sibling).clamp(0.0, 1.0);
    }

    for x in s.iter_mut() {
        if !x.is_finite() {
            *x = 0.0;
        }
    }
    s
}

fn similarity(a: Option<&[f32]>, b: Option<&[f32]>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => cosine_similarity(a, b).unwrap_or(0.0),
        _ => 0.0,
    }
}
