//! Multi-agent coordinator — overlap tracking and merge signals.
//!
//! Overlap is the Jaccard ratio of two extents. A pair whose overlap stays
//! above the threshold for `sustain_cycles` consecutive cycles is reported
//! once as a merge candidate. Merges themselves are left to the caller.

use std::collections::{BTreeMap, BTreeSet};
use tendril_core::config::CoordinatorConfig;
use tendril_core::types::{AgentId, MergeCandidate, NodeId};
use tracing::debug;

/// `|a ∩ b| / |a ∪ b|`, 0 when both are empty.
pub fn overlap_ratio(a: &BTreeSet<NodeId>, b: &BTreeSet<NodeId>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[derive(Debug, Clone, Default)]
struct PairTrack {
    streak: u32,
    signalled: bool,
}

/// What changed in one observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeObservation {
    /// Pairs that just became sustained.
    pub new_candidates: Vec<MergeCandidate>,
    /// Every agent currently part of a sustained pair.
    pub pending: BTreeSet<AgentId>,
}

#[derive(Debug, Clone)]
pub struct MergeTracker {
    config: CoordinatorConfig,
    pairs: BTreeMap<(AgentId, AgentId), PairTrack>,
}

impl MergeTracker {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            pairs: BTreeMap::new(),
        }
    }

    /// Feed this cycle's extents. Pairs that drop below the threshold
    /// start over.
    pub fn observe(&mut self, extents: &[(AgentId, &BTreeSet<NodeId>)]) -> MergeObservation {
        let mut sorted: Vec<&(AgentId, &BTreeSet<NodeId>)> = extents.iter().collect();
        sorted.sort_by_key(|(id, _)| *id);

        let mut seen: BTreeSet<(AgentId, AgentId)> = BTreeSet::new();
        let mut observation = MergeObservation::default();

        for (i, (a, ea)) in sorted.iter().enumerate() {
            for (b, eb) in sorted.iter().skip(i + 1) {
                let ratio = overlap_ratio(ea, eb);
                if ratio <= self.config.overlap_threshold {
                    continue;
                }
                let key = (*a, *b);
                seen.insert(key);
                let track = self.pairs.entry(key).or_default();
                track.streak = track.streak.saturating_add(1);
                if track.streak >= self.config.sustain_cycles {
                    observation.pending.insert(*a);
                    observation.pending.insert(*b);
                    if !track.signalled {
                        track.signalled = true;
                        debug!(%a, %b, ratio, "merge candidate");
                        observation.new_candidates.push(MergeCandidate {
                            a: *a,
                            b: *b,
                            overlap_ratio: ratio,
                        });
                    }
                }
            }
        }

        self.pairs.retain(|key, _| seen.contains(key));
        observation
    }

    /// Forget all pairs involving `agent`.
    pub fn forget(&mut self, agent: AgentId) {
        self.pairs.retain(|(a, b), _| *a != agent && *b != agent);
    }

    /// Reset a pair so it must sustain overlap again before re-signalling.
    pub fn clear_pair(&mut self, a: AgentId, b: AgentId) -> bool {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.pairs.remove(&key).is_some()
    }

    /// Current streak length for a pair.
    pub fn streak(&self, a: AgentId, b: AgentId) -> u32 {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.pairs.get(&key).map(|t| t.streak).unwrap_or(0)
    }
}
