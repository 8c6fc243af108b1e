//! Budget allocator — splits the per-cycle stride budget into integer quotas.
//!
//! Raw weight is the inverse of extent size times urgency, reachability, and
//! health, so small patterns get proportionally more turns per node held.
//! Each factor family is normalized to mean 1.0 across agents before use,
//! and the split uses the largest-remainder method so quotas always sum to
//! the budget exactly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tendril_core::error::{InvariantViolation, Result, TendrilError};
use tendril_core::types::AgentId;

const WEIGHT_EPSILON: f64 = 1e-12;

/// Per-agent modulation factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModulationFactors {
    pub urgency: f64,
    pub reachability: f64,
    pub health: f64,
}

impl Default for ModulationFactors {
    fn default() -> Self {
        Self {
            urgency: 1.0,
            reachability: 1.0,
            health: 1.0,
        }
    }
}

/// Allocation request for one agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationInput {
    pub agent: AgentId,
    pub extent_size: usize,
    pub factors: ModulationFactors,
}

/// Integer quotas per agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    quotas: BTreeMap<AgentId, u32>,
}

impl Allocation {
    pub fn get(&self, agent: AgentId) -> u32 {
        self.quotas.get(&agent).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.quotas.values().map(|&q| q as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.quotas.len()
    }

    /// (agent, quota) pairs in agent id order, including zero quotas.
    pub fn iter(&self) -> impl Iterator<Item = (AgentId, u32)> + '_ {
        self.quotas.iter().map(|(a, q)| (*a, *q))
    }

    pub fn into_map(self) -> BTreeMap<AgentId, u32> {
        self.quotas
    }
}

/// Rescale values to mean 1.0. All-zero or degenerate input maps to 1.0.
pub fn normalize_to_unit_mean(values: &[f64]) -> Vec<f64> {
    let clean: Vec<f64> = values
        .iter()
        .map(|&v| if v.is_finite() && v > 0.0 { v } else { 0.0 })
        .collect();
    if clean.is_empty() {
        return clean;
    }
    let mean = clean.iter().sum::<f64>() / clean.len() as f64;
    if mean <= WEIGHT_EPSILON {
        return vec![1.0; clean.len()];
    }
    clean.into_iter().map(|v| v / mean).collect()
}

impl ModulationFactors {
    /// Rescale each factor family to mean 1.0 across the population.
    pub fn normalized(raw: &[ModulationFactors]) -> Vec<ModulationFactors> {
        let family = |f: fn(&ModulationFactors) -> f64| {
            normalize_to_unit_mean(&raw.iter().map(f).collect::<Vec<_>>())
        };
        let urgency = family(|m| m.urgency);
        let reach = family(|m| m.reachability);
        let health = family(|m| m.health);
        (0..raw.len())
            .map(|i| ModulationFactors {
                urgency: urgency[i],
                reachability: reach[i],
                health: health[i],
            })
            .collect()
    }
}

/// Normalize each factor family across all inputs.
pub fn normalize_modulation(inputs: &mut [AllocationInput]) {
    let raw: Vec<ModulationFactors> = inputs.iter().map(|i| i.factors).collect();
    for (input, factors) in inputs.iter_mut().zip(ModulationFactors::normalized(&raw)) {
        input.factors = factors;
    }
}

/// Raw allocation weight of one input.
pub fn raw_weight(input: &AllocationInput) -> f64 {
    let f = input.factors;
    let w = f.urgency * f.reachability * f.health / input.extent_size.max(1) as f64;
    if w.is_finite() && w > 0.0 {
        w
    } else {
        0.0
    }
}

/// Split `budget` across `inputs`.
///
/// Quotas sum to the budget exactly. A non-positive budget or no inputs
/// yields an empty allocation. When every weight is zero the budget is
/// split evenly, remainder going to the lowest agent ids.
pub fn allocate(budget: i64, inputs: &[AllocationInput]) -> Result<Allocation> {
    if budget <= 0 || inputs.is_empty() {
        return Ok(Allocation::default());
    }
    let budget = u32::try_from(budget).map_err(|_| {
        TendrilError::invalid_config("budget.stride_budget", budget, "must fit in 32 bits")
    })?;

    let mut sorted: Vec<&AllocationInput> = inputs.iter().collect();
    sorted.sort_by_key(|i| i.agent);
    sorted.dedup_by_key(|i| i.agent);

    let weights: Vec<f64> = sorted.iter().map(|i| raw_weight(i)).collect();
    let total: f64 = weights.iter().sum();

    let mut quotas: BTreeMap<AgentId, u32> = BTreeMap::new();
    if total <= WEIGHT_EPSILON {
        let n = sorted.len() as u32;
        let base = budget / n;
        let extra = budget % n;
        for (i, input) in sorted.iter().enumerate() {
            let bonus = if (i as u32) < extra { 1 } else { 0 };
            quotas.insert(input.agent, base + bonus);
        }
    } else {
        let mut remainders: Vec<(f64, AgentId)> = Vec::with_capacity(sorted.len());
        let mut assigned: u64 = 0;
        for (input, w) in sorted.iter().zip(&weights) {
            let exact = budget as f64 * w / total;
            let floor = exact.floor();
            let q = floor as u32;
            assigned += q as u64;
            quotas.insert(input.agent, q);
            remainders.push((exact - floor, input.agent));
        }

        let mut left = (budget as u64).saturating_sub(assigned);
        remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        let mut i = 0;
        while left > 0 && !remainders.is_empty() {
            let agent = remainders[i % remainders.len()].1;
            if let Some(q) = quotas.get_mut(&agent) {
                *q += 1;
            }
            left -= 1;
            i += 1;
        }
    }

    let allocation = Allocation { quotas };
    let actual = allocation.total();
    if actual != budget as u64 {
        return Err(InvariantViolation::QuotaSumMismatch {
            expected: budget as u64,
            actual,
        }
        .into());
    }
    Ok(allocation)
}
