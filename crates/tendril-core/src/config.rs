//! Engine configuration.
//!
//! Every tunable lives here, grouped by the stage that reads it. Missing
//! TOML keys fall back to the defaults below.

use crate::error::{ConfigError, Result, TendrilError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub valence: ValenceConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Total transport turns handed out per cycle.
    #[serde(default = "default_stride_budget")]
    pub stride_budget: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Entries below this after a commit are removed.
    #[serde(default = "default_prune_epsilon")]
    pub prune_epsilon: f64,
    /// Allowed numeric slack for conservation and non-negativity checks.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Threshold used where a node carries no per-agent override.
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
    /// Instability level at which transport runs undamped.
    #[serde(default = "default_rho_target")]
    pub rho_target: f64,
    /// Smoothing factor for each agent's instability reading.
    #[serde(default = "default_rho_alpha")]
    pub rho_alpha: f64,
    #[serde(default = "default_damping_epsilon")]
    pub damping_epsilon: f64,
    /// Weight gained per unit of newly activating flow.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_weight_floor")]
    pub weight_floor: f64,
    #[serde(default = "default_weight_ceiling")]
    pub weight_ceiling: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValenceConfig {
    /// Smoothing factor for per-drive baselines.
    #[serde(default = "default_baseline_alpha")]
    pub baseline_alpha: f64,
    #[serde(default = "default_surprise_epsilon")]
    pub surprise_epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// An agent holding less than this in total counts as empty.
    #[serde(default = "default_min_total_resource")]
    pub min_total_resource: f64,
    /// Consecutive empty cycles before dissolution.
    #[serde(default = "default_dissolution_patience")]
    pub dissolution_patience: u32,
    /// Instability above the agent's rolling mean by more than this trips
    /// the health guard.
    #[serde(default = "default_health_margin")]
    pub health_margin: f64,
    #[serde(default = "default_instability_alpha")]
    pub instability_alpha: f64,
    /// Number of recent transport outcomes kept per agent.
    #[serde(default = "default_outcome_window")]
    pub outcome_window: usize,
    /// Outcomes required before the valence floor can rise.
    #[serde(default = "default_min_outcomes")]
    pub min_outcomes: usize,
    /// Mean magnitude below which transport counts as stalled.
    #[serde(default = "default_magnitude_epsilon")]
    pub magnitude_epsilon: f64,
    /// Activation rate below which transport counts as stalled.
    #[serde(default = "default_activation_rate_epsilon")]
    pub activation_rate_epsilon: f64,
    #[serde(default = "default_base_valence_floor")]
    pub base_valence_floor: f64,
    /// Floor used once recent transport has stalled.
    #[serde(default = "default_raised_valence_floor")]
    pub raised_valence_floor: f64,
    /// Cycles a dissolved agent is kept before its slot is reclaimed.
    /// Zero keeps dissolved agents forever.
    #[serde(default)]
    pub reclaim_after_cycles: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,
    /// Consecutive overlapping cycles before a merge candidate is signalled.
    #[serde(default = "default_sustain_cycles")]
    pub sustain_cycles: u32,
    /// Whether converged agents take part in overlap detection.
    #[serde(default = "default_include_converged")]
    pub include_converged: bool,
}

// Default value functions
fn default_stride_budget() -> i64 { 64 }
fn default_prune_epsilon() -> f64 { 1e-3 }
fn default_tolerance() -> f64 { 1e-9 }
fn default_threshold() -> f64 { 0.1 }
fn default_rho_target() -> f64 { 1.0 }
fn default_rho_alpha() -> f64 { 0.1 }
fn default_damping_epsilon() -> f64 { 1e-9 }
fn default_learning_rate() -> f64 { 0.1 }
fn default_weight_floor() -> f64 { 0.01 }
fn default_weight_ceiling() -> f64 { 1.0 }
fn default_baseline_alpha() -> f64 { 0.1 }
fn default_surprise_epsilon() -> f64 { 1e-6 }
fn default_min_total_resource() -> f64 { 1e-3 }
fn default_dissolution_patience() -> u32 { 3 }
fn default_health_margin() -> f64 { 0.5 }
fn default_instability_alpha() -> f64 { 0.1 }
fn default_outcome_window() -> usize { 20 }
fn default_min_outcomes() -> usize { 5 }
fn default_magnitude_epsilon() -> f64 { 1e-3 }
fn default_activation_rate_epsilon() -> f64 { 0.05 }
fn default_base_valence_floor() -> f64 { 0.2 }
fn default_raised_valence_floor() -> f64 { 0.8 }
fn default_overlap_threshold() -> f64 { 0.5 }
fn default_sustain_cycles() -> u32 { 3 }
fn default_include_converged() -> bool { true }

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            stride_budget: default_stride_budget(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            prune_epsilon: default_prune_epsilon(),
            tolerance: default_tolerance(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            rho_target: default_rho_target(),
            rho_alpha: default_rho_alpha(),
            damping_epsilon: default_damping_epsilon(),
            learning_rate: default_learning_rate(),
            weight_floor: default_weight_floor(),
            weight_ceiling: default_weight_ceiling(),
        }
    }
}

impl Default for ValenceConfig {
    fn default() -> Self {
        Self {
            baseline_alpha: default_baseline_alpha(),
            surprise_epsilon: default_surprise_epsilon(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_total_resource: default_min_total_resource(),
            dissolution_patience: default_dissolution_patience(),
            health_margin: default_health_margin(),
            instability_alpha: default_instability_alpha(),
            outcome_window: default_outcome_window(),
            min_outcomes: default_min_outcomes(),
            magnitude_epsilon: default_magnitude_epsilon(),
            activation_rate_epsilon: default_activation_rate_epsilon(),
            base_valence_floor: default_base_valence_floor(),
            raised_valence_floor: default_raised_valence_floor(),
            reclaim_after_cycles: 0,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: default_overlap_threshold(),
            sustain_cycles: default_sustain_cycles(),
            include_converged: default_include_converged(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. The result is validated.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Parse(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize as pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TendrilError::Config(ConfigError::Parse(e.to_string())))
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.budget.stride_budget < 0 {
            return Err(TendrilError::invalid_config(
                "budget.stride_budget",
                self.budget.stride_budget,
                "must be non-negative",
            ));
        }
        if self.budget.stride_budget > u32::MAX as i64 {
            return Err(TendrilError::invalid_config(
                "budget.stride_budget",
                self.budget.stride_budget,
                "must fit in 32 bits",
            ));
        }

        positive("ledger.prune_epsilon", self.ledger.prune_epsilon)?;
        positive("ledger.tolerance", self.ledger.tolerance)?;

        let t = &self.transport;
        non_negative("transport.default_threshold", t.default_threshold)?;
        positive("transport.rho_target", t.rho_target)?;
        unit_interval("transport.rho_alpha", t.rho_alpha)?;
        positive("transport.damping_epsilon", t.damping_epsilon)?;
        non_negative("transport.learning_rate", t.learning_rate)?;
        non_negative("transport.weight_floor", t.weight_floor)?;
        if !(t.weight_ceiling.is_finite() && t.weight_ceiling >= t.weight_floor) {
            return Err(ConfigError::OutOfRange {
                field: "transport.weight_ceiling".into(),
                min: t.weight_floor,
                max: f64::MAX,
                value: t.weight_ceiling,
            }
            .into());
        }

        unit_interval("valence.baseline_alpha", self.valence.baseline_alpha)?;
        positive("valence.surprise_epsilon", self.valence.surprise_epsilon)?;

        let l = &self.lifecycle;
        non_negative("lifecycle.min_total_resource", l.min_total_resource)?;
        if l.dissolution_patience == 0 {
            return Err(TendrilError::invalid_config(
                "lifecycle.dissolution_patience",
                0,
                "must be at least 1",
            ));
        }
        non_negative("lifecycle.health_margin", l.health_margin)?;
        unit_interval("lifecycle.instability_alpha", l.instability_alpha)?;
        if l.outcome_window == 0 || l.min_outcomes > l.outcome_window {
            return Err(TendrilError::invalid_config(
                "lifecycle.min_outcomes",
                l.min_outcomes,
                format!("must not exceed outcome_window ({}) which must be non-zero", l.outcome_window),
            ));
        }
        non_negative("lifecycle.magnitude_epsilon", l.magnitude_epsilon)?;
        unit_interval("lifecycle.activation_rate_epsilon", l.activation_rate_epsilon)?;
        non_negative("lifecycle.base_valence_floor", l.base_valence_floor)?;
        if !(l.raised_valence_floor.is_finite() && l.raised_valence_floor >= l.base_valence_floor) {
            return Err(TendrilError::invalid_config(
                "lifecycle.raised_valence_floor",
                l.raised_valence_floor,
                "must be at least base_valence_floor",
            ));
        }

        unit_interval("coordinator.overlap_threshold", self.coordinator.overlap_threshold)?;
        if self.coordinator.sustain_cycles == 0 {
            return Err(TendrilError::invalid_config(
                "coordinator.sustain_cycles",
                0,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn positive(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(TendrilError::invalid_config(field, value, "must be positive and finite"))
    }
}

fn non_negative(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TendrilError::invalid_config(field, value, "must be non-negative and finite"))
    }
}

fn unit_interval(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.into(),
            min: 0.0,
            max: 1.0,
            value,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [budget]
            stride_budget = 12

            [coordinator]
            include_converged = false
            "#,
        )
        .unwrap();
        assert_eq!(config.budget.stride_budget, 12);
        assert!(!config.coordinator.include_converged);
        assert_eq!(config.lifecycle.outcome_window, 20);
        assert_eq!(config.transport.default_threshold, 0.1);
    }

    #[test]
    fn toml_roundtrip() {
        let mut config = EngineConfig::default();
        config.lifecycle.reclaim_after_cycles = 5;
        let text = config.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn rejects_negative_budget() {
        let err = EngineConfig::from_toml_str("[budget]\nstride_budget = -1\n").unwrap_err();
        assert!(matches!(err, TendrilError::Config(_)), "got {err}");
    }

    #[test]
    fn rejects_inverted_weight_bounds() {
        let mut config = EngineConfig::default();
        config.transport.weight_floor = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            EngineConfig::from_toml_str("budget = [").unwrap_err(),
            TendrilError::Config(ConfigError::Parse(_))
        ));
    }
}
