//! Resilience policy model.
//!
//! A [`ResiliencePolicy`] is produced once by the policy compiler and shared
//! read-only. Every section carries the documented defaults.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Compiled resilience policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResiliencePolicy {
    /// Schema shape the policy was compiled from.
    pub schema_version: PolicyVersion,

    /// TSI targets and recovery horizon.
    pub targets: TsiTargets,

    /// Per-plan latency and cost ceilings.
    pub budgets: RecoveryBudgets,

    /// Trigger thresholds beyond the TSI targets.
    pub triggers: TriggerThresholds,

    /// Plan scoring weights.
    pub scoring: ScoringWeights,

    /// Rollout damping. `None` when damping is disabled.
    pub damping: Option<DampingConfig>,

    /// Circuit breaker settings.
    pub breaker: BreakerConfig,

    /// Post-recovery verification settings.
    pub verification: VerificationConfig,

    /// Meta-validation settings.
    pub mvi: MviConfig,

    /// Trust signal tracker settings.
    pub tsi: TsiConfig,

    /// Providers the governed system depends on.
    pub providers: ProviderRoster,

    /// Recovery plans, tier by tier.
    pub plans: Vec<RecoveryPlan>,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            schema_version: PolicyVersion::V2Nested,
            targets: TsiTargets::default(),
            budgets: RecoveryBudgets::default(),
            triggers: TriggerThresholds::default(),
            scoring: ScoringWeights::default(),
            damping: Some(DampingConfig::default()),
            breaker: BreakerConfig::default(),
            verification: VerificationConfig::default(),
            mvi: MviConfig::default(),
            tsi: TsiConfig::default(),
            providers: ProviderRoster::default(),
            plans: Vec::new(),
        }
    }
}

impl ResiliencePolicy {
    pub fn plan(&self, id: &str) -> Option<&RecoveryPlan> {
        self.plans.iter().find(|p| p.id == id)
    }
}

/// Policy document shapes accepted by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVersion {
    /// Flat keys (`tsi_target`, `latency_ms_max`, `plans: [..]`).
    V1Flat,
    /// Nested sections (`targets.tsi`, `budgets`, `plans.tier_N`).
    V2Nested,
}

/// TSI thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsiTargets {
    /// Healthy trust level recovery aims for.
    pub target: f64,

    /// Floor; a forecast below it triggers recovery.
    pub min: f64,

    /// Critical level; current TSI below it triggers recovery.
    pub critical: f64,

    /// Horizon within which a recovery is expected to take effect.
    pub max_recovery_minutes: u32,
}

impl Default for TsiTargets {
    fn default() -> Self {
        Self {
            target: 0.75,
            min: 0.70,
            critical: 0.55,
            max_recovery_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryBudgets {
    pub latency_ms_max: u64,
    pub cost_usd_max: f64,
}

impl Default for RecoveryBudgets {
    fn default() -> Self {
        Self {
            latency_ms_max: 800,
            cost_usd_max: 0.50,
        }
    }
}

/// Concentration thresholds for triggering recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerThresholds {
    /// Provider concentration above this triggers on its own.
    pub concentration_cap: f64,

    /// Concentration at or above this triggers when the forecast is below target.
    pub combined_concentration: f64,
}

impl Default for TriggerThresholds {
    fn default() -> Self {
        Self {
            concentration_cap: 0.85,
            combined_concentration: 0.70,
        }
    }
}

/// Weights of the plan score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Bonus per unit of predicted independence gain.
    pub diversity_bonus: f64,

    /// Penalty per millisecond of predicted latency.
    pub latency_penalty_per_ms: f64,

    /// Penalty per USD of predicted cost.
    pub cost_penalty_per_usd: f64,

    /// Penalty per unit the pessimistic TSI falls below the floor.
    pub confidence_low_penalty: f64,

    /// Fixed penalty by tier.
    pub tier_penalties: BTreeMap<u8, f64>,

    /// Penalty for tiers missing from `tier_penalties`.
    pub default_tier_penalty: f64,

    /// Oscillation index above which aggressive plans are penalised.
    pub oscillation_threshold: f64,

    /// Penalty at the threshold; grows linearly with the oscillation index.
    pub oscillation_penalty: f64,

    /// Upper bound of the oscillation penalty, as a multiple of `oscillation_penalty`.
    pub oscillation_penalty_cap: f64,

    /// Lowest tier considered aggressive.
    pub aggressive_tier: u8,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            diversity_bonus: 0.15,
            latency_penalty_per_ms: 0.0005,
            cost_penalty_per_usd: 0.25,
            confidence_low_penalty: 0.30,
            tier_penalties: BTreeMap::from([(1, 0.00), (2, 0.05), (3, 0.12)]),
            default_tier_penalty: 0.10,
            oscillation_threshold: 0.15,
            oscillation_penalty: 0.10,
            oscillation_penalty_cap: 3.0,
            aggressive_tier: 3,
        }
    }
}

impl ScoringWeights {
    pub fn tier_penalty(&self, tier: u8) -> f64 {
        self.tier_penalties
            .get(&tier)
            .copied()
            .unwrap_or(self.default_tier_penalty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParams {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Bound on the magnitude of the integral term.
    pub integral_cap: f64,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            kp: 0.5,
            ki: 0.2,
            kd: 0.1,
            integral_cap: 2.0,
        }
    }
}

/// Rollout damping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DampingConfig {
    pub pid: PidParams,

    /// Oscillation index above which rollout is slowed.
    pub max_oscillation: f64,

    /// Minimum time between applied adjustments.
    pub cooldown: Duration,

    /// Lower rollout bound.
    pub min_rollout: f64,

    /// Upper rollout bound.
    pub max_rollout: f64,

    /// Concentration at or above which rollout is boosted.
    pub concentration_boost_threshold: f64,

    /// Boost added under high concentration or critical forecast.
    pub urgency_boost: f64,

    /// Multiplier applied when oscillating.
    pub oscillation_factor: f64,

    /// Cap on the cooldown intervals one controller step may span.
    #[serde(default = "default_max_elapsed_intervals")]
    pub max_elapsed_intervals: f64,
}

fn default_max_elapsed_intervals() -> f64 {
    5.0
}

impl Default for DampingConfig {
    fn default() -> Self {
        Self {
            pid: PidParams::default(),
            max_oscillation: 0.15,
            cooldown: Duration::from_secs(60),
            min_rollout: 0.15,
            max_rollout: 1.0,
            concentration_boost_threshold: 0.75,
            urgency_boost: 0.15,
            oscillation_factor: 0.8,
            max_elapsed_intervals: default_max_elapsed_intervals(),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time an open circuit waits before allowing a probe.
    pub cooldown: Duration,

    /// Probes allowed while half-open.
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(120),
            half_open_max_attempts: 1,
        }
    }
}

/// Post-recovery verification configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Replay samples expected for the meta-validation check.
    pub replay_samples: usize,

    /// Whether meta-validation results participate in verification.
    pub mvi_check: bool,

    /// TSI gain required to count as improved.
    pub min_tsi_improvement: f64,

    /// TSI loss that forces rollback.
    pub max_tsi_degradation: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            replay_samples: 3,
            mvi_check: true,
            min_tsi_improvement: 0.02,
            max_tsi_degradation: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MviConfig {
    pub pass_threshold: f64,
    pub replay_weight: f64,
    pub recovery_weight: f64,
    pub coherence_weight: f64,
    /// Repeated decisions used to measure recovery consistency.
    pub consistency_trials: usize,
    /// Largest plausible single-step TSI change.
    pub max_tsi_jump: f64,
}

impl Default for MviConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 0.80,
            replay_weight: 0.40,
            recovery_weight: 0.35,
            coherence_weight: 0.25,
            consistency_trials: 5,
            max_tsi_jump: 0.40,
        }
    }
}

/// Trust signal tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsiConfig {
    /// Sliding window capacity.
    pub window_size: usize,

    /// Exponential decay per minute of sample age.
    pub decay_lambda: f64,

    /// Forecast horizon.
    pub forecast_horizon_minutes: f64,

    /// Samples required before a trend is fitted.
    pub min_trend_samples: usize,

    /// Largest move of the forecast away from the current score.
    #[serde(default = "default_max_forecast_delta")]
    pub max_forecast_delta: f64,

    pub base_pass: f64,
    pub base_warn: f64,
    pub base_refuse: f64,
    pub base_error: f64,

    /// Weight of validator agreement around 0.5.
    pub agreement_weight: f64,

    /// Penalty per second of latency.
    pub latency_penalty_per_s: f64,

    /// Penalty when the challenger fired.
    pub challenger_penalty: f64,

    /// Score reported for an empty window.
    pub empty_score: f64,

    /// Forecast reported for an empty window.
    pub empty_forecast: f64,
}

impl Default for TsiConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            decay_lambda: 0.1,
            forecast_horizon_minutes: 15.0,
            min_trend_samples: 3,
            max_forecast_delta: default_max_forecast_delta(),
            base_pass: 0.90,
            base_warn: 0.70,
            base_refuse: 0.45,
            base_error: 0.30,
            agreement_weight: 0.20,
            latency_penalty_per_s: 0.02,
            challenger_penalty: 0.03,
            empty_score: 0.82,
            empty_forecast: 0.80,
        }
    }
}

fn default_max_forecast_delta() -> f64 {
    0.15
}

/// One provider entry of the consensus configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Usage weight; 1.0 when absent.
    #[serde(default)]
    pub weight: Option<f64>,
}

/// Providers of the governed pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRoster {
    pub primary: Option<ProviderSpec>,
    pub validators: Vec<ProviderSpec>,
}

impl ProviderRoster {
    /// Usage weight per provider, summed across roles.
    pub fn usage_weights(&self) -> BTreeMap<String, f64> {
        let mut weights = BTreeMap::new();
        for spec in self.primary.iter().chain(self.validators.iter()) {
            *weights.entry(spec.provider.clone()).or_insert(0.0) += spec.weight.unwrap_or(1.0);
        }
        weights
    }
}

/// A statically defined recovery action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub id: String,
    /// 1 (least disruptive) to 3 (most aggressive).
    pub tier: u8,
    pub predicted_tsi_median: f64,
    pub predicted_tsi_low: f64,
    pub predicted_tsi_high: f64,
    pub predicted_latency_ms: u64,
    pub predicted_cost_usd: f64,
    pub predicted_independence_gain: f64,
    /// Opaque routing change applied when the plan is chosen.
    #[serde(default)]
    pub routing_patch: Value,
}

impl RecoveryPlan {
    /// A plan with the compiler's default predictions.
    pub fn new(id: impl Into<String>, tier: u8) -> Self {
        Self {
            id: id.into(),
            tier,
            predicted_tsi_median: 0.72,
            predicted_tsi_low: 0.65,
            predicted_tsi_high: 0.80,
            predicted_latency_ms: 200,
            predicted_cost_usd: 0.01,
            predicted_independence_gain: 0.0,
            routing_patch: Value::Object(Default::default()),
        }
    }
}
