//! Deterministic recovery plan selection.
//!
//! The engine never reads clocks or shared state: every decision is a pure
//! function of the compiled policy and a [`DecisionInput`], which the decision
//! carries so that it can be replayed later.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tek_epack::{stable_hash, HashAlgorithm};
use tracing::debug;

use crate::config::{RecoveryPlan, ResiliencePolicy};

/// Externally reported health of the governed system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    #[default]
    Ok,
    Degraded,
    Incident,
}

impl SystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Ok => "ok",
            SystemStatus::Degraded => "degraded",
            SystemStatus::Incident => "incident",
        }
    }
}

/// Trust and dependency state a decision is made against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    pub tsi_current: f64,
    pub tsi_forecast: f64,
    pub der_density: f64,
    pub concentration: f64,
    #[serde(default)]
    pub status: SystemStatus,
    /// Recent TSI flip-flop frequency in [0, 1].
    #[serde(default)]
    pub oscillation: f64,
}

/// Why recovery was triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TriggerReason {
    SystemStatus { status: SystemStatus },
    ForecastBelowMin { forecast: f64, min: f64 },
    ConcentrationAboveCap { concentration: f64, cap: f64 },
    TsiBelowCritical { tsi: f64, critical: f64 },
    ConcentrationWithLowForecast {
        concentration: f64,
        threshold: f64,
        forecast: f64,
        target: f64,
    },
}

impl TriggerReason {
    pub fn code(&self) -> String {
        match self {
            TriggerReason::SystemStatus { status } => format!("system_status={}", status.as_str()),
            TriggerReason::ForecastBelowMin { min, .. } => format!("tsi_forecast<{min:.2}"),
            TriggerReason::ConcentrationAboveCap { cap, .. } => format!("concentration>{cap:.2}"),
            TriggerReason::TsiBelowCritical { critical, .. } => {
                format!("tsi_current<{critical:.2}")
            }
            TriggerReason::ConcentrationWithLowForecast { .. } => {
                "concentration_high+tsi_below_target".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvaluation {
    pub reasons: Vec<TriggerReason>,
}

impl TriggerEvaluation {
    pub fn triggered(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// Compact reason string, `no_trigger` when nothing fired.
    pub fn summary(&self) -> String {
        if self.reasons.is_empty() {
            return "no_trigger".to_string();
        }
        let codes: Vec<String> = self.reasons.iter().map(TriggerReason::code).collect();
        format!("triggered:{}", codes.join("|"))
    }
}

/// Everything `decide` depends on besides the policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub state: RecoveryState,
    /// Plans excluded by circuit breakers at decision time.
    pub excluded_plans: BTreeSet<String>,
    pub decided_at: DateTime<Utc>,
}

/// Why a candidate plan was not eligible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rejection", rename_all = "snake_case")]
pub enum PlanRejection {
    CircuitOpen,
    LatencyBudgetExceeded { predicted_ms: u64, budget_ms: u64 },
    CostBudgetExceeded { predicted_usd: f64, budget_usd: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEvaluation {
    pub plan_id: String,
    pub tier: u8,
    /// Present for eligible plans only.
    pub score: Option<f64>,
    pub rejected: Option<PlanRejection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Selected { plan_id: String },
    NoEligiblePlan,
    NotTriggered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryDecision {
    /// Derived from the decision input; equal inputs yield equal ids.
    pub decision_id: String,
    pub input: DecisionInput,
    pub triggers: TriggerEvaluation,
    pub evaluated: Vec<PlanEvaluation>,
    pub outcome: DecisionOutcome,
    pub chosen: Option<RecoveryPlan>,
}

impl RecoveryDecision {
    pub fn chosen_plan_id(&self) -> Option<&str> {
        match &self.outcome {
            DecisionOutcome::Selected { plan_id } => Some(plan_id),
            _ => None,
        }
    }

    /// Digest of the decision's observable result.
    pub fn fingerprint(&self) -> String {
        let evaluated: Vec<_> = self
            .evaluated
            .iter()
            .map(|e| json!({"plan_id": e.plan_id, "score": e.score, "rejected": e.rejected}))
            .collect();
        stable_hash(
            &json!({
                "decision_id": self.decision_id,
                "outcome": self.outcome,
                "evaluated": evaluated,
            }),
            HashAlgorithm::Sha256,
        )
    }
}

/// Selects recovery plans under a compiled policy.
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    policy: Arc<ResiliencePolicy>,
}

impl RecoveryEngine {
    pub fn new(policy: Arc<ResiliencePolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    pub fn evaluate_triggers(&self, state: &RecoveryState) -> TriggerEvaluation {
        let targets = &self.policy.targets;
        let thresholds = &self.policy.triggers;
        let mut reasons = Vec::new();

        if state.status != SystemStatus::Ok {
            reasons.push(TriggerReason::SystemStatus {
                status: state.status,
            });
        }
        if state.tsi_forecast < targets.min {
            reasons.push(TriggerReason::ForecastBelowMin {
                forecast: state.tsi_forecast,
                min: targets.min,
            });
        }
        if state.concentration > thresholds.concentration_cap {
            reasons.push(TriggerReason::ConcentrationAboveCap {
                concentration: state.concentration,
                cap: thresholds.concentration_cap,
            });
        }
        if state.tsi_current < targets.critical {
            reasons.push(TriggerReason::TsiBelowCritical {
                tsi: state.tsi_current,
                critical: targets.critical,
            });
        }
        if state.concentration >= thresholds.combined_concentration
            && state.tsi_forecast < targets.target
        {
            reasons.push(TriggerReason::ConcentrationWithLowForecast {
                concentration: state.concentration,
                threshold: thresholds.combined_concentration,
                forecast: state.tsi_forecast,
                target: targets.target,
            });
        }

        TriggerEvaluation { reasons }
    }

    /// Oscillation penalty for a plan of the given tier.
    pub fn oscillation_penalty(&self, oscillation: f64, tier: u8) -> f64 {
        let w = &self.policy.scoring;
        if oscillation.is_nan()
            || oscillation <= w.oscillation_threshold
            || w.oscillation_threshold <= 0.0
        {
            return 0.0;
        }
        let aggressiveness = f64::from(tier) / f64::from(w.aggressive_tier.max(1));
        let growth = (oscillation / w.oscillation_threshold).min(w.oscillation_penalty_cap);
        w.oscillation_penalty * aggressiveness * growth
    }

    pub fn score_plan(&self, state: &RecoveryState, plan: &RecoveryPlan) -> f64 {
        let w = &self.policy.scoring;
        let gain = (plan.predicted_tsi_median - state.tsi_current).max(0.0);
        let diversity = w.diversity_bonus * plan.predicted_independence_gain;
        let latency = w.latency_penalty_per_ms * plan.predicted_latency_ms as f64;
        let cost = w.cost_penalty_per_usd * plan.predicted_cost_usd;
        let low_risk = (self.policy.targets.min - plan.predicted_tsi_low).max(0.0);
        let confidence = w.confidence_low_penalty * low_risk;

        let base = gain + diversity - latency - cost - confidence;
        base - w.tier_penalty(plan.tier) - self.oscillation_penalty(state.oscillation, plan.tier)
    }

    fn rejection(&self, plan: &RecoveryPlan, excluded: &BTreeSet<String>) -> Option<PlanRejection> {
        let budgets = &self.policy.budgets;
        if excluded.contains(&plan.id) {
            Some(PlanRejection::CircuitOpen)
        } else if plan.predicted_latency_ms > budgets.latency_ms_max {
            Some(PlanRejection::LatencyBudgetExceeded {
                predicted_ms: plan.predicted_latency_ms,
                budget_ms: budgets.latency_ms_max,
            })
        } else if plan.predicted_cost_usd > budgets.cost_usd_max {
            Some(PlanRejection::CostBudgetExceeded {
                predicted_usd: plan.predicted_cost_usd,
                budget_usd: budgets.cost_usd_max,
            })
        } else {
            None
        }
    }

    fn decision_id(input: &DecisionInput) -> String {
        let digest = stable_hash(&json!(input), HashAlgorithm::Sha256);
        format!("dec-{}", &digest[..16])
    }

    pub fn decide(&self, input: &DecisionInput) -> RecoveryDecision {
        let decision_id = Self::decision_id(input);
        let triggers = self.evaluate_triggers(&input.state);

        if !triggers.triggered() {
            return RecoveryDecision {
                decision_id,
                input: input.clone(),
                triggers,
                evaluated: Vec::new(),
                outcome: DecisionOutcome::NotTriggered,
                chosen: None,
            };
        }

        let mut evaluated = Vec::with_capacity(self.policy.plans.len());
        let mut eligible: Vec<(f64, &RecoveryPlan)> = Vec::new();
        for plan in &self.policy.plans {
            match self.rejection(plan, &input.excluded_plans) {
                Some(rejection) => evaluated.push(PlanEvaluation {
                    plan_id: plan.id.clone(),
                    tier: plan.tier,
                    score: None,
                    rejected: Some(rejection),
                }),
                None => {
                    let score = self.score_plan(&input.state, plan);
                    evaluated.push(PlanEvaluation {
                        plan_id: plan.id.clone(),
                        tier: plan.tier,
                        score: Some(score),
                        rejected: None,
                    });
                    eligible.push((score, plan));
                }
            }
        }

        eligible.sort_by(|(sa, a), (sb, b)| rank(*sa, a, *sb, b));
        let chosen = eligible.first().map(|(_, plan)| (*plan).clone());
        let outcome = match &chosen {
            Some(plan) => DecisionOutcome::Selected {
                plan_id: plan.id.clone(),
            },
            None => DecisionOutcome::NoEligiblePlan,
        };

        debug!(
            decision_id = %decision_id,
            outcome = ?outcome,
            candidates = evaluated.len(),
            "Recovery decision made"
        );

        RecoveryDecision {
            decision_id,
            input: input.clone(),
            triggers,
            evaluated,
            outcome,
            chosen,
        }
    }

    /// Recompute a recorded decision from its input and compare results.
    pub fn replay_decision(&self, decision: &RecoveryDecision) -> bool {
        self.decide(&decision.input).fingerprint() == decision.fingerprint()
    }
}

/// Best first: higher score, higher independence gain, lower tier, plan id.
fn rank(score_a: f64, a: &RecoveryPlan, score_b: f64, b: &RecoveryPlan) -> Ordering {
    score_b
        .total_cmp(&score_a)
        .then_with(|| {
            b.predicted_independence_gain
                .total_cmp(&a.predicted_independence_gain)
        })
        .then_with(|| a.tier.cmp(&b.tier))
        .then_with(|| a.id.cmp(&b.id))
}
