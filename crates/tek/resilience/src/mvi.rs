//! Meta-Validation Index: checks that the governance machinery itself behaves
//! deterministically.
//!
//! Three sub-scores are combined:
//!
//! - replay stability: repeated replays of equivalent packages agree
//! - recovery consistency: repeated decisions on one input pick one plan
//! - TSI coherence: the trust signal is finite, bounded and free of jumps
//!
//! The index only consumes results that were already computed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tek_replay::ReplayReport;
use tracing::debug;

use crate::config::MviConfig;
use crate::resilience::{DecisionInput, RecoveryEngine};

/// Score assumed for a check that has nothing to look at.
const INSUFFICIENT_DATA_SCORE: f64 = 0.5;

/// Inputs of one MVI computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MviInputs<'a> {
    /// Primary replay run.
    pub replay_primary: &'a [ReplayReport],
    /// Repeated replay run over equivalent packages.
    pub replay_repeat: &'a [ReplayReport],
    pub recovery: Option<(&'a RecoveryEngine, &'a DecisionInput)>,
    pub tsi_values: &'a [f64],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MviSnapshot {
    pub mvi_score: f64,
    pub replay_stability: f64,
    pub recovery_consistency: f64,
    pub tsi_coherence: f64,
    pub passed: bool,
    /// Primary replay reports whose outcome was not a governance match.
    pub governance_mismatches: usize,
    /// Primary replay reports inspected.
    pub samples: usize,
    pub details: Vec<String>,
}

impl MviSnapshot {
    pub fn degraded(&self) -> bool {
        !self.passed
    }

    /// No replay disagreed with governance and recovery was deterministic.
    pub fn governance_match(&self) -> bool {
        self.governance_mismatches == 0 && self.recovery_consistency >= 1.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetaValidationIndex {
    config: MviConfig,
}

impl MetaValidationIndex {
    pub fn new(config: MviConfig) -> Self {
        Self { config }
    }

    pub fn replay_stability(
        &self,
        primary: &[ReplayReport],
        repeat: &[ReplayReport],
    ) -> (f64, Vec<String>) {
        if primary.is_empty() || repeat.is_empty() {
            return (
                INSUFFICIENT_DATA_SCORE,
                vec!["replay_stability:insufficient_data".to_string()],
            );
        }
        let mut details = Vec::new();
        let n = primary.len().min(repeat.len());
        let mut matches = 0;
        for (i, (a, b)) in primary.iter().zip(repeat).enumerate() {
            let stable = a.outcome == b.outcome
                && a.earliest_divergence == b.earliest_divergence
                && (a.determinism_index - b.determinism_index).abs() < 0.01;
            if stable {
                matches += 1;
            } else {
                details.push(format!("replay_stability:divergence_at_record_{i}"));
            }
        }
        let score = matches as f64 / n as f64;
        if matches == n {
            details.push("replay_stability:perfect".to_string());
        }
        (round4(score), details)
    }

    pub fn recovery_consistency(
        &self,
        engine: &RecoveryEngine,
        input: &DecisionInput,
    ) -> (f64, Vec<String>) {
        if engine.policy().plans.is_empty() {
            return (1.0, vec!["recovery_consistency:no_plans".to_string()]);
        }
        let trials = self.config.consistency_trials.max(1);
        let choices: BTreeSet<Option<String>> = (0..trials)
            .map(|_| engine.decide(input).chosen_plan_id().map(str::to_string))
            .collect();

        if choices.len() == 1 {
            let always = choices
                .iter()
                .next()
                .and_then(|c| c.clone())
                .unwrap_or_else(|| "none".to_string());
            (
                1.0,
                vec![format!("recovery_consistency:deterministic:always={always}")],
            )
        } else {
            (
                round4(1.0 / choices.len() as f64),
                vec![format!(
                    "recovery_consistency:non_deterministic:choices={}",
                    choices.len()
                )],
            )
        }
    }

    pub fn tsi_coherence(&self, values: &[f64]) -> (f64, Vec<String>) {
        if values.is_empty() {
            return (
                INSUFFICIENT_DATA_SCORE,
                vec!["tsi_coherence:no_data".to_string()],
            );
        }
        let mut details = Vec::new();
        let mut issues = 0usize;
        for (i, v) in values.iter().enumerate() {
            if !(0.0..=1.0).contains(v) {
                issues += 1;
                details.push(format!("tsi_coherence:out_of_bounds_at_{i}:{v}"));
            }
            if !v.is_finite() {
                issues += 1;
                details.push(format!("tsi_coherence:nan_or_inf_at_{i}"));
            }
        }
        for (i, pair) in values.windows(2).enumerate() {
            if (pair[1] - pair[0]).abs() > self.config.max_tsi_jump {
                issues += 1;
                details.push(format!(
                    "tsi_coherence:impossible_jump_at_{}:{:.3}->{:.3}",
                    i + 1,
                    pair[0],
                    pair[1]
                ));
            }
        }
        let points = values.len() + values.len().saturating_sub(1);
        let score = (1.0 - issues as f64 / points.max(1) as f64).max(0.0);
        if issues == 0 {
            details.push("tsi_coherence:clean".to_string());
        }
        (round4(score), details)
    }

    pub fn compute(&self, inputs: &MviInputs<'_>) -> MviSnapshot {
        let mut details = Vec::new();

        let (replay, d) = self.replay_stability(inputs.replay_primary, inputs.replay_repeat);
        details.extend(d);

        let (recovery, d) = match inputs.recovery {
            Some((engine, input)) => self.recovery_consistency(engine, input),
            None => (1.0, vec!["recovery_consistency:skipped_no_engine".to_string()]),
        };
        details.extend(d);

        let (coherence, d) = self.tsi_coherence(inputs.tsi_values);
        details.extend(d);

        let c = &self.config;
        let mvi_score = round4(
            c.replay_weight * replay
                + c.recovery_weight * recovery
                + c.coherence_weight * coherence,
        );
        let governance_mismatches = inputs
            .replay_primary
            .iter()
            .filter(|r| !r.governance_match())
            .count();

        let snapshot = MviSnapshot {
            mvi_score,
            replay_stability: replay,
            recovery_consistency: recovery,
            tsi_coherence: coherence,
            passed: mvi_score >= c.pass_threshold,
            governance_mismatches,
            samples: inputs.replay_primary.len(),
            details,
        };
        debug!(
            mvi = snapshot.mvi_score,
            passed = snapshot.passed,
            mismatches = governance_mismatches,
            "Meta-validation computed"
        );
        snapshot
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
