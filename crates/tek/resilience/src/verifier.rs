//! Post-recovery verification.
//!
//! Closes the recovery loop: once a plan has been active for a while, the
//! verifier checks that trust actually improved and recommends rollback
//! when it did not.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{TsiTargets, VerificationConfig};
use crate::mvi::MviSnapshot;

/// Why verification reached its verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum VerificationReason {
    RecoveryVerifiedOk,
    /// Improvement below the required minimum.
    TsiFlat { delta: f64, min_improvement: f64 },
    TsiDegraded { delta: f64 },
    DegradationExceedsThreshold { delta: f64, threshold: f64 },
    TsiStillCritical { tsi: f64, critical: f64 },
    GovernanceMismatch { mismatches: usize, samples: usize },
    MviDegraded { mvi_score: f64, threshold: f64 },
}

impl VerificationReason {
    pub fn forces_rollback(&self) -> bool {
        matches!(
            self,
            VerificationReason::DegradationExceedsThreshold { .. }
                | VerificationReason::TsiStillCritical { .. }
                | VerificationReason::GovernanceMismatch { .. }
                | VerificationReason::MviDegraded { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub plan_id: String,
    pub tsi_before: f64,
    pub tsi_after: f64,
    pub improved: bool,
    pub mvi_passed: bool,
    pub samples_checked: usize,
    pub rollback_recommended: bool,
    pub reasons: Vec<VerificationReason>,
}

#[derive(Debug, Clone)]
pub struct PostRecoveryVerifier {
    config: VerificationConfig,
    targets: TsiTargets,
    mvi_pass_threshold: f64,
}

impl PostRecoveryVerifier {
    pub fn new(config: VerificationConfig, targets: TsiTargets, mvi_pass_threshold: f64) -> Self {
        Self {
            config,
            targets,
            mvi_pass_threshold,
        }
    }

    pub fn verify(
        &self,
        plan_id: &str,
        tsi_before: f64,
        tsi_after: f64,
        mvi: Option<&MviSnapshot>,
    ) -> VerificationResult {
        let mut reasons = Vec::new();
        let delta = tsi_after - tsi_before;
        let improved = delta >= self.config.min_tsi_improvement;

        if !improved {
            if delta < 0.0 {
                reasons.push(VerificationReason::TsiDegraded { delta });
                if delta.abs() >= self.config.max_tsi_degradation {
                    reasons.push(VerificationReason::DegradationExceedsThreshold {
                        delta,
                        threshold: self.config.max_tsi_degradation,
                    });
                }
            } else {
                reasons.push(VerificationReason::TsiFlat {
                    delta,
                    min_improvement: self.config.min_tsi_improvement,
                });
            }
        }

        if tsi_after < self.targets.critical {
            reasons.push(VerificationReason::TsiStillCritical {
                tsi: tsi_after,
                critical: self.targets.critical,
            });
        }

        let mut mvi_passed = true;
        let mut samples_checked = 0;
        if let Some(snapshot) = mvi.filter(|_| self.config.mvi_check) {
            samples_checked = snapshot.samples;
            if !snapshot.governance_match() {
                mvi_passed = false;
                reasons.push(VerificationReason::GovernanceMismatch {
                    mismatches: snapshot.governance_mismatches,
                    samples: snapshot.samples,
                });
            }
            if snapshot.degraded() {
                mvi_passed = false;
                reasons.push(VerificationReason::MviDegraded {
                    mvi_score: snapshot.mvi_score,
                    threshold: self.mvi_pass_threshold,
                });
            }
        }

        let rollback_recommended = reasons.iter().any(VerificationReason::forces_rollback);
        if reasons.is_empty() {
            reasons.push(VerificationReason::RecoveryVerifiedOk);
        }

        info!(
            plan_id = %plan_id,
            delta,
            improved,
            rollback = rollback_recommended,
            "Recovery verified"
        );

        VerificationResult {
            plan_id: plan_id.to_string(),
            tsi_before,
            tsi_after,
            improved,
            mvi_passed,
            samples_checked,
            rollback_recommended,
            reasons,
        }
    }
}
