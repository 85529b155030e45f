//! Replay outcomes, per-step reports and batch summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Definitive result of one replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayOutcome {
    Verified,
    Drift,
    TamperDetected,
    Indeterminate,
}

impl ReplayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayOutcome::Verified => "VERIFIED",
            ReplayOutcome::Drift => "DRIFT",
            ReplayOutcome::TamperDetected => "TAMPER_DETECTED",
            ReplayOutcome::Indeterminate => "INDETERMINATE",
        }
    }
}

impl std::fmt::Display for ReplayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The replay checklist, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStepKind {
    HashIntegrity,
    EnvironmentEquivalence,
    RoutingDeterminism,
    SafetyConsistency,
    ManifestConsistency,
    ChainLinkage,
}

impl ReplayStepKind {
    pub const ALL: [ReplayStepKind; 6] = [
        ReplayStepKind::HashIntegrity,
        ReplayStepKind::EnvironmentEquivalence,
        ReplayStepKind::RoutingDeterminism,
        ReplayStepKind::SafetyConsistency,
        ReplayStepKind::ManifestConsistency,
        ReplayStepKind::ChainLinkage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayStepKind::HashIntegrity => "hash_integrity",
            ReplayStepKind::EnvironmentEquivalence => "environment_equivalence",
            ReplayStepKind::RoutingDeterminism => "routing_determinism",
            ReplayStepKind::SafetyConsistency => "safety_consistency",
            ReplayStepKind::ManifestConsistency => "manifest_consistency",
            ReplayStepKind::ChainLinkage => "chain_linkage",
        }
    }
}

impl std::fmt::Display for ReplayStepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    /// Divergence explained by drift; does not fail replay.
    Flagged,
    Failed,
    /// Evidence needed for the step is missing or could not be evaluated.
    Unresolved,
    /// Nothing to check.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: ReplayStepKind,
    pub status: StepStatus,
    pub detail: String,
    /// Earliest record seq at which this step diverged.
    pub divergence_seq: Option<u64>,
}

/// Structured outcome of one replay. Contains no clocks or random ids, so
/// replaying the same package twice yields identical reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub replay_id: String,
    pub package_hash: String,
    pub outcome: ReplayOutcome,
    pub steps: Vec<StepReport>,
    pub failing_step: Option<ReplayStepKind>,
    pub earliest_divergence: Option<u64>,
    pub chain_link_rate: f64,
    pub drift_factors: Vec<String>,
    /// Percentage of executed steps that passed, one decimal.
    pub determinism_index: f64,
    pub records_replayed: usize,
}

impl ReplayReport {
    pub fn step(&self, kind: ReplayStepKind) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == kind)
    }

    /// VERIFIED or DRIFT.
    pub fn governance_match(&self) -> bool {
        matches!(
            self.outcome,
            ReplayOutcome::Verified | ReplayOutcome::Drift
        )
    }
}

/// Aggregate over a batch of replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub total: usize,
    pub determinism_index: f64,
    pub verified_rate: f64,
    pub governance_match_rate: f64,
    pub chain_link_rate: f64,
    pub outcome_counts: BTreeMap<ReplayOutcome, usize>,
    /// Replay ids of reports that detected tampering.
    pub tampered: Vec<String>,
}

impl ReplaySummary {
    pub fn from_reports(reports: &[ReplayReport]) -> Self {
        let total = reports.len();
        let mut outcome_counts = BTreeMap::new();
        for report in reports {
            *outcome_counts.entry(report.outcome).or_insert(0) += 1;
        }
        if total == 0 {
            return Self {
                total,
                determinism_index: 0.0,
                verified_rate: 0.0,
                governance_match_rate: 0.0,
                chain_link_rate: 0.0,
                outcome_counts,
                tampered: Vec::new(),
            };
        }

        let n = total as f64;
        let count = |pred: &dyn Fn(&ReplayReport) -> bool| {
            reports.iter().filter(|r| pred(r)).count() as f64
        };
        Self {
            total,
            determinism_index: round1(reports.iter().map(|r| r.determinism_index).sum::<f64>() / n),
            verified_rate: count(&|r| r.outcome == ReplayOutcome::Verified) / n,
            governance_match_rate: count(&|r| r.governance_match()) / n,
            chain_link_rate: reports.iter().map(|r| r.chain_link_rate).sum::<f64>() / n,
            outcome_counts,
            tampered: reports
                .iter()
                .filter(|r| r.outcome == ReplayOutcome::TamperDetected)
                .map(|r| r.replay_id.clone())
                .collect(),
        }
    }
}

pub(crate) fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
