//! The replay engine.
//!
//! Replay walks a fixed checklist over a [`ReplayPackage`] and classifies the
//! result as VERIFIED, DRIFT, TAMPER_DETECTED or INDETERMINATE. It is a pure
//! function of the package and the engine's environment, manifest and
//! collaborators.

use std::sync::Arc;

use serde_json::{json, Value};
use tek_epack::{stable_hash, verify_records, HashAlgorithm};
use tracing::{debug, info, warn};

use crate::collaborators::{CollaboratorError, RoutingOracle, SafetyClassifier};
use crate::environment::{BuildManifest, EnvironmentFingerprint};
use crate::package::{RecordedDecision, ReplayPackage};
use crate::report::{round1, ReplayOutcome, ReplayReport, ReplayStepKind, StepReport, StepStatus};

/// Replays packages against the current environment and build.
#[derive(Clone)]
pub struct ReplayEngine {
    environment: EnvironmentFingerprint,
    manifest: BuildManifest,
    router: Option<Arc<dyn RoutingOracle>>,
    safety: Option<Arc<dyn SafetyClassifier>>,
}

impl ReplayEngine {
    pub fn new(environment: EnvironmentFingerprint, manifest: BuildManifest) -> Self {
        Self {
            environment,
            manifest,
            router: None,
            safety: None,
        }
    }

    pub fn with_router(mut self, router: Arc<dyn RoutingOracle>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_safety_classifier(mut self, safety: Arc<dyn SafetyClassifier>) -> Self {
        self.safety = Some(safety);
        self
    }

    pub fn environment(&self) -> &EnvironmentFingerprint {
        &self.environment
    }

    pub fn manifest(&self) -> &BuildManifest {
        &self.manifest
    }

    /// Replay `package` and classify the result.
    pub fn replay(&self, package: &ReplayPackage) -> ReplayReport {
        let mut run = Run::default();

        // 1. Hash integrity
        if package.records.is_empty() {
            run.record(
                ReplayStepKind::HashIntegrity,
                StepStatus::Unresolved,
                "package carries no records",
                None,
            );
            return self.finish(package, run, 1.0);
        }
        let integrity = verify_records(&package.records, package.anchor.as_ref());
        let link_rate = integrity.chain_link_rate();
        let content_break = integrity.breaks.iter().find(|b| !b.kind.is_ordering());
        if !package.verify_seal() {
            run.record(
                ReplayStepKind::HashIntegrity,
                StepStatus::Failed,
                "package seal does not match package content",
                content_break
                    .map(|b| b.seq)
                    .or_else(|| package.records.first().map(|r| r.seq)),
            );
            return self.finish(package, run, link_rate);
        }
        if let Some(b) = content_break {
            run.record(
                ReplayStepKind::HashIntegrity,
                StepStatus::Failed,
                format!("seq {}: {} ({})", b.seq, b.kind, b.detail),
                Some(b.seq),
            );
            return self.finish(package, run, link_rate);
        }
        run.record(
            ReplayStepKind::HashIntegrity,
            StepStatus::Passed,
            format!(
                "{} record hashes and {} links verified",
                integrity.records_checked, integrity.links_checked
            ),
            None,
        );

        // 2. Environment equivalence
        let env_drift = package.environment.drift_factors(&self.environment);
        if env_drift.is_empty() {
            run.record(
                ReplayStepKind::EnvironmentEquivalence,
                StepStatus::Passed,
                "environment fingerprint matches",
                None,
            );
        } else {
            run.record(
                ReplayStepKind::EnvironmentEquivalence,
                StepStatus::Flagged,
                format!("DRIFT_RISK: {}", env_drift.join(", ")),
                None,
            );
            run.drift_factors.extend(env_drift);
        }

        // 3. Routing determinism
        let routing_config = package.governance.routing_config.clone();
        let routing = self.recompute(
            package,
            &package.routing_decisions,
            "routing",
            |input| match (&self.router, &routing_config) {
                (None, _) => Err(CollaboratorError::new("routing", "no routing oracle configured")),
                (_, None) => Err(CollaboratorError::new(
                    "routing",
                    "routing configuration snapshot missing",
                )),
                (Some(router), Some(config)) => router.route(input, config),
            },
        );
        let routing_pending = run.recompute_step(ReplayStepKind::RoutingDeterminism, routing);

        // 4. Safety-screening consistency
        let safety = self.recompute(
            package,
            &package.safety_classifications,
            "safety classification",
            |input| match &self.safety {
                None => Err(CollaboratorError::new(
                    "safety",
                    "no safety classifier configured",
                )),
                Some(classifier) => classifier.classify(input),
            },
        );
        let safety_pending = run.recompute_step(ReplayStepKind::SafetyConsistency, safety);

        // 5. Profile/build-manifest consistency
        let manifest_drift = self.manifest.drift_factors(
            &package.governance.kernel_version,
            &package.governance.feature_flags,
        );
        if manifest_drift.is_empty() {
            run.record(
                ReplayStepKind::ManifestConsistency,
                StepStatus::Passed,
                "kernel version and feature flags match",
                None,
            );
        } else {
            run.record(
                ReplayStepKind::ManifestConsistency,
                StepStatus::Flagged,
                format!("build differs: {}", manifest_drift.join(", ")),
                None,
            );
            run.drift_factors.extend(manifest_drift);
        }

        // Divergence in 3-4 is drift when declared or explained by 2/5.
        let explained = !run.drift_factors.is_empty();
        for (kind, pending) in [
            (ReplayStepKind::RoutingDeterminism, routing_pending),
            (ReplayStepKind::SafetyConsistency, safety_pending),
        ] {
            let Some(first_seq) = pending else { continue };
            if package.governance.determinism_policy.tolerates(kind) {
                run.settle(kind, StepStatus::Flagged, "within declared nondeterminism");
                run.drift_factors.push(format!("nondeterminism.{kind}"));
            } else if explained {
                run.settle(kind, StepStatus::Flagged, "explained by environment or build drift");
                run.drift_factors.push(format!("divergence.{kind}"));
            } else {
                run.settle(
                    kind,
                    StepStatus::Failed,
                    "unexplained divergence under strict determinism",
                );
                debug!(step = %kind, seq = first_seq, "unexplained replay divergence");
            }
        }

        // 6. Chain linkage
        let ordering = integrity.breaks.iter().find(|b| b.kind.is_ordering());
        let head_ok = package
            .records
            .last()
            .map(|last| last.hash == package.head_hash)
            .unwrap_or(false);
        match (ordering, head_ok) {
            (Some(b), _) => run.record(
                ReplayStepKind::ChainLinkage,
                StepStatus::Failed,
                format!("seq {}: {} ({})", b.seq, b.kind, b.detail),
                Some(b.seq),
            ),
            (None, false) => run.record(
                ReplayStepKind::ChainLinkage,
                StepStatus::Failed,
                "last record hash differs from package head hash",
                package.records.last().map(|r| r.seq),
            ),
            (None, true) => run.record(
                ReplayStepKind::ChainLinkage,
                StepStatus::Passed,
                "records form one contiguous sub-chain ending at the head hash",
                None,
            ),
        }

        self.finish(package, run, link_rate)
    }

    /// Recompute each recorded decision. `Err` means evidence was missing or
    /// could not be evaluated; `Ok` carries the seqs that diverged.
    fn recompute<F>(
        &self,
        package: &ReplayPackage,
        decisions: &[RecordedDecision],
        label: &str,
        evaluate: F,
    ) -> Recomputation
    where
        F: Fn(&Value) -> Result<Value, CollaboratorError>,
    {
        if decisions.is_empty() {
            return Recomputation::Nothing(format!("no recorded {label} decisions"));
        }
        let mut diverged = Vec::new();
        for decision in decisions {
            if package.record(decision.seq).is_none() {
                return Recomputation::Missing(
                    format!(
                        "recorded {label} decision references seq {} outside the slice",
                        decision.seq
                    ),
                    decision.seq,
                );
            }
            match evaluate(&decision.input) {
                Ok(output) if output == decision.output => {}
                Ok(_) => diverged.push(decision.seq),
                Err(err) => return Recomputation::Missing(err.to_string(), decision.seq),
            }
        }
        Recomputation::Done {
            checked: decisions.len(),
            diverged,
        }
    }

    fn finish(&self, package: &ReplayPackage, run: Run, chain_link_rate: f64) -> ReplayReport {
        let failed = run.first_with(StepStatus::Failed);
        let unresolved = run.first_with(StepStatus::Unresolved);
        let flagged = run.first_with(StepStatus::Flagged);

        let (outcome, deciding) = match (failed, unresolved, flagged) {
            (Some(step), _, _) => (ReplayOutcome::TamperDetected, Some(step)),
            (None, Some(step), _) => (ReplayOutcome::Indeterminate, Some(step)),
            (None, None, Some(step)) => (ReplayOutcome::Drift, Some(step)),
            (None, None, None) => (ReplayOutcome::Verified, None),
        };

        let earliest_divergence = match outcome {
            ReplayOutcome::Verified => None,
            ReplayOutcome::TamperDetected => run.earliest(StepStatus::Failed),
            ReplayOutcome::Indeterminate => run.earliest(StepStatus::Unresolved),
            ReplayOutcome::Drift => run.earliest(StepStatus::Flagged),
        };

        let executed: Vec<&StepReport> = run
            .steps
            .iter()
            .filter(|s| s.status != StepStatus::Skipped)
            .collect();
        let passed = executed
            .iter()
            .filter(|s| s.status == StepStatus::Passed)
            .count();
        let determinism_index = if executed.is_empty() {
            0.0
        } else {
            round1(passed as f64 / executed.len() as f64 * 100.0)
        };

        let replay_id = {
            let digest = stable_hash(
                &json!({
                    "package_hash": package.package_hash,
                    "environment": self.environment.digest(),
                    "kernel_version": self.manifest.kernel_version,
                }),
                HashAlgorithm::Sha256,
            );
            digest.chars().take(16).collect::<String>()
        };

        match outcome {
            ReplayOutcome::Verified => info!(replay_id = %replay_id, "replay verified"),
            ReplayOutcome::Drift => info!(
                replay_id = %replay_id,
                factors = run.drift_factors.len(),
                "replay verified with drift"
            ),
            _ => warn!(
                replay_id = %replay_id,
                outcome = %outcome,
                step = ?deciding,
                seq = ?earliest_divergence,
                "replay did not verify"
            ),
        }

        ReplayReport {
            replay_id,
            package_hash: package.package_hash.clone(),
            outcome,
            failing_step: deciding,
            earliest_divergence,
            chain_link_rate,
            drift_factors: run.drift_factors,
            determinism_index,
            records_replayed: package.records.len(),
            steps: run.steps,
        }
    }
}

enum Recomputation {
    Nothing(String),
    Missing(String, u64),
    Done { checked: usize, diverged: Vec<u64> },
}

#[derive(Default)]
struct Run {
    steps: Vec<StepReport>,
    drift_factors: Vec<String>,
}

impl Run {
    fn record(
        &mut self,
        step: ReplayStepKind,
        status: StepStatus,
        detail: impl Into<String>,
        divergence_seq: Option<u64>,
    ) {
        self.steps.push(StepReport {
            step,
            status,
            detail: detail.into(),
            divergence_seq,
        });
    }

    /// Record a recomputation step; returns the first diverging seq if its
    /// classification is still open.
    fn recompute_step(&mut self, step: ReplayStepKind, result: Recomputation) -> Option<u64> {
        match result {
            Recomputation::Nothing(detail) => {
                self.record(step, StepStatus::Skipped, detail, None);
                None
            }
            Recomputation::Missing(detail, seq) => {
                self.record(step, StepStatus::Unresolved, detail, Some(seq));
                None
            }
            Recomputation::Done { checked, diverged } => match diverged.first().copied() {
                None => {
                    self.record(
                        step,
                        StepStatus::Passed,
                        format!("{checked} recomputed decisions match"),
                        None,
                    );
                    None
                }
                Some(first) => {
                    let seqs: Vec<String> = diverged.iter().map(u64::to_string).collect();
                    self.record(
                        step,
                        StepStatus::Failed,
                        format!("diverged at seq {}", seqs.join(", ")),
                        Some(first),
                    );
                    Some(first)
                }
            },
        }
    }

    fn settle(&mut self, step: ReplayStepKind, status: StepStatus, note: &str) {
        if let Some(report) = self.steps.iter_mut().find(|s| s.step == step) {
            report.status = status;
            report.detail = format!("{}; {}", report.detail, note);
        }
    }

    fn first_with(&self, status: StepStatus) -> Option<ReplayStepKind> {
        self.steps.iter().find(|s| s.status == status).map(|s| s.step)
    }

    fn earliest(&self, status: StepStatus) -> Option<u64> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .filter_map(|s| s.divergence_seq)
            .min()
    }
}
