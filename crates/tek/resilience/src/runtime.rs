//! The resilience runtime wires the trust signal, recovery engine, damping,
//! circuit breakers and verification into one closed loop, sealing every
//! action into the EPACK chain.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tek_epack::{EpackChain, EpackRecord};
use tek_replay::ReplayReport;
use tracing::{debug, info, instrument, warn};

use crate::config::{RecoveryPlan, ResiliencePolicy, TsiConfig};
use crate::error::{PolicyCompileError, ResilienceResult};
use crate::events::RecoveryEventEmitter;
use crate::mvi::{MetaValidationIndex, MviInputs, MviSnapshot};
use crate::policy::{compile_policy, load_policy_document, CompiledPolicy};
use crate::resilience::{
    BreakerState, BreakerTransition, CircuitBreakerRegistry, DampingInput, DampingOutcome,
    DampingStabilizer, DecisionInput, OscillationMeter, PlanBreaker, RecoveryDecision,
    RecoveryEngine, RecoveryState, ResetScope, RolloutHints, SystemStatus,
};
use crate::tsi::{
    dependency_metrics, DependencyMetrics, OutcomeClass, TsiSample, TsiSignal, TsiTracker,
};
use crate::verifier::{PostRecoveryVerifier, VerificationResult};

/// Caller-supplied context of a recovery check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryContext {
    pub status: SystemStatus,
    /// Live provider usage. Falls back to the policy's provider roster.
    pub provider_weights: Option<BTreeMap<String, f64>>,
    pub now: DateTime<Utc>,
}

impl RecoveryContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            status: SystemStatus::Ok,
            provider_weights: None,
            now,
        }
    }

    pub fn with_status(mut self, status: SystemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_provider_weights(mut self, weights: BTreeMap<String, f64>) -> Self {
        self.provider_weights = Some(weights);
        self
    }
}

/// A plan currently rolled out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRecovery {
    pub decision_id: String,
    pub plan_id: String,
    pub tsi_at_recovery: f64,
    pub fraction: f64,
    pub routing_patch: Value,
    pub applied_at: DateTime<Utc>,
    pub decision_input: DecisionInput,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    Disabled,
    NotTriggered { signal: TsiSignal },
    /// A trigger fired while an applied plan still awaits verification.
    AlreadyActive { active: ActiveRecovery },
    NoEligiblePlan { decision: RecoveryDecision },
    Applied { decision: RecoveryDecision, active: ActiveRecovery },
    /// Rollout postponed by the damping cooldown; see `poll_rollout`.
    Deferred { decision: RecoveryDecision, retry_at: DateTime<Utc> },
}

/// Evidence supplied when verifying an active recovery.
#[derive(Debug, Clone, Default)]
pub struct VerificationRequest {
    /// Observed TSI; the tracker's current score when absent.
    pub tsi_after: Option<f64>,
    pub replay_primary: Vec<ReplayReport>,
    pub replay_repeat: Vec<ReplayReport>,
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryVerification {
    pub result: VerificationResult,
    /// Present only when replay evidence was supplied.
    pub mvi: Option<MviSnapshot>,
}

struct Enabled {
    policy: Arc<ResiliencePolicy>,
    engine: RecoveryEngine,
    damping: Option<Mutex<DampingStabilizer>>,
    verifier: PostRecoveryVerifier,
    mvi: MetaValidationIndex,
}

/// Closed-loop resilience controller.
pub struct ResilienceRuntime {
    enabled: Option<Enabled>,
    tracker: Mutex<TsiTracker>,
    oscillation: Mutex<OscillationMeter>,
    breakers: CircuitBreakerRegistry,
    emitter: RecoveryEventEmitter,
    active: Mutex<Option<ActiveRecovery>>,
    pending: Mutex<Option<(RecoveryDecision, f64)>>,
}

impl ResilienceRuntime {
    pub fn new(compiled: CompiledPolicy, chain: Arc<EpackChain>) -> Self {
        match compiled {
            CompiledPolicy::Enabled(policy) => Self::with_policy(policy, chain),
            CompiledPolicy::Disabled => Self::disabled(chain),
        }
    }

    pub fn with_policy(policy: Arc<ResiliencePolicy>, chain: Arc<EpackChain>) -> Self {
        let damping = policy
            .damping
            .clone()
            .map(|config| Mutex::new(DampingStabilizer::new(config, &policy.targets)));
        let enabled = Enabled {
            engine: RecoveryEngine::new(policy.clone()),
            damping,
            verifier: PostRecoveryVerifier::new(
                policy.verification.clone(),
                policy.targets.clone(),
                policy.mvi.pass_threshold,
            ),
            mvi: MetaValidationIndex::new(policy.mvi.clone()),
            policy: policy.clone(),
        };
        Self {
            tracker: Mutex::new(TsiTracker::new(policy.tsi.clone())),
            oscillation: Mutex::new(OscillationMeter::new(policy.tsi.window_size)),
            breakers: CircuitBreakerRegistry::new(policy.breaker.clone()),
            emitter: RecoveryEventEmitter::new(chain),
            active: Mutex::new(None),
            pending: Mutex::new(None),
            enabled: Some(enabled),
        }
    }

    pub fn disabled(chain: Arc<EpackChain>) -> Self {
        let tsi = TsiConfig::default();
        Self {
            oscillation: Mutex::new(OscillationMeter::new(tsi.window_size)),
            tracker: Mutex::new(TsiTracker::new(tsi)),
            breakers: CircuitBreakerRegistry::default(),
            emitter: RecoveryEventEmitter::new(chain),
            active: Mutex::new(None),
            pending: Mutex::new(None),
            enabled: None,
        }
    }

    /// Compile `document` and build a runtime. Never fails: a compile error
    /// yields a disabled runtime and a `RECOVERY_DISABLED` event.
    pub fn from_document(document: &Value, chain: Arc<EpackChain>) -> Self {
        match compile_policy(document) {
            Ok(compiled) => Self::new(compiled, chain),
            Err(err) => Self::disabled_by(err, chain),
        }
    }

    pub fn from_path(path: impl AsRef<Path>, chain: Arc<EpackChain>) -> Self {
        match load_policy_document(path).and_then(|doc| compile_policy(&doc)) {
            Ok(compiled) => Self::new(compiled, chain),
            Err(err) => Self::disabled_by(err, chain),
        }
    }

    fn disabled_by(err: PolicyCompileError, chain: Arc<EpackChain>) -> Self {
        warn!(error = %err, "Resilience policy rejected, recovery disabled");
        let runtime = Self::disabled(chain);
        if let Err(emit_err) = runtime.emitter.recovery_disabled(&err) {
            warn!(error = %emit_err, "Failed to record RECOVERY_DISABLED");
        }
        runtime
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.is_some()
    }

    pub fn policy(&self) -> Option<&Arc<ResiliencePolicy>> {
        self.enabled.as_ref().map(|e| &e.policy)
    }

    pub fn run_id(&self) -> &str {
        self.emitter.run_id()
    }

    pub fn chain(&self) -> &Arc<EpackChain> {
        self.emitter.chain()
    }

    pub fn active_recovery(&self) -> Option<ActiveRecovery> {
        self.active.lock().clone()
    }

    pub fn breaker_snapshot(&self) -> Vec<PlanBreaker> {
        self.breakers.state_snapshot()
    }

    pub fn signal_at(&self, now: DateTime<Utc>) -> TsiSignal {
        self.tracker.lock().signal_at(now)
    }

    pub fn oscillation_index(&self) -> f64 {
        self.oscillation.lock().index()
    }

    fn emit_transitions(
        &self,
        transitions: &[BreakerTransition],
        operator: Option<&str>,
    ) -> ResilienceResult<Vec<EpackRecord>> {
        transitions
            .iter()
            .map(|t| self.emitter.circuit_breaker(t, operator))
            .collect()
    }

    /// Feed an interaction outcome. While a recovery is active, an `ERROR`
    /// outcome counts as a failure of the active plan.
    #[instrument(skip(self, sample), fields(outcome = %sample.outcome))]
    pub fn record_outcome(
        &self,
        mut sample: TsiSample,
    ) -> ResilienceResult<Vec<BreakerTransition>> {
        let active_plan = self.active.lock().as_ref().map(|a| a.plan_id.clone());
        sample.recovery_active = active_plan.is_some();
        let (outcome, at) = (sample.outcome, sample.timestamp);

        let score = {
            let mut tracker = self.tracker.lock();
            tracker.record(sample);
            tracker.score_at(at)
        };
        self.oscillation.lock().record(score);

        let mut transitions = Vec::new();
        if let (OutcomeClass::Error, Some(plan_id)) = (outcome, active_plan) {
            if let Some(transition) = self.breakers.record_failure(&plan_id, at) {
                transitions.push(transition);
            }
        }
        self.emit_transitions(&transitions, None)?;
        Ok(transitions)
    }

    fn dependency_snapshot(
        &self,
        policy: &ResiliencePolicy,
        ctx: &RecoveryContext,
    ) -> DependencyMetrics {
        let weights = ctx
            .provider_weights
            .clone()
            .unwrap_or_else(|| policy.providers.usage_weights());
        if weights.is_empty() {
            // Unknown provider usage carries no concentration signal.
            return DependencyMetrics {
                density: 0.0,
                concentration: 0.0,
                dominant_provider: None,
                provider_count: 0,
                over_reliant: false,
            };
        }
        dependency_metrics(&weights, policy.triggers.concentration_cap)
    }

    /// Evaluate triggers and, when one fires, select, damp and apply a plan.
    #[instrument(skip(self, ctx), fields(status = ctx.status.as_str()))]
    pub fn maybe_recover(&self, ctx: &RecoveryContext) -> ResilienceResult<RecoveryOutcome> {
        let Some(enabled) = &self.enabled else {
            return Ok(RecoveryOutcome::Disabled);
        };
        let now = ctx.now;

        let reopened = self.breakers.observe(now);
        self.emit_transitions(&reopened, None)?;

        let signal = self.signal_at(now);
        let metrics = self.dependency_snapshot(&enabled.policy, ctx);
        let oscillation = self.oscillation_index();
        let excluded_plans = self.breakers.excluded_plans(now);

        let state = RecoveryState {
            tsi_current: signal.tsi_current,
            tsi_forecast: signal.tsi_forecast,
            der_density: metrics.density,
            concentration: metrics.concentration,
            status: ctx.status,
            oscillation,
        };
        let triggers = enabled.engine.evaluate_triggers(&state);
        if !triggers.triggered() {
            return Ok(RecoveryOutcome::NotTriggered { signal });
        }
        if let Some(active) = self.active_recovery() {
            info!(
                plan_id = %active.plan_id,
                reason = %triggers.summary(),
                "Recovery already active, awaiting verification"
            );
            return Ok(RecoveryOutcome::AlreadyActive { active });
        }
        info!(reason = %triggers.summary(), "Recovery triggered");
        self.emitter.recovery_triggered(&state, &triggers)?;

        let decision = enabled.engine.decide(&DecisionInput {
            state: state.clone(),
            excluded_plans,
            decided_at: now,
        });
        self.emitter.recovery_decision(&decision)?;

        let Some(plan) = decision.chosen.clone() else {
            warn!(decision_id = %decision.decision_id, "No eligible recovery plan");
            return Ok(RecoveryOutcome::NoEligiblePlan { decision });
        };

        let Some(damping) = &enabled.damping else {
            let active = self.apply(&decision, &plan, 1.0, None, state.tsi_current, now)?;
            return Ok(RecoveryOutcome::Applied { decision, active });
        };
        let input = DampingInput {
            tsi_forecast: state.tsi_forecast,
            concentration: state.concentration,
            oscillation,
        };
        let outcome = damping.lock().adjust(input, now);
        match outcome {
            DampingOutcome::Applied { fraction, hints } => {
                *self.pending.lock() = None;
                let active =
                    self.apply(&decision, &plan, fraction, Some(&hints), state.tsi_current, now)?;
                Ok(RecoveryOutcome::Applied { decision, active })
            }
            DampingOutcome::Deferred { retry_at } => {
                *self.pending.lock() = Some((decision.clone(), state.tsi_current));
                Ok(RecoveryOutcome::Deferred { decision, retry_at })
            }
        }
    }

    /// Apply a deferred rollout once the damping cooldown has elapsed. Waits
    /// while another recovery is active.
    #[instrument(skip(self))]
    pub fn poll_rollout(&self, now: DateTime<Utc>) -> ResilienceResult<Option<ActiveRecovery>> {
        let Some(damping) = self.enabled.as_ref().and_then(|e| e.damping.as_ref()) else {
            return Ok(None);
        };
        if self.active.lock().is_some() {
            return Ok(None);
        }
        let reopened = self.breakers.observe(now);
        self.emit_transitions(&reopened, None)?;
        let Some(DampingOutcome::Applied { fraction, hints }) = damping.lock().poll(now) else {
            return Ok(None);
        };
        let Some((decision, tsi_before)) = self.pending.lock().take() else {
            return Ok(None);
        };
        let Some(plan) = decision.chosen.as_ref() else {
            return Ok(None);
        };
        self.apply(&decision, plan, fraction, Some(&hints), tsi_before, now)
            .map(Some)
    }

    fn apply(
        &self,
        decision: &RecoveryDecision,
        plan: &RecoveryPlan,
        fraction: f64,
        hints: Option<&RolloutHints>,
        tsi_before: f64,
        now: DateTime<Utc>,
    ) -> ResilienceResult<ActiveRecovery> {
        let mut patch = match &plan.routing_patch {
            Value::Object(fields) => fields.clone(),
            _ => Map::new(),
        };
        if let Some(hints) = hints {
            patch.insert("rds".into(), hints.to_value());
        }
        let routing_patch = Value::Object(patch);

        self.emitter
            .recovery_applied(&decision.decision_id, &plan.id, &routing_patch, fraction)?;
        if self.breakers.state_of(&plan.id, now) == BreakerState::HalfOpen {
            self.breakers.record_probe(&plan.id);
        }

        let active = ActiveRecovery {
            decision_id: decision.decision_id.clone(),
            plan_id: plan.id.clone(),
            tsi_at_recovery: tsi_before,
            fraction,
            routing_patch,
            applied_at: now,
            decision_input: decision.input.clone(),
        };
        info!(plan_id = %plan.id, fraction, "Recovery applied");
        *self.active.lock() = Some(active.clone());
        Ok(active)
    }

    /// Verify the active recovery, feed the outcome to its breaker and record
    /// the verdict. Only an improvement without a rollback counts as a
    /// success. Returns `None` when nothing is active.
    #[instrument(skip(self, request))]
    pub fn verify_recovery(
        &self,
        request: VerificationRequest,
    ) -> ResilienceResult<Option<RecoveryVerification>> {
        let Some(enabled) = &self.enabled else {
            return Ok(None);
        };
        let Some(active) = self.active.lock().clone() else {
            return Ok(None);
        };
        let now = request.now.unwrap_or_else(Utc::now);
        let tsi_after = request
            .tsi_after
            .unwrap_or_else(|| self.signal_at(now).tsi_current);

        let samples = enabled.policy.verification.replay_samples;
        let primary = &request.replay_primary[..request.replay_primary.len().min(samples)];
        let repeat = &request.replay_repeat[..request.replay_repeat.len().min(samples)];
        let mvi = if primary.is_empty() {
            debug!(plan_id = %active.plan_id, "No replay evidence, meta-validation skipped");
            None
        } else {
            let tsi_values = self.oscillation.lock().history();
            Some(enabled.mvi.compute(&MviInputs {
                replay_primary: primary,
                replay_repeat: repeat,
                recovery: Some((&enabled.engine, &active.decision_input)),
                tsi_values: &tsi_values,
            }))
        };
        if let Some(snapshot) = mvi.as_ref().filter(|m| m.degraded()) {
            warn!(mvi = snapshot.mvi_score, "Meta-validation degraded");
            self.emitter.mvi_degraded(snapshot)?;
        }

        let result = enabled.verifier.verify(
            &active.plan_id,
            active.tsi_at_recovery,
            tsi_after,
            mvi.as_ref(),
        );

        let transition = if result.improved && !result.rollback_recommended {
            self.breakers.record_success(&active.plan_id, now)
        } else {
            self.breakers.record_failure(&active.plan_id, now)
        };
        self.emit_transitions(transition.as_slice(), None)?;

        if result.rollback_recommended {
            self.emitter.recovery_rollback(&result)?;
        } else {
            self.emitter.recovery_verified(&result)?;
        }
        self.clear_active(&active.decision_id);

        Ok(Some(RecoveryVerification { result, mvi }))
    }

    /// Clear the active recovery if it is still the one identified by
    /// `decision_id`. Returns whether it was cleared.
    fn clear_active(&self, decision_id: &str) -> bool {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.decision_id == decision_id) {
            *active = None;
            true
        } else {
            false
        }
    }

    /// Break-glass reset of circuit breakers, recorded with the operator.
    #[instrument(skip(self))]
    pub fn reset_breakers(
        &self,
        scope: &ResetScope,
        operator: &str,
        now: DateTime<Utc>,
    ) -> ResilienceResult<Vec<BreakerTransition>> {
        let transitions = self.breakers.reset(scope, now);
        self.emit_transitions(&transitions, Some(operator))?;
        Ok(transitions)
    }
}
