//! Recovery events sealed into the EPACK chain.
//!
//! Every governance action the runtime takes is appended as a record whose
//! payload carries `event_type`, the emitter's `run_id`, and the hash of the
//! previous recovery event from the same emitter (`prev_event_hash`), so the
//! recovery trail can be followed without scanning unrelated records.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tek_epack::{EpackChain, EpackRecord};
use tracing::debug;
use uuid::Uuid;

use crate::error::{PolicyCompileError, ResilienceResult};
use crate::mvi::MviSnapshot;
use crate::resilience::{BreakerTransition, RecoveryDecision, RecoveryState, TriggerEvaluation};
use crate::verifier::VerificationResult;

const APPEND_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryEventType {
    RecoveryTriggered,
    RecoveryDecision,
    RecoveryApplied,
    RecoveryVerified,
    RecoveryRollback,
    CircuitBreaker,
    MviDegraded,
    RecoveryDisabled,
}

impl RecoveryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryEventType::RecoveryTriggered => "RECOVERY_TRIGGERED",
            RecoveryEventType::RecoveryDecision => "RECOVERY_DECISION",
            RecoveryEventType::RecoveryApplied => "RECOVERY_APPLIED",
            RecoveryEventType::RecoveryVerified => "RECOVERY_VERIFIED",
            RecoveryEventType::RecoveryRollback => "RECOVERY_ROLLBACK",
            RecoveryEventType::CircuitBreaker => "CIRCUIT_BREAKER",
            RecoveryEventType::MviDegraded => "MVI_DEGRADED",
            RecoveryEventType::RecoveryDisabled => "RECOVERY_DISABLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            RecoveryEventType::RecoveryTriggered,
            RecoveryEventType::RecoveryDecision,
            RecoveryEventType::RecoveryApplied,
            RecoveryEventType::RecoveryVerified,
            RecoveryEventType::RecoveryRollback,
            RecoveryEventType::CircuitBreaker,
            RecoveryEventType::MviDegraded,
            RecoveryEventType::RecoveryDisabled,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for RecoveryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appends recovery events to a shared chain.
pub struct RecoveryEventEmitter {
    chain: Arc<EpackChain>,
    run_id: String,
    /// Hash of the last event this emitter sealed. Held across the append so
    /// events from one emitter link in order.
    last_event_hash: Mutex<Option<String>>,
}

impl RecoveryEventEmitter {
    pub fn new(chain: Arc<EpackChain>) -> Self {
        Self::with_run_id(chain, Uuid::new_v4().to_string())
    }

    pub fn with_run_id(chain: Arc<EpackChain>, run_id: impl Into<String>) -> Self {
        Self {
            chain,
            run_id: run_id.into(),
            last_event_hash: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn chain(&self) -> &Arc<EpackChain> {
        &self.chain
    }

    pub fn last_event_hash(&self) -> Option<String> {
        self.last_event_hash.lock().clone()
    }

    /// Seal an event. Object `data` is merged into the payload; any other
    /// value is stored under `data`.
    pub fn emit(
        &self,
        event_type: RecoveryEventType,
        data: Value,
    ) -> ResilienceResult<EpackRecord> {
        let mut last = self.last_event_hash.lock();

        let mut payload = Map::new();
        payload.insert("event_type".into(), json!(event_type.as_str()));
        payload.insert("run_id".into(), json!(self.run_id));
        payload.insert("prev_event_hash".into(), json!(*last));
        match data {
            Value::Object(fields) => {
                for (key, value) in fields {
                    payload.entry(key).or_insert(value);
                }
            }
            Value::Null => {}
            other => {
                payload.insert("data".into(), other);
            }
        }

        let record = self.chain.append_with_retry(payload, APPEND_ATTEMPTS)?;
        *last = Some(record.hash.clone());
        debug!(
            event_type = %event_type,
            seq = record.seq,
            run_id = %self.run_id,
            "Recovery event sealed"
        );
        Ok(record)
    }

    pub fn recovery_triggered(
        &self,
        state: &RecoveryState,
        triggers: &TriggerEvaluation,
    ) -> ResilienceResult<EpackRecord> {
        self.emit(
            RecoveryEventType::RecoveryTriggered,
            json!({
                "reason": triggers.summary(),
                "triggers": triggers.reasons,
                "tsi_before": state.tsi_current,
                "tsi_forecast": state.tsi_forecast,
                "state": state,
            }),
        )
    }

    pub fn recovery_decision(&self, decision: &RecoveryDecision) -> ResilienceResult<EpackRecord> {
        let mut data = serde_json::to_value(decision)?;
        if let Value::Object(fields) = &mut data {
            fields.insert("reason".into(), json!(decision.triggers.summary()));
        }
        self.emit(RecoveryEventType::RecoveryDecision, data)
    }

    pub fn recovery_applied(
        &self,
        decision_id: &str,
        plan_id: &str,
        routing_patch: &Value,
        fraction: f64,
    ) -> ResilienceResult<EpackRecord> {
        self.emit(
            RecoveryEventType::RecoveryApplied,
            json!({
                "decision_id": decision_id,
                "plan_id": plan_id,
                "routing_patch": routing_patch,
                "rollout_fraction": fraction,
            }),
        )
    }

    pub fn recovery_verified(&self, result: &VerificationResult) -> ResilienceResult<EpackRecord> {
        self.emit(
            RecoveryEventType::RecoveryVerified,
            serde_json::to_value(result)?,
        )
    }

    pub fn recovery_rollback(&self, result: &VerificationResult) -> ResilienceResult<EpackRecord> {
        self.emit(
            RecoveryEventType::RecoveryRollback,
            json!({
                "plan_id": result.plan_id,
                "tsi_before": result.tsi_before,
                "tsi_after": result.tsi_after,
                "reasons": result.reasons,
            }),
        )
    }

    pub fn circuit_breaker(
        &self,
        transition: &BreakerTransition,
        operator: Option<&str>,
    ) -> ResilienceResult<EpackRecord> {
        self.emit(
            RecoveryEventType::CircuitBreaker,
            json!({
                "plan_id": transition.plan_id,
                "breaker_state": transition.to,
                "previous_state": transition.from,
                "consecutive_failures": transition.consecutive_failures,
                "manual_reset": transition.manual_reset,
                "operator": operator,
                "at": transition.at,
            }),
        )
    }

    pub fn mvi_degraded(&self, snapshot: &MviSnapshot) -> ResilienceResult<EpackRecord> {
        self.emit(RecoveryEventType::MviDegraded, serde_json::to_value(snapshot)?)
    }

    pub fn recovery_disabled(&self, error: &PolicyCompileError) -> ResilienceResult<EpackRecord> {
        self.emit(
            RecoveryEventType::RecoveryDisabled,
            json!({
                "reason": "policy_compile_error",
                "errors": error.messages(),
            }),
        )
    }
}
