//! Shared fixtures for the cross-crate scenarios and properties.
//!
//! The golden slice is four governed interactions: an input digest, two
//! routing decisions and one safety classification, recorded with fixed
//! timestamps so every run seals identical hashes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tek_epack::{payload_from_value, EpackChain, EpackRecord};
use tek_replay::{
    BuildManifest, CollaboratorError, EnvironmentFingerprint, GovernanceSnapshot, ReplayEngine,
    ReplayPackage,
};
use tek_resilience::{
    OutcomeClass, RecoveryEventType, RecoveryPlan, ResiliencePolicy, ResilienceRuntime, TsiSample,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const KERNEL_VERSION: &str = "9.0.0";

/// Route kernel logs to the test harness. Honours `RUST_LOG`; safe to call
/// from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time().with_test_writer())
        .try_init();
}

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Replay collaborators
// ---------------------------------------------------------------------------

/// Reflect above the configured risk limit, bound otherwise.
pub fn route(input: &Value, config: &Value) -> Result<Value, CollaboratorError> {
    let risk = input["risk"]
        .as_f64()
        .ok_or_else(|| CollaboratorError::new("router", "risk missing"))?;
    let limit = config["limit"].as_f64().unwrap_or(0.5);
    Ok(json!(if risk > limit { "REFLECT" } else { "BOUND" }))
}

pub fn classify(input: &Value) -> Result<Value, CollaboratorError> {
    let text = input["text"].as_str().unwrap_or_default();
    Ok(json!(if text.contains("attack") { "BLOCK" } else { "SAFE" }))
}

pub fn environment() -> EnvironmentFingerprint {
    EnvironmentFingerprint::new("rustc 1.80").with_dependency("serde", "1.0.200")
}

pub fn manifest() -> BuildManifest {
    BuildManifest::new(KERNEL_VERSION)
}

pub fn governance() -> GovernanceSnapshot {
    GovernanceSnapshot {
        kernel_version: KERNEL_VERSION.into(),
        governance_profile_id: "default".into(),
        validator_set_id: "vs-1".into(),
        routing_config: Some(json!({"limit": 0.5})),
        ..GovernanceSnapshot::default()
    }
}

pub fn replay_engine() -> ReplayEngine {
    replay_engine_in(environment())
}

pub fn replay_engine_in(environment: EnvironmentFingerprint) -> ReplayEngine {
    ReplayEngine::new(environment, manifest())
        .with_router(Arc::new(route))
        .with_safety_classifier(Arc::new(classify))
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

pub fn golden_payloads() -> Vec<Value> {
    vec![
        json!({"input_hash": "h1", "event_type": "INTERACTION"}),
        json!({"routing": {"input": {"risk": 0.8}, "decision": "REFLECT"}}),
        json!({"safety": {"input": {"text": "hello"}, "classification": "SAFE"}}),
        json!({"routing": {"input": {"risk": 0.1}, "decision": "BOUND"}}),
    ]
}

/// Append the golden payloads to `chain` at timestamps 1..=4.
pub fn seed_golden(chain: &EpackChain) -> Vec<EpackRecord> {
    golden_payloads()
        .into_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let payload = payload_from_value(p).ok()?;
            chain.append_at(payload, (i + 1) as f64).ok()
        })
        .collect()
}

pub fn golden_chain() -> Arc<EpackChain> {
    let chain = Arc::new(EpackChain::new());
    seed_golden(&chain);
    chain
}

pub fn golden_records() -> Vec<EpackRecord> {
    golden_chain().snapshot()
}

/// Seal `records` into a package using the golden governance and environment.
pub fn package(records: Vec<EpackRecord>) -> Option<ReplayPackage> {
    ReplayPackage::builder(records)
        .governance(governance())
        .environment(environment())
        .extract_recorded_decisions()
        .build()
        .ok()
}

// ---------------------------------------------------------------------------
// Resilience
// ---------------------------------------------------------------------------

pub fn swap_validator() -> RecoveryPlan {
    let mut plan = RecoveryPlan::new("swap_validator", 1);
    plan.predicted_tsi_median = 0.80;
    plan.predicted_latency_ms = 150;
    plan.routing_patch = json!({"validators": ["groq"]});
    plan
}

pub fn add_validator() -> RecoveryPlan {
    let mut plan = RecoveryPlan::new("add_validator", 2);
    plan.predicted_tsi_median = 0.84;
    plan.predicted_independence_gain = 0.30;
    plan.predicted_latency_ms = 300;
    plan.predicted_cost_usd = 0.05;
    plan.routing_patch = json!({"validators": ["groq", "xai"]});
    plan
}

pub fn policy_with(plans: Vec<RecoveryPlan>) -> Arc<ResiliencePolicy> {
    Arc::new(ResiliencePolicy {
        plans,
        ..ResiliencePolicy::default()
    })
}

/// Record `n` outcomes of one class, one second apart from `start`.
pub fn feed(runtime: &ResilienceRuntime, outcome: OutcomeClass, start: DateTime<Utc>, n: i64) {
    for i in 0..n {
        let sample = TsiSample::new(outcome, 0.5, start + Duration::seconds(i));
        if let Err(err) = runtime.record_outcome(sample) {
            panic!("recording an outcome failed: {err}");
        }
    }
}

/// Recovery event types sealed into `chain`, in order.
pub fn recovery_events(chain: &EpackChain) -> Vec<RecoveryEventType> {
    chain
        .snapshot()
        .iter()
        .filter_map(|r| r.event_type().and_then(RecoveryEventType::parse))
        .collect()
}
