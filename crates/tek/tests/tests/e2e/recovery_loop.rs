//! E2E test: degraded trust triggers a recovery, the rollout is damped and
//! sealed into the same chain as the governed interactions, and the
//! verifier's verdict is backed by replay evidence.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use tek_epack::EpackChain;
use tek_replay::{ReplayPackage, ReplayReport};
use tek_resilience::*;
use tek_tests::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn golden_replay(chain: &EpackChain) -> ReplayReport {
    let package = ReplayPackage::from_chain(chain, 1, 4)
        .unwrap()
        .governance(governance())
        .environment(environment())
        .extract_recorded_decisions()
        .build()
        .unwrap();
    replay_engine().replay(&package)
}

/// Runtime over the golden chain with a degraded trust window.
fn degraded_runtime(policy: Arc<ResiliencePolicy>) -> (Arc<EpackChain>, ResilienceRuntime) {
    init_tracing();
    let chain = golden_chain();
    let runtime = ResilienceRuntime::with_policy(policy, chain.clone());
    feed(&runtime, OutcomeClass::Refuse, t0(), 5);
    (chain, runtime)
}

fn recover(runtime: &ResilienceRuntime) -> (RecoveryDecision, ActiveRecovery) {
    let outcome = runtime
        .maybe_recover(&RecoveryContext::at(t0() + Duration::seconds(5)))
        .unwrap();
    match outcome {
        RecoveryOutcome::Applied { decision, active } => (decision, active),
        other => panic!("expected an applied recovery, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn degraded_trust_recovers_and_verifies() {
    let (chain, runtime) = degraded_runtime(policy_with(vec![swap_validator(), add_validator()]));
    let (decision, active) = recover(&runtime);

    assert_eq!(decision.chosen_plan_id(), Some("swap_validator"));
    assert_eq!(active.plan_id, "swap_validator");
    assert!((active.tsi_at_recovery - 0.45).abs() < 1e-9);
    assert!(decision.triggers.summary().contains("tsi_current<0.55"));
    assert!((0.15..=1.0).contains(&active.fraction));
    assert_eq!(active.routing_patch["rds"]["note"], "pid_damped");

    // The recorded decision recomputes to the same result.
    let engine = RecoveryEngine::new(runtime.policy().unwrap().clone());
    assert!(engine.replay_decision(&decision));

    let evidence = golden_replay(&chain);
    let verification = runtime
        .verify_recovery(VerificationRequest {
            tsi_after: Some(active.tsi_at_recovery + 0.10),
            replay_primary: vec![evidence.clone()],
            replay_repeat: vec![golden_replay(&chain)],
            now: Some(t0() + Duration::minutes(5)),
        })
        .unwrap()
        .unwrap();

    assert!(verification.result.improved);
    assert!(!verification.result.rollback_recommended);
    assert!(verification.result.mvi_passed);
    assert_eq!(verification.result.samples_checked, 1);
    let mvi = verification.mvi.as_ref().unwrap();
    assert_eq!(mvi.mvi_score, 1.0);
    assert!(mvi.governance_match());
    assert!(runtime.active_recovery().is_none());

    assert_eq!(
        recovery_events(&chain),
        vec![
            RecoveryEventType::RecoveryTriggered,
            RecoveryEventType::RecoveryDecision,
            RecoveryEventType::RecoveryApplied,
            RecoveryEventType::RecoveryVerified,
        ]
    );
    assert!(chain.verify_all().is_intact());
}

#[test]
fn recovery_events_form_their_own_trail() {
    let (chain, runtime) = degraded_runtime(policy_with(vec![swap_validator()]));
    recover(&runtime);

    let events: Vec<_> = chain.snapshot().into_iter().skip(4).collect();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].payload["prev_event_hash"], Value::Null);
    for pair in events.windows(2) {
        assert_eq!(pair[1].payload["prev_event_hash"], pair[0].hash.as_str());
        assert_eq!(pair[1].payload["run_id"], runtime.run_id());
    }

    // The golden slice still replays VERIFIED after the chain grew.
    assert!(golden_replay(&chain).governance_match());
}

#[test]
fn tampered_replay_evidence_forces_rollback() {
    let (chain, runtime) = degraded_runtime(policy_with(vec![swap_validator()]));
    let (_, active) = recover(&runtime);

    let mut forged = chain.range(1, 4).unwrap();
    forged[1].prev_hash = "0".repeat(64);
    let tampered = replay_engine().replay(&package(forged).unwrap());

    let verification = runtime
        .verify_recovery(VerificationRequest {
            tsi_after: Some(active.tsi_at_recovery + 0.10),
            replay_primary: vec![tampered.clone()],
            replay_repeat: vec![tampered],
            now: Some(t0() + Duration::minutes(5)),
        })
        .unwrap()
        .unwrap();

    assert!(verification.result.improved);
    assert!(verification.result.rollback_recommended);
    assert!(!verification.result.mvi_passed);
    assert!(verification
        .result
        .reasons
        .iter()
        .any(|r| matches!(r, VerificationReason::GovernanceMismatch { mismatches: 1, .. })));
    assert_eq!(
        recovery_events(&chain).last(),
        Some(&RecoveryEventType::RecoveryRollback)
    );
    assert_eq!(runtime.breaker_snapshot()[0].consecutive_failures, 1);
}

#[test]
fn unstable_replay_degrades_mvi() {
    let (chain, runtime) = degraded_runtime(policy_with(vec![swap_validator()]));
    let (_, active) = recover(&runtime);

    let drifted = replay_engine_in(environment().with_container("sha256:other"))
        .replay(&package(chain.range(1, 4).unwrap()).unwrap());
    let verification = runtime
        .verify_recovery(VerificationRequest {
            tsi_after: Some(active.tsi_at_recovery + 0.10),
            replay_primary: vec![golden_replay(&chain)],
            replay_repeat: vec![drifted],
            now: Some(t0() + Duration::minutes(5)),
        })
        .unwrap()
        .unwrap();

    let mvi = verification.mvi.as_ref().unwrap();
    assert_eq!(mvi.replay_stability, 0.0);
    assert!((mvi.mvi_score - 0.60).abs() < 1e-9);
    assert!(mvi.degraded());
    assert!(verification.result.rollback_recommended);

    let events = recovery_events(&chain);
    assert_eq!(
        &events[events.len() - 2..],
        &[
            RecoveryEventType::MviDegraded,
            RecoveryEventType::RecoveryRollback
        ]
    );
}

#[test]
fn concentration_alone_triggers_recovery() {
    let chain = golden_chain();
    let runtime =
        ResilienceRuntime::with_policy(policy_with(vec![swap_validator()]), chain.clone());
    feed(&runtime, OutcomeClass::Pass, t0(), 5);

    let ctx = RecoveryContext::at(t0() + Duration::seconds(5)).with_provider_weights(
        BTreeMap::from([("openai".to_string(), 0.95), ("groq".to_string(), 0.05)]),
    );
    let RecoveryOutcome::Applied { decision, .. } = runtime.maybe_recover(&ctx).unwrap() else {
        panic!("expected concentration to trigger a recovery");
    };
    assert_eq!(decision.triggers.summary(), "triggered:concentration>0.85");
    assert!(decision.input.state.concentration > 0.9);

    let balanced = RecoveryContext::at(t0() + Duration::seconds(6)).with_provider_weights(
        BTreeMap::from([("openai".to_string(), 0.5), ("groq".to_string(), 0.5)]),
    );
    assert!(matches!(
        runtime.maybe_recover(&balanced).unwrap(),
        RecoveryOutcome::NotTriggered { .. }
    ));
}

#[test]
fn undamped_policy_applies_full_rollout() {
    let policy = Arc::new(ResiliencePolicy {
        damping: None,
        ..(*policy_with(vec![swap_validator()])).clone()
    });
    let (_, runtime) = degraded_runtime(policy);
    let (_, active) = recover(&runtime);
    assert_eq!(active.fraction, 1.0);
    assert!(active.routing_patch.get("rds").is_none());
}

#[test]
fn incident_status_triggers_even_with_healthy_trust() {
    let chain = golden_chain();
    let runtime =
        ResilienceRuntime::with_policy(policy_with(vec![swap_validator()]), chain.clone());
    feed(&runtime, OutcomeClass::Pass, t0(), 5);

    let ctx = RecoveryContext::at(t0() + Duration::seconds(5)).with_status(SystemStatus::Incident);
    let outcome = runtime.maybe_recover(&ctx).unwrap();
    let RecoveryOutcome::Applied { decision, .. } = outcome else {
        panic!("expected an applied recovery, got {outcome:?}");
    };
    assert_eq!(decision.triggers.reasons.len(), 1);
    assert!(matches!(
        decision.triggers.reasons[0],
        TriggerReason::SystemStatus {
            status: SystemStatus::Incident
        }
    ));
}
