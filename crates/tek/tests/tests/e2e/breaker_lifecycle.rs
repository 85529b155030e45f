//! E2E test: a recovery plan that keeps failing verification is isolated by
//! its circuit breaker, probed again after the cooldown, and restored once a
//! probe succeeds. Every transition is sealed into the chain.

use chrono::{DateTime, Duration, Utc};
use tek_resilience::*;
use tek_tests::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn at(minutes: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes)
}

fn apply(runtime: &ResilienceRuntime, now: DateTime<Utc>) -> ActiveRecovery {
    match runtime.maybe_recover(&RecoveryContext::at(now)).unwrap() {
        RecoveryOutcome::Applied { active, .. } => active,
        other => panic!("expected an applied recovery at {now}, got {other:?}"),
    }
}

fn verify(runtime: &ResilienceRuntime, delta: f64, now: DateTime<Utc>) -> VerificationResult {
    let before = runtime.active_recovery().unwrap().tsi_at_recovery;
    runtime
        .verify_recovery(VerificationRequest {
            tsi_after: Some(before + delta),
            now: Some(now),
            ..VerificationRequest::default()
        })
        .unwrap()
        .unwrap()
        .result
}

fn breaker_events(runtime: &ResilienceRuntime) -> Vec<(String, bool)> {
    runtime
        .chain()
        .snapshot()
        .iter()
        .filter(|r| r.event_type() == Some("CIRCUIT_BREAKER"))
        .map(|r| {
            (
                r.payload["breaker_state"].as_str().unwrap_or_default().to_string(),
                r.payload["manual_reset"].as_bool().unwrap_or_default(),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn failing_plan_opens_half_opens_and_closes() {
    init_tracing();
    let runtime =
        ResilienceRuntime::with_policy(policy_with(vec![swap_validator()]), golden_chain());
    feed(&runtime, OutcomeClass::Refuse, t0(), 5);

    // Three failed verifications, ten minutes apart.
    for round in 0..3 {
        apply(&runtime, at(5 + 10 * round));
        let result = verify(&runtime, -0.10, at(6 + 10 * round));
        assert!(result.rollback_recommended);
    }
    let snapshot = runtime.breaker_snapshot();
    assert_eq!(snapshot[0].state, BreakerState::Open);
    assert_eq!(snapshot[0].consecutive_failures, 3);

    // Inside the cooldown the only plan is excluded.
    let outcome = runtime.maybe_recover(&RecoveryContext::at(at(27))).unwrap();
    let RecoveryOutcome::NoEligiblePlan { decision } = outcome else {
        panic!("expected no eligible plan, got {outcome:?}");
    };
    assert_eq!(decision.evaluated[0].rejected, Some(PlanRejection::CircuitOpen));
    assert_eq!(
        recovery_events(runtime.chain()).last(),
        Some(&RecoveryEventType::RecoveryDecision)
    );

    // After the cooldown the next check half-opens and probes the plan.
    let probe = apply(&runtime, at(29));
    assert_eq!(probe.plan_id, "swap_validator");
    assert_eq!(runtime.breaker_snapshot()[0].state, BreakerState::HalfOpen);

    let result = verify(&runtime, 0.10, at(30));
    assert!(result.improved && !result.rollback_recommended);
    let snapshot = runtime.breaker_snapshot();
    assert_eq!(snapshot[0].state, BreakerState::Closed);
    assert_eq!(snapshot[0].consecutive_failures, 0);

    assert_eq!(
        breaker_events(&runtime),
        vec![
            ("OPEN".to_string(), false),
            ("HALF_OPEN".to_string(), false),
            ("CLOSED".to_string(), false),
        ]
    );
    assert!(runtime.chain().verify_all().is_intact());
}

#[test]
fn open_breaker_hands_over_to_next_best_plan() {
    let runtime = ResilienceRuntime::with_policy(
        policy_with(vec![swap_validator(), add_validator()]),
        golden_chain(),
    );
    feed(&runtime, OutcomeClass::Refuse, t0(), 5);

    for round in 0..3 {
        let active = apply(&runtime, at(5 + 10 * round));
        assert_eq!(active.plan_id, "swap_validator");
        verify(&runtime, -0.10, at(6 + 10 * round));
    }

    let fallback = apply(&runtime, at(27));
    assert_eq!(fallback.plan_id, "add_validator");
}

#[test]
fn failed_probe_reopens_the_circuit() {
    let runtime =
        ResilienceRuntime::with_policy(policy_with(vec![swap_validator()]), golden_chain());
    feed(&runtime, OutcomeClass::Refuse, t0(), 5);
    for round in 0..3 {
        apply(&runtime, at(5 + 10 * round));
        verify(&runtime, -0.10, at(6 + 10 * round));
    }

    apply(&runtime, at(29));
    verify(&runtime, -0.10, at(30));
    let snapshot = runtime.breaker_snapshot();
    assert_eq!(snapshot[0].state, BreakerState::Open);
    assert_eq!(snapshot[0].opened_at, Some(at(30)));

    // The cooldown restarted with the failed probe.
    assert!(matches!(
        runtime.maybe_recover(&RecoveryContext::at(at(31))).unwrap(),
        RecoveryOutcome::NoEligiblePlan { .. }
    ));
}

#[test]
fn operator_reset_is_recorded() {
    let runtime =
        ResilienceRuntime::with_policy(policy_with(vec![swap_validator()]), golden_chain());
    feed(&runtime, OutcomeClass::Refuse, t0(), 5);
    for round in 0..3 {
        apply(&runtime, at(5 + 10 * round));
        verify(&runtime, -0.10, at(6 + 10 * round));
    }

    let transitions = runtime
        .reset_breakers(&ResetScope::Plan("swap_validator".into()), "oncall", at(27))
        .unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].from, BreakerState::Open);
    assert_eq!(transitions[0].to, BreakerState::Closed);
    assert_eq!(breaker_events(&runtime).last(), Some(&("CLOSED".to_string(), true)));

    // Eligible again without waiting for the cooldown.
    apply(&runtime, at(28));
}
