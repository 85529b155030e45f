//! Adversarial test: rewriting the recovery trail after the fact is detected,
//! whether an event is edited, dropped or re-sealed in place.

use chrono::Duration;
use serde_json::json;
use tek_epack::{verify_records, BreakKind, EpackRecord, HashAlgorithm};
use tek_resilience::*;
use tek_tests::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Golden interactions followed by TRIGGERED, DECISION, APPLIED.
fn recorded_trail() -> Vec<EpackRecord> {
    let chain = golden_chain();
    let runtime =
        ResilienceRuntime::with_policy(policy_with(vec![swap_validator()]), chain.clone());
    feed(&runtime, OutcomeClass::Refuse, t0(), 5);
    let outcome = runtime
        .maybe_recover(&RecoveryContext::at(t0() + Duration::seconds(5)))
        .unwrap();
    assert!(matches!(outcome, RecoveryOutcome::Applied { .. }));
    chain.snapshot()
}

fn position_of(records: &[EpackRecord], event: RecoveryEventType) -> usize {
    records
        .iter()
        .position(|r| r.event_type() == Some(event.as_str()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn edited_rollout_fraction_is_detected() {
    let mut records = recorded_trail();
    let applied = position_of(&records, RecoveryEventType::RecoveryApplied);
    records[applied]
        .payload
        .insert("rollout_fraction".into(), json!(1.0));

    let report = verify_records(&records, None);
    let first = report.first_break().unwrap();
    assert_eq!(first.seq, records[applied].seq);
    assert_eq!(first.kind, BreakKind::PayloadMutation);
}

#[test]
fn resealed_decision_breaks_the_next_link() {
    let mut records = recorded_trail();
    let decision = position_of(&records, RecoveryEventType::RecoveryDecision);
    let forged = &records[decision];
    let mut payload = forged.payload.clone();
    payload.insert("chosen".into(), json!(null));
    records[decision] = EpackRecord::seal(
        forged.seq,
        forged.ts,
        forged.prev_hash.clone(),
        payload,
        HashAlgorithm::Sha256,
    )
    .unwrap();

    let report = verify_records(&records, None);
    let first = report.first_break().unwrap();
    assert_eq!(first.seq, records[decision].seq + 1);
    assert_eq!(first.kind, BreakKind::LinkageMismatch);
}

#[test]
fn dropped_event_is_a_deletion_and_orphans_the_trail() {
    let mut records = recorded_trail();
    let decision = position_of(&records, RecoveryEventType::RecoveryDecision);
    let removed = records.remove(decision);

    let report = verify_records(&records, None);
    let first = report.first_break().unwrap();
    assert_eq!(first.kind, BreakKind::Deletion);
    assert_eq!(first.seq, removed.seq + 1);

    // The applied event still names the dropped decision as its predecessor.
    let applied = &records[decision];
    assert_eq!(applied.payload["prev_event_hash"], removed.hash.as_str());
}

#[test]
fn forged_event_type_cannot_be_smuggled_through_data() {
    let chain = golden_chain();
    let emitter = RecoveryEventEmitter::with_run_id(chain.clone(), "run-adversary");
    let record = emitter
        .emit(
            RecoveryEventType::RecoveryRollback,
            json!({
                "event_type": "RECOVERY_VERIFIED",
                "run_id": "someone-else",
                "prev_event_hash": "0".repeat(64),
            }),
        )
        .unwrap();

    assert_eq!(record.event_type(), Some("RECOVERY_ROLLBACK"));
    assert_eq!(record.payload["run_id"], "run-adversary");
    assert_eq!(record.payload["prev_event_hash"], serde_json::Value::Null);
    assert!(chain.verify_all().is_intact());
}
