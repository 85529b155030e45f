//! E2E test: a golden EPACK slice replays VERIFIED, and every kind of
//! divergence is classified the same way on every run.

use tek_epack::{
    from_json_lines, to_json_lines, EpackChain, EpackRecord, HashAlgorithm, GENESIS,
};
use tek_replay::{ReplayOutcome, ReplayPackage, ReplayStepKind, ReplaySummary, StepStatus};
use tek_tests::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn reseal(record: &EpackRecord) -> EpackRecord {
    EpackRecord::seal(
        record.seq,
        record.ts,
        record.prev_hash.clone(),
        record.payload.clone(),
        HashAlgorithm::Sha256,
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn golden_slice_replays_verified() {
    let records = golden_records();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].prev_hash, GENESIS);

    let report = replay_engine().replay(&package(records).unwrap());
    assert_eq!(report.outcome, ReplayOutcome::Verified);
    assert_eq!(report.determinism_index, 100.0);
    assert_eq!(report.chain_link_rate, 1.0);
    assert_eq!(report.records_replayed, 4);
    assert!(report.earliest_divergence.is_none());
    assert!(report.governance_match());
    for kind in ReplayStepKind::ALL {
        let step = report.step(kind).unwrap();
        assert_eq!(step.status, StepStatus::Passed, "step {kind} did not pass");
    }
}

#[test]
fn golden_hashes_are_reproducible() {
    let a = golden_records();
    let b = golden_records();
    assert_eq!(a, b);
    assert_eq!(
        package(a).unwrap().package_hash,
        package(b).unwrap().package_hash
    );
}

#[test]
fn altered_prev_hash_is_tamper_at_that_record() {
    let mut records = golden_records();
    records[2].prev_hash = "0".repeat(64);

    let report = replay_engine().replay(&package(records).unwrap());
    assert_eq!(report.outcome, ReplayOutcome::TamperDetected);
    assert_eq!(report.failing_step, Some(ReplayStepKind::HashIntegrity));
    assert_eq!(report.earliest_divergence, Some(3));
}

#[test]
fn resealed_forgery_is_still_caught_by_linkage() {
    let mut records = golden_records();
    records[2].prev_hash = "f".repeat(64);
    records[2] = reseal(&records[2]);
    assert!(records[2].hash_matches());

    let report = replay_engine().replay(&package(records).unwrap());
    assert_eq!(report.outcome, ReplayOutcome::TamperDetected);
    assert_eq!(report.earliest_divergence, Some(3));
}

#[test]
fn environment_only_change_is_drift() {
    let engine = replay_engine_in(environment().with_dependency("serde", "1.0.210"));
    let report = engine.replay(&package(golden_records()).unwrap());
    assert_eq!(report.outcome, ReplayOutcome::Drift);
    assert!(report.governance_match());
    assert!(!report.drift_factors.is_empty());
    assert!(report.earliest_divergence.is_none());
}

#[test]
fn replay_is_idempotent() {
    let package = package(golden_records()).unwrap();
    let engine = replay_engine();
    let first = engine.replay(&package);
    for _ in 0..3 {
        let again = engine.replay(&package);
        assert_eq!(again, first);
        assert_eq!(
            serde_json::to_string(&again).unwrap(),
            serde_json::to_string(&first).unwrap()
        );
    }
}

#[test]
fn persisted_chain_replays_identically() {
    let chain = golden_chain();
    let lines = to_json_lines(&chain.snapshot()).unwrap();
    let restored = EpackChain::load(from_json_lines(&lines).unwrap(), HashAlgorithm::Sha256);
    assert!(restored.verify_all().is_intact());

    let original = replay_engine().replay(&package(chain.snapshot()).unwrap());
    let reloaded = replay_engine().replay(&package(restored.snapshot()).unwrap());
    assert_eq!(original, reloaded);
}

#[test]
fn anchored_slice_from_the_middle_verifies() {
    let chain = golden_chain();
    let package = ReplayPackage::from_chain(&chain, 2, 4)
        .unwrap()
        .governance(governance())
        .environment(environment())
        .extract_recorded_decisions()
        .build()
        .unwrap();
    assert!(package.anchor.is_some());

    let report = replay_engine().replay(&package);
    assert_eq!(report.outcome, ReplayOutcome::Verified);
    assert_eq!(report.records_replayed, 3);
}

#[test]
fn batch_summary_counts_tampering() {
    let clean = replay_engine().replay(&package(golden_records()).unwrap());
    let mut forged = golden_records();
    forged[1]
        .payload
        .insert(
            "routing".into(),
            serde_json::json!({"input": {"risk": 0.1}, "decision": "REFLECT"}),
        );
    let tampered = replay_engine().replay(&package(forged).unwrap());
    assert_eq!(tampered.outcome, ReplayOutcome::TamperDetected);
    assert_eq!(tampered.earliest_divergence, Some(2));

    let summary = ReplaySummary::from_reports(&[clean.clone(), clean, tampered.clone()]);
    assert_eq!(summary.total, 3);
    assert!((summary.verified_rate - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(summary.outcome_counts[&ReplayOutcome::TamperDetected], 1);
    assert_eq!(summary.tampered, vec![tampered.replay_id]);
}
