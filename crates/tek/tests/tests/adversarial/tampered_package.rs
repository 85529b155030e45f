//! Adversarial test: a replay package edited after sealing, or sealed around
//! forged evidence, never replays as VERIFIED.

use serde_json::json;
use tek_replay::{verify_package, ReplayOutcome, ReplayPackage, ReplayStepKind};
use tek_tests::*;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn governance_edited_after_sealing() {
    let mut package = package(golden_records()).unwrap();
    package.governance.routing_config = Some(json!({"limit": 0.9}));

    assert!(!package.verify_seal());
    let report = replay_engine().replay(&package);
    assert_eq!(report.outcome, ReplayOutcome::TamperDetected);
    assert_eq!(report.failing_step, Some(ReplayStepKind::HashIntegrity));
    assert_eq!(report.earliest_divergence, package.records.first().map(|r| r.seq));
    assert!(report.earliest_divergence.is_some());
}

#[test]
fn forged_routing_decision_sealed_into_package() {
    let package = ReplayPackage::builder(golden_records())
        .governance(governance())
        .environment(environment())
        .routing_decision(2, json!({"risk": 0.8}), json!("BOUND"))
        .extract_recorded_decisions()
        .build()
        .unwrap();
    assert!(package.verify_seal());

    let report = replay_engine().replay(&package);
    assert_eq!(report.outcome, ReplayOutcome::TamperDetected);
    assert_eq!(report.failing_step, Some(ReplayStepKind::RoutingDeterminism));
    assert_eq!(report.earliest_divergence, Some(2));
}

#[test]
fn forged_safety_classification_is_tamper() {
    let package = ReplayPackage::builder(golden_records())
        .governance(governance())
        .environment(environment())
        .safety_classification(3, json!({"text": "attack at dawn"}), json!("SAFE"))
        .build()
        .unwrap();

    let report = replay_engine().replay(&package);
    assert_eq!(report.outcome, ReplayOutcome::TamperDetected);
    assert_eq!(report.failing_step, Some(ReplayStepKind::SafetyConsistency));
    assert_eq!(report.earliest_divergence, Some(3));
}

#[test]
fn record_removed_before_sealing_fails_linkage() {
    let mut records = golden_records();
    records.remove(1);
    let package = package(records).unwrap();
    assert!(package.verify_seal());

    let report = replay_engine().replay(&package);
    assert_eq!(report.outcome, ReplayOutcome::TamperDetected);
    assert_eq!(report.failing_step, Some(ReplayStepKind::ChainLinkage));
    assert_eq!(report.earliest_divergence, Some(3));
}

#[test]
fn structural_checks_flag_head_substitution() {
    let mut package = package(golden_records()).unwrap();
    assert!(verify_package(&package).passed);

    package.head_hash = "0".repeat(64);
    let verification = verify_package(&package);
    assert!(!verification.passed);
    assert!(verification.checks.iter().any(|c| !c.passed));
}
