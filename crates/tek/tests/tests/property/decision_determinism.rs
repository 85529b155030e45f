//! Property tests: plan selection is a pure function of its input, and an
//! open breaker always removes a plan from candidacy.

use std::collections::BTreeSet;

use proptest::prelude::*;
use tek_resilience::{
    DecisionInput, DecisionOutcome, PlanRejection, RecoveryEngine, RecoveryState, SystemStatus,
};
use tek_tests::{add_validator, policy_with, swap_validator, t0};

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn engine() -> RecoveryEngine {
    let mut failover = tek_resilience::RecoveryPlan::new("full_failover", 3);
    failover.predicted_tsi_median = 0.92;
    failover.predicted_independence_gain = 0.6;
    failover.predicted_cost_usd = 0.2;
    RecoveryEngine::new(policy_with(vec![swap_validator(), add_validator(), failover]))
}

fn arb_state() -> impl Strategy<Value = RecoveryState> {
    (
        0.0f64..=1.0,
        0.0f64..=1.0,
        0.0f64..=1.0,
        0.0f64..=1.0,
        prop_oneof![
            Just(SystemStatus::Ok),
            Just(SystemStatus::Degraded),
            Just(SystemStatus::Incident),
        ],
        0.0f64..=1.0,
    )
        .prop_map(
            |(tsi_current, tsi_forecast, der_density, concentration, status, oscillation)| {
                RecoveryState {
                    tsi_current,
                    tsi_forecast,
                    der_density,
                    concentration,
                    status,
                    oscillation,
                }
            },
        )
}

fn arb_excluded() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(
        prop_oneof![
            Just("swap_validator".to_string()),
            Just("add_validator".to_string()),
            Just("full_failover".to_string()),
        ],
        0..3,
    )
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn decide_is_deterministic(state in arb_state(), excluded_plans in arb_excluded()) {
        let input = DecisionInput { state, excluded_plans, decided_at: t0() };
        let engine = engine();
        let first = engine.decide(&input);
        let second = engine.decide(&input);

        prop_assert_eq!(&first.decision_id, &second.decision_id);
        prop_assert_eq!(first.fingerprint(), second.fingerprint());
        prop_assert!(engine.replay_decision(&first));
    }

    #[test]
    fn excluded_plans_are_never_chosen(state in arb_state(), excluded_plans in arb_excluded()) {
        let input = DecisionInput {
            state,
            excluded_plans: excluded_plans.clone(),
            decided_at: t0(),
        };
        let decision = engine().decide(&input);

        if let Some(chosen) = decision.chosen_plan_id() {
            prop_assert!(!excluded_plans.contains(chosen));
        }
        for evaluation in &decision.evaluated {
            if excluded_plans.contains(&evaluation.plan_id) {
                prop_assert_eq!(&evaluation.rejected, &Some(PlanRejection::CircuitOpen));
            }
        }
    }

    /// Excluding the winner hands the decision to another plan or to none.
    #[test]
    fn excluding_the_winner_changes_the_choice(state in arb_state()) {
        let engine = engine();
        let open = DecisionInput { state, excluded_plans: BTreeSet::new(), decided_at: t0() };
        let decision = engine.decide(&open);
        let Some(winner) = decision.chosen_plan_id().map(str::to_string) else {
            return Ok(());
        };

        let tripped = DecisionInput {
            excluded_plans: BTreeSet::from([winner.clone()]),
            ..open
        };
        let next = engine.decide(&tripped);
        prop_assert_ne!(next.chosen_plan_id(), Some(winner.as_str()));
        prop_assert_ne!(next.decision_id, decision.decision_id);
    }

    /// A state that fires no trigger never selects a plan.
    #[test]
    fn quiet_state_selects_nothing(tsi in 0.80f64..=1.0, concentration in 0.0f64..0.70) {
        let state = RecoveryState {
            tsi_current: tsi,
            tsi_forecast: tsi,
            der_density: 0.5,
            concentration,
            status: SystemStatus::Ok,
            oscillation: 0.0,
        };
        let decision = engine().decide(&DecisionInput {
            state,
            excluded_plans: BTreeSet::new(),
            decided_at: t0(),
        });
        prop_assert_eq!(decision.outcome, DecisionOutcome::NotTriggered);
        prop_assert!(decision.chosen.is_none());
    }
}
