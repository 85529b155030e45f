//! Property tests: the trust signal stays a probability however the
//! interaction stream behaves, and meta-validation scores stay in range.

use chrono::Duration;
use proptest::prelude::*;
use tek_resilience::{MetaValidationIndex, MviInputs, OutcomeClass, TsiSample, TsiTracker};
use tek_tests::t0;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn arb_outcome() -> impl Strategy<Value = OutcomeClass> {
    prop_oneof![
        Just(OutcomeClass::Pass),
        Just(OutcomeClass::Warn),
        Just(OutcomeClass::Refuse),
        Just(OutcomeClass::Error),
    ]
}

fn arb_sample() -> impl Strategy<Value = (OutcomeClass, f64, u64, bool, i64)> {
    (
        arb_outcome(),
        prop_oneof![4 => -1.0f64..2.0, 1 => Just(f64::NAN)],
        0u64..10_000,
        any::<bool>(),
        0i64..3_600,
    )
}

fn tracker_from(samples: &[(OutcomeClass, f64, u64, bool, i64)]) -> TsiTracker {
    let mut tracker = TsiTracker::default();
    let mut offset = 0;
    for (outcome, agreement, latency_ms, challenger, gap) in samples {
        offset += gap;
        tracker.record(
            TsiSample::new(*outcome, *agreement, t0() + Duration::seconds(offset))
                .with_latency_ms(*latency_ms)
                .with_challenger(*challenger),
        );
    }
    tracker
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn score_and_forecast_stay_in_unit_interval(
        samples in prop::collection::vec(arb_sample(), 0..48),
        lookahead in 0i64..86_400,
    ) {
        let tracker = tracker_from(&samples);
        let now = t0() + Duration::seconds(samples.iter().map(|s| s.4).sum::<i64>() + lookahead);
        let signal = tracker.signal_at(now);

        prop_assert!((0.0..=1.0).contains(&signal.tsi_current));
        prop_assert!((0.0..=1.0).contains(&signal.tsi_forecast));
        prop_assert!(signal.trend_slope.is_finite());
        prop_assert!(tracker.len() <= tracker.config().window_size);
    }

    /// The signal depends only on the window and the supplied clock.
    #[test]
    fn signal_is_reproducible(samples in prop::collection::vec(arb_sample(), 1..24)) {
        let a = tracker_from(&samples);
        let b = tracker_from(&samples);
        let now = t0() + Duration::hours(2);
        prop_assert_eq!(a.score_at(now).to_bits(), b.score_at(now).to_bits());
        prop_assert_eq!(a.forecast_at(now).to_bits(), b.forecast_at(now).to_bits());
    }

    #[test]
    fn mvi_score_stays_in_unit_interval(
        values in prop::collection::vec(prop_oneof![8 => -0.5f64..1.5, 1 => Just(f64::NAN)], 0..32),
    ) {
        let snapshot = MetaValidationIndex::default().compute(&MviInputs {
            tsi_values: &values,
            ..MviInputs::default()
        });
        prop_assert!((0.0..=1.0).contains(&snapshot.mvi_score));
        prop_assert!((0.0..=1.0).contains(&snapshot.tsi_coherence));
        prop_assert_eq!(snapshot.passed, snapshot.mvi_score >= 0.80);
    }
}
