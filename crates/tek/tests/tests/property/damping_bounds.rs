//! Property tests: the rollout fraction never leaves its configured bounds,
//! whatever the trust signal does.

use proptest::prelude::*;
use tek_resilience::{DampingConfig, DampingInput, DampingStabilizer, OscillationMeter, TsiTargets};

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn arb_input() -> impl Strategy<Value = DampingInput> {
    (
        prop_oneof![
            4 => -2.0f64..3.0,
            1 => Just(f64::NAN),
            1 => Just(f64::NEG_INFINITY),
        ],
        0.0f64..=1.0,
        0.0f64..=1.0,
    )
        .prop_map(|(tsi_forecast, concentration, oscillation)| DampingInput {
            tsi_forecast,
            concentration,
            oscillation,
        })
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn fraction_stays_within_rollout_bounds(inputs in prop::collection::vec(arb_input(), 1..64)) {
        let config = DampingConfig::default();
        let (min, max) = (config.min_rollout, config.max_rollout);
        let mut stabilizer = DampingStabilizer::new(config, &TsiTargets::default());
        for input in &inputs {
            let fraction = stabilizer.step(input);
            prop_assert!((min..=max).contains(&fraction), "fraction {} out of bounds", fraction);
        }
    }

    /// Identical input histories produce identical rollouts.
    #[test]
    fn controller_is_deterministic(inputs in prop::collection::vec(arb_input(), 1..32)) {
        let mut a = DampingStabilizer::new(DampingConfig::default(), &TsiTargets::default());
        let mut b = DampingStabilizer::new(DampingConfig::default(), &TsiTargets::default());
        for input in &inputs {
            prop_assert_eq!(a.step(input).to_bits(), b.step(input).to_bits());
        }
    }

    #[test]
    fn oscillation_index_is_a_fraction(values in prop::collection::vec(-1.0f64..2.0, 0..64)) {
        let mut meter = OscillationMeter::default();
        for v in values {
            meter.record(v);
        }
        let index = meter.index();
        prop_assert!((0.0..=1.0).contains(&index));
        prop_assert!(meter.len() <= 20);
    }
}
