//! Property tests: any single change to a sealed EPACK slice is located at the
//! record where it was made.

use proptest::prelude::*;
use serde_json::json;
use tek_epack::{payload_from_value, verify_records, BreakKind, EpackChain, EpackRecord};

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn sealed(values: &[i64]) -> Vec<EpackRecord> {
    let chain = EpackChain::new();
    for (i, v) in values.iter().enumerate() {
        let payload = payload_from_value(json!({"value": v, "i": i})).unwrap();
        chain.append_at(payload, i as f64 + 1.0).unwrap();
    }
    chain.snapshot()
}

/// Chain contents plus an index into them.
fn arb_slice(min: usize, max: usize) -> impl Strategy<Value = (Vec<i64>, usize)> {
    prop::collection::vec(any::<i64>(), min..max)
        .prop_flat_map(|values| {
            let len = values.len();
            (Just(values), 0..len)
        })
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// An untouched slice always verifies.
    #[test]
    fn sealed_slice_is_intact(values in prop::collection::vec(any::<i64>(), 1..16)) {
        let records = sealed(&values);
        let report = verify_records(&records, None);
        prop_assert!(report.is_intact());
        prop_assert_eq!(report.chain_link_rate(), 1.0);
    }

    /// Mutating one payload breaks exactly that record.
    #[test]
    fn payload_mutation_is_found_at_its_seq(
        (values, index) in arb_slice(1, 16),
        replacement in any::<i64>(),
    ) {
        let mut records = sealed(&values);
        prop_assume!(replacement != values[index]);
        records[index].payload.insert("value".into(), json!(replacement));

        let report = verify_records(&records, None);
        let first = report.first_break().unwrap();
        prop_assert_eq!(first.seq, index as u64 + 1);
        prop_assert_eq!(first.kind, BreakKind::PayloadMutation);
        prop_assert_eq!(report.breaks.len(), 1);
    }

    /// Dropping an interior record is reported as a deletion at its successor.
    #[test]
    fn interior_deletion_is_found(
        values in prop::collection::vec(any::<i64>(), 3..16),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut records = sealed(&values);
        let index = 1 + pick.index(records.len() - 2);
        records.remove(index);

        let report = verify_records(&records, None);
        let first = report.first_break().unwrap();
        prop_assert_eq!(first.seq, index as u64 + 2);
        prop_assert_eq!(first.kind, BreakKind::Deletion);
    }

    /// Swapping two adjacent records is never accepted.
    #[test]
    fn adjacent_swap_is_detected((values, index) in arb_slice(2, 16)) {
        prop_assume!(index + 1 < values.len());
        let mut records = sealed(&values);
        records.swap(index, index + 1);

        let report = verify_records(&records, None);
        prop_assert!(!report.is_intact());
    }
}
