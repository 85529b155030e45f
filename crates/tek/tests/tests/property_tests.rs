#[path = "property/chain_mutation.rs"]
mod chain_mutation;

#[path = "property/damping_bounds.rs"]
mod damping_bounds;

#[path = "property/decision_determinism.rs"]
mod decision_determinism;

#[path = "property/tsi_bounds.rs"]
mod tsi_bounds;
