#[path = "e2e/golden_chain.rs"]
mod golden_chain;

#[path = "e2e/recovery_loop.rs"]
mod recovery_loop;

#[path = "e2e/breaker_lifecycle.rs"]
mod breaker_lifecycle;

#[path = "e2e/policy_to_runtime.rs"]
mod policy_to_runtime;
