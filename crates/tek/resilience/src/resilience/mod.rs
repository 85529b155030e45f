//! Recovery selection, circuit breaking and rollout damping.

mod circuit_breaker;
mod damping;
mod recovery;

pub use circuit_breaker::{
    BreakerState, BreakerTransition, CircuitBreakerRegistry, PlanBreaker, ResetScope,
};
pub use damping::{DampingInput, DampingOutcome, DampingStabilizer, OscillationMeter, RolloutHints};
pub use recovery::{
    DecisionInput, DecisionOutcome, PlanEvaluation, PlanRejection, RecoveryDecision,
    RecoveryEngine, RecoveryState, SystemStatus, TriggerEvaluation, TriggerReason,
};
