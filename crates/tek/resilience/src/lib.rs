#![deny(unsafe_code)]
//! # tek-resilience
//!
//! The resilience control plane of the TEK governance kernel.
//!
//! Interaction outcomes feed a decaying Trust Stability Index ([`tsi`]). When
//! the signal or provider concentration crosses policy thresholds, the
//! [`ResilienceRuntime`] asks the recovery engine for a plan, damps its
//! rollout, applies it, and later verifies that trust actually improved.
//! Plans that keep failing are excluded by per-plan circuit breakers, and the
//! meta-validation index ([`mvi`]) checks that the machinery itself stays
//! deterministic. Every action is sealed into the EPACK chain ([`events`]).
//!
//! Policies are compiled once from YAML or JSON ([`policy`]) into an
//! immutable [`ResiliencePolicy`].

pub mod config;
pub mod error;
pub mod events;
pub mod mvi;
pub mod policy;
pub mod resilience;
pub mod runtime;
pub mod tsi;
pub mod verifier;

pub use config::{
    BreakerConfig, DampingConfig, MviConfig, PidParams, PolicyVersion, ProviderRoster,
    ProviderSpec, RecoveryBudgets, RecoveryPlan, ResiliencePolicy, ScoringWeights,
    TriggerThresholds, TsiConfig, TsiTargets, VerificationConfig,
};
pub use error::{PolicyCompileError, ResilienceError, ResilienceResult};
pub use events::{RecoveryEventEmitter, RecoveryEventType};
pub use mvi::{MetaValidationIndex, MviInputs, MviSnapshot};
pub use policy::{
    compile_policy, load_policy_document, normalize, parse_policy_document, CompiledPolicy,
    DocumentFormat,
};
pub use resilience::{
    BreakerState, BreakerTransition, CircuitBreakerRegistry, DampingInput, DampingOutcome,
    DampingStabilizer, DecisionInput, DecisionOutcome, OscillationMeter, PlanBreaker,
    PlanEvaluation, PlanRejection, RecoveryDecision, RecoveryEngine, RecoveryState, ResetScope,
    RolloutHints, SystemStatus, TriggerEvaluation, TriggerReason,
};
pub use runtime::{
    ActiveRecovery, RecoveryContext, RecoveryOutcome, RecoveryVerification, ResilienceRuntime,
    VerificationRequest,
};
pub use tsi::{
    dependency_metrics, DependencyMetrics, OutcomeClass, TsiSample, TsiSignal, TsiTracker,
};
pub use verifier::{PostRecoveryVerifier, VerificationReason, VerificationResult};
