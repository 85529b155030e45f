#![deny(unsafe_code)]
//! # tek-replay
//!
//! Deterministic replay of EPACK chain slices.
//!
//! A [`ReplayPackage`] bundles a chain slice with the governance snapshot and
//! environment recorded alongside it. The [`ReplayEngine`] re-checks hashes,
//! recomputes recorded routing and safety decisions through pure
//! collaborators, compares environment and build, and classifies the run:
//!
//! - `VERIFIED`: everything matches
//! - `DRIFT`: divergence explained by environment, build or declared nondeterminism
//! - `TAMPER_DETECTED`: hash, seal, linkage or unexplained governance divergence
//! - `INDETERMINATE`: evidence needed to decide is missing

pub mod collaborators;
pub mod engine;
pub mod environment;
pub mod error;
pub mod package;
pub mod report;

pub use collaborators::{CollaboratorError, RoutingOracle, SafetyClassifier};
pub use engine::ReplayEngine;
pub use environment::{BuildManifest, EnvironmentFingerprint};
pub use error::{ReplayError, ReplayResult};
pub use package::{
    verify_package, DeterminismPolicy, GovernanceSnapshot, PackageCheck, PackageVerification,
    RecordedDecision, ReplayPackage, ReplayPackageBuilder,
};
pub use report::{
    ReplayOutcome, ReplayReport, ReplayStepKind, ReplaySummary, StepReport, StepStatus,
};
