//! Contracts for the pure functions replay re-invokes.
//!
//! Routing and safety screening live outside this workspace. Replay only
//! needs them as deterministic functions of recorded inputs. Plain functions
//! and closures with the right signature implement both traits.

use serde_json::Value;
use thiserror::Error;

/// A collaborator could not evaluate a recorded input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{collaborator} could not evaluate input: {reason}")]
pub struct CollaboratorError {
    pub collaborator: String,
    pub reason: String,
}

impl CollaboratorError {
    pub fn new(collaborator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            collaborator: collaborator.into(),
            reason: reason.into(),
        }
    }
}

/// Recomputes a routing decision from its input and the routing configuration
/// that was active when it was recorded.
pub trait RoutingOracle: Send + Sync {
    fn route(&self, input: &Value, config: &Value) -> Result<Value, CollaboratorError>;
}

/// Recomputes a safety classification from its input.
pub trait SafetyClassifier: Send + Sync {
    fn classify(&self, input: &Value) -> Result<Value, CollaboratorError>;
}

impl<F> RoutingOracle for F
where
    F: Fn(&Value, &Value) -> Result<Value, CollaboratorError> + Send + Sync,
{
    fn route(&self, input: &Value, config: &Value) -> Result<Value, CollaboratorError> {
        self(input, config)
    }
}

impl<F> SafetyClassifier for F
where
    F: Fn(&Value) -> Result<Value, CollaboratorError> + Send + Sync,
{
    fn classify(&self, input: &Value) -> Result<Value, CollaboratorError> {
        self(input)
    }
}
