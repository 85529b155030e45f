//! Error types for the resilience control plane.

use tek_epack::EpackError;
use thiserror::Error;

/// A policy document could not be compiled. The runtime degrades to
/// recovery-disabled instead of failing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyCompileError {
    #[error("failed to read policy: {0}")]
    Io(String),

    #[error("failed to parse policy document: {0}")]
    Parse(String),

    #[error("unsupported policy schema version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid policy field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("policy has {} errors: {}", .0.len(), .0.join("; "))]
    Multiple(Vec<String>),
}

impl PolicyCompileError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PolicyCompileError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Individual error messages.
    pub fn messages(&self) -> Vec<String> {
        match self {
            PolicyCompileError::Multiple(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

/// Errors surfaced by the resilience runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    #[error("evidence chain error: {0}")]
    Chain(#[from] EpackError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyCompileError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        ResilienceError::Serialization(err.to_string())
    }
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
