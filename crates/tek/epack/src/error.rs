use thiserror::Error;

use crate::integrity::BreakKind;

/// Errors returned by the EPACK chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EpackError {
    /// Another writer advanced the head between read and commit. Retryable.
    #[error("chain write conflict: expected head seq {expected_seq} ({expected_hash}), found seq {actual_seq} ({actual_hash})")]
    ChainWriteConflict {
        expected_seq: u64,
        expected_hash: String,
        actual_seq: u64,
        actual_hash: String,
    },

    #[error("chain integrity violation at seq {seq} ({kind}): {reason}")]
    IntegrityViolation {
        seq: u64,
        kind: BreakKind,
        reason: String,
    },

    #[error("invalid range: from_seq {from} to_seq {to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("payload must be a JSON object")]
    PayloadNotObject,

    #[error("timestamp is not finite")]
    InvalidTimestamp,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EpackError {
    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EpackError::ChainWriteConflict { .. })
    }
}

impl From<serde_json::Error> for EpackError {
    fn from(err: serde_json::Error) -> Self {
        EpackError::Serialization(err.to_string())
    }
}

/// Result type for EPACK operations.
pub type EpackResult<T> = Result<T, EpackError>;
