use tek_epack::EpackError;
use thiserror::Error;

/// Errors raised while assembling replay inputs. Replay itself never fails;
/// it always returns a report with one of the four outcomes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("chain error: {0}")]
    Chain(#[from] EpackError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ReplayError {
    fn from(err: serde_json::Error) -> Self {
        ReplayError::Serialization(err.to_string())
    }
}

pub type ReplayResult<T> = Result<T, ReplayError>;
