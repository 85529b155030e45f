//! The sealed EPACK record and its wire form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::canonical::{stable_hash, HashAlgorithm};
use crate::error::{EpackError, EpackResult};

/// `prev_hash` of the first record in a chain.
pub const GENESIS: &str = "GENESIS";

/// Record payloads are always JSON objects.
pub type Payload = Map<String, Value>;

/// One sealed link of the evidence chain.
///
/// `hash` covers the canonical JSON of `{seq, ts, prev_hash, payload}`.
/// Records are never mutated after sealing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpackRecord {
    pub seq: u64,
    /// Unix seconds.
    pub ts: f64,
    pub prev_hash: String,
    pub hash: String,
    pub payload: Payload,
}

impl EpackRecord {
    /// Seal a new record.
    pub fn seal(
        seq: u64,
        ts: f64,
        prev_hash: impl Into<String>,
        payload: Payload,
        algorithm: HashAlgorithm,
    ) -> EpackResult<Self> {
        if !ts.is_finite() {
            return Err(EpackError::InvalidTimestamp);
        }
        let prev_hash = prev_hash.into();
        let hash = compute_hash(seq, ts, &prev_hash, &payload, algorithm);
        Ok(Self {
            seq,
            ts,
            prev_hash,
            hash,
            payload,
        })
    }

    /// Recompute the digest using the algorithm the stored hash is tagged with.
    pub fn recompute_hash(&self) -> Option<String> {
        let algorithm = HashAlgorithm::detect(&self.hash)?;
        Some(compute_hash(
            self.seq,
            self.ts,
            &self.prev_hash,
            &self.payload,
            algorithm,
        ))
    }

    pub fn hash_matches(&self) -> bool {
        self.recompute_hash().as_deref() == Some(self.hash.as_str())
    }

    pub fn is_genesis(&self) -> bool {
        self.seq == 1 && self.prev_hash == GENESIS
    }

    /// `payload.event_type`, when the record carries a typed event.
    pub fn event_type(&self) -> Option<&str> {
        self.payload.get("event_type").and_then(Value::as_str)
    }
}

/// Digest over the canonical hash input of a record.
pub fn compute_hash(
    seq: u64,
    ts: f64,
    prev_hash: &str,
    payload: &Payload,
    algorithm: HashAlgorithm,
) -> String {
    let input = json!({
        "seq": seq,
        "ts": ts,
        "prev_hash": prev_hash,
        "payload": payload,
    });
    stable_hash(&input, algorithm)
}

/// Unix seconds with microsecond precision.
pub fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Convert a JSON value into a record payload.
pub fn payload_from_value(value: Value) -> EpackResult<Payload> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(EpackError::PayloadNotObject),
    }
}

/// Serialize records as JSON Lines, one record per line.
pub fn to_json_lines(records: &[EpackRecord]) -> EpackResult<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse JSON Lines produced by [`to_json_lines`]. Blank lines are skipped.
pub fn from_json_lines(text: &str) -> EpackResult<Vec<EpackRecord>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(EpackError::from))
        .collect()
}
