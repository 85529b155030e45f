//! Payload redaction applied before sealing.
//!
//! String leaves are replaced by `{"_redacted": true, "sha256": <digest>}`
//! so the sealed record proves which value was present without storing it.
//! Public evidence paths (citation metadata) are left intact.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::canonical::{stable_hash, HashAlgorithm};
use crate::record::{EpackRecord, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionMode {
    Off,
    #[default]
    Hash,
}

/// Redaction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionPolicy {
    pub mode: RedactionMode,

    /// Nesting depth beyond which values are kept as-is.
    pub max_depth: usize,

    /// Key-path prefixes that are never redacted.
    pub public_paths: Vec<Vec<String>>,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        let path = |parts: &[&str]| parts.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        Self {
            mode: RedactionMode::Hash,
            max_depth: 10,
            public_paths: vec![
                path(&["extra", "gen_meta", "citation_verification"]),
                path(&["extra", "gen_meta", "citation_cache_updates"]),
            ],
        }
    }
}

impl RedactionPolicy {
    pub fn off() -> Self {
        Self {
            mode: RedactionMode::Off,
            ..Self::default()
        }
    }

    fn is_public(&self, path: &[String]) -> bool {
        self.public_paths
            .iter()
            .any(|prefix| path.len() >= prefix.len() && path[..prefix.len()] == prefix[..])
    }
}

/// Replacement for a single string.
pub fn redact_value(text: &str) -> Value {
    json!({
        "_redacted": true,
        "sha256": stable_hash(&Value::String(text.to_string()), HashAlgorithm::Sha256),
    })
}

/// Whether `value` is a redaction marker.
pub fn is_redacted(value: &Value) -> bool {
    value.get("_redacted").and_then(Value::as_bool) == Some(true)
}

/// Redact every string leaf of `payload` under `policy`.
pub fn redact_payload(payload: &Payload, policy: &RedactionPolicy) -> Payload {
    if policy.mode == RedactionMode::Off {
        return payload.clone();
    }
    let mut path = Vec::new();
    redact_map(payload, 1, policy, &mut path)
}

fn redact_map(
    map: &Map<String, Value>,
    depth: usize,
    policy: &RedactionPolicy,
    path: &mut Vec<String>,
) -> Payload {
    map.iter()
        .map(|(key, value)| {
            path.push(key.clone());
            let redacted = redact_recursive(value, depth, policy, path);
            path.pop();
            (key.clone(), redacted)
        })
        .collect()
}

fn redact_recursive(
    value: &Value,
    depth: usize,
    policy: &RedactionPolicy,
    path: &mut Vec<String>,
) -> Value {
    if depth > policy.max_depth || policy.is_public(path) {
        return value.clone();
    }
    match value {
        Value::String(s) => redact_value(s),
        Value::Object(map) => Value::Object(redact_map(map, depth + 1, policy, path)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_recursive(item, depth + 1, policy, path))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Payload of a chained notice recording that fields of an already sealed
/// record were withheld. The sealed record itself is never rewritten.
pub fn redaction_notice(target: &EpackRecord, fields: &[&str], reason: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("event_type".into(), json!("REDACTION"));
    payload.insert("target_seq".into(), json!(target.seq));
    payload.insert("target_hash".into(), json!(target.hash));
    payload.insert("fields".into(), json!(fields));
    payload.insert("reason".into(), json!(reason));
    payload
}
