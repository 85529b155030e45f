//! Canonical JSON serialization and digests.
//!
//! Canonical form: object keys sorted at every depth, no insignificant
//! whitespace, UTF-8 passed through unescaped. The output does not depend on
//! whether `serde_json` was built with `preserve_order`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Digest algorithm used to seal records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Default. Digests are untagged lowercase hex.
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Hex digest of `bytes`, without any tag.
    pub fn hex_digest(&self, bytes: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            HashAlgorithm::Sha384 => hex::encode(Sha384::digest(bytes)),
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
        }
    }

    /// Digest in wire form: plain hex for SHA-256, `"<algo>:<hex>"` otherwise.
    pub fn tagged_digest(&self, bytes: &[u8]) -> String {
        let hex = self.hex_digest(bytes);
        match self {
            HashAlgorithm::Sha256 => hex,
            other => format!("{}:{}", other.name(), hex),
        }
    }

    /// Infer the algorithm that produced a wire digest.
    pub fn detect(digest: &str) -> Option<HashAlgorithm> {
        match digest.split_once(':') {
            None => Some(HashAlgorithm::Sha256),
            Some(("sha256", _)) => Some(HashAlgorithm::Sha256),
            Some(("sha384", _)) => Some(HashAlgorithm::Sha384),
            Some(("sha512", _)) => Some(HashAlgorithm::Sha512),
            Some(_) => None,
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Serialize `value` in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Digest of the canonical form of `value`.
pub fn stable_hash(value: &Value, algorithm: HashAlgorithm) -> String {
    algorithm.tagged_digest(canonical_json(value).as_bytes())
}

/// SHA-256 hex digest of a string.
pub fn sha256_hex(text: &str) -> String {
    HashAlgorithm::Sha256.hex_digest(text.as_bytes())
}

/// Recompute the digest of `value` with the algorithm `digest` was tagged
/// with and compare. Unknown tags never verify.
pub fn verify_digest(value: &Value, digest: &str) -> bool {
    match HashAlgorithm::detect(digest) {
        Some(algorithm) => stable_hash(value, algorithm) == digest,
        None => false,
    }
}
