#![deny(unsafe_code)]
//! # tek-epack
//!
//! The EPACK evidence chain: an append-only, hash-linked log of governed
//! interactions and governance actions.
//!
//! - [`canonical`]: canonical JSON and digests (SHA-256 default, SHA-384/512 tagged)
//! - [`record`]: the sealed record and its JSON wire form
//! - [`chain`]: the chain writer with optimistic head check-and-set
//! - [`integrity`]: slice verification with break classification
//! - [`redaction`]: string redaction before sealing and chained redaction notices

pub mod canonical;
pub mod chain;
pub mod error;
pub mod integrity;
pub mod record;
pub mod redaction;

pub use canonical::{canonical_json, sha256_hex, stable_hash, verify_digest, HashAlgorithm};
pub use chain::{ChainHead, EpackChain};
pub use error::{EpackError, EpackResult};
pub use integrity::{verify_records, BreakKind, ChainBreak, IntegrityReport, SliceAnchor};
pub use record::{
    compute_hash, from_json_lines, payload_from_value, to_json_lines, unix_seconds, EpackRecord,
    Payload, GENESIS,
};
pub use redaction::{
    is_redacted, redact_payload, redact_value, redaction_notice, RedactionMode, RedactionPolicy,
};
