//! Append-only EPACK chain.
//!
//! Records live in an arena addressed by position (`seq - 1`). Appends seal
//! the record outside the write lock and commit with a check-and-set on the
//! head, so two writers that observed the same head can never both succeed.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::canonical::HashAlgorithm;
use crate::error::{EpackError, EpackResult};
use crate::integrity::{verify_records, IntegrityReport, SliceAnchor};
use crate::record::{unix_seconds, EpackRecord, Payload, GENESIS};

/// Position of the chain head. An empty chain has head seq 0 at `GENESIS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub seq: u64,
    pub hash: String,
}

impl ChainHead {
    pub fn genesis() -> Self {
        Self {
            seq: 0,
            hash: GENESIS.to_string(),
        }
    }
}

/// The evidence chain.
pub struct EpackChain {
    algorithm: HashAlgorithm,
    records: RwLock<Vec<EpackRecord>>,
}

impl EpackChain {
    pub fn new() -> Self {
        Self::with_algorithm(HashAlgorithm::default())
    }

    pub fn with_algorithm(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            records: RwLock::new(Vec::new()),
        }
    }

    /// Rehydrate persisted records. Nothing is validated here; use
    /// [`EpackChain::verify_range`] for that.
    pub fn load(records: Vec<EpackRecord>, algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            records: RwLock::new(records),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn head(&self) -> ChainHead {
        head_of(&self.records.read())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Append `payload` at the current head, stamped with the current time.
    pub fn append(&self, payload: Payload) -> EpackResult<EpackRecord> {
        self.append_at(payload, unix_seconds(Utc::now()))
    }

    /// Append `payload` at the current head with an explicit timestamp.
    pub fn append_at(&self, payload: Payload, ts: f64) -> EpackResult<EpackRecord> {
        let head = self.head();
        self.append_after(&head, payload, ts)
    }

    /// Append only if the head is still `expected`.
    ///
    /// Fails with [`EpackError::ChainWriteConflict`] when another writer
    /// advanced the head first.
    pub fn append_after(
        &self,
        expected: &ChainHead,
        payload: Payload,
        ts: f64,
    ) -> EpackResult<EpackRecord> {
        let record = EpackRecord::seal(
            expected.seq + 1,
            ts,
            expected.hash.clone(),
            payload,
            self.algorithm,
        )?;

        let mut records = self.records.write();
        let actual = head_of(&records);
        if actual != *expected {
            warn!(
                expected_seq = expected.seq,
                actual_seq = actual.seq,
                "EPACK head moved during append"
            );
            return Err(EpackError::ChainWriteConflict {
                expected_seq: expected.seq,
                expected_hash: expected.hash.clone(),
                actual_seq: actual.seq,
                actual_hash: actual.hash,
            });
        }
        records.push(record.clone());
        drop(records);

        debug!(seq = record.seq, hash = %record.hash, "EPACK record appended");
        Ok(record)
    }

    /// Append, retrying on write conflicts up to `max_attempts` times.
    pub fn append_with_retry(
        &self,
        payload: Payload,
        max_attempts: usize,
    ) -> EpackResult<EpackRecord> {
        let attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.append(payload.clone()) {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    debug!(attempt, "retrying EPACK append after conflict");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Consistent copy of every record.
    pub fn snapshot(&self) -> Vec<EpackRecord> {
        self.records.read().clone()
    }

    /// Record at position `seq - 1`.
    pub fn get(&self, seq: u64) -> Option<EpackRecord> {
        let index = usize::try_from(seq.checked_sub(1)?).ok()?;
        self.records.read().get(index).cloned()
    }

    /// Records at positions `from..=to`, clipped to the chain length.
    pub fn range(&self, from: u64, to: u64) -> EpackResult<Vec<EpackRecord>> {
        let records = self.records.read();
        let (start, end) = positions(from, to, records.len())?;
        Ok(records[start..end].to_vec())
    }

    /// Verify hashes, linkage and order of positions `from..=to`.
    pub fn verify_range(&self, from: u64, to: u64) -> EpackResult<IntegrityReport> {
        let records = self.records.read();
        let (start, end) = positions(from, to, records.len())?;
        let anchor = if start == 0 {
            SliceAnchor::genesis()
        } else {
            SliceAnchor {
                prev_seq: from - 1,
                prev_hash: records[start - 1].hash.clone(),
            }
        };
        let report = verify_records(&records[start..end], Some(&anchor));
        drop(records);

        if let Some(first) = report.first_break() {
            warn!(
                seq = first.seq,
                kind = %first.kind,
                breaks = report.breaks.len(),
                "EPACK integrity break detected"
            );
        }
        Ok(report)
    }

    /// Verify the whole chain.
    pub fn verify_all(&self) -> IntegrityReport {
        let records = self.records.read();
        verify_records(&records, Some(&SliceAnchor::genesis()))
    }

    /// Like [`EpackChain::verify_range`], failing with
    /// [`EpackError::IntegrityViolation`] on the first break.
    pub fn ensure_intact(&self, from: u64, to: u64) -> EpackResult<()> {
        self.verify_range(from, to)?.into_result()
    }
}

impl Default for EpackChain {
    fn default() -> Self {
        Self::new()
    }
}

fn head_of(records: &[EpackRecord]) -> ChainHead {
    records
        .last()
        .map(|r| ChainHead {
            seq: r.seq,
            hash: r.hash.clone(),
        })
        .unwrap_or_else(ChainHead::genesis)
}

fn positions(from: u64, to: u64, len: usize) -> EpackResult<(usize, usize)> {
    if from == 0 || from > to || from > len as u64 {
        return Err(EpackError::InvalidRange { from, to });
    }
    let start = (from - 1) as usize;
    let end = usize::try_from(to).unwrap_or(usize::MAX).min(len);
    Ok((start, end))
}
