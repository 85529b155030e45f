//! Integrity verification for EPACK record slices.

use serde::{Deserialize, Serialize};

use crate::error::{EpackError, EpackResult};
use crate::record::{EpackRecord, GENESIS};

/// How a chain break was inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// A sequence number is missing.
    Deletion,
    /// A sequence number appears twice.
    Insertion,
    /// Sequence numbers are out of order.
    Reorder,
    /// Stored hash does not match content while linkage is intact.
    PayloadMutation,
    /// `prev_hash` does not point at the predecessor.
    LinkageMismatch,
}

impl BreakKind {
    /// Deletion, insertion and reorder concern record order, not content.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            BreakKind::Deletion | BreakKind::Insertion | BreakKind::Reorder
        )
    }
}

impl std::fmt::Display for BreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakKind::Deletion => write!(f, "deletion"),
            BreakKind::Insertion => write!(f, "insertion"),
            BreakKind::Reorder => write!(f, "reorder"),
            BreakKind::PayloadMutation => write!(f, "payload mutation"),
            BreakKind::LinkageMismatch => write!(f, "linkage mismatch"),
        }
    }
}

/// A single detected break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Sequence number of the record where the break was observed.
    pub seq: u64,
    /// Position of that record within the verified slice.
    pub position: usize,
    pub kind: BreakKind,
    pub detail: String,
}

/// The record a slice is expected to continue from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceAnchor {
    pub prev_seq: u64,
    pub prev_hash: String,
}

impl SliceAnchor {
    pub fn genesis() -> Self {
        Self {
            prev_seq: 0,
            prev_hash: GENESIS.to_string(),
        }
    }

    pub fn after(record: &EpackRecord) -> Self {
        Self {
            prev_seq: record.seq,
            prev_hash: record.hash.clone(),
        }
    }
}

/// Result of verifying a slice of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub records_checked: usize,
    pub links_checked: usize,
    pub links_intact: usize,
    /// Every break, in slice order.
    pub breaks: Vec<ChainBreak>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.breaks.is_empty()
    }

    /// The earliest broken link.
    pub fn first_break(&self) -> Option<&ChainBreak> {
        self.breaks.first()
    }

    /// Fraction of checked links that are intact. 1.0 when nothing was linked.
    pub fn chain_link_rate(&self) -> f64 {
        if self.links_checked == 0 {
            1.0
        } else {
            self.links_intact as f64 / self.links_checked as f64
        }
    }

    /// Convert a broken report into [`EpackError::IntegrityViolation`].
    pub fn into_result(self) -> EpackResult<()> {
        match self.breaks.into_iter().next() {
            None => Ok(()),
            Some(b) => Err(EpackError::IntegrityViolation {
                seq: b.seq,
                kind: b.kind,
                reason: b.detail,
            }),
        }
    }
}

/// Verify hashes, linkage and ordering of `records`.
///
/// Without an anchor, a slice starting at seq 1 is anchored at genesis and any
/// other slice has its first link left unchecked.
pub fn verify_records(records: &[EpackRecord], anchor: Option<&SliceAnchor>) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    let (mut prev_seq, mut prev_hash): (Option<u64>, Option<String>) = match anchor {
        Some(a) => (Some(a.prev_seq), Some(a.prev_hash.clone())),
        None => match records.first() {
            Some(first) if first.seq == 1 => (Some(0), Some(GENESIS.to_string())),
            _ => (None, None),
        },
    };

    for (position, record) in records.iter().enumerate() {
        report.records_checked += 1;

        let ordering = prev_seq.and_then(|p| classify_order(p, record, records));

        let link_ok = prev_hash.as_deref().map(|expected| record.prev_hash == expected);
        if let Some(ok) = link_ok {
            report.links_checked += 1;
            if ok {
                report.links_intact += 1;
            }
        }

        let hash_ok = record.hash_matches();

        let found = match (ordering, hash_ok, link_ok) {
            (Some(found), _, _) => Some(found),
            (None, false, Some(false)) => Some((
                BreakKind::LinkageMismatch,
                "prev_hash does not match predecessor and hash does not match content".to_string(),
            )),
            (None, false, _) => Some((
                BreakKind::PayloadMutation,
                "stored hash does not match recomputed hash".to_string(),
            )),
            (None, true, Some(false)) => Some((
                BreakKind::LinkageMismatch,
                "prev_hash does not match predecessor hash".to_string(),
            )),
            (None, true, _) => None,
        };

        if let Some((kind, detail)) = found {
            report.breaks.push(ChainBreak {
                seq: record.seq,
                position,
                kind,
                detail,
            });
        }

        prev_seq = Some(record.seq);
        prev_hash = Some(record.hash.clone());
    }

    report
}

fn classify_order(
    prev_seq: u64,
    record: &EpackRecord,
    slice: &[EpackRecord],
) -> Option<(BreakKind, String)> {
    let seq = record.seq;
    if seq == prev_seq {
        return Some((BreakKind::Insertion, format!("duplicate seq {seq}")));
    }
    if seq < prev_seq {
        return Some((
            BreakKind::Reorder,
            format!("seq {seq} follows seq {prev_seq}"),
        ));
    }
    if seq > prev_seq + 1 {
        let displaced = slice.iter().any(|r| r.seq > prev_seq && r.seq < seq);
        if displaced {
            return Some((
                BreakKind::Reorder,
                format!("seq {seq} displaced; seq {} is elsewhere in the slice", prev_seq + 1),
            ));
        }
        return Some((
            BreakKind::Deletion,
            format!("missing seq {}..={}", prev_seq + 1, seq - 1),
        ));
    }
    None
}
