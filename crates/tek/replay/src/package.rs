//! Replay packages: the sealed bundle of evidence one replay consumes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tek_epack::{
    stable_hash, verify_records, EpackChain, EpackRecord, HashAlgorithm, SliceAnchor,
};

use crate::environment::EnvironmentFingerprint;
use crate::error::ReplayResult;
use crate::report::ReplayStepKind;

/// How strictly replay treats divergence in recomputed decisions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeterminismPolicy {
    /// Every recomputed decision must match.
    #[default]
    Strict,
    /// The listed steps may diverge; divergence there is drift.
    Bounded { declared: BTreeSet<ReplayStepKind> },
}

impl DeterminismPolicy {
    pub fn tolerates(&self, step: ReplayStepKind) -> bool {
        match self {
            DeterminismPolicy::Strict => false,
            DeterminismPolicy::Bounded { declared } => declared.contains(&step),
        }
    }
}

/// Governance configuration active when the slice was recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceSnapshot {
    pub kernel_version: String,
    pub governance_profile_id: String,
    pub validator_set_id: String,
    #[serde(default)]
    pub determinism_policy: DeterminismPolicy,
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,
    /// Routing configuration needed to recompute routing decisions.
    #[serde(default)]
    pub routing_config: Option<Value>,
}

/// A decision recorded against the record with sequence number `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedDecision {
    pub seq: u64,
    pub input: Value,
    pub output: Value,
}

/// Read-only bundle consumed by one replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayPackage {
    pub input_payload_hash: String,
    #[serde(default)]
    pub input_metadata: Map<String, Value>,
    pub governance: GovernanceSnapshot,
    #[serde(default)]
    pub routing_decisions: Vec<RecordedDecision>,
    #[serde(default)]
    pub safety_classifications: Vec<RecordedDecision>,
    pub records: Vec<EpackRecord>,
    /// Predecessor of the first record when the slice does not start at genesis.
    #[serde(default)]
    pub anchor: Option<SliceAnchor>,
    pub head_hash: String,
    #[serde(default)]
    pub validator_results: Vec<Value>,
    #[serde(default)]
    pub consensus_result: Option<Value>,
    pub environment: EnvironmentFingerprint,
    pub package_hash: String,
}

#[derive(Serialize)]
struct SealContent<'a> {
    input_payload_hash: &'a str,
    input_metadata: &'a Map<String, Value>,
    governance: &'a GovernanceSnapshot,
    routing_decisions: &'a [RecordedDecision],
    safety_classifications: &'a [RecordedDecision],
    records: &'a [EpackRecord],
    anchor: &'a Option<SliceAnchor>,
    head_hash: &'a str,
    validator_results: &'a [Value],
    consensus_result: &'a Option<Value>,
    environment: &'a EnvironmentFingerprint,
}

impl ReplayPackage {
    pub fn builder(records: Vec<EpackRecord>) -> ReplayPackageBuilder {
        ReplayPackageBuilder::new(records)
    }

    /// Start a package from positions `from..=to` of a chain, anchored at the
    /// preceding record.
    pub fn from_chain(
        chain: &EpackChain,
        from: u64,
        to: u64,
    ) -> ReplayResult<ReplayPackageBuilder> {
        let records = chain.range(from, to)?;
        let anchor = if from > 1 {
            chain.get(from - 1).map(|prev| SliceAnchor::after(&prev))
        } else {
            None
        };
        let mut builder = ReplayPackageBuilder::new(records);
        builder.anchor = anchor;
        Ok(builder)
    }

    /// Digest over every content field.
    pub fn compute_seal(&self) -> ReplayResult<String> {
        let content = SealContent {
            input_payload_hash: &self.input_payload_hash,
            input_metadata: &self.input_metadata,
            governance: &self.governance,
            routing_decisions: &self.routing_decisions,
            safety_classifications: &self.safety_classifications,
            records: &self.records,
            anchor: &self.anchor,
            head_hash: &self.head_hash,
            validator_results: &self.validator_results,
            consensus_result: &self.consensus_result,
            environment: &self.environment,
        };
        let value = serde_json::to_value(&content)?;
        Ok(stable_hash(&value, HashAlgorithm::Sha256))
    }

    pub fn verify_seal(&self) -> bool {
        matches!(self.compute_seal(), Ok(seal) if seal == self.package_hash)
    }

    pub fn record(&self, seq: u64) -> Option<&EpackRecord> {
        self.records.iter().find(|r| r.seq == seq)
    }
}

/// Assembles and seals a [`ReplayPackage`].
#[derive(Debug, Clone)]
pub struct ReplayPackageBuilder {
    records: Vec<EpackRecord>,
    anchor: Option<SliceAnchor>,
    governance: GovernanceSnapshot,
    routing_decisions: Vec<RecordedDecision>,
    safety_classifications: Vec<RecordedDecision>,
    validator_results: Vec<Value>,
    consensus_result: Option<Value>,
    environment: EnvironmentFingerprint,
    extract_from_payloads: bool,
}

impl ReplayPackageBuilder {
    fn new(records: Vec<EpackRecord>) -> Self {
        Self {
            records,
            anchor: None,
            governance: GovernanceSnapshot::default(),
            routing_decisions: Vec::new(),
            safety_classifications: Vec::new(),
            validator_results: Vec::new(),
            consensus_result: None,
            environment: EnvironmentFingerprint::default(),
            extract_from_payloads: false,
        }
    }

    pub fn anchor(mut self, anchor: SliceAnchor) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn governance(mut self, governance: GovernanceSnapshot) -> Self {
        self.governance = governance;
        self
    }

    pub fn environment(mut self, environment: EnvironmentFingerprint) -> Self {
        self.environment = environment;
        self
    }

    pub fn routing_decision(mut self, seq: u64, input: Value, output: Value) -> Self {
        self.routing_decisions.push(RecordedDecision { seq, input, output });
        self
    }

    pub fn safety_classification(mut self, seq: u64, input: Value, output: Value) -> Self {
        self.safety_classifications
            .push(RecordedDecision { seq, input, output });
        self
    }

    pub fn validator_results(mut self, results: Vec<Value>) -> Self {
        self.validator_results = results;
        self
    }

    pub fn consensus_result(mut self, result: Value) -> Self {
        self.consensus_result = Some(result);
        self
    }

    /// Also take decisions from record payloads carrying
    /// `routing: {input, decision}` or `safety: {input, classification}`.
    pub fn extract_recorded_decisions(mut self) -> Self {
        self.extract_from_payloads = true;
        self
    }

    pub fn build(mut self) -> ReplayResult<ReplayPackage> {
        if self.extract_from_payloads {
            for record in &self.records {
                if let Some(d) = payload_decision(record, "routing", "decision") {
                    self.routing_decisions.push(d);
                }
                if let Some(d) = payload_decision(record, "safety", "classification") {
                    self.safety_classifications.push(d);
                }
            }
        }

        let input_payload_hash = self
            .records
            .first()
            .and_then(|r| {
                r.payload
                    .get("input_hash")
                    .or_else(|| r.payload.get("user_text_hash"))
            })
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut input_metadata = Map::new();
        input_metadata.insert("epack_count".into(), Value::from(self.records.len()));

        let head_hash = self
            .records
            .last()
            .map(|r| r.hash.clone())
            .unwrap_or_default();

        let mut package = ReplayPackage {
            input_payload_hash,
            input_metadata,
            governance: self.governance,
            routing_decisions: self.routing_decisions,
            safety_classifications: self.safety_classifications,
            records: self.records,
            anchor: self.anchor,
            head_hash,
            validator_results: self.validator_results,
            consensus_result: self.consensus_result,
            environment: self.environment,
            package_hash: String::new(),
        };
        package.package_hash = package.compute_seal()?;
        Ok(package)
    }
}

fn payload_decision(
    record: &EpackRecord,
    section: &str,
    output_key: &str,
) -> Option<RecordedDecision> {
    let entry = record.payload.get(section)?.as_object()?;
    Some(RecordedDecision {
        seq: record.seq,
        input: entry.get("input")?.clone(),
        output: entry.get(output_key)?.clone(),
    })
}

/// One structural check of [`verify_package`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCheck {
    pub check: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVerification {
    pub passed: bool,
    pub checks: Vec<PackageCheck>,
}

/// Structural validation of a package without replaying it: seal, chain
/// integrity, head hash and required fields.
pub fn verify_package(package: &ReplayPackage) -> PackageVerification {
    let mut checks = Vec::new();

    checks.push(PackageCheck {
        check: "package_seal".into(),
        passed: package.verify_seal(),
        errors: Vec::new(),
    });

    let integrity = verify_records(&package.records, package.anchor.as_ref());
    checks.push(PackageCheck {
        check: "chain_integrity".into(),
        passed: integrity.is_intact(),
        errors: integrity
            .breaks
            .iter()
            .map(|b| format!("seq {}: {} ({})", b.seq, b.kind, b.detail))
            .collect(),
    });

    let head_ok = match package.records.last() {
        Some(last) => last.hash == package.head_hash,
        None => package.head_hash.is_empty(),
    };
    checks.push(PackageCheck {
        check: "head_hash".into(),
        passed: head_ok,
        errors: Vec::new(),
    });

    let mut missing = Vec::new();
    if package.governance.kernel_version.is_empty() {
        missing.push("kernel_version".to_string());
    }
    if package.records.is_empty() {
        missing.push("records".to_string());
    }
    checks.push(PackageCheck {
        check: "required_fields".into(),
        passed: missing.is_empty(),
        errors: missing,
    });

    PackageVerification {
        passed: checks.iter().all(|c| c.passed),
        checks,
    }
}
