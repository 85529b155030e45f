//! Resilience policy compiler.
//!
//! Compilation runs in three pure stages:
//!
//! 1. [`PolicyVersion::detect`] decides which document shape is in use
//! 2. [`normalize`] rewrites a flat (v1) document into the nested (v2) shape
//! 3. the nested document is parsed and validated into a [`ResiliencePolicy`]
//!
//! Loading a document from disk is a separate, thin step
//! ([`load_policy_document`]).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::{
    BreakerConfig, DampingConfig, MviConfig, PidParams, PolicyVersion, ProviderRoster,
    ProviderSpec, RecoveryBudgets, RecoveryPlan, ResiliencePolicy, ScoringWeights,
    TriggerThresholds, TsiConfig, TsiTargets, VerificationConfig,
};
use crate::error::PolicyCompileError;

/// Result of compiling a policy document.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledPolicy {
    Enabled(Arc<ResiliencePolicy>),
    /// `resilience_policy` is absent or `enabled` is not true.
    Disabled,
}

impl CompiledPolicy {
    pub fn policy(&self) -> Option<&Arc<ResiliencePolicy>> {
        match self {
            CompiledPolicy::Enabled(policy) => Some(policy),
            CompiledPolicy::Disabled => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, CompiledPolicy::Enabled(_))
    }
}

const FLAT_KEYS: &[&str] = &[
    "tsi_target",
    "tsi_min",
    "tsi_critical",
    "latency_ms_max",
    "cost_usd_max",
];
const NESTED_KEYS: &[&str] = &["targets", "budgets", "scoring"];
const TIERS: [(&str, u8); 3] = [("tier_1", 1), ("tier_2", 2), ("tier_3", 3)];

impl PolicyVersion {
    /// Detect the shape of a `resilience_policy` section. An explicit
    /// `schema_version` wins over key sniffing.
    pub fn detect(section: &Value) -> Result<PolicyVersion, PolicyCompileError> {
        if let Some(explicit) = section.get("schema_version").filter(|v| !v.is_null()) {
            return match explicit {
                Value::Number(n) if n.as_u64() == Some(1) => Ok(PolicyVersion::V1Flat),
                Value::Number(n) if n.as_u64() == Some(2) => Ok(PolicyVersion::V2Nested),
                Value::String(s) if matches!(s.as_str(), "1" | "v1") => Ok(PolicyVersion::V1Flat),
                Value::String(s) if matches!(s.as_str(), "2" | "v2") => Ok(PolicyVersion::V2Nested),
                other => Err(PolicyCompileError::UnsupportedVersion(other.to_string())),
            };
        }

        let has = |key: &&str| section.get(*key).is_some();
        let plans = section.get("plans");
        if NESTED_KEYS.iter().any(has) || plans.is_some_and(Value::is_object) {
            Ok(PolicyVersion::V2Nested)
        } else if FLAT_KEYS.iter().any(has) || plans.is_some_and(Value::is_array) {
            Ok(PolicyVersion::V1Flat)
        } else {
            Ok(PolicyVersion::V2Nested)
        }
    }
}

fn take(section: &mut Map<String, Value>, key: &str) -> Option<Value> {
    section.remove(key).filter(|v| !v.is_null())
}

/// Rewrite a v1 (flat) document into the v2 (nested) shape. Documents that
/// are already nested are returned unchanged.
pub fn normalize(document: &Value, version: PolicyVersion) -> Value {
    if version == PolicyVersion::V2Nested {
        return document.clone();
    }
    let mut document = document.clone();

    if let Some(Value::Object(flat)) = document.get_mut("resilience_policy") {
        let mut tsi = Map::new();
        for (from, to) in [
            ("tsi_target", "target"),
            ("tsi_min", "min"),
            ("tsi_critical", "critical"),
        ] {
            if let Some(v) = take(flat, from) {
                tsi.insert(to.into(), v);
            }
        }
        let mut targets = json!({ "tsi": tsi });
        if let Some(minutes) = take(flat, "max_recovery_minutes") {
            targets["recovery"] = json!({ "max_minutes": minutes });
        }
        flat.insert("targets".into(), targets);

        let mut budgets = Map::new();
        for key in ["latency_ms_max", "cost_usd_max"] {
            if let Some(v) = take(flat, key) {
                budgets.insert(key.into(), v);
            }
        }
        flat.insert("budgets".into(), Value::Object(budgets));

        let mut weights = Map::new();
        for key in [
            "diversity_bonus",
            "latency_penalty_per_ms",
            "cost_penalty_per_usd",
            "confidence_low_penalty",
        ] {
            if let Some(v) = take(flat, key) {
                weights.insert(key.into(), v);
            }
        }
        let mut scoring = json!({ "weights": weights });
        if let Some(tier_penalties) = take(flat, "tier_penalties") {
            scoring["tier_penalties"] = tier_penalties;
        }
        flat.insert("scoring".into(), scoring);

        if let Some(Value::Array(plans)) = take(flat, "plans") {
            let mut tiers: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            for plan in plans {
                let tier = plan.get("tier").cloned().unwrap_or(json!(1));
                let key = match tier.as_u64() {
                    Some(n) => format!("tier_{n}"),
                    None => format!("tier_{}", tier.as_str().unwrap_or("?")),
                };
                tiers.entry(key).or_default().push(normalize_flat_plan(plan));
            }
            flat.insert("plans".into(), json!(tiers));
        }
        flat.insert("schema_version".into(), json!(2));
    }

    if let Some(Value::Object(consensus)) = document.get_mut("consensus") {
        let mut providers = Map::new();
        for key in ["primary", "validators"] {
            if let Some(v) = take(consensus, key) {
                providers.insert(key.into(), v);
            }
        }
        consensus.insert("providers".into(), Value::Object(providers));
    }

    document
}

/// Flat plans may spell predictions as `predicted_<name>` next to the id.
fn normalize_flat_plan(plan: Value) -> Value {
    let Value::Object(mut fields) = plan else {
        return plan;
    };
    let mut predicted = match take(&mut fields, "predicted") {
        Some(Value::Object(p)) => p,
        _ => Map::new(),
    };
    let flat_keys: Vec<String> = fields
        .keys()
        .filter(|k| k.starts_with("predicted_"))
        .cloned()
        .collect();
    for key in flat_keys {
        if let Some(v) = fields.remove(&key) {
            predicted.insert(key.trim_start_matches("predicted_").to_string(), v);
        }
    }
    fields.remove("tier");
    fields.insert("predicted".into(), Value::Object(predicted));
    Value::Object(fields)
}

/// Collects field errors so one pass reports every problem.
#[derive(Default)]
struct FieldReader {
    errors: Vec<PolicyCompileError>,
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |v, key| v.get(key))
        .filter(|v| !v.is_null())
}

impl FieldReader {
    fn invalid(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.errors.push(PolicyCompileError::invalid(field, reason));
    }

    fn f64(&mut self, section: &Value, prefix: &str, path: &str, default: f64) -> f64 {
        match lookup(section, path) {
            None => default,
            Some(v) => match v.as_f64().filter(|x| x.is_finite()) {
                Some(x) => x,
                None => {
                    self.invalid(format!("{prefix}{path}"), format!("expected a number, got {v}"));
                    default
                }
            },
        }
    }

    fn u64(&mut self, section: &Value, prefix: &str, path: &str, default: u64) -> u64 {
        match lookup(section, path) {
            None => default,
            Some(v) => match v.as_u64() {
                Some(x) => x,
                None => {
                    self.invalid(
                        format!("{prefix}{path}"),
                        format!("expected a non-negative integer, got {v}"),
                    );
                    default
                }
            },
        }
    }

    fn bool(&mut self, section: &Value, prefix: &str, path: &str, default: bool) -> bool {
        match lookup(section, path) {
            None => default,
            Some(Value::Bool(b)) => *b,
            Some(v) => {
                self.invalid(format!("{prefix}{path}"), format!("expected a boolean, got {v}"));
                default
            }
        }
    }

    fn unit_interval(&mut self, field: &str, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            self.invalid(field, format!("{value} is outside [0, 1]"));
        }
    }

    fn non_negative(&mut self, field: &str, value: f64) {
        if value < 0.0 {
            self.invalid(field, format!("{value} must not be negative"));
        }
    }

    fn finish<T>(self, value: T) -> Result<T, PolicyCompileError> {
        let mut errors = self.errors;
        match errors.len() {
            0 => Ok(value),
            1 => Err(errors.remove(0)),
            _ => Err(PolicyCompileError::Multiple(
                errors.iter().map(ToString::to_string).collect(),
            )),
        }
    }
}

/// Compile a whole policy document (`resilience_policy` plus `consensus`).
pub fn compile_policy(document: &Value) -> Result<CompiledPolicy, PolicyCompileError> {
    if !document.is_object() {
        return Err(PolicyCompileError::invalid(
            "<document>",
            "policy document must be a mapping",
        ));
    }
    let Some(section) = lookup(document, "resilience_policy") else {
        debug!("No resilience_policy section, recovery disabled");
        return Ok(CompiledPolicy::Disabled);
    };
    if !section.is_object() {
        return Err(PolicyCompileError::invalid(
            "resilience_policy",
            "expected a mapping",
        ));
    }
    match section.get("enabled") {
        Some(Value::Bool(true)) => {}
        None | Some(Value::Null) | Some(Value::Bool(false)) => {
            info!("Resilience policy disabled");
            return Ok(CompiledPolicy::Disabled);
        }
        Some(other) => {
            return Err(PolicyCompileError::invalid(
                "resilience_policy.enabled",
                format!("expected a boolean, got {other}"),
            ))
        }
    }

    let version = PolicyVersion::detect(section)?;
    let normalized = normalize(document, version);
    let policy = parse_nested(&normalized, version)?;
    info!(
        schema = ?version,
        plans = policy.plans.len(),
        damping = policy.damping.is_some(),
        "Resilience policy compiled"
    );
    Ok(CompiledPolicy::Enabled(Arc::new(policy)))
}

fn parse_nested(
    document: &Value,
    version: PolicyVersion,
) -> Result<ResiliencePolicy, PolicyCompileError> {
    let empty = Value::Object(Map::new());
    let section = lookup(document, "resilience_policy").unwrap_or(&empty);
    let p = "resilience_policy.";
    let mut r = FieldReader::default();

    let d = TsiTargets::default();
    let targets = TsiTargets {
        target: r.f64(section, p, "targets.tsi.target", d.target),
        min: r.f64(section, p, "targets.tsi.min", d.min),
        critical: r.f64(section, p, "targets.tsi.critical", d.critical),
        max_recovery_minutes: r.u64(
            section,
            p,
            "targets.recovery.max_minutes",
            u64::from(d.max_recovery_minutes),
        )
        .min(u64::from(u32::MAX)) as u32,
    };
    for (name, value) in [
        ("targets.tsi.target", targets.target),
        ("targets.tsi.min", targets.min),
        ("targets.tsi.critical", targets.critical),
    ] {
        r.unit_interval(&format!("{p}{name}"), value);
    }
    if !(targets.critical <= targets.min && targets.min <= targets.target) {
        r.invalid(
            format!("{p}targets.tsi"),
            "expected critical <= min <= target",
        );
    }

    let d = RecoveryBudgets::default();
    let budgets = RecoveryBudgets {
        latency_ms_max: r.u64(section, p, "budgets.latency_ms_max", d.latency_ms_max),
        cost_usd_max: r.f64(section, p, "budgets.cost_usd_max", d.cost_usd_max),
    };
    r.non_negative(&format!("{p}budgets.cost_usd_max"), budgets.cost_usd_max);

    let d = TriggerThresholds::default();
    let triggers = TriggerThresholds {
        concentration_cap: r.f64(section, p, "triggers.concentration_cap", d.concentration_cap),
        combined_concentration: r.f64(
            section,
            p,
            "triggers.combined_concentration",
            d.combined_concentration,
        ),
    };

    let scoring = parse_scoring(section, p, &mut r);
    let damping = parse_damping(section, p, &mut r);

    let d = BreakerConfig::default();
    let breaker = BreakerConfig {
        failure_threshold: r
            .u64(section, p, "circuit_breaker.failure_threshold", u64::from(d.failure_threshold))
            .clamp(1, u64::from(u32::MAX)) as u32,
        cooldown: Duration::from_secs(r.u64(
            section,
            p,
            "circuit_breaker.cooldown_seconds",
            d.cooldown.as_secs(),
        )),
        half_open_max_attempts: r
            .u64(
                section,
                p,
                "circuit_breaker.half_open_max_attempts",
                u64::from(d.half_open_max_attempts),
            )
            .clamp(1, u64::from(u32::MAX)) as u32,
    };

    let d = VerificationConfig::default();
    let verify = "audit.verify_post_recovery";
    let verification = VerificationConfig {
        replay_samples: r.u64(
            section,
            p,
            &format!("{verify}.replay_samples"),
            d.replay_samples as u64,
        ) as usize,
        mvi_check: r.bool(section, p, &format!("{verify}.mvi_check"), d.mvi_check),
        min_tsi_improvement: r.f64(
            section,
            p,
            &format!("{verify}.min_tsi_improvement"),
            d.min_tsi_improvement,
        ),
        max_tsi_degradation: r.f64(
            section,
            p,
            &format!("{verify}.max_tsi_degradation"),
            d.max_tsi_degradation,
        ),
    };

    let d = MviConfig::default();
    let mvi = MviConfig {
        pass_threshold: r.f64(section, p, "mvi.pass_threshold", d.pass_threshold),
        replay_weight: r.f64(section, p, "mvi.weights.replay", d.replay_weight),
        recovery_weight: r.f64(section, p, "mvi.weights.recovery", d.recovery_weight),
        coherence_weight: r.f64(section, p, "mvi.weights.coherence", d.coherence_weight),
        consistency_trials: r.u64(section, p, "mvi.consistency_trials", d.consistency_trials as u64)
            as usize,
        max_tsi_jump: r.f64(section, p, "mvi.max_tsi_jump", d.max_tsi_jump),
    };

    let d = TsiConfig::default();
    let tsi = TsiConfig {
        window_size: r.u64(section, p, "tsi.window_size", d.window_size as u64) as usize,
        decay_lambda: r.f64(section, p, "tsi.decay_lambda", d.decay_lambda),
        forecast_horizon_minutes: r.f64(
            section,
            p,
            "tsi.forecast_horizon_minutes",
            d.forecast_horizon_minutes,
        ),
        max_forecast_delta: r.f64(section, p, "tsi.max_forecast_delta", d.max_forecast_delta),
        ..d
    };
    if tsi.window_size < 1 {
        r.invalid(format!("{p}tsi.window_size"), "must be at least 1");
    }
    r.non_negative(&format!("{p}tsi.decay_lambda"), tsi.decay_lambda);
    r.non_negative(&format!("{p}tsi.max_forecast_delta"), tsi.max_forecast_delta);

    let plans = parse_plans(section, p, &mut r);
    let providers = parse_providers(document, &mut r);

    r.finish(ResiliencePolicy {
        schema_version: version,
        targets,
        budgets,
        triggers,
        scoring,
        damping,
        breaker,
        verification,
        mvi,
        tsi,
        providers,
        plans,
    })
}

fn parse_scoring(section: &Value, p: &str, r: &mut FieldReader) -> ScoringWeights {
    let d = ScoringWeights::default();
    let w = "scoring.weights";
    let mut scoring = ScoringWeights {
        diversity_bonus: r.f64(section, p, &format!("{w}.diversity_bonus"), d.diversity_bonus),
        latency_penalty_per_ms: r.f64(
            section,
            p,
            &format!("{w}.latency_penalty_per_ms"),
            d.latency_penalty_per_ms,
        ),
        cost_penalty_per_usd: r.f64(
            section,
            p,
            &format!("{w}.cost_penalty_per_usd"),
            d.cost_penalty_per_usd,
        ),
        confidence_low_penalty: r.f64(
            section,
            p,
            &format!("{w}.confidence_low_penalty"),
            d.confidence_low_penalty,
        ),
        default_tier_penalty: r.f64(
            section,
            p,
            "scoring.default_tier_penalty",
            d.default_tier_penalty,
        ),
        oscillation_threshold: r.f64(
            section,
            p,
            "scoring.oscillation.threshold",
            d.oscillation_threshold,
        ),
        oscillation_penalty: r.f64(
            section,
            p,
            "scoring.oscillation.penalty",
            d.oscillation_penalty,
        ),
        oscillation_penalty_cap: r.f64(
            section,
            p,
            "scoring.oscillation.cap",
            d.oscillation_penalty_cap,
        ),
        aggressive_tier: r
            .u64(section, p, "scoring.oscillation.aggressive_tier", u64::from(d.aggressive_tier))
            .clamp(1, 3) as u8,
        ..d
    };

    match lookup(section, "scoring.tier_penalties") {
        None => {}
        Some(Value::Object(entries)) => {
            let mut penalties = BTreeMap::new();
            for (key, value) in entries {
                let tier = key
                    .trim_start_matches("tier_")
                    .parse::<u8>()
                    .ok()
                    .filter(|t| (1..=3).contains(t));
                match (tier, value.as_f64()) {
                    (Some(tier), Some(penalty)) => {
                        penalties.insert(tier, penalty);
                    }
                    _ => r.invalid(
                        format!("{p}scoring.tier_penalties.{key}"),
                        "expected tier 1..=3 mapped to a number",
                    ),
                }
            }
            scoring.tier_penalties = penalties;
        }
        Some(other) => r.invalid(
            format!("{p}scoring.tier_penalties"),
            format!("expected a mapping, got {other}"),
        ),
    }
    scoring
}

fn parse_damping(section: &Value, p: &str, r: &mut FieldReader) -> Option<DampingConfig> {
    if !r.bool(section, p, "damping.enabled", true) {
        return None;
    }
    let d = DampingConfig::default();
    let pid = PidParams {
        kp: r.f64(section, p, "damping.pid.kp", d.pid.kp),
        ki: r.f64(section, p, "damping.pid.ki", d.pid.ki),
        kd: r.f64(section, p, "damping.pid.kd", d.pid.kd),
        integral_cap: r.f64(section, p, "damping.pid.integral_cap", d.pid.integral_cap),
    };
    for (name, value) in [
        ("kp", pid.kp),
        ("ki", pid.ki),
        ("kd", pid.kd),
        ("integral_cap", pid.integral_cap),
    ] {
        r.non_negative(&format!("{p}damping.pid.{name}"), value);
    }
    let config = DampingConfig {
        pid,
        max_oscillation: r.f64(section, p, "damping.max_oscillation", d.max_oscillation),
        cooldown: Duration::from_secs(r.u64(
            section,
            p,
            "damping.cooldown_seconds",
            d.cooldown.as_secs(),
        )),
        min_rollout: r.f64(section, p, "damping.min_rollout", d.min_rollout),
        max_rollout: r.f64(section, p, "damping.max_rollout", d.max_rollout),
        ..d
    };
    r.unit_interval(&format!("{p}damping.min_rollout"), config.min_rollout);
    r.unit_interval(&format!("{p}damping.max_rollout"), config.max_rollout);
    if config.min_rollout > config.max_rollout {
        r.invalid(
            format!("{p}damping"),
            "min_rollout must not exceed max_rollout",
        );
    }
    Some(config)
}

fn parse_plans(section: &Value, p: &str, r: &mut FieldReader) -> Vec<RecoveryPlan> {
    let mut plans = Vec::new();
    let Some(block) = lookup(section, "plans") else {
        return plans;
    };
    let Some(tiers) = block.as_object() else {
        r.invalid(format!("{p}plans"), "expected tier_1..tier_3 lists");
        return plans;
    };
    for key in tiers.keys() {
        if !TIERS.iter().any(|(name, _)| *name == key.as_str()) {
            r.invalid(format!("{p}plans.{key}"), "tier must be one of tier_1, tier_2, tier_3");
        }
    }

    let mut seen = BTreeSet::new();
    for (tier_key, tier) in TIERS {
        let Some(entries) = tiers.get(tier_key).filter(|v| !v.is_null()) else {
            continue;
        };
        let Some(entries) = entries.as_array() else {
            r.invalid(format!("{p}plans.{tier_key}"), "expected a list of plans");
            continue;
        };
        for (i, entry) in entries.iter().enumerate() {
            let field = format!("{p}plans.{tier_key}[{i}]");
            if !entry.is_object() {
                r.invalid(field, "expected a mapping");
                continue;
            }
            let id = entry
                .get("name")
                .or_else(|| entry.get("id"))
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            if id.is_empty() {
                r.invalid(format!("{field}.id"), "plan needs a non-empty name or id");
                continue;
            }
            if !seen.insert(id.clone()) {
                r.invalid(format!("{field}.id"), format!("duplicate plan id {id}"));
                continue;
            }

            let d = RecoveryPlan::new(id.clone(), tier);
            let pre = format!("{field}.");
            let plan = RecoveryPlan {
                predicted_tsi_median: r.f64(
                    entry,
                    &pre,
                    "predicted.tsi_median",
                    d.predicted_tsi_median,
                ),
                predicted_tsi_low: r.f64(entry, &pre, "predicted.tsi_low", d.predicted_tsi_low),
                predicted_tsi_high: r.f64(entry, &pre, "predicted.tsi_high", d.predicted_tsi_high),
                predicted_latency_ms: r.u64(
                    entry,
                    &pre,
                    "predicted.latency_ms",
                    d.predicted_latency_ms,
                ),
                predicted_cost_usd: r.f64(entry, &pre, "predicted.cost_usd", d.predicted_cost_usd),
                predicted_independence_gain: r.f64(
                    entry,
                    &pre,
                    "predicted.independence_gain",
                    d.predicted_independence_gain,
                ),
                routing_patch: match lookup(entry, "routing_patch") {
                    None => d.routing_patch.clone(),
                    Some(patch @ Value::Object(_)) => patch.clone(),
                    Some(other) => {
                        r.invalid(
                            format!("{field}.routing_patch"),
                            format!("expected a mapping, got {other}"),
                        );
                        d.routing_patch.clone()
                    }
                },
                ..d
            };
            r.non_negative(&format!("{field}.predicted.cost_usd"), plan.predicted_cost_usd);
            plans.push(plan);
        }
    }
    plans
}

fn parse_provider(value: &Value, field: &str, r: &mut FieldReader) -> Option<ProviderSpec> {
    match value {
        Value::String(provider) if !provider.is_empty() => Some(ProviderSpec {
            provider: provider.clone(),
            model: None,
            weight: None,
        }),
        Value::Object(_) => match serde_json::from_value::<ProviderSpec>(value.clone()) {
            Ok(spec) if !spec.provider.is_empty() => Some(spec),
            Ok(_) => {
                r.invalid(field, "provider must not be empty");
                None
            }
            Err(err) => {
                r.invalid(field, err.to_string());
                None
            }
        },
        other => {
            r.invalid(field, format!("expected a provider, got {other}"));
            None
        }
    }
}

fn parse_providers(document: &Value, r: &mut FieldReader) -> ProviderRoster {
    let mut roster = ProviderRoster::default();
    if let Some(primary) = lookup(document, "consensus.providers.primary") {
        roster.primary = parse_provider(primary, "consensus.providers.primary", r);
    }
    match lookup(document, "consensus.providers.validators") {
        None => {}
        Some(Value::Array(validators)) => {
            roster.validators = validators
                .iter()
                .enumerate()
                .filter_map(|(i, v)| {
                    parse_provider(v, &format!("consensus.providers.validators[{i}]"), r)
                })
                .collect();
        }
        Some(other) => r.invalid(
            "consensus.providers.validators",
            format!("expected a list, got {other}"),
        ),
    }
    roster
}

/// Supported policy document encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// `.yaml`/`.yml` are YAML; anything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DocumentFormat::Yaml
            }
            _ => DocumentFormat::Json,
        }
    }
}

pub fn parse_policy_document(
    text: &str,
    format: DocumentFormat,
) -> Result<Value, PolicyCompileError> {
    match format {
        DocumentFormat::Yaml => {
            serde_yaml::from_str(text).map_err(|e| PolicyCompileError::Parse(e.to_string()))
        }
        DocumentFormat::Json => {
            serde_json::from_str(text).map_err(|e| PolicyCompileError::Parse(e.to_string()))
        }
    }
}

pub fn load_policy_document(path: impl AsRef<Path>) -> Result<Value, PolicyCompileError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| PolicyCompileError::Io(format!("{}: {e}", path.display())))?;
    parse_policy_document(&text, DocumentFormat::from_path(path))
}
