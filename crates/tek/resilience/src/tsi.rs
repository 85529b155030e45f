//! Trust Stability Index (TSI) tracking.
//!
//! The tracker keeps a bounded window of interaction outcomes. Everything it
//! reports (score, trend, forecast, rates) is derived from the window on
//! demand and depends only on the window and the supplied `now`.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TsiConfig;

/// Outcome class of a governed interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeClass {
    Pass,
    Warn,
    Refuse,
    Error,
}

impl std::fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeClass::Pass => write!(f, "PASS"),
            OutcomeClass::Warn => write!(f, "WARN"),
            OutcomeClass::Refuse => write!(f, "REFUSE"),
            OutcomeClass::Error => write!(f, "ERROR"),
        }
    }
}

/// One completed interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsiSample {
    pub timestamp: DateTime<Utc>,
    pub outcome: OutcomeClass,
    /// Mean validator agreement in [0, 1].
    pub agreement: f64,
    pub latency_ms: u64,
    pub challenger_fired: bool,
    /// Whether a recovery plan was active when the interaction ran.
    #[serde(default)]
    pub recovery_active: bool,
}

impl TsiSample {
    pub fn new(outcome: OutcomeClass, agreement: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            outcome,
            agreement,
            latency_ms: 0,
            challenger_fired: false,
            recovery_active: false,
        }
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_challenger(mut self, fired: bool) -> Self {
        self.challenger_fired = fired;
        self
    }
}

/// Snapshot of the trust signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsiSignal {
    pub tsi_current: f64,
    pub tsi_forecast: f64,
    pub window_size: usize,
    pub pass_rate: f64,
    pub refuse_rate: f64,
    pub error_rate: f64,
    pub avg_agreement: f64,
    /// Score change per minute; positive means improving.
    pub trend_slope: f64,
}

/// Sliding-window TSI aggregator with exponential decay.
#[derive(Debug, Clone)]
pub struct TsiTracker {
    config: TsiConfig,
    window: VecDeque<TsiSample>,
}

impl TsiTracker {
    pub fn new(config: TsiConfig) -> Self {
        let capacity = config.window_size.max(1);
        Self {
            config: TsiConfig {
                window_size: capacity,
                ..config
            },
            window: VecDeque::with_capacity(capacity),
        }
    }

    pub fn config(&self) -> &TsiConfig {
        &self.config
    }

    /// Insert a sample, returning the evicted oldest sample once full.
    pub fn record(&mut self, sample: TsiSample) -> Option<TsiSample> {
        let evicted = if self.window.len() >= self.config.window_size {
            self.window.pop_front()
        } else {
            None
        };
        self.window.push_back(sample);
        evicted
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn samples(&self) -> impl Iterator<Item = &TsiSample> {
        self.window.iter()
    }

    /// Undecayed score of a single sample, in [0, 1].
    pub fn sample_score(&self, sample: &TsiSample) -> f64 {
        let c = &self.config;
        let base = match sample.outcome {
            OutcomeClass::Pass => c.base_pass,
            OutcomeClass::Warn => c.base_warn,
            OutcomeClass::Refuse => c.base_refuse,
            OutcomeClass::Error => c.base_error,
        };
        let agreement = if sample.agreement.is_finite() {
            sample.agreement.clamp(0.0, 1.0)
        } else {
            0.5
        };
        let latency_s = sample.latency_ms as f64 / 1000.0;
        let challenger = if sample.challenger_fired {
            c.challenger_penalty
        } else {
            0.0
        };
        (base + c.agreement_weight * (agreement - 0.5)
            - c.latency_penalty_per_s * latency_s
            - challenger)
            .clamp(0.0, 1.0)
    }

    fn decay_weight(&self, sample: &TsiSample, now: DateTime<Utc>) -> f64 {
        let age_minutes = minutes_between(sample.timestamp, now).max(0.0);
        (-self.config.decay_lambda * age_minutes).exp()
    }

    /// Decay-weighted mean score.
    pub fn score_at(&self, now: DateTime<Utc>) -> f64 {
        if self.window.is_empty() {
            return self.config.empty_score;
        }
        let (weighted, total) = self.window.iter().fold((0.0, 0.0), |(acc, total), s| {
            let w = self.decay_weight(s, now);
            (acc + w * self.sample_score(s), total + w)
        });
        if total > 0.0 {
            weighted / total
        } else {
            0.5
        }
    }

    /// Least-squares slope of sample score against sample time, per minute.
    pub fn trend_slope(&self) -> f64 {
        let n = self.window.len();
        if n < self.config.min_trend_samples.max(2) {
            return 0.0;
        }
        let Some(origin) = self.window.front().map(|s| s.timestamp) else {
            return 0.0;
        };
        let points: Vec<(f64, f64)> = self
            .window
            .iter()
            .map(|s| (minutes_between(origin, s.timestamp), self.sample_score(s)))
            .collect();
        let nf = n as f64;
        let x_mean = points.iter().map(|p| p.0).sum::<f64>() / nf;
        let y_mean = points.iter().map(|p| p.1).sum::<f64>() / nf;
        let num: f64 = points
            .iter()
            .map(|(x, y)| (x - x_mean) * (y - y_mean))
            .sum();
        let den: f64 = points.iter().map(|(x, _)| (x - x_mean).powi(2)).sum();
        if den > f64::EPSILON {
            num / den
        } else {
            0.0
        }
    }

    /// Score extrapolated over the forecast horizon, clamped to [0, 1].
    pub fn forecast_at(&self, now: DateTime<Utc>) -> f64 {
        if self.window.is_empty() {
            return self.config.empty_forecast;
        }
        // Samples seconds apart make the per-minute slope huge; bound the move.
        let bound = self.config.max_forecast_delta.max(0.0);
        let drift =
            (self.trend_slope() * self.config.forecast_horizon_minutes).clamp(-bound, bound);
        let projected = self.score_at(now) + drift;
        if projected.is_finite() {
            projected.clamp(0.0, 1.0)
        } else {
            self.config.empty_forecast
        }
    }

    pub fn signal_at(&self, now: DateTime<Utc>) -> TsiSignal {
        let n = self.window.len();
        if n == 0 {
            return TsiSignal {
                tsi_current: self.config.empty_score,
                tsi_forecast: self.config.empty_forecast,
                window_size: 0,
                pass_rate: 0.0,
                refuse_rate: 0.0,
                error_rate: 0.0,
                avg_agreement: 0.0,
                trend_slope: 0.0,
            };
        }
        let nf = n as f64;
        let rate = |class: OutcomeClass| {
            self.window.iter().filter(|s| s.outcome == class).count() as f64 / nf
        };
        TsiSignal {
            tsi_current: self.score_at(now),
            tsi_forecast: self.forecast_at(now),
            window_size: n,
            pass_rate: rate(OutcomeClass::Pass),
            refuse_rate: rate(OutcomeClass::Refuse),
            error_rate: rate(OutcomeClass::Error),
            avg_agreement: self.window.iter().map(|s| s.agreement).sum::<f64>() / nf,
            trend_slope: self.trend_slope(),
        }
    }

    pub fn signal(&self) -> TsiSignal {
        self.signal_at(Utc::now())
    }
}

impl Default for TsiTracker {
    fn default() -> Self {
        Self::new(TsiConfig::default())
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

/// Provider dependency structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyMetrics {
    /// Interaction edge density among providers, normalised per provider.
    pub density: f64,
    /// Herfindahl-Hirschman index of normalised usage weights.
    pub concentration: f64,
    pub dominant_provider: Option<String>,
    pub provider_count: usize,
    /// Concentration exceeds the configured cap.
    pub over_reliant: bool,
}

/// Concentration and density of provider usage. Non-positive and
/// non-finite weights are ignored; no usable provider counts as fully
/// concentrated.
pub fn dependency_metrics(
    weights: &BTreeMap<String, f64>,
    concentration_cap: f64,
) -> DependencyMetrics {
    let usable: Vec<(&String, f64)> = weights
        .iter()
        .filter(|(_, w)| w.is_finite() && **w > 0.0)
        .map(|(k, w)| (k, *w))
        .collect();
    if usable.is_empty() {
        return DependencyMetrics {
            density: 0.0,
            concentration: 1.0,
            dominant_provider: None,
            provider_count: 0,
            over_reliant: 1.0 > concentration_cap,
        };
    }

    let total: f64 = usable.iter().map(|(_, w)| w).sum();
    let concentration = usable
        .iter()
        .map(|(_, w)| (w / total).powi(2))
        .sum::<f64>()
        .clamp(0.0, 1.0);
    let n = usable.len();
    let density = if n <= 1 { 0.0 } else { 1.0 / n as f64 };
    let dominant_provider = usable
        .iter()
        .fold(None::<(&String, f64)>, |best, &(name, w)| match best {
            Some((_, bw)) if bw >= w => best,
            _ => Some((name, w)),
        })
        .map(|(name, _)| name.clone());

    DependencyMetrics {
        density,
        concentration,
        dominant_provider,
        provider_count: n,
        over_reliant: concentration > concentration_cap,
    }
}
