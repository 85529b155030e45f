//! Rollout damping.
//!
//! A discrete PID controller maps the gap between the TSI target and the
//! forecast to a canary rollout fraction, so a recovery is rolled out faster
//! when trust is far from target and slower when the signal oscillates.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{DampingConfig, TsiTargets};

/// Signal values one controller step consumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DampingInput {
    pub tsi_forecast: f64,
    pub concentration: f64,
    pub oscillation: f64,
}

impl DampingInput {
    fn is_finite(&self) -> bool {
        self.tsi_forecast.is_finite()
            && self.concentration.is_finite()
            && self.oscillation.is_finite()
    }
}

/// Rollout hints merged into a plan's routing patch under `rds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutHints {
    pub canary_pct: f64,
    pub cooldown_seconds: u64,
    pub note: String,
}

impl RolloutHints {
    pub fn to_value(&self) -> Value {
        json!({
            "canary_pct": self.canary_pct,
            "cooldown_seconds": self.cooldown_seconds,
            "note": self.note,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DampingOutcome {
    Applied { fraction: f64, hints: RolloutHints },
    /// Inside the cooldown; the request is kept and applied by `poll`.
    Deferred { retry_at: DateTime<Utc> },
}

/// PID-damped rollout controller with a cooldown gate.
#[derive(Debug, Clone)]
pub struct DampingStabilizer {
    config: DampingConfig,
    target: f64,
    critical: f64,
    integral: f64,
    prev_error: f64,
    fraction: f64,
    last_applied_at: Option<DateTime<Utc>>,
    pending: Option<DampingInput>,
}

impl DampingStabilizer {
    pub fn new(config: DampingConfig, targets: &TsiTargets) -> Self {
        let fraction = config.min_rollout;
        Self {
            config,
            target: targets.target,
            critical: targets.critical,
            integral: 0.0,
            prev_error: 0.0,
            fraction,
            last_applied_at: None,
            pending: None,
        }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn pending(&self) -> Option<&DampingInput> {
        self.pending.as_ref()
    }

    /// One controller step over a single cooldown interval.
    pub fn step(&mut self, input: &DampingInput) -> f64 {
        self.step_over(input, 1.0)
    }

    /// One controller step spanning `dt` cooldown intervals. Non-finite input
    /// holds the previous fraction.
    pub fn step_over(&mut self, input: &DampingInput, dt: f64) -> f64 {
        if !input.is_finite() {
            debug!(?input, "Non-finite damping input, holding rollout");
            return self.fraction;
        }
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 1.0 };
        let c = &self.config;
        let error = (self.target - input.tsi_forecast).max(0.0);
        self.integral =
            (self.integral + error * dt).clamp(-c.pid.integral_cap, c.pid.integral_cap);
        let derivative = (error - self.prev_error) / dt;
        self.prev_error = error;

        let u = c.pid.kp * error + c.pid.ki * self.integral + c.pid.kd * derivative;
        let headroom = (c.max_rollout - c.min_rollout).max(0.0);
        let mut fraction = c.min_rollout + u.clamp(0.0, headroom);

        if input.concentration >= c.concentration_boost_threshold
            || input.tsi_forecast < self.critical
        {
            fraction += c.urgency_boost;
        }
        if input.oscillation > c.max_oscillation {
            fraction *= c.oscillation_factor;
        }

        self.fraction = fraction.clamp(c.min_rollout, c.max_rollout);
        self.fraction
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let last = self.last_applied_at?;
        let cooldown = chrono::Duration::from_std(self.config.cooldown).ok()?;
        let retry_at = last + cooldown;
        (now < retry_at).then_some(retry_at)
    }

    /// Cooldown intervals since the last applied adjustment, within
    /// `[1, max_elapsed_intervals]`.
    fn elapsed_intervals(&self, now: DateTime<Utc>) -> f64 {
        let Some(last) = self.last_applied_at else {
            return 1.0;
        };
        let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
        let intervals = elapsed / self.config.cooldown.as_secs_f64();
        if intervals.is_finite() {
            intervals.clamp(1.0, self.config.max_elapsed_intervals.max(1.0))
        } else {
            1.0
        }
    }

    fn apply(&mut self, input: &DampingInput, now: DateTime<Utc>) -> DampingOutcome {
        let dt = self.elapsed_intervals(now);
        let fraction = self.step_over(input, dt);
        self.last_applied_at = Some(now);
        self.pending = None;
        DampingOutcome::Applied {
            fraction,
            hints: RolloutHints {
                canary_pct: (fraction * 1000.0).round() / 1000.0,
                cooldown_seconds: self.config.cooldown.as_secs(),
                note: "pid_damped".to_string(),
            },
        }
    }

    /// Apply a rollout request, or defer it while the cooldown runs. A
    /// deferred request replaces any earlier pending one.
    pub fn adjust(&mut self, input: DampingInput, now: DateTime<Utc>) -> DampingOutcome {
        if let Some(retry_at) = self.in_cooldown(now) {
            debug!(%retry_at, "Rollout adjustment deferred by cooldown");
            self.pending = Some(input);
            return DampingOutcome::Deferred { retry_at };
        }
        self.apply(&input, now)
    }

    /// Apply the pending request once the cooldown has elapsed.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<DampingOutcome> {
        if self.in_cooldown(now).is_some() {
            return None;
        }
        let input = self.pending.take()?;
        Some(self.apply(&input, now))
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.fraction = self.config.min_rollout;
        self.last_applied_at = None;
        self.pending = None;
    }
}

/// Bounded TSI history measuring flip-flop frequency.
#[derive(Debug, Clone)]
pub struct OscillationMeter {
    capacity: usize,
    history: VecDeque<f64>,
}

impl OscillationMeter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(3);
        Self {
            capacity,
            history: VecDeque::with_capacity(capacity),
        }
    }

    /// Non-finite observations are ignored.
    pub fn record(&mut self, tsi: f64) {
        if !tsi.is_finite() {
            return;
        }
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(tsi);
    }

    /// Fraction of direction reversals between successive deltas, in [0, 1].
    pub fn index(&self) -> f64 {
        let deltas: Vec<f64> = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .map(|(a, b)| b - a)
            .collect();
        if deltas.len() < 2 {
            return 0.0;
        }
        let reversals = deltas
            .windows(2)
            .filter(|pair| pair[0] * pair[1] < 0.0)
            .count();
        reversals as f64 / (deltas.len() - 1) as f64
    }

    /// Recorded observations, oldest first.
    pub fn history(&self) -> Vec<f64> {
        self.history.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl Default for OscillationMeter {
    fn default() -> Self {
        Self::new(20)
    }
}
