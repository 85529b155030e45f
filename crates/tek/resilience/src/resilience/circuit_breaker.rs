//! Per-plan circuit breakers for recovery selection.
//!
//! A plan that repeatedly fails to improve trust is tripped open and excluded
//! from selection until its cooldown elapses, after which it gets a limited
//! number of probe attempts.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;

/// State of a plan's circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Plan is eligible for selection.
    Closed,

    /// Plan is excluded from selection.
    Open,

    /// Cooldown elapsed; a limited number of probes are allowed.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Breaker bookkeeping for one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanBreaker {
    pub plan_id: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_attempts: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl PlanBreaker {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_attempts: 0,
            total_failures: 0,
            total_successes: 0,
            last_failure_at: None,
            last_success_at: None,
        }
    }

    fn transition(
        &mut self,
        to: BreakerState,
        at: DateTime<Utc>,
        manual_reset: bool,
    ) -> BreakerTransition {
        let from = self.state;
        self.state = to;
        match to {
            BreakerState::Closed => {
                self.consecutive_failures = 0;
                self.opened_at = None;
                self.half_open_attempts = 0;
            }
            BreakerState::Open => {
                self.opened_at = Some(at);
                self.half_open_attempts = 0;
            }
            BreakerState::HalfOpen => {
                self.half_open_attempts = 0;
            }
        }
        BreakerTransition {
            plan_id: self.plan_id.clone(),
            from,
            to,
            consecutive_failures: self.consecutive_failures,
            at,
            manual_reset,
        }
    }
}

/// A state change, returned so callers can record it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerTransition {
    pub plan_id: String,
    pub from: BreakerState,
    pub to: BreakerState,
    pub consecutive_failures: u32,
    pub at: DateTime<Utc>,
    pub manual_reset: bool,
}

/// Which breakers a manual reset applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    Plan(String),
    All,
}

/// Registry of breakers keyed by plan id.
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, PlanBreaker>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn cooldown_elapsed(&self, breaker: &PlanBreaker, now: DateTime<Utc>) -> bool {
        let Some(opened_at) = breaker.opened_at else {
            return true;
        };
        match (now - opened_at).to_std() {
            Ok(elapsed) => elapsed >= self.config.cooldown,
            // `now` precedes `opened_at`
            Err(_) => false,
        }
    }

    /// An open breaker whose cooldown has elapsed reports half-open even
    /// before `observe` records the transition.
    fn effective_state(&self, breaker: &PlanBreaker, now: DateTime<Utc>) -> BreakerState {
        match breaker.state {
            BreakerState::Open if self.cooldown_elapsed(breaker, now) => BreakerState::HalfOpen,
            state => state,
        }
    }

    /// Move every open breaker whose cooldown has elapsed to half-open.
    pub fn observe(&self, now: DateTime<Utc>) -> Vec<BreakerTransition> {
        let mut transitions = Vec::new();
        for mut entry in self.breakers.iter_mut() {
            let breaker = entry.value_mut();
            if breaker.state == BreakerState::Open && self.cooldown_elapsed(breaker, now) {
                info!(
                    plan_id = %breaker.plan_id,
                    "Circuit breaker transitioning to half-open after cooldown"
                );
                transitions.push(breaker.transition(BreakerState::HalfOpen, now, false));
            }
        }
        transitions.sort_by(|a, b| a.plan_id.cmp(&b.plan_id));
        transitions
    }

    /// State of a plan's breaker at `now`; unknown plans are closed.
    pub fn state_of(&self, plan_id: &str, now: DateTime<Utc>) -> BreakerState {
        self.breakers
            .get(plan_id)
            .map(|b| self.effective_state(&b, now))
            .unwrap_or(BreakerState::Closed)
    }

    /// Plans that must not be selected at `now`: open breakers still in
    /// cooldown, and half-open breakers whose probe budget is used up.
    pub fn excluded_plans(&self, now: DateTime<Utc>) -> BTreeSet<String> {
        self.breakers
            .iter()
            .filter(|entry| match self.effective_state(entry.value(), now) {
                BreakerState::Closed => false,
                BreakerState::Open => true,
                BreakerState::HalfOpen => {
                    entry.half_open_attempts >= self.config.half_open_max_attempts
                }
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Count a probe of a half-open plan. Returns whether a probe was counted.
    pub fn record_probe(&self, plan_id: &str) -> bool {
        match self.breakers.get_mut(plan_id) {
            Some(mut breaker) if breaker.state == BreakerState::HalfOpen => {
                breaker.half_open_attempts += 1;
                debug!(
                    plan_id = %plan_id,
                    attempts = breaker.half_open_attempts,
                    "Half-open probe recorded"
                );
                true
            }
            _ => false,
        }
    }

    /// The plan improved trust. Only a half-open breaker closes; an open one
    /// must reach half-open first.
    pub fn record_success(
        &self,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Option<BreakerTransition> {
        let mut breaker = self
            .breakers
            .entry(plan_id.to_string())
            .or_insert_with(|| PlanBreaker::new(plan_id));
        breaker.total_successes += 1;
        breaker.last_success_at = Some(now);

        match breaker.state {
            BreakerState::Closed => {
                breaker.consecutive_failures = 0;
                None
            }
            BreakerState::HalfOpen => {
                info!(
                    plan_id = %plan_id,
                    "Circuit breaker closing after successful recovery"
                );
                Some(breaker.transition(BreakerState::Closed, now, false))
            }
            BreakerState::Open => {
                debug!(plan_id = %plan_id, "Success reported for open circuit, ignored");
                None
            }
        }
    }

    /// The plan failed to improve trust.
    pub fn record_failure(
        &self,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Option<BreakerTransition> {
        let mut breaker = self
            .breakers
            .entry(plan_id.to_string())
            .or_insert_with(|| PlanBreaker::new(plan_id));
        breaker.consecutive_failures += 1;
        breaker.total_failures += 1;
        breaker.last_failure_at = Some(now);

        match breaker.state {
            BreakerState::HalfOpen => {
                warn!(plan_id = %plan_id, "Circuit breaker re-opening after failed probe");
                Some(breaker.transition(BreakerState::Open, now, false))
            }
            BreakerState::Closed
                if breaker.consecutive_failures >= self.config.failure_threshold =>
            {
                warn!(
                    plan_id = %plan_id,
                    failures = breaker.consecutive_failures,
                    "Circuit breaker opening due to failures"
                );
                Some(breaker.transition(BreakerState::Open, now, false))
            }
            _ => None,
        }
    }

    /// Force breakers closed. Every breaker in scope yields a transition,
    /// including those that were already closed.
    pub fn reset(&self, scope: &ResetScope, now: DateTime<Utc>) -> Vec<BreakerTransition> {
        let mut transitions = Vec::new();
        for mut entry in self.breakers.iter_mut() {
            let in_scope = match scope {
                ResetScope::All => true,
                ResetScope::Plan(id) => entry.key() == id,
            };
            if in_scope {
                let breaker = entry.value_mut();
                breaker.consecutive_failures = 0;
                transitions.push(breaker.transition(BreakerState::Closed, now, true));
            }
        }
        transitions.sort_by(|a, b| a.plan_id.cmp(&b.plan_id));
        info!(scope = ?scope, reset = transitions.len(), "Circuit breakers reset");
        transitions
    }

    /// Auditable list of all breaker states, ordered by plan id.
    pub fn state_snapshot(&self) -> Vec<PlanBreaker> {
        let mut snapshot: Vec<PlanBreaker> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();
        snapshot.sort_by(|a, b| a.plan_id.cmp(&b.plan_id));
        snapshot
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
