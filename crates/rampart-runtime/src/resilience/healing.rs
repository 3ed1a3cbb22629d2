//! Pattern-matched self-healing.
//!
//! Each rule pairs an error substring with a remediation action. Actions
//! are rate limited by a cooldown and capped by a number of consecutive
//! failed attempts; a successful action resets the cap.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use rampart_core::Context;

/// Attempts kept in the history.
const HISTORY_CAPACITY: usize = 100;

/// Remediation callback: receives the error text and context, reports success.
pub type HealingAction = Arc<dyn Fn(&str, &Context) -> bool + Send + Sync>;

struct HealingRule {
    pattern: String,
    action: HealingAction,
    max_attempts: u32,
    cooldown: Duration,
    attempt_count: u32,
    last_attempt: Option<Instant>,
}

/// One executed remediation.
#[derive(Debug, Clone, Serialize)]
pub struct HealingAttempt {
    pub pattern: String,
    pub error: String,
    pub at: DateTime<Utc>,
    pub success: bool,

    /// Consecutive attempt number for the rule, starting at 1
    pub attempt: u32,
}

/// Aggregate counters.
#[derive(Debug, Clone, Serialize)]
pub struct HealingStats {
    pub enabled: bool,
    pub rules: usize,
    pub total_attempts: u64,
    pub successful_attempts: u64,

    /// successful / total, 0 without attempts
    pub success_rate: f64,
}

#[derive(Default)]
struct HealingState {
    rules: Vec<HealingRule>,
    history: VecDeque<HealingAttempt>,
    total_attempts: u64,
    successful_attempts: u64,
}

/// Runs remediation actions for recognised errors.
pub struct SelfHealingManager {
    enabled: AtomicBool,
    state: Mutex<HealingState>,
}

impl Default for SelfHealingManager {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SelfHealingManager {
    /// Create a manager, optionally disabled.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            state: Mutex::new(HealingState::default()),
        }
    }

    /// Register a rule. Registering an existing pattern replaces that rule
    /// in place, keeping its match priority.
    pub fn register_rule<A>(
        &self,
        pattern: impl Into<String>,
        action: A,
        max_attempts: u32,
        cooldown: Duration,
    ) where
        A: Fn(&str, &Context) -> bool + Send + Sync + 'static,
    {
        let rule = HealingRule {
            pattern: pattern.into(),
            action: Arc::new(action),
            max_attempts,
            cooldown,
            attempt_count: 0,
            last_attempt: None,
        };

        tracing::debug!(pattern = %rule.pattern, max_attempts, cooldown = ?cooldown, "Registered healing rule");

        let mut state = self.state.lock();
        match state.rules.iter_mut().find(|r| r.pattern == rule.pattern) {
            Some(existing) => *existing = rule,
            None => state.rules.push(rule),
        }
    }

    /// Toggle automatic remediation.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "Self-healing toggled");
    }

    /// Whether remediation is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Try to remediate `error`.
    ///
    /// The first rule whose pattern occurs in the error text is used. The
    /// attempt is skipped (returning false) when healing is disabled, no rule
    /// matches, the rule is cooling down, or its attempts are used up. The
    /// action itself runs without any lock held.
    pub fn attempt_healing(&self, error: &str, context: &Context) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let (pattern, action, attempt) = {
            let mut state = self.state.lock();
            let Some(rule) = state.rules.iter_mut().find(|r| error.contains(&r.pattern)) else {
                tracing::debug!(error = %error, "No healing rule matches");
                return false;
            };

            let now = Instant::now();
            if let Some(last) = rule.last_attempt {
                if now.duration_since(last) < rule.cooldown {
                    tracing::debug!(pattern = %rule.pattern, "Healing rule cooling down");
                    return false;
                }
            }
            if rule.attempt_count >= rule.max_attempts {
                tracing::debug!(pattern = %rule.pattern, attempts = rule.attempt_count, "Healing attempts exhausted");
                return false;
            }

            rule.attempt_count += 1;
            rule.last_attempt = Some(now);
            (rule.pattern.clone(), Arc::clone(&rule.action), rule.attempt_count)
        };

        let success = action(error, context);

        let mut state = self.state.lock();
        if success {
            if let Some(rule) = state.rules.iter_mut().find(|r| r.pattern == pattern) {
                rule.attempt_count = 0;
            }
            state.successful_attempts += 1;
            tracing::info!(pattern = %pattern, attempt, "Self-healing succeeded");
        } else {
            tracing::warn!(pattern = %pattern, attempt, error = %error, "Self-healing failed");
        }
        state.total_attempts += 1;

        if state.history.len() == HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.history.push_back(HealingAttempt {
            pattern,
            error: error.to_string(),
            at: Utc::now(),
            success,
            attempt,
        });

        success
    }

    /// Clear the attempt counter of one rule, or of every rule.
    pub fn reset_attempts(&self, pattern: Option<&str>) {
        let mut state = self.state.lock();
        for rule in state
            .rules
            .iter_mut()
            .filter(|r| pattern.map_or(true, |p| r.pattern == p))
        {
            rule.attempt_count = 0;
            rule.last_attempt = None;
        }
    }

    /// The `n` most recent attempts, oldest first.
    pub fn history(&self, n: usize) -> Vec<HealingAttempt> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(n);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Attempt counters and per-rule totals.
    pub fn stats(&self) -> HealingStats {
        let state = self.state.lock();
        let success_rate = if state.total_attempts == 0 {
            0.0
        } else {
            state.successful_attempts as f64 / state.total_attempts as f64
        };

        HealingStats {
            enabled: self.is_enabled(),
            rules: state.rules.len(),
            total_attempts: state.total_attempts,
            successful_attempts: state.successful_attempts,
            success_rate,
        }
    }
}
