//! Circuit breaker to prevent cascade failures.
//!
//! When a guarded operation fails repeatedly, the circuit opens and
//! subsequent calls fail fast with [`CircuitOpenError`] until the timeout
//! elapses and a trial call is allowed through.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use rampart_core::{CircuitBreakerConfig, CircuitState, StateTransition};

use crate::error::{CallError, CircuitOpenError};

/// Transitions kept per breaker.
const TRANSITION_LOG_CAPACITY: usize = 100;

/// Transitions included in a stats snapshot.
const STATS_TRANSITIONS: usize = 10;

/// Mutable breaker state, guarded by a single lock.
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    total_requests: u64,
    total_failures: u64,
    transitions: VecDeque<StateTransition>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            total_requests: 0,
            total_failures: 0,
            transitions: VecDeque::with_capacity(TRANSITION_LOG_CAPACITY),
        }
    }

    fn transition(&mut self, to: CircuitState, reason: &str) {
        if self.transitions.len() == TRANSITION_LOG_CAPACITY {
            self.transitions.pop_front();
        }
        self.transitions
            .push_back(StateTransition::new(self.state, to, reason));
        self.state = to;
    }
}

/// Read-only snapshot of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub total_failures: u64,

    /// total_failures / total_requests, 0 without requests
    pub failure_rate: f64,

    pub config: CircuitBreakerConfig,

    /// Most recent transitions, oldest first
    pub recent_transitions: Vec<StateTransition>,
}

/// Circuit breaker guarding one call site.
///
/// Every state check and mutation happens under one lock per breaker, so two
/// concurrent failures cannot both cross the threshold and record the
/// CLOSED -> OPEN transition twice. The lock is never held while the guarded
/// operation runs.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(BreakerState::new()),
        }
    }

    /// Name the breaker was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration fixed at construction.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.state.read().state
    }

    /// Run a blocking operation through the breaker.
    pub fn call<T, E, F>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.acquire()?;
        match operation() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(CallError::Operation(err))
            }
        }
    }

    /// Run an async operation through the breaker.
    ///
    /// The breaker itself never suspends; the only await is the operation.
    pub async fn call_async<T, E, F, Fut>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire()?;
        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(CallError::Operation(err))
            }
        }
    }

    /// Count a request and decide whether it may proceed.
    ///
    /// An open circuit whose timeout has elapsed moves to half-open here, in
    /// the same critical section as the check.
    fn acquire(&self) -> Result<(), CircuitOpenError> {
        let mut state = self.state.write();
        state.total_requests += 1;

        if state.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = state.last_failure_time.map(|t| t.elapsed());
        match elapsed {
            Some(elapsed) if elapsed < self.config.timeout_duration => Err(CircuitOpenError {
                name: self.name.clone(),
                retry_after: self.config.timeout_duration - elapsed,
            }),
            _ => {
                state.success_count = 0;
                state.transition(CircuitState::HalfOpen, "recovery timeout elapsed");
                tracing::info!(
                    breaker = %self.name,
                    "Circuit transitioning to half-open for recovery test"
                );
                Ok(())
            }
        }
    }

    /// Whether a call made now would invoke the operation.
    ///
    /// Read-only: does not count a request or move an open circuit to half-open.
    pub fn is_call_permitted(&self) -> bool {
        let state = self.state.read();
        match state.state {
            CircuitState::Open => state
                .last_failure_time
                .map_or(true, |t| t.elapsed() >= self.config.timeout_duration),
            _ => true,
        }
    }

    /// Record a successful call.
    pub fn on_success(&self) {
        let mut state = self.state.write();
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.failure_count = 0;
                    state.transition(CircuitState::Closed, "success threshold reached");
                    tracing::info!(
                        breaker = %self.name,
                        successes = state.success_count,
                        "Circuit closed after successful recovery"
                    );
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn on_failure(&self) {
        let mut state = self.state.write();
        let now = Instant::now();

        // With a monitoring period, failures further apart do not accumulate
        if let (CircuitState::Closed, Some(period), Some(last)) = (
            state.state,
            self.config.monitoring_period,
            state.last_failure_time,
        ) {
            if now.duration_since(last) > period {
                state.failure_count = 0;
            }
        }

        state.total_failures += 1;
        state.failure_count += 1;
        state.last_failure_time = Some(now);

        match state.state {
            CircuitState::HalfOpen => {
                state.transition(CircuitState::Open, "failure during recovery test");
                tracing::warn!(
                    breaker = %self.name,
                    "Circuit reopened after failed recovery attempt"
                );
            }
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                state.transition(CircuitState::Open, "failure threshold reached");
                tracing::warn!(
                    breaker = %self.name,
                    failures = state.failure_count,
                    "Circuit opened after repeated failures"
                );
            }
            _ => {}
        }
    }

    /// Force the circuit closed and clear its counters.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.failure_count = 0;
        state.success_count = 0;
        state.last_failure_time = None;
        if state.state != CircuitState::Closed {
            state.transition(CircuitState::Closed, "manual reset");
        }
        tracing::info!(breaker = %self.name, "Circuit manually reset");
    }

    /// Snapshot of counters and recent transitions.
    pub fn get_stats(&self) -> BreakerStats {
        let state = self.state.read();
        let failure_rate = if state.total_requests == 0 {
            0.0
        } else {
            state.total_failures as f64 / state.total_requests as f64
        };
        let skip = state.transitions.len().saturating_sub(STATS_TRANSITIONS);

        BreakerStats {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            total_requests: state.total_requests,
            total_failures: state.total_failures,
            failure_rate,
            config: self.config.clone(),
            recent_transitions: state.transitions.iter().skip(skip).cloned().collect(),
        }
    }

    /// Number of transitions retained in the log.
    pub fn transition_count(&self) -> usize {
        self.state.read().transitions.len()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new("default", CircuitBreakerConfig::default())
    }
}

/// Named breakers, each with its own lock.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the breaker registered under `name`, creating it if needed.
    ///
    /// An existing breaker keeps its original configuration.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config))),
        )
    }

    /// Breaker registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Whether no breaker is registered.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Registered and closed breaker counts, taken under one read lock.
    pub fn state_counts(&self) -> (usize, usize) {
        let breakers = self.breakers.read();
        let closed = breakers
            .values()
            .filter(|b| b.state() == CircuitState::Closed)
            .count();
        (breakers.len(), closed)
    }

    /// Stats for every breaker, ordered by name.
    pub fn stats(&self) -> Vec<BreakerStats> {
        self.breakers.read().values().map(|b| b.get_stats()).collect()
    }

    /// Reset all circuits to closed.
    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }
}
