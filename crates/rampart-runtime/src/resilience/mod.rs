//! Resilience components for rampart-runtime.
//!
//! This module provides:
//! - Circuit breaker to prevent cascade failures
//! - Retry with exponential backoff and jitter
//! - Failover across primary and backup endpoints
//! - Rule-based graceful degradation
//! - Pattern-matched self-healing

mod circuit_breaker;
mod degradation;
mod failover;
mod healing;
mod retry;

pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerRegistry};
pub use degradation::{
    Condition, DegradationRule, DegradationStatus, GracefulDegradationManager, LevelHandler,
    NORMAL_LEVEL,
};
pub use failover::{FailoverManager, FailoverRecord, ServiceStatus};
pub use healing::{HealingAction, HealingAttempt, HealingStats, SelfHealingManager};
pub use retry::{AttemptFailure, Retry, RetryManager, RetryPolicy, RetryStats};
