//! # rampart-runtime
//!
//! Stateful resilience components for Rampart.
//!
//! This crate provides:
//! - [`CircuitBreaker`] with CLOSED / OPEN / HALF_OPEN states
//! - [`RetryManager`] with exponential backoff and jitter
//! - [`FailoverManager`] switching between primary and backup endpoints
//! - [`GracefulDegradationManager`] selecting behaviour levels by rule
//! - [`SelfHealingManager`] running pattern-matched remediation
//! - [`ResilienceOrchestrator`] composing all of the above
//!
//! Every component works with blocking callers (`call`, `execute`) and with
//! async callers on tokio (`call_async`, `execute_async`). No lock is held
//! across an `.await`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rampart_runtime::{ResilienceOrchestrator, RetryPolicy};
//! use rampart_core::{CircuitBreakerConfig, Context, RetryConfig};
//!
//! let orchestrator = ResilienceOrchestrator::builder()
//!     .service("db", "db-primary:5432", vec!["db-replica:5432".to_string()])
//!     .build();
//!
//! let breaker = orchestrator.circuit_breaker("db", CircuitBreakerConfig::default());
//! let retry = orchestrator.retry("db-query", RetryPolicy::new(RetryConfig::default()));
//!
//! let result = retry.call(|| breaker.call(|| Err::<u32, _>("connection refused")));
//! if let Err(err) = result {
//!     orchestrator.handle_service_error(&err.to_string(), "db", Context::new());
//! }
//! ```

pub mod error;
pub mod orchestrator;
pub mod probes;
pub mod resilience;

pub use error::{CallError, CircuitOpenError, ResilienceError};
pub use orchestrator::{
    Dashboard, ErrorOutcome, EventSummary, ResilienceOrchestrator, ResilienceOrchestratorBuilder,
};
pub use probes::{FnHealthCheck, HealthCheck, LatencyThresholds, TimedHealthCheck};
pub use resilience::{
    AttemptFailure, BreakerStats, CircuitBreaker, CircuitBreakerRegistry, DegradationRule,
    DegradationStatus, FailoverManager, FailoverRecord, GracefulDegradationManager,
    HealingAttempt, HealingStats, Retry, RetryManager, RetryPolicy, RetryStats,
    SelfHealingManager, ServiceStatus, NORMAL_LEVEL,
};

#[cfg(feature = "http")]
pub use probes::HttpHealthCheck;

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_core::{CircuitBreakerConfig, CircuitState, Context, RetryConfig};
    use std::time::Duration;

    #[test]
    fn test_retry_around_breaker_stops_at_open_circuit() {
        let orchestrator = ResilienceOrchestrator::new();
        let breaker = orchestrator.circuit_breaker(
            "upstream",
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );
        let retry = orchestrator.retry(
            "upstream-call",
            RetryPolicy::new(RetryConfig {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
                jitter: false,
                ..Default::default()
            })
            .retry_if(|e: &CallError<&'static str>| !e.is_open()),
        );

        let result: Result<(), CallError<&str>> =
            retry.call(|| breaker.call(|| Err("upstream down")));

        assert!(result.unwrap_err().is_open());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.get_stats().total_failures, 2);
        assert_eq!(orchestrator.retry_manager().operation_stats("upstream-call").total_attempts, 3);
    }

    #[test]
    fn test_handle_service_error_records_event() {
        let orchestrator = ResilienceOrchestrator::new();
        orchestrator.handle_service_error("service unavailable", "api", Context::new());
        assert_eq!(orchestrator.event_count(), 1);
    }
}
