//! # rampart-core
//!
//! Deterministic model for the Rampart resilience layer.
//!
//! This crate holds everything that does not need locks, clocks or an async
//! runtime:
//! - Circuit, health and severity types
//! - Programmatic configuration with validation
//! - Exponential backoff math
//! - Ordered severity classification
//! - Aggregate health scoring
//!
//! The stateful components (breakers, retries, failover, degradation,
//! self-healing and the orchestrator) live in `rampart-runtime`.
//!
//! ## Example
//!
//! ```rust
//! use rampart_core::{SeverityClassifier, Severity};
//!
//! let classifier = SeverityClassifier::default();
//! let severity = classifier.classify("IoError", "database connection refused");
//! assert_eq!(severity, Severity::High);
//! ```

pub mod backoff;
pub mod classify;
pub mod config;
pub mod health;
pub mod types;

// Re-export main types at crate root
pub use backoff::{backoff_schedule, delay_for_attempt, JITTER_FACTOR};
pub use classify::{Matcher, MatcherKind, SeverityClassifier, SeverityRule, SeverityRuleSpec};
pub use config::{
    CircuitBreakerConfig, HealingConfig, HealthConfig, HealthThresholds, ResilienceConfig,
    RetryConfig, ServiceConfig, DEFAULT_EVENT_CAPACITY,
};
pub use health::{compute_health, HealthGrade, HealthInputs, HealthReport};
pub use types::{CircuitState, Context, ErrorEvent, HealthStatus, Severity, StateTransition};

use thiserror::Error;

/// Errors raised while building the resilience model.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid severity pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_message_names_pattern() {
        let spec = SeverityRuleSpec {
            kind: MatcherKind::Regex,
            pattern: "[".to_string(),
            severity: Severity::High,
        };
        let err = spec.compile().unwrap_err();

        assert!(err.to_string().contains("'['"));
    }

    #[test]
    fn test_config_with_bad_classifier_fails_validation() {
        let config = ResilienceConfig {
            classifier: vec![SeverityRuleSpec {
                kind: MatcherKind::Regex,
                pattern: "(".to_string(),
                severity: Severity::Low,
            }],
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidPattern { .. })
        ));
    }
}
