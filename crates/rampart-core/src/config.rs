//! Programmatic configuration for the resilience components.
//!
//! Every struct here is plain data with a `Default`. The library never reads
//! files or environment variables; callers build these values in code or
//! deserialize them from whatever format they own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::classify::SeverityRuleSpec;
use crate::CoreError;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures before opening the circuit
    pub failure_threshold: u32,

    /// Successes in half-open needed to close the circuit
    pub success_threshold: u32,

    /// Time an open circuit waits before allowing a trial call (seconds)
    #[serde(with = "duration_secs")]
    pub timeout_duration: Duration,

    /// Optional window in which consecutive failures accumulate (seconds).
    /// When unset, failures count until a success regardless of spacing.
    #[serde(default, with = "option_duration_secs")]
    pub monitoring_period: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_duration: Duration::from_secs(60),
            monitoring_period: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Reject zero thresholds.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.failure_threshold == 0 {
            return Err(CoreError::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(CoreError::InvalidConfig(
                "success_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Backoff parameters of a retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total invocations, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry (seconds)
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,

    /// Upper bound on any single delay (seconds)
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,

    /// Multiplier applied per attempt
    pub exponential_base: f64,

    /// Randomize each delay by up to ±25%
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Reject an empty attempt budget or an inverted delay range.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_attempts == 0 {
            return Err(CoreError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(CoreError::InvalidConfig(format!(
                "exponential_base must be a finite number >= 1, got {}",
                self.exponential_base
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(CoreError::InvalidConfig(format!(
                "base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Primary and ordered backup endpoints of one logical service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub primary: String,

    #[serde(default)]
    pub backups: Vec<String>,
}

/// Self-healing switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Global kill switch for automatic remediation
    pub enabled: bool,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Score cut-offs for the health grade buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            excellent: 95.0,
            good: 85.0,
            fair: 70.0,
            poor: 50.0,
        }
    }
}

/// Health scoring parameters.
///
/// The defaults are heuristics, not contractual values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Number of most recent events considered
    pub window: usize,

    /// Points deducted from error-rate health per critical event in the window
    pub critical_penalty: f64,

    pub thresholds: HealthThresholds,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: 100,
            critical_penalty: 10.0,
            thresholds: HealthThresholds::default(),
        }
    }
}

impl HealthConfig {
    /// Require a non-empty window and ordered grade cut-offs.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.window == 0 {
            return Err(CoreError::InvalidConfig(
                "health window must be at least 1".to_string(),
            ));
        }
        if self.critical_penalty < 0.0 {
            return Err(CoreError::InvalidConfig(
                "critical_penalty must not be negative".to_string(),
            ));
        }
        let t = &self.thresholds;
        if !(t.excellent >= t.good && t.good >= t.fair && t.fair >= t.poor) {
            return Err(CoreError::InvalidConfig(
                "health thresholds must be ordered excellent >= good >= fair >= poor".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default capacity of the orchestrator's error event buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Complete wiring description for an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Circuit breakers by name
    pub breakers: BTreeMap<String, CircuitBreakerConfig>,

    /// Named retry policies
    pub retry: BTreeMap<String, RetryConfig>,

    /// Failover registrations by service name
    pub services: BTreeMap<String, ServiceConfig>,

    pub healing: HealingConfig,

    pub health: HealthConfig,

    /// Ordered severity rules; empty means the built-in rule set
    pub classifier: Vec<SeverityRuleSpec>,

    /// Capacity of the error event ring buffer
    pub event_capacity: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breakers: BTreeMap::new(),
            retry: BTreeMap::new(),
            services: BTreeMap::new(),
            healing: HealingConfig::default(),
            health: HealthConfig::default(),
            classifier: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ResilienceConfig {
    /// Check every section, naming the offending entry on failure.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, breaker) in &self.breakers {
            breaker
                .validate()
                .map_err(|e| CoreError::InvalidConfig(format!("breaker '{name}': {e}")))?;
        }
        for (name, policy) in &self.retry {
            policy
                .validate()
                .map_err(|e| CoreError::InvalidConfig(format!("retry policy '{name}': {e}")))?;
        }
        for (name, service) in &self.services {
            if service.primary.is_empty() {
                return Err(CoreError::InvalidConfig(format!(
                    "service '{name}': primary endpoint is empty"
                )));
            }
            if service.backups.iter().any(|b| b == &service.primary) {
                return Err(CoreError::InvalidConfig(format!(
                    "service '{name}': primary endpoint is also listed as a backup"
                )));
            }
        }
        self.health.validate()?;
        if self.event_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        for spec in &self.classifier {
            spec.compile()?;
        }
        Ok(())
    }
}

/// Serialize durations as fractional seconds.
mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Optional durations as fractional seconds, absent or null meaning `None`.
mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => super::duration_secs::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Secs(#[serde(with = "super::duration_secs")] Duration);

        Ok(Option::<Secs>::deserialize(deserializer)?.map(|Secs(duration)| duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ResilienceConfig::default().validate().is_ok());
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(RetryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_thresholds() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RetryConfig {
            exponential_base: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_backup_equal_to_primary() {
        let mut config = ResilienceConfig::default();
        config.services.insert(
            "db".to_string(),
            ServiceConfig {
                primary: "db-1".to_string(),
                backups: vec!["db-1".to_string()],
            },
        );

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("service 'db'"));
    }

    #[test]
    fn test_rejects_unordered_health_thresholds() {
        let mut config = ResilienceConfig::default();
        config.health.thresholds.fair = 99.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations_round_trip_as_seconds() {
        let json = r#"{"failure_threshold": 2, "timeout_duration": 1.5}"#;
        let config: CircuitBreakerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.timeout_duration, Duration::from_millis(1500));
        // Unspecified fields fall back to defaults
        assert_eq!(config.success_threshold, 3);

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["timeout_duration"], serde_json::json!(1.5));
    }

    #[test]
    fn test_monitoring_period_is_opt_in() {
        let config: CircuitBreakerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.monitoring_period, None);
        assert_eq!(serde_json::to_value(&config).unwrap()["monitoring_period"], serde_json::Value::Null);

        let config: CircuitBreakerConfig =
            serde_json::from_str(r#"{"monitoring_period": 30}"#).unwrap();
        assert_eq!(config.monitoring_period, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let json = r#"{"base_delay": -1.0}"#;
        assert!(serde_json::from_str::<RetryConfig>(json).is_err());
    }
}
