//! Shared domain types for Rampart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form context attached to errors, degradation checks and healing actions.
///
/// BTreeMap keeps key order deterministic in snapshots and logs.
pub type Context = BTreeMap<String, serde_json::Value>;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls flow through
    Closed,

    /// Calls fail fast without invoking the operation
    Open,

    /// Trial calls are allowed to probe recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// A recorded state change of a circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,

    /// Why the transition happened (e.g. "failure threshold reached")
    pub reason: String,

    pub at: DateTime<Utc>,
}

impl StateTransition {
    /// Transition stamped with the current time.
    pub fn new(from: CircuitState, to: CircuitState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// Result of probing an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl HealthStatus {
    /// Whether this status should move traffic off the probed endpoint.
    pub fn triggers_failover(self) -> bool {
        matches!(self, HealthStatus::Unhealthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Severity assigned to a reported error.
///
/// Ordered from least to most severe, so `Severity::Critical > Severity::Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Low
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A failure reported to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Unique identifier
    pub id: String,

    /// Logical service the error belongs to
    pub service: String,

    /// Short type name of the error
    pub error_type: String,

    /// Rendered error message
    pub message: String,

    pub severity: Severity,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub context: Context,

    /// Set once self-healing (or an operator) resolved the error
    #[serde(default)]
    pub resolved: bool,
}

impl ErrorEvent {
    /// Create an unresolved event stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        context: Context,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            error_type: error_type.into(),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            context,
            resolved: false,
        }
    }
}
