//! Orchestrator composing the resilience components.
//!
//! The orchestrator:
//! - Hands out named circuit breakers and retry wrappers
//! - Receives unhandled errors, classifies and records them
//! - Tries self-healing first and falls back to failover
//! - Computes an aggregate health score and a read-only dashboard
//!
//! Build one per process and share it behind an `Arc`.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use rampart_core::{
    CircuitBreakerConfig, Context, ErrorEvent, HealthConfig, HealthInputs, HealthReport,
    ResilienceConfig, Severity, SeverityClassifier, DEFAULT_EVENT_CAPACITY,
};

use crate::error::ResilienceError;
use crate::resilience::{
    BreakerStats, CircuitBreaker, CircuitBreakerRegistry, DegradationStatus, FailoverManager,
    FailoverRecord, GracefulDegradationManager, HealingStats, Retry, RetryManager, RetryPolicy,
    RetryStats, SelfHealingManager, ServiceStatus,
};

/// What happened to a reported error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorOutcome {
    /// Id of the recorded event
    pub event_id: String,

    pub severity: Severity,

    /// A healing action ran and succeeded
    pub healed: bool,

    /// Healing did not help and the service moved to a backup
    pub failed_over: bool,
}

/// Counts over the buffered error events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventSummary {
    pub total: usize,
    pub unresolved: usize,
    pub by_severity: BTreeMap<Severity, usize>,
}

/// Read-only snapshot of every component.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub health: HealthReport,
    pub circuit_breakers: Vec<BreakerStats>,
    pub retries: BTreeMap<String, RetryStats>,
    pub failover: Vec<ServiceStatus>,
    pub failover_history: Vec<FailoverRecord>,
    pub degradation: Vec<DegradationStatus>,
    pub healing: HealingStats,
    pub events: EventSummary,
}

/// Composes breakers, retries, failover, degradation and self-healing.
///
/// # Error flow
/// 1. Classify severity from the error text
/// 2. Record an [`ErrorEvent`] in the bounded buffer
/// 3. Attempt self-healing; success resolves the event
/// 4. Otherwise fail the service over, best effort
pub struct ResilienceOrchestrator {
    breakers: CircuitBreakerRegistry,
    retry_manager: Arc<RetryManager>,
    failover: Arc<FailoverManager>,
    degradation: GracefulDegradationManager,
    healing: SelfHealingManager,
    classifier: SeverityClassifier,
    health_config: HealthConfig,

    /// Named retry policies
    policies: RwLock<BTreeMap<String, RetryPolicy>>,

    /// Ring buffer of reported errors, oldest first
    events: Mutex<VecDeque<ErrorEvent>>,
    event_capacity: usize,
}

impl Default for ResilienceOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceOrchestrator {
    /// Create an orchestrator with default settings and no registrations.
    pub fn new() -> Self {
        ResilienceOrchestratorBuilder::new().build()
    }

    /// Create a builder.
    pub fn builder() -> ResilienceOrchestratorBuilder {
        ResilienceOrchestratorBuilder::new()
    }

    /// Wire an orchestrator from a validated configuration.
    pub fn from_config(config: &ResilienceConfig) -> Result<Self, ResilienceError> {
        config.validate()?;

        let mut builder = Self::builder()
            .classifier(SeverityClassifier::from_specs(&config.classifier)?)
            .health_config(config.health.clone())
            .event_capacity(config.event_capacity)
            .healing_enabled(config.healing.enabled);

        for (name, breaker) in &config.breakers {
            builder = builder.breaker(name, breaker.clone());
        }
        for (name, policy) in &config.retry {
            builder = builder.retry_policy(name, RetryPolicy::new(policy.clone()));
        }
        for (name, service) in &config.services {
            builder = builder.service(name, &service.primary, service.backups.clone());
        }

        Ok(builder.build())
    }

    /// Breaker registered under `name`, created with `config` if new.
    pub fn circuit_breaker(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(name, config)
    }

    /// Retry wrapper for `name` under `policy`.
    pub fn retry(&self, name: impl Into<String>, policy: RetryPolicy) -> Retry {
        Retry::new(name, policy, Arc::clone(&self.retry_manager))
    }

    /// Register a named policy for later lookup.
    pub fn register_retry_policy(&self, name: impl Into<String>, policy: RetryPolicy) {
        self.policies.write().insert(name.into(), policy);
    }

    /// Policy registered under `name`.
    pub fn retry_policy(&self, name: &str) -> Option<RetryPolicy> {
        self.policies.read().get(name).cloned()
    }

    /// Retry wrapper using the policy registered under `name`.
    pub fn named_retry(&self, name: &str) -> Result<Retry, ResilienceError> {
        let policy = self
            .retry_policy(name)
            .ok_or_else(|| ResilienceError::NotRegistered(name.to_string()))?;
        Ok(self.retry(name, policy))
    }

    /// Report an unhandled error for `service`.
    ///
    /// Healing and failover outcomes are returned, never raised.
    pub fn handle_error<E>(&self, error: &E, service: &str, context: Context) -> ErrorOutcome
    where
        E: fmt::Display + ?Sized,
    {
        self.record_error(service, short_type_name::<E>(), &error.to_string(), context)
    }

    /// Fire-and-forget form of [`handle_error`](Self::handle_error).
    pub fn handle_service_error<E>(&self, error: &E, service: &str, context: Context)
    where
        E: fmt::Display + ?Sized,
    {
        self.handle_error(error, service, context);
    }

    /// Report an error by type name and message.
    pub fn record_error(
        &self,
        service: &str,
        error_type: &str,
        message: &str,
        context: Context,
    ) -> ErrorOutcome {
        let severity = self.classifier.classify(error_type, message);
        let event_id = Uuid::new_v4().to_string();
        let event = ErrorEvent::new(
            event_id.clone(),
            service,
            error_type,
            message,
            severity,
            context.clone(),
        );

        match severity {
            Severity::Critical | Severity::High => tracing::error!(
                service = %service,
                error_type = %error_type,
                severity = %severity,
                event_id = %event_id,
                "{message}"
            ),
            _ => tracing::warn!(
                service = %service,
                error_type = %error_type,
                severity = %severity,
                event_id = %event_id,
                "{message}"
            ),
        }

        {
            let mut events = self.events.lock();
            if events.len() >= self.event_capacity {
                events.pop_front();
            }
            events.push_back(event);
        }

        // No orchestrator lock is held while healing or failing over
        let healed = self.healing.attempt_healing(message, &context);
        let mut failed_over = false;

        if healed {
            self.mark_resolved(&event_id);
        } else {
            match self.failover.perform_failover(service) {
                Ok(switched) => failed_over = switched,
                Err(e) => tracing::debug!(service = %service, error = %e, "Failover skipped"),
            }
        }

        ErrorOutcome {
            event_id,
            severity,
            healed,
            failed_over,
        }
    }

    fn mark_resolved(&self, id: &str) -> bool {
        let mut events = self.events.lock();
        match events.iter_mut().rev().find(|e| e.id == id) {
            Some(event) => {
                event.resolved = true;
                true
            }
            None => false,
        }
    }

    /// Mark an event resolved by hand. False if it is no longer buffered.
    pub fn resolve_event(&self, id: &str) -> bool {
        self.mark_resolved(id)
    }

    /// The `n` most recent events, oldest first.
    pub fn recent_events(&self, n: usize) -> Vec<ErrorEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(n);
        events.iter().skip(skip).cloned().collect()
    }

    /// Number of buffered events.
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    /// Aggregate health score.
    pub fn compute_health(&self) -> HealthReport {
        let events = self.events.lock();
        self.health_from(&events)
    }

    fn health_from(&self, events: &VecDeque<ErrorEvent>) -> HealthReport {
        let (breakers_total, breakers_closed) = self.breakers.state_counts();
        let mut inputs = HealthInputs {
            breakers_total,
            breakers_closed,
            ..Default::default()
        };

        for event in events.iter().rev().take(self.health_config.window) {
            inputs.recent_events += 1;
            if event.severity == Severity::Critical {
                inputs.recent_critical += 1;
            }
            if event.resolved {
                inputs.recent_resolved += 1;
            }
        }

        rampart_core::compute_health(inputs, &self.health_config)
    }

    fn event_summary(events: &VecDeque<ErrorEvent>) -> EventSummary {
        let mut summary = EventSummary {
            total: events.len(),
            ..Default::default()
        };
        for event in events {
            if !event.resolved {
                summary.unresolved += 1;
            }
            *summary.by_severity.entry(event.severity).or_default() += 1;
        }
        summary
    }

    /// Snapshot of every component plus the health score.
    ///
    /// The health score and event summary come from one view of the event
    /// buffer.
    pub fn get_dashboard(&self) -> Dashboard {
        let (health, events) = {
            let events = self.events.lock();
            (self.health_from(&events), Self::event_summary(&events))
        };

        Dashboard {
            generated_at: Utc::now(),
            health,
            circuit_breakers: self.breakers.stats(),
            retries: self.retry_manager.stats(),
            failover: self.failover.status(),
            failover_history: self.failover.history(),
            degradation: self.degradation.status(),
            healing: self.healing.stats(),
            events,
        }
    }

    /// Breakers created through this orchestrator.
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Shared retry manager holding per-operation statistics.
    pub fn retry_manager(&self) -> &Arc<RetryManager> {
        &self.retry_manager
    }

    /// Shared so a health monitor task can own a handle.
    pub fn failover(&self) -> &Arc<FailoverManager> {
        &self.failover
    }

    /// Per-service degradation levels.
    pub fn degradation(&self) -> &GracefulDegradationManager {
        &self.degradation
    }

    /// Registered healing rules and their attempt log.
    pub fn healing(&self) -> &SelfHealingManager {
        &self.healing
    }

    /// Classifier assigning severities to reported errors.
    pub fn classifier(&self) -> &SeverityClassifier {
        &self.classifier
    }
}

/// Last path segment of a type name, without generics.
fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Builder for ResilienceOrchestrator.
pub struct ResilienceOrchestratorBuilder {
    classifier: SeverityClassifier,
    health_config: HealthConfig,
    event_capacity: usize,
    healing_enabled: bool,
    breakers: Vec<(String, CircuitBreakerConfig)>,
    policies: BTreeMap<String, RetryPolicy>,
    services: Vec<(String, String, Vec<String>)>,
}

impl ResilienceOrchestratorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            classifier: SeverityClassifier::default(),
            health_config: HealthConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            healing_enabled: true,
            breakers: Vec::new(),
            policies: BTreeMap::new(),
            services: Vec::new(),
        }
    }

    /// Set the severity classifier.
    pub fn classifier(mut self, classifier: SeverityClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set the health scoring parameters.
    pub fn health_config(mut self, config: HealthConfig) -> Self {
        self.health_config = config;
        self
    }

    /// Set the error buffer capacity (at least 1).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Enable or disable automatic healing.
    pub fn healing_enabled(mut self, enabled: bool) -> Self {
        self.healing_enabled = enabled;
        self
    }

    /// Pre-register a circuit breaker.
    pub fn breaker(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.breakers.push((name.into(), config));
        self
    }

    /// Register a named retry policy.
    pub fn retry_policy(mut self, name: impl Into<String>, policy: RetryPolicy) -> Self {
        self.policies.insert(name.into(), policy);
        self
    }

    /// Register a failover service.
    pub fn service(
        mut self,
        name: impl Into<String>,
        primary: impl Into<String>,
        backups: Vec<String>,
    ) -> Self {
        self.services.push((name.into(), primary.into(), backups));
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> ResilienceOrchestrator {
        let breakers = CircuitBreakerRegistry::new();
        for (name, config) in self.breakers {
            breakers.get_or_create(&name, config);
        }

        let failover = FailoverManager::new();
        for (name, primary, backups) in self.services {
            failover.register_service(name, primary, backups);
        }

        ResilienceOrchestrator {
            breakers,
            retry_manager: Arc::new(RetryManager::new()),
            failover: Arc::new(failover),
            degradation: GracefulDegradationManager::new(),
            healing: SelfHealingManager::new(self.healing_enabled),
            classifier: self.classifier,
            health_config: self.health_config,
            policies: RwLock::new(self.policies),
            events: Mutex::new(VecDeque::with_capacity(self.event_capacity.min(1024))),
            event_capacity: self.event_capacity,
        }
    }
}

impl Default for ResilienceOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_core::{HealthGrade, RetryConfig, ServiceConfig};
    use std::io;
    use std::time::Duration;

    fn orchestrator() -> ResilienceOrchestrator {
        ResilienceOrchestrator::builder()
            .service("db", "p", vec!["b1".to_string()])
            .build()
    }

    #[test]
    fn test_healed_error_is_resolved() {
        let orchestrator = orchestrator();
        orchestrator
            .healing()
            .register_rule("connection reset", |_: &str, _: &Context| true, 3, Duration::ZERO);

        let err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer");
        let outcome = orchestrator.handle_error(&err, "db", Context::new());

        assert!(outcome.healed);
        assert!(!outcome.failed_over);
        assert_eq!(orchestrator.failover().get_active_endpoint("db").unwrap(), "p");

        let events = orchestrator.recent_events(10);
        assert_eq!(events.len(), 1);
        assert!(events[0].resolved);
        assert_eq!(events[0].error_type, "Error");
        assert_eq!(events[0].severity, Severity::High);
    }

    #[test]
    fn test_unhealed_error_fails_over() {
        let orchestrator = orchestrator();

        let outcome = orchestrator.handle_error("disk quota warning", "db", Context::new());

        assert!(!outcome.healed);
        assert!(outcome.failed_over);
        assert_eq!(orchestrator.failover().get_active_endpoint("db").unwrap(), "b1");
        assert!(!orchestrator.recent_events(1)[0].resolved);
    }

    #[test]
    fn test_unknown_service_is_not_raised() {
        let orchestrator = orchestrator();
        orchestrator.handle_service_error("fatal: out of memory", "ghost", Context::new());

        let events = orchestrator.recent_events(1);
        assert_eq!(events[0].service, "ghost");
        assert_eq!(events[0].severity, Severity::Critical);
        assert_eq!(events[0].error_type, "str");
    }

    #[test]
    fn test_event_buffer_evicts_oldest() {
        let orchestrator = ResilienceOrchestrator::builder().event_capacity(3).build();

        for i in 0..5 {
            orchestrator.record_error("svc", "Error", &format!("failure {i}"), Context::new());
        }

        assert_eq!(orchestrator.event_count(), 3);
        let events = orchestrator.recent_events(10);
        assert_eq!(events[0].message, "failure 2");
        assert_eq!(events[2].message, "failure 4");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let orchestrator = orchestrator();
        let a = orchestrator.record_error("svc", "Error", "one", Context::new());
        let b = orchestrator.record_error("svc", "Error", "two", Context::new());
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_resolve_event() {
        let orchestrator = orchestrator();
        let outcome = orchestrator.record_error("svc", "Error", "slow response", Context::new());

        assert_eq!(outcome.severity, Severity::Medium);
        assert!(orchestrator.resolve_event(&outcome.event_id));
        assert!(!orchestrator.resolve_event("missing"));
        assert!(orchestrator.recent_events(1)[0].resolved);
    }

    #[test]
    fn test_health_reflects_breakers_and_events() {
        let orchestrator = orchestrator();
        assert_eq!(orchestrator.compute_health().status, HealthGrade::Excellent);

        let breaker = orchestrator.circuit_breaker(
            "payments",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        orchestrator.circuit_breaker("search", CircuitBreakerConfig::default());
        let _ = breaker.call(|| Err::<(), _>("down"));

        orchestrator.record_error("svc", "Error", "critical failure", Context::new());
        orchestrator.record_error("svc", "Error", "critical failure", Context::new());

        let report = orchestrator.compute_health();
        assert_eq!(report.circuit_breaker_health, 50.0);
        assert_eq!(report.error_rate_health, 80.0);
        assert_eq!(report.resolution_health, 0.0);
        assert_eq!(report.status, HealthGrade::Critical);
    }

    #[test]
    fn test_dashboard_is_read_only_and_serializable() {
        let orchestrator = orchestrator();
        orchestrator.record_error("db", "Error", "database timeout", Context::new());

        let before = orchestrator.event_count();
        let dashboard = orchestrator.get_dashboard();
        assert_eq!(orchestrator.event_count(), before);

        assert_eq!(dashboard.events.total, 1);
        assert_eq!(dashboard.events.unresolved, 1);
        assert_eq!(dashboard.events.by_severity[&Severity::High], 1);
        assert_eq!(dashboard.failover_history.len(), 1);

        let json = serde_json::to_value(&dashboard).unwrap();
        assert!(json.get("health").is_some());
        assert_eq!(json["events"]["by_severity"]["high"], 1);
    }

    #[test]
    fn test_dashboard_is_consistent_under_concurrent_writes() {
        let orchestrator = Arc::new(orchestrator());

        let writer = {
            let orchestrator = Arc::clone(&orchestrator);
            std::thread::spawn(move || {
                for i in 0..50 {
                    let breaker = orchestrator.circuit_breaker(
                        &format!("breaker-{i}"),
                        CircuitBreakerConfig {
                            failure_threshold: 1,
                            ..Default::default()
                        },
                    );
                    if i % 2 == 0 {
                        let _ = breaker.call(|| Err::<(), _>("down"));
                    }
                    if i % 6 == 0 {
                        orchestrator.record_error("svc", "Error", "critical failure", Context::new());
                    }
                }
            })
        };

        for _ in 0..200 {
            let dashboard = orchestrator.get_dashboard();
            let health = &dashboard.health;
            let critical = dashboard.events.total as f64;

            assert!((0.0..=100.0).contains(&health.circuit_breaker_health));
            assert_eq!(health.error_rate_health, 100.0 - 10.0 * critical);
            let expected_resolution = if dashboard.events.total == 0 { 100.0 } else { 0.0 };
            assert_eq!(health.resolution_health, expected_resolution);
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_from_config() {
        let mut config = ResilienceConfig::default();
        config.breakers.insert("payments".to_string(), CircuitBreakerConfig::default());
        config.retry.insert("fetch".to_string(), RetryConfig::default());
        config.services.insert(
            "db".to_string(),
            ServiceConfig {
                primary: "p".to_string(),
                backups: vec!["b1".to_string()],
            },
        );
        config.healing.enabled = false;

        let orchestrator = ResilienceOrchestrator::from_config(&config).unwrap();

        assert!(orchestrator.breakers().get("payments").is_some());
        assert!(orchestrator.named_retry("fetch").is_ok());
        assert!(orchestrator.named_retry("missing").is_err());
        assert_eq!(orchestrator.failover().services(), vec!["db"]);
        assert!(!orchestrator.healing().is_enabled());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = ResilienceConfig::default();
        config.event_capacity = 0;

        assert!(matches!(
            ResilienceOrchestrator::from_config(&config),
            Err(ResilienceError::Config(_))
        ));
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<io::Error>(), "Error");
        assert_eq!(short_type_name::<String>(), "String");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec");
    }
}
