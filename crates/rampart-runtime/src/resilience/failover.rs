//! Failover across redundant endpoints.
//!
//! Each logical service has a primary endpoint and an ordered list of
//! backups. On failure the manager moves to the first backup that has not
//! failed yet; declared order is the only selection criterion.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use rampart_core::{HealthStatus, ServiceConfig};

use crate::error::ResilienceError;
use crate::probes::HealthCheck;

/// Failover records kept for the dashboard.
const HISTORY_CAPACITY: usize = 100;

/// Endpoint registration of one service.
struct ServiceEndpoints {
    primary: String,
    backups: Vec<String>,
    current: String,
    failed: BTreeSet<String>,
    last_failover: Option<DateTime<Utc>>,
    last_health: Option<HealthStatus>,
    check: Option<Arc<dyn HealthCheck>>,
}

impl ServiceEndpoints {
    fn new(primary: String, backups: Vec<String>) -> Self {
        Self {
            current: primary.clone(),
            primary,
            backups,
            failed: BTreeSet::new(),
            last_failover: None,
            last_health: None,
            check: None,
        }
    }

    fn knows(&self, endpoint: &str) -> bool {
        self.primary == endpoint || self.backups.iter().any(|b| b == endpoint)
    }
}

/// A completed switch from one endpoint to another.
#[derive(Debug, Clone, Serialize)]
pub struct FailoverRecord {
    pub service: String,
    pub from: String,
    pub to: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of one service's endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service: String,
    pub primary: String,
    pub backups: Vec<String>,
    pub current: String,

    /// Endpoints marked failed, sorted
    pub failed: Vec<String>,

    pub last_failover: Option<DateTime<Utc>>,

    /// Result of the most recent health check, if any ran
    pub last_health: Option<HealthStatus>,

    pub has_health_check: bool,
}

/// Tracks active endpoints and switches them on failure.
///
/// Every service has its own lock, so failovers of one service are
/// serialized without blocking lookups on the others. Locks are taken in
/// the order services map, service, history; the history lock is never
/// taken while a service is locked.
#[derive(Default)]
pub struct FailoverManager {
    services: RwLock<BTreeMap<String, Arc<Mutex<ServiceEndpoints>>>>,
    history: Mutex<VecDeque<FailoverRecord>>,
}

impl FailoverManager {
    /// Create a manager with no services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a service. The primary becomes active.
    ///
    /// Replacing a service drops its health check.
    pub fn register_service(
        &self,
        name: impl Into<String>,
        primary: impl Into<String>,
        backups: Vec<String>,
    ) {
        let name = name.into();
        let primary = primary.into();

        tracing::debug!(
            service = %name,
            primary = %primary,
            backups = backups.len(),
            "Registered failover service"
        );

        self.services.write().insert(
            name,
            Arc::new(Mutex::new(ServiceEndpoints::new(primary, backups))),
        );
    }

    /// Register a service from its configuration entry.
    pub fn register_config(&self, name: &str, config: &ServiceConfig) {
        self.register_service(name, config.primary.clone(), config.backups.clone());
    }

    /// Attach a health probe to a registered service.
    pub fn register_health_check(
        &self,
        name: &str,
        check: Arc<dyn HealthCheck>,
    ) -> Result<(), ResilienceError> {
        self.service(name)?.lock().check = Some(check);
        Ok(())
    }

    fn service(&self, name: &str) -> Result<Arc<Mutex<ServiceEndpoints>>, ResilienceError> {
        self.services
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ResilienceError::NotRegistered(name.to_string()))
    }

    /// Endpoint currently serving `name`.
    pub fn get_active_endpoint(&self, name: &str) -> Result<String, ResilienceError> {
        Ok(self.service(name)?.lock().current.clone())
    }

    /// Mark the active endpoint failed and move to the next healthy backup.
    ///
    /// Returns `Ok(false)` when every backup has failed; the active endpoint
    /// is left unchanged in that case.
    pub fn perform_failover(&self, name: &str) -> Result<bool, ResilienceError> {
        self.fail_over(name, None, "failure reported")
    }

    /// Fail over only if `expected` is still the active endpoint.
    fn fail_over(
        &self,
        name: &str,
        expected: Option<&str>,
        reason: &str,
    ) -> Result<bool, ResilienceError> {
        let service = self.service(name)?;
        let mut endpoints = service.lock();

        if let Some(expected) = expected {
            if endpoints.current != expected {
                return Ok(false);
            }
        }

        let from = endpoints.current.clone();
        endpoints.failed.insert(from.clone());

        let candidate = endpoints
            .backups
            .iter()
            .find(|b| !endpoints.failed.contains(*b))
            .cloned();

        match candidate {
            Some(to) => {
                endpoints.current = to.clone();
                endpoints.last_failover = Some(Utc::now());
                drop(endpoints);

                tracing::info!(service = %name, from = %from, to = %to, reason = %reason, "Failed over");
                self.record(name, from, to, reason);
                Ok(true)
            }
            None => {
                tracing::warn!(service = %name, current = %from, "Failover impossible: no backups available");
                Ok(false)
            }
        }
    }

    /// Manually switch a service.
    ///
    /// With a target, the target must be the primary or one of the backups;
    /// it becomes active and is cleared from the failed set. Returns
    /// `Ok(false)` without recording anything when the target is already
    /// active. Without a target this behaves like
    /// [`perform_failover`](Self::perform_failover).
    pub fn force_failover(&self, name: &str, target: Option<&str>) -> Result<bool, ResilienceError> {
        let Some(target) = target else {
            return self.fail_over(name, None, "forced");
        };

        let service = self.service(name)?;
        let mut endpoints = service.lock();

        if !endpoints.knows(target) {
            return Err(ResilienceError::UnknownEndpoint {
                service: name.to_string(),
                endpoint: target.to_string(),
            });
        }

        if endpoints.current == target {
            return Ok(false);
        }

        let from = std::mem::replace(&mut endpoints.current, target.to_string());
        endpoints.failed.remove(target);
        endpoints.last_failover = Some(Utc::now());
        drop(endpoints);

        tracing::info!(service = %name, from = %from, to = %target, "Forced failover");
        self.record(name, from, target.to_string(), "forced");
        Ok(true)
    }

    /// Forget which endpoints failed. The active endpoint does not change.
    pub fn reset_failed_endpoints(&self, name: &str) -> Result<(), ResilienceError> {
        self.service(name)?.lock().failed.clear();
        tracing::debug!(service = %name, "Cleared failed endpoints");
        Ok(())
    }

    /// Probe the active endpoint of every service that has a health check,
    /// failing over those that report UNHEALTHY.
    ///
    /// Probes run concurrently with no lock held.
    pub async fn health_check_all(&self) -> BTreeMap<String, HealthStatus> {
        let targets: Vec<(String, String, Arc<dyn HealthCheck>)> = self
            .services
            .read()
            .iter()
            .filter_map(|(name, service)| {
                let endpoints = service.lock();
                let check = Arc::clone(endpoints.check.as_ref()?);
                Some((name.clone(), endpoints.current.clone(), check))
            })
            .collect();

        let probes = targets.iter().map(|(name, endpoint, check)| async move {
            let status = check.check(endpoint).await;
            tracing::debug!(
                service = %name,
                endpoint = %endpoint,
                probe = check.name(),
                status = %status,
                "Health check completed"
            );
            status
        });
        let statuses = join_all(probes).await;

        let mut results = BTreeMap::new();
        for ((name, endpoint, _), status) in targets.into_iter().zip(statuses) {
            if let Ok(service) = self.service(&name) {
                service.lock().last_health = Some(status);
            }

            if status.triggers_failover() {
                let reason = format!("health check reported {status}");
                if let Err(e) = self.fail_over(&name, Some(&endpoint), &reason) {
                    tracing::warn!(service = %name, error = %e, "Failover after health check failed");
                }
            }
            results.insert(name, status);
        }

        results
    }

    /// Run [`health_check_all`](Self::health_check_all) every `interval`
    /// until the returned handle is aborted.
    pub fn spawn_health_monitor(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.health_check_all().await;
            }
        })
    }

    fn record(&self, service: &str, from: String, to: String, reason: &str) {
        let mut history = self.history.lock();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(FailoverRecord {
            service: service.to_string(),
            from,
            to,
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    /// Most recent failovers, oldest first.
    pub fn history(&self) -> Vec<FailoverRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// Snapshot of every service.
    pub fn status(&self) -> Vec<ServiceStatus> {
        self.services
            .read()
            .iter()
            .map(|(name, service)| {
                let endpoints = service.lock();
                ServiceStatus {
                    service: name.clone(),
                    primary: endpoints.primary.clone(),
                    backups: endpoints.backups.clone(),
                    current: endpoints.current.clone(),
                    failed: endpoints.failed.iter().cloned().collect(),
                    last_failover: endpoints.last_failover,
                    last_health: endpoints.last_health,
                    has_health_check: endpoints.check.is_some(),
                }
            })
            .collect()
    }
}
