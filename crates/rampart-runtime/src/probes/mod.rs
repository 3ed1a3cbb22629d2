//! Endpoint health probes used by the failover manager.
//!
//! A probe answers one question: how healthy is this endpoint right now?
//! Probes are async because they usually perform I/O; synchronous checks
//! can be adapted with [`FnHealthCheck`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use rampart_core::HealthStatus;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpHealthCheck;

/// Probe abstraction allows swapping health-check transports.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Probe an endpoint.
    async fn check(&self, endpoint: &str) -> HealthStatus;

    /// Probe name for logs.
    fn name(&self) -> &str {
        "health-check"
    }
}

/// Latency cut-offs for classifying a reachable endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyThresholds {
    /// Slower responses are DEGRADED
    pub degraded_after: Duration,

    /// Slower responses are UNHEALTHY
    pub unhealthy_after: Duration,
}

impl Default for LatencyThresholds {
    fn default() -> Self {
        Self {
            degraded_after: Duration::from_millis(500),
            unhealthy_after: Duration::from_secs(5),
        }
    }
}

impl LatencyThresholds {
    /// Status of a probe that answered `reachable` after `elapsed`.
    pub fn classify(&self, reachable: bool, elapsed: Duration) -> HealthStatus {
        if !reachable || elapsed >= self.unhealthy_after {
            HealthStatus::Unhealthy
        } else if elapsed >= self.degraded_after {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Adapter turning a synchronous closure into a [`HealthCheck`].
pub struct FnHealthCheck<F> {
    name: String,
    check: F,
}

impl<F> FnHealthCheck<F>
where
    F: Fn(&str) -> HealthStatus + Send + Sync,
{
    /// Wrap `check` under a name used in logs.
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

#[async_trait]
impl<F> HealthCheck for FnHealthCheck<F>
where
    F: Fn(&str) -> HealthStatus + Send + Sync,
{
    async fn check(&self, endpoint: &str) -> HealthStatus {
        (self.check)(endpoint)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapter timing a blocking reachability closure against thresholds.
///
/// The closure runs on tokio's blocking pool, so it may perform blocking
/// I/O and several checks proceed in parallel. A closure that panics
/// reports the endpoint unreachable.
pub struct TimedHealthCheck<F> {
    name: String,
    probe: Arc<F>,
    thresholds: LatencyThresholds,
}

impl<F> TimedHealthCheck<F>
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    /// Wrap a reachability closure classified by `thresholds`.
    pub fn new(name: impl Into<String>, thresholds: LatencyThresholds, probe: F) -> Self {
        Self {
            name: name.into(),
            probe: Arc::new(probe),
            thresholds,
        }
    }
}

#[async_trait]
impl<F> HealthCheck for TimedHealthCheck<F>
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    async fn check(&self, endpoint: &str) -> HealthStatus {
        let probe = Arc::clone(&self.probe);
        let target = endpoint.to_string();
        let started = Instant::now();

        let reachable = match tokio::task::spawn_blocking(move || (*probe)(&target)).await {
            Ok(reachable) => reachable,
            Err(e) => {
                tracing::warn!(check = %self.name, endpoint = %endpoint, error = %e, "Reachability check aborted");
                false
            }
        };
        self.thresholds.classify(reachable, started.elapsed())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_classification() {
        let thresholds = LatencyThresholds::default();

        assert_eq!(
            thresholds.classify(true, Duration::from_millis(20)),
            HealthStatus::Healthy
        );
        assert_eq!(
            thresholds.classify(true, Duration::from_millis(800)),
            HealthStatus::Degraded
        );
        assert_eq!(
            thresholds.classify(true, Duration::from_secs(6)),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            thresholds.classify(false, Duration::ZERO),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_fn_health_check() {
        let check = FnHealthCheck::new("static", |endpoint: &str| {
            if endpoint.ends_with("-down") {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Healthy
            }
        });

        assert_eq!(check.check("db-1").await, HealthStatus::Healthy);
        assert_eq!(check.check("db-1-down").await, HealthStatus::Unhealthy);
        assert_eq!(check.name(), "static");
    }

    #[tokio::test]
    async fn test_timed_health_check_unreachable() {
        let check = TimedHealthCheck::new("tcp", LatencyThresholds::default(), |_: &str| false);
        assert_eq!(check.check("db-1").await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_timed_health_check_panic_is_unreachable() {
        let check = TimedHealthCheck::new("tcp", LatencyThresholds::default(), |_: &str| -> bool {
            panic!("resolver crashed")
        });
        assert_eq!(check.check("db-1").await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_blocking_checks_run_in_parallel() {
        let thresholds = LatencyThresholds {
            degraded_after: Duration::from_millis(150),
            unhealthy_after: Duration::from_secs(5),
        };
        let slow = |_: &str| {
            std::thread::sleep(Duration::from_millis(300));
            true
        };
        let first = TimedHealthCheck::new("slow-a", thresholds, slow);
        let second = TimedHealthCheck::new("slow-b", thresholds, slow);

        let started = std::time::Instant::now();
        let (a, b) = futures::join!(first.check("a"), second.check("b"));

        assert_eq!(a, HealthStatus::Degraded);
        assert_eq!(b, HealthStatus::Degraded);
        // Sequential execution would take at least 600ms
        assert!(started.elapsed() < Duration::from_millis(550));
    }
}
