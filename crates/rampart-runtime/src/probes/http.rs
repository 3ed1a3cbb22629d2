//! HTTP health probe.
//!
//! Issues a GET against `{endpoint}{path}` and grades the response:
//! transport errors and 5xx are UNHEALTHY, 4xx is DEGRADED, and a 2xx/3xx
//! answer is graded by latency.

use async_trait::async_trait;
use tokio::time::Instant;

use rampart_core::HealthStatus;

use super::{HealthCheck, LatencyThresholds};

/// HTTP GET health probe.
pub struct HttpHealthCheck {
    client: reqwest::Client,
    path: String,
    thresholds: LatencyThresholds,
}

impl std::fmt::Debug for HttpHealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHealthCheck")
            .field("path", &self.path)
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

impl HttpHealthCheck {
    /// Probe `path` on each endpoint (e.g. "/healthz").
    pub fn new(path: impl Into<String>, thresholds: LatencyThresholds) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(thresholds.unhealthy_after)
            .build()?;

        Ok(Self {
            client,
            path: path.into(),
            thresholds,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, endpoint: &str) -> HealthStatus {
        let url = self.url(endpoint);
        let started = Instant::now();

        match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() {
                    HealthStatus::Unhealthy
                } else if status.is_client_error() {
                    HealthStatus::Degraded
                } else {
                    self.thresholds.classify(true, started.elapsed())
                }
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Health probe failed");
                HealthStatus::Unhealthy
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let check = HttpHealthCheck::new("/healthz", LatencyThresholds::default()).unwrap();

        assert_eq!(check.url("http://db-1:8080/"), "http://db-1:8080/healthz");
        assert_eq!(check.url("http://db-1:8080"), "http://db-1:8080/healthz");
    }
}
