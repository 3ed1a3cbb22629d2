//! Fault drills.
//!
//! A drill file is a resilience configuration with an extra `drill`
//! section: healing rules with scripted outcomes and a list of steps
//! replayed in order against an orchestrator built from the config.

use anyhow::{bail, Context as _, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rampart_core::{CircuitBreakerConfig, Context, HealthStatus, ResilienceConfig};
use rampart_runtime::{Dashboard, FnHealthCheck, ResilienceOrchestrator};

/// Configuration plus the drill to replay.
#[derive(Debug, Deserialize)]
pub struct DrillFile {
    #[serde(flatten)]
    pub config: ResilienceConfig,

    #[serde(default)]
    pub drill: Drill,
}

#[derive(Debug, Default, Deserialize)]
pub struct Drill {
    #[serde(default)]
    pub healing_rules: Vec<HealingRuleSpec>,

    #[serde(default)]
    pub steps: Vec<DrillStep>,
}

/// Healing rule whose action always reports `succeeds`.
#[derive(Debug, Deserialize)]
pub struct HealingRuleSpec {
    pub pattern: String,

    #[serde(default)]
    pub succeeds: bool,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Cooldown, e.g. "30s"
    #[serde(default)]
    pub cooldown: Option<String>,
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Fail,
}

/// One drill action.
#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum DrillStep {
    /// Run calls with scripted outcomes through a breaker
    Breaker { name: String, outcomes: Vec<Outcome> },

    /// Report an error to the orchestrator
    Error {
        service: String,
        message: String,
        #[serde(default = "default_error_type")]
        error_type: String,
    },

    /// Force a failover, optionally to a named endpoint
    Failover {
        service: String,
        #[serde(default)]
        target: Option<String>,
    },

    /// Clear a service's failed endpoints
    ResetFailed { service: String },

    /// Probe every service, treating the listed endpoints as unhealthy
    HealthCheck {
        #[serde(default)]
        unhealthy: Vec<String>,
    },

    /// Let time pass, e.g. "1500ms"
    Wait { duration: String },
}

fn default_error_type() -> String {
    "DrillError".to_string()
}

fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("Invalid duration '{value}'"))
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn parse<T: serde::de::DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(content).with_context(|| format!("Invalid JSON in {}", path.display()))
    } else {
        serde_yaml::from_str(content).with_context(|| format!("Invalid YAML in {}", path.display()))
    }
}

/// Load and validate a resilience configuration.
pub fn load_config(path: &Path) -> Result<ResilienceConfig> {
    let config: ResilienceConfig = parse(path, &read(path)?)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Load a drill file.
pub fn load_drill(path: &Path) -> Result<DrillFile> {
    parse(path, &read(path)?)
}

/// Replay a drill and return the final dashboard.
pub async fn run(file: &DrillFile) -> Result<Dashboard> {
    let orchestrator = ResilienceOrchestrator::from_config(&file.config)
        .context("Failed to build orchestrator")?;

    for rule in &file.drill.healing_rules {
        let cooldown = match &rule.cooldown {
            Some(value) => parse_duration(value)?,
            None => Duration::ZERO,
        };
        let succeeds = rule.succeeds;
        orchestrator.healing().register_rule(
            rule.pattern.clone(),
            move |_: &str, _: &Context| succeeds,
            rule.max_attempts,
            cooldown,
        );
    }

    for (index, step) in file.drill.steps.iter().enumerate() {
        tracing::debug!(step = index + 1, action = ?step, "Running drill step");
        run_step(&orchestrator, &file.config, step)
            .await
            .with_context(|| format!("Drill step {} failed", index + 1))?;
    }

    Ok(orchestrator.get_dashboard())
}

async fn run_step(
    orchestrator: &ResilienceOrchestrator,
    config: &ResilienceConfig,
    step: &DrillStep,
) -> Result<()> {
    match step {
        DrillStep::Breaker { name, outcomes } => {
            let breaker_config = config.breakers.get(name).cloned().unwrap_or_else(|| {
                tracing::debug!(breaker = %name, "Breaker not configured, using defaults");
                CircuitBreakerConfig::default()
            });
            let breaker = orchestrator.circuit_breaker(name, breaker_config);

            for outcome in outcomes {
                let result = breaker.call(|| match outcome {
                    Outcome::Ok => Ok(()),
                    Outcome::Fail => Err("drill failure"),
                });
                match result {
                    Ok(()) => tracing::info!(breaker = %name, state = %breaker.state(), "Call succeeded"),
                    Err(e) => tracing::info!(breaker = %name, state = %breaker.state(), error = %e, "Call failed"),
                }
            }
        }
        DrillStep::Error {
            service,
            message,
            error_type,
        } => {
            let outcome = orchestrator.record_error(service, error_type, message, Context::new());
            tracing::info!(
                service = %service,
                severity = %outcome.severity,
                healed = outcome.healed,
                failed_over = outcome.failed_over,
                "Error handled"
            );
        }
        DrillStep::Failover { service, target } => {
            let switched = orchestrator
                .failover()
                .force_failover(service, target.as_deref())?;
            if !switched {
                tracing::warn!(service = %service, "Forced failover left the active endpoint unchanged");
            }
        }
        DrillStep::ResetFailed { service } => {
            orchestrator.failover().reset_failed_endpoints(service)?;
        }
        DrillStep::HealthCheck { unhealthy } => {
            let unhealthy = Arc::new(unhealthy.clone());
            for service in orchestrator.failover().services() {
                let unhealthy = Arc::clone(&unhealthy);
                let check = FnHealthCheck::new("drill", move |endpoint: &str| {
                    if unhealthy.iter().any(|e| e == endpoint) {
                        HealthStatus::Unhealthy
                    } else {
                        HealthStatus::Healthy
                    }
                });
                orchestrator
                    .failover()
                    .register_health_check(&service, Arc::new(check))?;
            }

            for (service, status) in orchestrator.failover().health_check_all().await {
                tracing::info!(service = %service, status = %status, "Health check");
            }
        }
        DrillStep::Wait { duration } => {
            let duration = parse_duration(duration)?;
            if duration > Duration::from_secs(300) {
                bail!("Wait of {} exceeds the 5m drill limit", humantime::format_duration(duration));
            }
            tokio::time::sleep(duration).await;
        }
    }

    Ok(())
}
