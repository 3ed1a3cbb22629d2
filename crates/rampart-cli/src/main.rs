//! Rampart CLI - operator tooling for the resilience layer
//!
//! This CLI provides:
//! - Backoff schedules for a retry policy
//! - Validation of resilience configuration files
//! - Fault drills replayed against an orchestrator built from a config

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rampart_core::{backoff, RetryConfig};

mod drill;

/// Rampart CLI application
#[derive(Parser)]
#[command(name = "rampart")]
#[command(about = "Rampart - resilience planning and fault drills", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Print the delay schedule of a retry policy
    Backoff {
        /// Total invocations, including the first
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        /// Delay before the first retry (e.g. 100ms, 1s)
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        base_delay: Duration,

        /// Upper bound on any delay
        #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
        max_delay: Duration,

        /// Multiplier applied per attempt
        #[arg(long, default_value_t = 2.0)]
        exponential_base: f64,

        /// Show the jitter band
        #[arg(long)]
        jitter: bool,
    },

    /// Validate a resilience configuration file (YAML or JSON)
    Validate {
        config: PathBuf,
    },

    /// Replay a fault drill and print the resulting dashboard
    Drill {
        config: PathBuf,

        /// Pretty-print the dashboard JSON
        #[arg(long)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Backoff {
            max_attempts,
            base_delay,
            max_delay,
            exponential_base,
            jitter,
        } => print_backoff(RetryConfig {
            max_attempts,
            base_delay,
            max_delay,
            exponential_base,
            jitter,
        }),
        Commands::Validate { config } => {
            let config = drill::load_config(&config)?;
            println!(
                "✓ Configuration is valid: {} breakers, {} retry policies, {} services",
                config.breakers.len(),
                config.retry.len(),
                config.services.len()
            );
            Ok(())
        }
        Commands::Drill { config, pretty } => {
            let file = drill::load_drill(&config)?;
            let dashboard = drill::run(&file).await?;
            let json = if pretty {
                serde_json::to_string_pretty(&dashboard)
            } else {
                serde_json::to_string(&dashboard)
            }
            .context("Failed to serialize dashboard")?;
            println!("{json}");
            Ok(())
        }
    }
}

fn print_backoff(config: RetryConfig) -> Result<()> {
    config.validate().context("Invalid retry policy")?;

    let schedule = backoff::backoff_schedule(&config);
    if schedule.is_empty() {
        println!("No retries: the operation runs once");
        return Ok(());
    }

    for (attempt, delay) in schedule.iter().enumerate() {
        if config.jitter {
            println!(
                "retry {}: {} ({} .. {})",
                attempt + 1,
                humantime::format_duration(*delay),
                humantime::format_duration(backoff::apply_jitter(*delay, 0.0)),
                humantime::format_duration(backoff::apply_jitter(*delay, 1.0)),
            );
        } else {
            println!("retry {}: {}", attempt + 1, humantime::format_duration(*delay));
        }
    }

    let total: Duration = schedule.iter().sum();
    println!("total backoff: {}", humantime::format_duration(total));
    Ok(())
}
