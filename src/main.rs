use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::guard::RateLimitGuard;
use turnstile::ratelimit::{PartitionStore, Sweeper};
use turnstile::simulate::{SimulationOptions, Simulator};

#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about = "Partition-keyed rate limiting core")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and print the effective policies and routes
    CheckConfig,
    /// Drive synthetic traffic through the configured routes
    Simulate {
        /// Number of concurrent clients
        #[arg(long, default_value_t = 8)]
        clients: usize,
        /// Requests sent by each client
        #[arg(long, default_value_t = 25)]
        requests: usize,
        /// Distinct source addresses shared by the clients
        #[arg(long, default_value_t = 2)]
        addresses: usize,
        /// Maximum time a handler holds a concurrency lease
        #[arg(long, default_value_t = 200)]
        max_hold_ms: u64,
        /// Maximum pause between two requests of one client
        #[arg(long, default_value_t = 50)]
        max_think_ms: u64,
        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => TurnstileConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => {
            let config = TurnstileConfig::default();
            config.validate()?;
            config
        }
    };
    info!(
        policies = config.policies.len(),
        routes = config.guard.routes.len(),
        "Configuration loaded"
    );

    let store = Arc::new(PartitionStore::from_config(&config)?);
    let guard = Arc::new(RateLimitGuard::from_config(store.clone(), &config.guard)?);

    match cli.command {
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Simulate {
            clients,
            requests,
            addresses,
            max_hold_ms,
            max_think_ms,
            seed,
        } => {
            let options = SimulationOptions {
                clients,
                requests_per_client: requests,
                addresses,
                max_hold: Duration::from_millis(max_hold_ms),
                max_think: Duration::from_millis(max_think_ms),
                seed,
            };
            let simulator = Simulator::new(guard, config.guard.routes.clone(), options)?;
            let sweeper = Sweeper::spawn(store.clone(), config.partitions.sweep_interval())?;

            // Run the simulation, stopping early on Ctrl+C
            tokio::select! {
                report = simulator.run() => {
                    println!("{}", serde_json::to_string_pretty(&report?)?);
                }
                signal = shutdown_signal() => {
                    warn!(signal = ?signal, "Simulation interrupted");
                }
            }

            sweeper.shutdown().await;
        }
    }

    info!("Turnstile stopped");
    Ok(())
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Which signal ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires, so the
/// other one still works.
async fn shutdown_signal() -> ShutdownSignal {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    first_signal(interrupt, terminate).await
}

async fn first_signal<I, T>(interrupt: I, terminate: T) -> ShutdownSignal
where
    I: std::future::Future<Output = ()>,
    T: std::future::Future<Output = ()>,
{
    let signal = tokio::select! {
        _ = interrupt => ShutdownSignal::Interrupt,
        _ = terminate => ShutdownSignal::Terminate,
    };
    info!(signal = ?signal, "Shutdown signal received, stopping simulation");
    signal
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::{pending, ready};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_interrupt_wins() {
        let signal = first_signal(ready(()), pending::<()>()).await;
        assert_eq!(signal, ShutdownSignal::Interrupt);
    }

    #[tokio::test]
    async fn test_terminate_wins() {
        let (tx, rx) = oneshot::channel::<()>();
        let terminate = async {
            let _ = rx.await;
        };
        tx.send(()).unwrap();
        let signal = first_signal(pending::<()>(), terminate).await;
        assert_eq!(signal, ShutdownSignal::Terminate);
    }

    #[test]
    fn test_cli_parses_simulate_flags() {
        let cli = Cli::parse_from([
            "turnstile",
            "--log-format",
            "json",
            "simulate",
            "--clients",
            "3",
            "--seed",
            "42",
        ]);
        assert!(matches!(cli.log_format, LogFormat::Json));
        match cli.command {
            Command::Simulate { clients, seed, requests, .. } => {
                assert_eq!(clients, 3);
                assert_eq!(seed, Some(42));
                assert_eq!(requests, 25);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
