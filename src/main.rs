//! pmtud - relay ICMP packet-too-big messages to anycast backends.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pmtud::config::{Config, DEFAULT_CONFIG_PATH};
use pmtud::{capture, metrics, RelayManager};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pmtud")]
#[command(about = "Relay PMTUD packet-too-big messages to anycast backends")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// List available network interfaces and exit
    #[arg(long)]
    list_interfaces: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_interfaces {
        println!("Available network interfaces:");
        for iface in capture::list_interfaces() {
            println!("  {}", iface);
        }
        return Ok(());
    }

    let config = Config::load(&cli.config)
        .with_context(|| format!("unable to load configuration from {}", cli.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log_level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!(config = %cli.config.display(), "starting pmtud");

    let mut manager = RelayManager::start(&config.interfaces, config.backends().clone())
        .context("unable to start relays")?;

    let shutdown = Arc::new(Notify::new());
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
            }
        }

        // notify_one stores a permit if nobody is waiting yet.
        shutdown_clone.notify_one();
    });

    let served = if config.metrics.enabled {
        let registry = metrics::registry(manager.stats())?;
        let shutdown = shutdown.clone();
        metrics::serve(config.metrics.listen, registry, async move {
            shutdown.notified().await;
        })
        .await
        .context("metrics server failed")
    } else {
        shutdown.notified().await;
        Ok(())
    };

    manager.stop();
    tokio::task::spawn_blocking(move || manager.wait_for_stop())
        .await
        .context("relay shutdown task failed")?;

    tracing::info!("pmtud stopped");
    served
}
