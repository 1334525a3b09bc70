//! obs-monitor: operator console for the observatory message bus.
//!
//! Data goes to stdout as JSON lines; logs go to stderr.

mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use obs_bus::MessageBus;
use obs_telemetry::{init_logging, TelemetryConfig};
use std::io::Write;
use std::time::Duration;
use tracing::{error, info, warn};

use cli::{Cli, Commands};
use commands::Delivery;
use config::MonitorConfig;

/// Upper bound on writing out frames the link already accepted.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env().with_service_name("obs-monitor");
    if let Some(level) = &cli.log_level {
        telemetry = telemetry.with_log_level(level.to_ascii_lowercase());
    }
    let _guard = init_logging(&telemetry)?;

    let config = MonitorConfig::load(cli.config.as_deref())
        .and_then(|config| config.apply(&cli))
        .context("invalid configuration")?;
    info!(url = %config.transport.url, "Connecting");

    let bus = MessageBus::connect(config.transport, config.bus)?;
    let result = run(&bus, &cli.command).await;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, bus.shutdown()).await.is_err() {
        warn!(
            timeout_ms = SHUTDOWN_TIMEOUT.as_millis() as u64,
            "Transport did not stop in time"
        );
    }

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

async fn run(bus: &MessageBus, command: &Commands) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match command {
        Commands::Watch(args) => {
            let printed = commands::watch(bus, args, &mut stdout, shutdown_signal()).await?;
            info!(printed, "Watch finished");
        }
        Commands::Publish(args) => {
            let delivery = commands::publish(bus, args).await?;
            if delivery == Delivery::Dropped {
                anyhow::bail!("{} was not delivered", args.topic);
            }
            info!(topic = %args.topic, ?delivery, "Published");
        }
        Commands::SyncLocation(args) => {
            let reply = tokio::select! {
                reply = commands::sync_location(bus, args) => reply?,
                () = shutdown_signal() => return Ok(()),
            };
            writeln!(stdout, "{}", serde_json::to_string(&reply)?)?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler; run until the bus closes.
        std::future::pending::<()>().await;
    }
}
