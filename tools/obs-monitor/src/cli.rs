//! Command-line interface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Observatory bus monitor
///
/// Connects to the device-control server and watches topics, publishes
/// commands or runs a location sync.
#[derive(Parser, Debug)]
#[command(name = "obs-monitor", author, version, about, long_about = None)]
pub struct Cli {
    /// Device-control server endpoint
    #[arg(long, env = "OBS_URL", global = true)]
    pub url: Option<String>,

    /// JSON configuration file with `transport` and `bus` sections
    #[arg(short, long, env = "OBS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (DEBUG, INFO, WARN, ERROR)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Retries after the first failed send
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Base retry backoff in milliseconds
    #[arg(long, global = true)]
    pub retry_delay_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print every validated message on the given topics as JSON lines
    Watch(WatchArgs),

    /// Publish one message and wait until it is sent or dropped
    Publish(PublishArgs),

    /// Ask the server to sync the site location and print the reply
    #[command(name = "sync-location")]
    SyncLocation(SyncLocationArgs),
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Topics to subscribe to
    #[arg(required = true)]
    pub topics: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    pub topic: String,

    /// Payload as a JSON document
    pub payload: String,

    /// Correlation id
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SyncLocationArgs {
    #[arg(long, allow_hyphen_values = true)]
    pub latitude: f64,

    #[arg(long, allow_hyphen_values = true)]
    pub longitude: f64,

    /// How long to wait for the reply
    #[arg(long, default_value = "5000")]
    pub timeout_ms: u64,
}
