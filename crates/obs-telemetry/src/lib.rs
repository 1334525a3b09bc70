//! # Observatory Telemetry
//!
//! Installs the process-wide `tracing` subscriber for observatory link
//! binaries. Libraries only emit events; binaries call [`init_logging`] once.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use obs_telemetry::{init_logging, TelemetryConfig};
//!
//! let _guard = init_logging(&TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OBS_SERVICE_NAME` | `obs-monitor` | Service name attached to the startup event |
//! | `RUST_LOG` | unset | Full filter directive, wins over `OBS_LOG_LEVEL` |
//! | `OBS_LOG_LEVEL` | `info` | Log level filter |
//! | `OBS_JSON_LOGS` | `false` | Emit JSON lines instead of pretty output |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{init_logging, LoggingGuard};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("A global subscriber is already installed")]
    AlreadyInitialized,

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
}
