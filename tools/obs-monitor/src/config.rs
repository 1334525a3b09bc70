//! Monitor configuration: file sections plus command-line overrides.

use crate::cli::Cli;
use obs_bus::{BusConfig, LogLevel};
use obs_transport::{ConfigError, TransportConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of the `--config` file.
///
/// ```json
/// { "transport": { "url": "ws://dome-pc:8600/ws" }, "bus": { "maxRetries": 5 } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorConfig {
    pub transport: TransportConfig,
    pub bus: BusConfig,
}

impl MonitorConfig {
    /// Read the file if one was given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw =
                    std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
                serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply flags that take precedence over the file, then validate.
    pub fn apply(mut self, cli: &Cli) -> Result<Self, ConfigError> {
        if let Some(url) = &cli.url {
            self.transport.url.clone_from(url);
        }
        if let Some(level) = &cli.log_level {
            self.bus.log_level = level
                .parse::<LogLevel>()
                .map_err(ConfigError::Parse)?;
        }
        if let Some(retries) = cli.max_retries {
            self.bus.max_retries = retries;
        }
        if let Some(delay) = cli.retry_delay_ms {
            self.bus.retry_delay = delay;
            self.bus.max_retry_delay = self.bus.max_retry_delay.max(delay);
        }
        self.transport.validate()?;
        self.bus.validate()?;
        Ok(self)
    }
}
