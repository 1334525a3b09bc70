//! Transport configuration with validation.

use crate::backoff::Backoff;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors shared by the transport and the bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid retry delay: {0}")]
    InvalidRetryDelay(String),

    #[error("Invalid backoff: {0}")]
    InvalidBackoff(String),

    #[error("Invalid heartbeat: {0}")]
    InvalidHeartbeat(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid fault threshold: {0}")]
    InvalidFaultThreshold(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration: {0}")]
    Io(String),
}

/// Transport configuration.
///
/// Keys are camelCase on the wire; all durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportConfig {
    /// Server endpoint (ws:// or wss://)
    pub url: String,
    /// First reconnect delay
    pub reconnect_delay: u64,
    /// Reconnect delay ceiling
    pub max_reconnect_delay: u64,
    /// Give up after this many consecutive failed dials (None = never)
    pub max_reconnect_attempts: Option<u32>,
    /// Interval between heartbeat pings
    pub heartbeat_interval: u64,
    /// How long to wait for a pong before declaring the link dead
    pub heartbeat_timeout: u64,
    /// Dial timeout
    pub connect_timeout: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8600/ws".to_string(),
            reconnect_delay: 1_000,
            max_reconnect_delay: 30_000,
            max_reconnect_attempts: None,
            heartbeat_interval: 15_000,
            heartbeat_timeout: 10_000,
            connect_timeout: 10_000,
        }
    }
}

impl TransportConfig {
    /// Configuration for an endpoint with default timings.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::InvalidEndpoint(format!(
                "{} is not a ws:// or wss:// URL",
                self.url
            )));
        }

        if self.reconnect_delay == 0 {
            return Err(ConfigError::InvalidBackoff(
                "reconnectDelay cannot be 0".into(),
            ));
        }

        if self.max_reconnect_delay < self.reconnect_delay {
            return Err(ConfigError::InvalidBackoff(
                "maxReconnectDelay must be >= reconnectDelay".into(),
            ));
        }

        if self.heartbeat_interval == 0 || self.heartbeat_timeout == 0 {
            return Err(ConfigError::InvalidHeartbeat(
                "heartbeatInterval and heartbeatTimeout must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Parse from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json_str(&raw)
    }

    pub fn reconnect_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_delay),
            Duration::from_millis(self.max_reconnect_delay),
        )
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }
}
