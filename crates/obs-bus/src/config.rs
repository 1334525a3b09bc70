//! Bus configuration.

use crate::log::LogLevel;
use obs_transport::{Backoff, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Construction options for [`crate::MessageBus`].
///
/// Keys are camelCase; durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BusConfig {
    /// Verbosity of the logging stage and the sink
    pub log_level: LogLevel,
    /// Retries after the initial send attempt
    pub max_retries: u32,
    /// Base retry backoff
    pub retry_delay: u64,
    /// Retry backoff ceiling
    pub max_retry_delay: u64,
    /// How long an inbound (topic, id) pair is remembered
    pub replay_window: u64,
    /// Reject topics with no registered schema
    pub strict_schemas: bool,
    /// Consecutive faults before a subscriber is reported at ERROR
    pub fault_threshold: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            max_retries: 3,
            retry_delay: 1_000,
            max_retry_delay: 30_000,
            replay_window: 60_000,
            strict_schemas: false,
            fault_threshold: 3,
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_delay == 0 {
            return Err(ConfigError::InvalidRetryDelay(
                "retryDelay cannot be 0".into(),
            ));
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(ConfigError::InvalidBackoff(
                "maxRetryDelay must be >= retryDelay".into(),
            ));
        }
        if self.fault_threshold == 0 {
            return Err(ConfigError::InvalidFaultThreshold(
                "faultThreshold must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json_str(&raw)
    }

    /// Backoff curve for outbound retries.
    pub fn retry_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry_delay),
            Duration::from_millis(self.max_retry_delay),
        )
    }

    pub fn replay_window(&self) -> Duration {
        Duration::from_millis(self.replay_window)
    }
}
