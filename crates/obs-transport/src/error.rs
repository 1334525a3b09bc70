//! Transport error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors surfaced synchronously by the transport.
///
/// Connection loss is never reported through this type; it is observed
/// through state-change callbacks instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// `send` was called while the connection is not `Open`.
    #[error("Transport is not connected")]
    NotConnected,

    /// The transport was closed and will not reconnect.
    #[error("Transport closed")]
    Closed,

    /// A dial attempt failed.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Writing a frame to the socket failed.
    #[error("Send failed: {0}")]
    Send(String),

    /// The transport configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// `connect` was called outside a Tokio runtime.
    #[error("No async runtime available to drive the connection")]
    NoRuntime,
}
