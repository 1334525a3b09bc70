//! Error types for the message bus.

use obs_transport::TransportError;
use thiserror::Error;

/// Errors returned to bus callers.
///
/// Transport failures and validation rejections are recovered or logged
/// internally; they reach callers only through [`crate::PublishOutcome`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    /// The bus was closed.
    #[error("message bus closed")]
    Closed,

    /// The payload could not be serialized into a frame.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// A pipeline stage rejected the message.
    #[error("rejected by {stage}: {reason}")]
    Rejected { stage: String, reason: String },

    /// No reply arrived before the deadline.
    #[error("request {id} on {topic} timed out")]
    RequestTimeout { topic: String, id: String },

    /// Transport setup failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid bus configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] obs_transport::ConfigError),
}

/// A payload that does not satisfy its topic's schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{topic}: {path}: {reason}")]
pub struct SchemaViolation {
    pub topic: String,
    /// JSON-pointer style location of the offending value, `/` for the root.
    pub path: String,
    pub reason: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            topic: String::new(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn on_topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }
}

/// Error type returned by subscriber handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
