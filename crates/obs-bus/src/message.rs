//! # Bus Messages
//!
//! Wire frame: `{"topic": .., "payload": .., "timestamp": .., "id"?: ..}` sent
//! as a text frame. `payload` is opaque to the bus; its meaning belongs to
//! the topic's schema. `id` correlates a request with its asynchronous reply.

use crate::error::BusError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

/// Correlation identifier carried in `id`.
pub type MessageId = String;

/// One message crossing the bus in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque topic key; the bus only compares it for equality.
    pub topic: String,
    /// Topic-defined payload.
    #[serde(default)]
    pub payload: Value,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
    /// Correlation id for request/response exchanges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Value, timestamp: u64) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp,
            id: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Option<MessageId>) -> Self {
        self.id = id;
        self
    }

    /// Serialize to a wire frame.
    pub fn encode(&self) -> Result<String, BusError> {
        serde_json::to_string(self).map_err(|e| BusError::Encode(e.to_string()))
    }

    /// Parse a wire frame.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Deserialize the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}#{} {}", self.topic, id, self.payload),
            None => write!(f, "{} {}", self.topic, self.payload),
        }
    }
}

/// A topic name bound to its payload type.
///
/// ```
/// use obs_bus::TypedTopic;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct FocuserStatus { position: i64, moving: bool }
///
/// const FOCUSER_STATUS: TypedTopic<FocuserStatus> = TypedTopic::new("focuser/status");
/// assert_eq!(FOCUSER_STATUS.name(), "focuser/status");
/// ```
pub struct TypedTopic<T> {
    name: Cow<'static, str>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> TypedTopic<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _payload: PhantomData,
        }
    }

    pub fn owned(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for TypedTopic<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedTopic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedTopic").field(&self.name).finish()
    }
}

/// A validated message with its payload already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub topic: String,
    pub payload: T,
    pub timestamp: u64,
    pub id: Option<MessageId>,
}

impl<T: DeserializeOwned> TryFrom<&Message> for Envelope<T> {
    type Error = serde_json::Error;

    fn try_from(message: &Message) -> Result<Self, Self::Error> {
        Ok(Self {
            topic: message.topic.clone(),
            payload: message.payload_as()?,
            timestamp: message.timestamp,
            id: message.id.clone(),
        })
    }
}
