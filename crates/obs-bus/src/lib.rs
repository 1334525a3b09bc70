//! # Observatory Message Bus
//!
//! Topic-addressed publish/subscribe between dashboard device stores and the
//! device-control server, layered over an [`obs_transport::Transport`].
//!
//! ## Data Flow
//!
//! ```text
//! publish(topic, payload)
//!   -> outbound pipeline (schema validation, logging, custom stages)
//!   -> transport.send ──fail──> retry queue ──backoff / on Open──> transport.send
//!
//! transport frame
//!   -> parse -> replay guard -> inbound pipeline -> pending requests
//!   -> subscribers (registration order, isolated faults)
//! ```
//!
//! ## Guarantees
//!
//! - A handler subscribed before a dispatch pass starts sees the message once.
//!   Handlers added or removed during a pass do not change that pass.
//! - A payload that fails its schema never reaches the transport or a
//!   subscriber.
//! - With `maxRetries = N`, a message gets at most `N + 1` send attempts
//!   before it is dropped and logged at ERROR.
//! - Messages queued during an outage are flushed in enqueue order when the
//!   connection reopens.
//!
//! ## Example
//!
//! ```no_run
//! use obs_bus::{BusConfig, MessageBus};
//! use obs_transport::TransportConfig;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), obs_bus::BusError> {
//! let bus = MessageBus::connect(
//!     TransportConfig::for_url("ws://localhost:8600/ws"),
//!     BusConfig::default(),
//! )?;
//!
//! let _status = bus.subscribe("focuser/status", |message| {
//!     println!("focuser at {}", message.payload["position"]);
//!     Ok(())
//! });
//! bus.publish(
//!     "focuser/setting",
//!     json!({"setting": "targetPosition", "value": 15000}),
//! )?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod middleware;
pub mod outbound;
pub mod pending;
pub mod replay_guard;
pub mod schema;
pub mod stats;
pub mod subscriber;

/// In-memory transport for tests of code built on the bus.
#[cfg(feature = "test-support")]
pub use obs_transport::testing;

pub use bus::{MessageBus, MessageBusBuilder, PublishOutcome};
pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource, Timestamp};
pub use config::BusConfig;
pub use error::{BusError, HandlerError, SchemaViolation};
pub use log::{LevelFilter, LogLevel, LogRecord, LogSink, MemorySink, TracingSink};
pub use message::{Envelope, Message, MessageId, TypedTopic};
pub use middleware::{
    ClientTimestamp, Direction, FnMiddleware, LoggingMiddleware, Middleware, PipelineContext,
    SchemaValidation, Verdict,
};
pub use schema::{FieldKind, ObjectSchema, Schema, SchemaRegistry, TypedSchema};
pub use stats::BusStatsSnapshot;
pub use subscriber::{MessageStream, Subscription, SubscriptionHandle, SubscriptionId};

pub use obs_transport::ConnectionState;
