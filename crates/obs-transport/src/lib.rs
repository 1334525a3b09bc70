//! # Observatory Transport - Duplex Link to the Device-Control Server
//!
//! Owns exactly one logical connection to a fixed endpoint and hides physical
//! reconnects behind a stable API.
//!
//! ## Connection State Machine
//!
//! ```text
//!                 connected                 dropped / heartbeat timeout
//!  ┌────────────┐ ────────► ┌──────────┐ ──────────────────────► ┌──────────────┐
//!  │ CONNECTING │           │   OPEN   │                         │ RECONNECTING │
//!  └────────────┘           └──────────┘ ◄────────────────────── └──────────────┘
//!        │                        │             connected           │    ▲
//!        │ connect failed         │                                 └────┘
//!        └────────────────────────┼──────────────────────────►  connect failed
//!                                 │                             (backoff grows)
//!                 close() from any state
//!                                 ▼
//!                           ┌──────────┐
//!                           │  CLOSED  │ (terminal)
//!                           └──────────┘
//! ```
//!
//! ## Rules
//!
//! - `send` fails fast with [`TransportError::NotConnected`] unless the state
//!   is `Open`. This layer never buffers; the message bus above owns retries.
//! - A frame accepted by `send` but never written because the link ended is
//!   handed back through `on_undelivered` so the bus can queue it again.
//! - Connection failures are reported only through state-change callbacks.
//! - A heartbeat ping without a pong inside the timeout is treated exactly
//!   like a hard close.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod backoff;
pub mod config;
pub mod error;
pub mod listeners;
pub mod state;
pub mod transport;
pub mod websocket;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use backoff::Backoff;
pub use config::{ConfigError, TransportConfig};
pub use error::TransportError;
pub use listeners::Listeners;
pub use state::{
    ConnectionEvent, ConnectionState, ConnectionStateMachine, Transition, TransitionAction,
};
pub use transport::{FrameHandler, StateHandler, Transport, UndeliveredHandler};
pub use websocket::WebSocketTransport;
