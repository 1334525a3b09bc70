//! The transport port consumed by the message bus.

use crate::error::TransportError;
use crate::state::ConnectionState;
use std::sync::Arc;
use tokio::sync::watch;

/// Callback for inbound text frames.
pub type FrameHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback for connection state changes.
pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Callback for frames that `send` accepted but the link never wrote,
/// oldest first.
pub type UndeliveredHandler = Arc<dyn Fn(&[String]) + Send + Sync>;

/// A duplex, text-framed connection to one fixed endpoint.
///
/// Implementations report connection failures only through
/// [`Transport::on_state_change`]; nothing here blocks the caller.
pub trait Transport: Send + Sync {
    /// Start connecting. Calling again after the first call is a no-op.
    fn connect(&self) -> Result<(), TransportError>;

    /// Send one text frame.
    ///
    /// Fails fast with [`TransportError::NotConnected`] unless the state is
    /// `Open`. Frames are never buffered across reconnects: a frame accepted
    /// here that the link could not write before it ended is handed back
    /// through [`Transport::on_undelivered`].
    fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Register a handler for inbound frames.
    fn on_message(&self, handler: FrameHandler);

    /// Register a handler for state transitions.
    fn on_state_change(&self, handler: StateHandler);

    /// Register a handler for accepted frames that were never written.
    ///
    /// Called after the state has left `Open`, never while closing.
    fn on_undelivered(&self, handler: UndeliveredHandler);

    /// Becomes `true` once every frame accepted before `close` has been
    /// written or given up on and no background work remains.
    fn stopped(&self) -> watch::Receiver<bool> {
        watch::channel(true).1
    }

    /// Shut down and suppress any further reconnect attempts.
    fn close(&self);
}
