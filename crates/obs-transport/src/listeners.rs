//! Callback registry shared by transport implementations.

use crate::state::ConnectionState;
use crate::transport::{FrameHandler, StateHandler, UndeliveredHandler};
use parking_lot::RwLock;

/// Registered frame, state and undelivered-frame callbacks.
///
/// Callbacks are invoked on a snapshot taken outside the lock, so a callback
/// may register further callbacks or call back into the transport.
#[derive(Default)]
pub struct Listeners {
    frames: RwLock<Vec<FrameHandler>>,
    states: RwLock<Vec<StateHandler>>,
    undelivered: RwLock<Vec<UndeliveredHandler>>,
}

impl Listeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frame_handler(&self, handler: FrameHandler) {
        self.frames.write().push(handler);
    }

    pub fn add_state_handler(&self, handler: StateHandler) {
        self.states.write().push(handler);
    }

    pub fn add_undelivered_handler(&self, handler: UndeliveredHandler) {
        self.undelivered.write().push(handler);
    }

    /// Deliver one inbound frame to every frame handler.
    pub fn emit_frame(&self, frame: &str) {
        let handlers = self.frames.read().clone();
        for handler in handlers {
            handler(frame);
        }
    }

    /// Broadcast a state change to every state handler.
    pub fn emit_state(&self, state: ConnectionState) {
        let handlers = self.states.read().clone();
        for handler in handlers {
            handler(state);
        }
    }

    /// Hand frames the link never wrote back to their owners. Empty batches
    /// are not reported.
    pub fn emit_undelivered(&self, frames: &[String]) {
        if frames.is_empty() {
            return;
        }
        let handlers = self.undelivered.read().clone();
        for handler in handlers {
            handler(frames);
        }
    }

    #[must_use]
    pub fn frame_handler_count(&self) -> usize {
        self.frames.read().len()
    }

    #[must_use]
    pub fn state_handler_count(&self) -> usize {
        self.states.read().len()
    }
}
