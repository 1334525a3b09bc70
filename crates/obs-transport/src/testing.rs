//! In-memory transport for tests.
//!
//! State changes and inbound frames are driven by the test and delivered
//! synchronously, so every scenario is deterministic.

use crate::error::TransportError;
use crate::listeners::Listeners;
use crate::state::ConnectionState;
use crate::transport::{FrameHandler, StateHandler, Transport, UndeliveredHandler};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// One call to [`Transport::send`], successful or not.
#[derive(Debug, Clone)]
pub struct SendAttempt {
    pub frame: String,
    pub at: Instant,
    pub delivered: bool,
}

/// Scriptable [`Transport`] that records every send attempt.
pub struct FakeTransport {
    state: Mutex<ConnectionState>,
    attempts: Mutex<Vec<SendAttempt>>,
    fail_next: AtomicUsize,
    connect_calls: AtomicUsize,
    listeners: Listeners,
}

impl FakeTransport {
    /// A transport in the `Connecting` state.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnectionState::Connecting),
            attempts: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            listeners: Listeners::new(),
        })
    }

    /// A transport that is already `Open`.
    #[must_use]
    pub fn open_now() -> Arc<Self> {
        let transport = Self::new();
        *transport.state.lock() = ConnectionState::Open;
        transport
    }

    /// Move to `state` and notify listeners if it changed.
    pub fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut current = self.state.lock();
            if current.is_terminal() || *current == state {
                false
            } else {
                *current = state;
                true
            }
        };
        if changed {
            self.listeners.emit_state(state);
        }
    }

    pub fn open(&self) {
        self.set_state(ConnectionState::Open);
    }

    /// Simulate an unexpected disconnect.
    pub fn drop_connection(&self) {
        self.set_state(ConnectionState::Reconnecting);
    }

    /// Simulate a drop that strands the last `n` delivered frames in the
    /// link. They are marked undelivered and handed back once the state has
    /// left `Open`.
    pub fn drop_stranding(&self, n: usize) {
        let mut stranded: Vec<String> = {
            let mut attempts = self.attempts.lock();
            attempts
                .iter_mut()
                .rev()
                .filter(|a| a.delivered)
                .take(n)
                .map(|a| {
                    a.delivered = false;
                    a.frame.clone()
                })
                .collect()
        };
        stranded.reverse();
        self.drop_connection();
        self.listeners.emit_undelivered(&stranded);
    }

    /// Deliver a raw inbound frame.
    pub fn deliver(&self, frame: &str) {
        self.listeners.emit_frame(frame);
    }

    /// Deliver a JSON value as an inbound frame.
    pub fn deliver_json(&self, value: &serde_json::Value) {
        self.deliver(&value.to_string());
    }

    /// Make the next `n` sends fail even while open.
    pub fn fail_next_sends(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Every send attempt, in order.
    #[must_use]
    pub fn attempts(&self) -> Vec<SendAttempt> {
        self.attempts.lock().clone()
    }

    /// Frames that were actually delivered, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.attempts
            .lock()
            .iter()
            .filter(|a| a.delivered)
            .map(|a| a.frame.clone())
            .collect()
    }

    /// Delivered frames parsed as JSON.
    #[must_use]
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn connect(&self) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.lock().is_terminal() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn send(&self, frame: &str) -> Result<(), TransportError> {
        let state = *self.state.lock();
        let forced_failure = state.is_open()
            && self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        let delivered = state.is_open() && !forced_failure;

        self.attempts.lock().push(SendAttempt {
            frame: frame.to_string(),
            at: Instant::now(),
            delivered,
        });

        match state {
            ConnectionState::Open if delivered => Ok(()),
            ConnectionState::Open => Err(TransportError::Send("injected failure".into())),
            ConnectionState::Closed => Err(TransportError::Closed),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn on_message(&self, handler: FrameHandler) {
        self.listeners.add_frame_handler(handler);
    }

    fn on_state_change(&self, handler: StateHandler) {
        self.listeners.add_state_handler(handler);
    }

    fn on_undelivered(&self, handler: UndeliveredHandler) {
        self.listeners.add_undelivered_handler(handler);
    }

    fn close(&self) {
        self.set_state(ConnectionState::Closed);
    }
}
