//! Connection state machine.
//!
//! The machine is a plain value with a pure transition function. It performs
//! no I/O and owns no timers: each [`Transition`] names the action the driver
//! must take next (dial, sleep then redial, shut down). Reconnect attempt
//! counting and backoff selection live here and nowhere else.

use crate::backoff::Backoff;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Connection state, one instance per transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    /// First dial in progress (or not yet started)
    Connecting,
    /// Link is up; frames may be sent
    Open,
    /// Link was lost or a dial failed; waiting to redial
    Reconnecting,
    /// Shut down by `close()`; terminal
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// `connect()` was called
    ConnectRequested,
    /// A dial completed
    Connected,
    /// A dial failed or timed out
    ConnectFailed,
    /// The open link closed or errored
    Dropped,
    /// No pong arrived within the heartbeat timeout
    HeartbeatTimedOut,
    /// `close()` was called
    CloseRequested,
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    /// Nothing to do
    None,
    /// Start the first dial
    Dial,
    /// Sleep for the delay, then dial again
    ScheduleReconnect(Duration),
    /// Reconnect budget exhausted; the machine is now closed
    GiveUp,
    /// Tear the connection down
    Shutdown,
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub action: TransitionAction,
}

impl Transition {
    /// Whether the state actually changed (and must be broadcast).
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Explicit finite-state object behind every transport.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    attempt: u32,
    started: bool,
    backoff: Backoff,
    max_attempts: Option<u32>,
}

impl ConnectionStateMachine {
    #[must_use]
    pub fn new(backoff: Backoff, max_attempts: Option<u32>) -> Self {
        Self {
            state: ConnectionState::Connecting,
            attempt: 0,
            started: false,
            backoff,
            max_attempts,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Apply an event and return the resulting transition.
    ///
    /// Events that make no sense in the current state leave it unchanged and
    /// yield [`TransitionAction::None`]. Nothing leaves `Closed`.
    pub fn apply(&mut self, event: ConnectionEvent) -> Transition {
        let from = self.state;
        let action = match (from, event) {
            (ConnectionState::Closed, _) => TransitionAction::None,

            (_, ConnectionEvent::CloseRequested) => {
                self.state = ConnectionState::Closed;
                TransitionAction::Shutdown
            }

            (ConnectionState::Connecting, ConnectionEvent::ConnectRequested) if !self.started => {
                self.started = true;
                TransitionAction::Dial
            }

            (
                ConnectionState::Connecting | ConnectionState::Reconnecting,
                ConnectionEvent::Connected,
            ) => {
                self.state = ConnectionState::Open;
                self.attempt = 0;
                TransitionAction::None
            }

            (
                ConnectionState::Connecting | ConnectionState::Reconnecting,
                ConnectionEvent::ConnectFailed,
            )
            | (
                ConnectionState::Open,
                ConnectionEvent::Dropped | ConnectionEvent::HeartbeatTimedOut,
            ) => self.schedule_reconnect(),

            _ => TransitionAction::None,
        };

        Transition {
            from,
            to: self.state,
            action,
        }
    }

    fn schedule_reconnect(&mut self) -> TransitionAction {
        self.attempt = self.attempt.saturating_add(1);
        if let Some(max) = self.max_attempts {
            if self.attempt > max {
                self.state = ConnectionState::Closed;
                return TransitionAction::GiveUp;
            }
        }
        self.state = ConnectionState::Reconnecting;
        TransitionAction::ScheduleReconnect(self.backoff.delay(self.attempt))
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(Backoff::default(), None)
    }
}
