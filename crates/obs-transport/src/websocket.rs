//! WebSocket transport with reconnect backoff and heartbeat.
//!
//! One background task owns the socket. It dials, serves the open link
//! (writes queued frames, reads inbound frames, pings on an interval) and
//! feeds every outcome through the [`ConnectionStateMachine`], which decides
//! whether to redial and after how long.
//!
//! Frames accepted by `send` wait in an in-process channel until the task
//! writes them. When a link drops, the frame whose write failed and whatever
//! is still in the channel go back to the `on_undelivered` listeners once
//! the state has left `Open`. On `close` the task writes the remainder before
//! the close frame and then reports itself stopped.

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::listeners::Listeners;
use crate::state::{
    ConnectionEvent, ConnectionState, ConnectionStateMachine, Transition, TransitionAction,
};
use crate::transport::{FrameHandler, StateHandler, Transport, UndeliveredHandler};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

/// WebSocket implementation of [`Transport`].
///
/// Dropping the transport closes it.
pub struct WebSocketTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    machine: Mutex<ConnectionStateMachine>,
    /// Held from applying an event until its state is broadcast, so
    /// listeners observe transitions in the order they were applied.
    /// Reentrant because a state listener may call `close`.
    emit_lock: ReentrantMutex<()>,
    /// Write half of the current link; `None` whenever the state is not `Open`.
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    listeners: Listeners,
    shutdown_tx: watch::Sender<bool>,
    /// `true` while no connection task is running.
    stopped_tx: watch::Sender<bool>,
}

/// How one connection ended.
struct Ended {
    event: ConnectionEvent,
    /// Accepted frames that were never written, oldest first.
    undelivered: Vec<String>,
}

impl Ended {
    fn new(event: ConnectionEvent) -> Self {
        Self {
            event,
            undelivered: Vec::new(),
        }
    }
}

impl WebSocketTransport {
    /// Create a transport for the configured endpoint. Does not dial.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let machine = ConnectionStateMachine::new(
            config.reconnect_backoff(),
            config.max_reconnect_attempts,
        );
        let (shutdown_tx, _) = watch::channel(false);
        let (stopped_tx, _) = watch::channel(true);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                machine: Mutex::new(machine),
                emit_lock: ReentrantMutex::new(()),
                writer: Mutex::new(None),
                listeners: Listeners::new(),
                shutdown_tx,
                stopped_tx,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Consecutive failed attempts since the link was last open.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.machine.lock().attempt()
    }
}

impl Inner {
    /// Apply an event and broadcast the new state if it changed.
    fn transition(&self, event: ConnectionEvent) -> Transition {
        let _ordered = self.emit_lock.lock();
        let transition = self.machine.lock().apply(event);
        if transition.changed() {
            info!(
                url = %self.config.url,
                from = %transition.from,
                to = %transition.to,
                event = ?event,
                "Connection state changed"
            );
            self.listeners.emit_state(transition.to);
        }
        transition
    }

    fn hand_back(&self, frames: &[String]) {
        if frames.is_empty() {
            return;
        }
        warn!(
            url = %self.config.url,
            count = frames.len(),
            "Returning frames the link never wrote"
        );
        self.listeners.emit_undelivered(frames);
    }

    /// Dial, serve, and redial until closed or the reconnect budget runs out.
    async fn connection_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let Ended { event, undelivered } = self.run_connection(&mut shutdown).await;
            if event == ConnectionEvent::CloseRequested {
                // Only frames the closing link failed to write; the owner is
                // shutting down and decides whether they matter.
                self.hand_back(&undelivered);
                break;
            }

            // Leave Open first so nothing handed back is sent into a dead link.
            let transition = self.transition(event);
            self.hand_back(&undelivered);
            match transition.action {
                TransitionAction::ScheduleReconnect(delay) => {
                    debug!(
                        url = %self.config.url,
                        delay_ms = delay.as_millis() as u64,
                        attempt = self.machine.lock().attempt(),
                        "Scheduling reconnect"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                TransitionAction::GiveUp => {
                    warn!(
                        url = %self.config.url,
                        max_attempts = ?self.config.max_reconnect_attempts,
                        "Reconnect attempts exhausted, giving up"
                    );
                    break;
                }
                _ => break,
            }
        }

        *self.writer.lock() = None;
        self.stopped_tx.send_replace(true);
        debug!(url = %self.config.url, "Connection loop stopped");
    }

    /// Run a single connection: dial, then serve until it ends.
    ///
    /// Returns the event describing how the connection ended, with every
    /// accepted frame that did not reach the socket.
    async fn run_connection(&self, shutdown: &mut watch::Receiver<bool>) -> Ended {
        let dial = timeout(
            self.config.connect_timeout(),
            connect_async(self.config.url.as_str()),
        );
        let dialed = tokio::select! {
            _ = shutdown.changed() => return Ended::new(ConnectionEvent::CloseRequested),
            result = dial => result,
        };

        let ws_stream = match dialed {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                warn!(url = %self.config.url, error = %e, "WebSocket connect failed");
                return Ended::new(ConnectionEvent::ConnectFailed);
            }
            Err(_) => {
                warn!(
                    url = %self.config.url,
                    timeout_ms = self.config.connect_timeout,
                    "WebSocket connect timed out"
                );
                return Ended::new(ConnectionEvent::ConnectFailed);
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        // The writer must exist before Open is broadcast so listeners can send.
        *self.writer.lock() = Some(tx);
        if self.transition(ConnectionEvent::Connected).to != ConnectionState::Open {
            *self.writer.lock() = None;
            let _ = write.send(WsMessage::Close(None)).await;
            return Ended::new(ConnectionEvent::CloseRequested);
        }

        let interval = self.config.heartbeat_interval();
        let pong_timeout = self.config.heartbeat_timeout();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_pong: Option<Instant> = None;
        let mut undelivered = Vec::new();

        let event = loop {
            let pong_deadline = awaiting_pong.map(|sent| sent + pong_timeout);

            tokio::select! {
                _ = shutdown.changed() => break ConnectionEvent::CloseRequested,

                Some(frame) = rx.recv() => {
                    if let Err(e) = write.send(WsMessage::Text(frame.clone().into())).await {
                        warn!(url = %self.config.url, error = %e, "WebSocket write failed");
                        undelivered.push(frame);
                        break ConnectionEvent::Dropped;
                    }
                }

                incoming = read.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        awaiting_pong = None;
                        self.listeners.emit_frame(text.as_str());
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = write.send(WsMessage::Pong(data)).await {
                            warn!(url = %self.config.url, error = %e, "WebSocket pong failed");
                            break ConnectionEvent::Dropped;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => awaiting_pong = None,
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(url = %self.config.url, frame = ?frame, "Server closed connection");
                        break ConnectionEvent::Dropped;
                    }
                    // Binary frames carry no bus traffic
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(url = %self.config.url, error = %e, "WebSocket read failed");
                        break ConnectionEvent::Dropped;
                    }
                    None => break ConnectionEvent::Dropped,
                },

                _ = heartbeat.tick() => {
                    if awaiting_pong.is_none() {
                        if let Err(e) = write.send(WsMessage::Ping(Vec::<u8>::new().into())).await {
                            warn!(url = %self.config.url, error = %e, "Heartbeat ping failed");
                            break ConnectionEvent::Dropped;
                        }
                        awaiting_pong = Some(Instant::now());
                    }
                }

                _ = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                    warn!(
                        url = %self.config.url,
                        timeout_ms = self.config.heartbeat_timeout,
                        "Heartbeat timed out"
                    );
                    break ConnectionEvent::HeartbeatTimedOut;
                }
            }
        };

        // No sender remains once the writer is gone, so this drains everything.
        *self.writer.lock() = None;
        let mut leftover = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            leftover.push(frame);
        }

        if event == ConnectionEvent::CloseRequested {
            let mut frames = leftover.into_iter();
            for frame in frames.by_ref() {
                if let Err(e) = write.send(WsMessage::Text(frame.clone().into())).await {
                    warn!(url = %self.config.url, error = %e, "WebSocket write failed while closing");
                    undelivered.push(frame);
                    break;
                }
            }
            undelivered.extend(frames);
            let _ = write.send(WsMessage::Close(None)).await;
        } else {
            undelivered.extend(leftover);
        }

        Ended { event, undelivered }
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self) -> Result<(), TransportError> {
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let transition = self
            .inner
            .machine
            .lock()
            .apply(ConnectionEvent::ConnectRequested);

        match transition.action {
            TransitionAction::Dial => {
                info!(url = %self.inner.config.url, "Connecting");
                self.inner.stopped_tx.send_replace(false);
                let shutdown = self.inner.shutdown_tx.subscribe();
                handle.spawn(self.inner.clone().connection_loop(shutdown));
                Ok(())
            }
            _ if transition.to == ConnectionState::Closed => Err(TransportError::Closed),
            _ => Ok(()),
        }
    }

    fn send(&self, frame: &str) -> Result<(), TransportError> {
        match self.inner.machine.lock().state() {
            ConnectionState::Open => {}
            ConnectionState::Closed => return Err(TransportError::Closed),
            _ => return Err(TransportError::NotConnected),
        }

        let writer = self.inner.writer.lock();
        let tx = writer.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(frame.to_owned())
            .map_err(|_| TransportError::NotConnected)
    }

    fn state(&self) -> ConnectionState {
        self.inner.machine.lock().state()
    }

    fn on_message(&self, handler: FrameHandler) {
        self.inner.listeners.add_frame_handler(handler);
    }

    fn on_state_change(&self, handler: StateHandler) {
        self.inner.listeners.add_state_handler(handler);
    }

    fn on_undelivered(&self, handler: UndeliveredHandler) {
        self.inner.listeners.add_undelivered_handler(handler);
    }

    fn stopped(&self) -> watch::Receiver<bool> {
        self.inner.stopped_tx.subscribe()
    }

    fn close(&self) {
        let transition = self.inner.transition(ConnectionEvent::CloseRequested);
        if transition.changed() {
            *self.inner.writer.lock() = None;
            self.inner.shutdown_tx.send_replace(true);
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}
