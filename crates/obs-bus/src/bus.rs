//! # Message Bus
//!
//! Topic-addressed publish/subscribe over one [`Transport`].
//!
//! ## Outbound
//!
//! `publish` stamps a [`Message`], runs the outbound pipeline, encodes the
//! frame once and hands it to the transport. A failed send moves the frame
//! into the retry queue. A background ticker retries due entries on the
//! backoff curve, and every transition to `Open` flushes the whole queue in
//! enqueue order. An entry that fails `maxRetries + 1` attempts is dropped
//! and reported at ERROR. Frames the transport accepted but never wrote
//! come back through its undelivered callback and are queued ahead of
//! everything else.
//!
//! Known ordering caveat: a fresh `publish` on an open link is sent
//! immediately and may overtake an earlier message still waiting in the
//! retry queue.
//!
//! ## Inbound
//!
//! Frame -> parse -> replay guard -> inbound pipeline -> pending requests ->
//! subscribers in registration order. A failing or panicking subscriber is
//! isolated from the rest.
//!
//! ## Locking
//!
//! Subscribers, the retry queue, pending requests and the replay cache share
//! one mutex. It is never held while calling the transport, a handler or a
//! pipeline stage. A second mutex serializes flushes from the take through
//! the restore, so the ticker and an `Open` transition cannot interleave
//! their batches.

use crate::clock::{SystemTimeSource, TimeSource};
use crate::config::BusConfig;
use crate::error::{BusError, HandlerError};
use crate::log::{LevelFilter, LogLevel, LogRecord, LogSink, TracingSink};
use crate::message::{Envelope, Message, TypedTopic};
use crate::middleware::{
    ClientTimestamp, Direction, FnMiddleware, LoggingMiddleware, Middleware, Pipeline,
    PipelineContext, SchemaValidation, Verdict,
};
use crate::outbound::{FlushMode, OutboundQueue, QueueEntry};
use crate::pending::PendingRequests;
use crate::replay_guard::ReplayGuard;
use crate::schema::SchemaRegistry;
use crate::stats::{BusStats, BusStatsSnapshot};
use crate::subscriber::{
    Handler, MessageStream, Subscriber, SubscriberRegistry, Subscription, SubscriptionHandle,
    SubscriptionId,
};
use obs_transport::{
    Backoff, ConnectionState, Transport, TransportConfig, TransportError, WebSocketTransport,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{sleep_until, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// What `publish` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport.
    Sent,
    /// Send failed; the message is in the retry queue.
    Queued,
    /// Rejected by the pipeline or out of retries. Already logged.
    Dropped,
}

/// Handle to a message bus. Clones share the same bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    config: BusConfig,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn LogSink>,
    clock: Arc<dyn TimeSource>,
    schemas: Arc<SchemaRegistry>,
    pipeline: Pipeline,
    backoff: Backoff,
    state: Mutex<BusState>,
    /// Held for the whole of a flush.
    flush_lock: Mutex<()>,
    stats: BusStats,
    connection_tx: watch::Sender<ConnectionState>,
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
}

struct BusState {
    subscribers: SubscriberRegistry,
    queue: OutboundQueue,
    pending: PendingRequests,
    replay: ReplayGuard,
    closed: bool,
}

/// Collects everything a bus needs before it connects.
///
/// Pipeline order is schema validation, logging, client timestamp (when
/// enabled), then custom stages in the order they were added.
pub struct MessageBusBuilder {
    transport: Arc<dyn Transport>,
    config: BusConfig,
    schemas: Arc<SchemaRegistry>,
    sink: Arc<dyn LogSink>,
    clock: Arc<dyn TimeSource>,
    middleware: Vec<Arc<dyn Middleware>>,
    client_timestamp: bool,
}

impl MessageBusBuilder {
    #[must_use]
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = schemas;
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Append a pipeline stage. Order matters.
    #[must_use]
    pub fn use_middleware(mut self, stage: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(stage));
        self
    }

    /// Append a closure as a pipeline stage.
    #[must_use]
    pub fn use_fn<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(Message, &PipelineContext) -> Verdict + Send + Sync + 'static,
    {
        self.use_middleware(FnMiddleware::new(name, f))
    }

    /// Stamp outbound object payloads with `clientTimestamp`.
    #[must_use]
    pub fn client_timestamp(mut self, enabled: bool) -> Self {
        self.client_timestamp = enabled;
        self
    }

    /// Validate the configuration, wire the transport callbacks, start the
    /// retry ticker and connect.
    pub fn build(self) -> Result<MessageBus, BusError> {
        self.config.validate()?;

        let sink: Arc<dyn LogSink> = Arc::new(LevelFilter::new(self.config.log_level, self.sink));

        let mut stages: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(
                SchemaValidation::new(self.schemas.clone()).strict(self.config.strict_schemas),
            ),
            Arc::new(LoggingMiddleware::new(LogLevel::Debug)),
        ];
        if self.client_timestamp {
            stages.push(Arc::new(ClientTimestamp::new(self.clock.clone())));
        }
        stages.extend(self.middleware);

        let (connection_tx, _) = watch::channel(self.transport.state());
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Arc::new(BusInner {
            backoff: self.config.retry_backoff(),
            state: Mutex::new(BusState {
                subscribers: SubscriberRegistry::default(),
                queue: OutboundQueue::new(),
                pending: PendingRequests::new(),
                replay: ReplayGuard::new(self.config.replay_window),
                closed: false,
            }),
            flush_lock: Mutex::new(()),
            config: self.config,
            transport: self.transport,
            sink,
            clock: self.clock,
            schemas: self.schemas,
            pipeline: Pipeline::new(stages),
            stats: BusStats::default(),
            connection_tx,
            wake: Arc::new(Notify::new()),
            shutdown_tx,
        });

        let weak = Arc::downgrade(&inner);
        inner.transport.on_state_change(Arc::new(move |state: ConnectionState| {
            if let Some(inner) = weak.upgrade() {
                inner.on_connection_state(state);
            }
        }));
        let weak = Arc::downgrade(&inner);
        inner.transport.on_message(Arc::new(move |frame: &str| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_frame(frame);
            }
        }));
        let weak = Arc::downgrade(&inner);
        inner.transport.on_undelivered(Arc::new(move |frames: &[String]| {
            if let Some(inner) = weak.upgrade() {
                inner.requeue_undelivered(frames);
            }
        }));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_ticker(
                    Arc::downgrade(&inner),
                    inner.wake.clone(),
                    inner.shutdown_tx.subscribe(),
                ));
            }
            Err(_) => inner.log(
                LogRecord::new(
                    LogLevel::Warn,
                    "no_runtime",
                    "no tokio runtime; queued messages are retried only when the connection opens",
                ),
            ),
        }

        inner.transport.connect()?;

        Ok(MessageBus { inner })
    }
}

impl MessageBus {
    /// Start building a bus over `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> MessageBusBuilder {
        MessageBusBuilder {
            transport,
            config: BusConfig::default(),
            schemas: Arc::new(SchemaRegistry::new()),
            sink: Arc::new(TracingSink),
            clock: Arc::new(SystemTimeSource),
            middleware: Vec::new(),
            client_timestamp: false,
        }
    }

    /// A bus with the default pipeline.
    pub fn new(
        config: BusConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, BusError> {
        Self::builder(transport).config(config).sink(sink).build()
    }

    /// A bus over a new WebSocket transport.
    pub fn connect(transport: TransportConfig, config: BusConfig) -> Result<Self, BusError> {
        let transport = Arc::new(WebSocketTransport::new(transport)?);
        Self::builder(transport).config(config).build()
    }

    /// Publish `payload` on `topic`.
    ///
    /// Only a closed bus or an unencodable payload is an error; transport
    /// trouble and validation failures are reported through the outcome
    /// and the log.
    pub fn publish(&self, topic: &str, payload: Value) -> Result<PublishOutcome, BusError> {
        dropped_on_rejection(self.inner.publish(topic, payload, None))
    }

    /// Publish with a correlation id.
    pub fn publish_with_id(
        &self,
        topic: &str,
        payload: Value,
        id: impl Into<String>,
    ) -> Result<PublishOutcome, BusError> {
        dropped_on_rejection(self.inner.publish(topic, payload, Some(id.into())))
    }

    pub fn publish_typed<T: Serialize>(
        &self,
        topic: &TypedTopic<T>,
        payload: &T,
    ) -> Result<PublishOutcome, BusError> {
        let payload = serde_json::to_value(payload).map_err(|e| BusError::Encode(e.to_string()))?;
        self.publish(topic.name(), payload)
    }

    /// Register `handler` for `topic`.
    ///
    /// The handler sees only messages dispatched after this call. Dropping
    /// the returned [`Subscription`] removes the registration.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let id = self.inner.state.lock().subscribers.add(topic, handler);

        let weak = Arc::downgrade(&self.inner);
        let cancel = Arc::new(move |topic: &str, id: SubscriptionId| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().subscribers.remove(topic, id);
            }
        });
        Subscription::new(SubscriptionHandle::new(topic, id, cancel))
    }

    /// Register a handler that receives decoded payloads.
    ///
    /// A payload that does not decode as `T` counts as a fault of this
    /// subscriber.
    pub fn subscribe_typed<T, F>(&self, topic: &TypedTopic<T>, handler: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(Envelope<T>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(topic.name(), move |message| {
            let envelope = Envelope::<T>::try_from(message)?;
            handler(envelope)
        })
    }

    /// Messages on `topic` as a stream.
    pub fn stream(&self, topic: &str) -> MessageStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(topic, move |message| {
            let _ = tx.send(message.clone());
            Ok(())
        });
        MessageStream::new(UnboundedReceiverStream::new(rx), subscription)
    }

    /// Remove every subscriber of `topic`. Returns how many were removed.
    pub fn clear_topic(&self, topic: &str) -> usize {
        let removed = self.inner.state.lock().subscribers.clear_topic(topic);
        if removed > 0 {
            self.inner.log(
                LogRecord::new(
                    LogLevel::Debug,
                    "topic_cleared",
                    format!("removed {removed} subscribers"),
                )
                .topic(topic),
            );
        }
        removed
    }

    /// Topics with at least one subscriber, sorted.
    pub fn get_topics(&self) -> Vec<String> {
        self.inner.state.lock().subscribers.topics()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.state.lock().subscribers.count(topic)
    }

    /// Publish on `topic` and wait for the reply on `response_topic` that
    /// carries the same correlation id.
    ///
    /// Ordinary subscribers of `response_topic` still receive the reply.
    pub async fn request(
        &self,
        topic: &str,
        payload: Value,
        response_topic: &str,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let id = Uuid::new_v4().to_string();
        let rx = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            state.pending.register(response_topic, &id)
        };

        let outcome = self.inner.publish(topic, payload, Some(id.clone()));
        match outcome {
            Ok(PublishOutcome::Sent | PublishOutcome::Queued) => {}
            Ok(PublishOutcome::Dropped) => {
                self.inner.state.lock().pending.cancel(response_topic, &id);
                return Err(BusError::Rejected {
                    stage: "delivery".into(),
                    reason: "retries exhausted".into(),
                });
            }
            Err(err) => {
                self.inner.state.lock().pending.cancel(response_topic, &id);
                return Err(err);
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => {
                self.inner.state.lock().pending.cancel(response_topic, &id);
                self.inner.log(
                    LogRecord::new(
                        LogLevel::Warn,
                        "request_timeout",
                        format!("no reply to {id} within {}ms", timeout.as_millis()),
                    )
                    .topic(response_topic),
                );
                Err(BusError::RequestTimeout {
                    topic: response_topic.to_string(),
                    id,
                })
            }
        }
    }

    /// Current transport state.
    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_tx.subscribe()
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Messages waiting for a retry.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Shared schema registry; consumers may register rules at any time.
    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.inner.schemas
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Names of the pipeline stages in execution order.
    pub fn pipeline(&self) -> Vec<String> {
        self.inner.pipeline.stage_names()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Tear down the bus and its transport. Idempotent.
    ///
    /// Stops the retry ticker, fails pending requests with
    /// [`BusError::Closed`], discards queued messages and drops every
    /// subscription.
    pub fn close(&self) {
        self.inner.close();
    }

    /// [`close`](Self::close), then wait until the transport has written
    /// every frame it already accepted or given up on them.
    pub async fn shutdown(&self) {
        self.inner.close();
        let mut stopped = self.inner.transport.stopped();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("state", &self.state())
            .field("topics", &self.get_topics())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Rejections are reported to the operator, not the caller.
fn dropped_on_rejection(
    result: Result<PublishOutcome, BusError>,
) -> Result<PublishOutcome, BusError> {
    match result {
        Err(BusError::Rejected { .. }) => Ok(PublishOutcome::Dropped),
        other => other,
    }
}

impl BusInner {
    fn log(&self, record: LogRecord) {
        self.sink.log(record);
    }

    fn publish(
        &self,
        topic: &str,
        payload: Value,
        id: Option<String>,
    ) -> Result<PublishOutcome, BusError> {
        if self.state.lock().closed {
            return Err(BusError::Closed);
        }
        BusStats::bump(&self.stats.published);

        let message = Message::new(topic, payload, self.clock.now()).with_id(id);
        let ctx = PipelineContext::new(Direction::Outbound, self.sink.clone());
        let message = match self.pipeline.run(message, &ctx) {
            Ok(message) => message,
            Err(rejection) => {
                BusStats::bump(&self.stats.rejected_outbound);
                self.log(
                    LogRecord::new(
                        LogLevel::Error,
                        "validation_failed",
                        format!(
                            "outbound message rejected by {}: {}",
                            rejection.stage, rejection.reason
                        ),
                    )
                    .topic(topic),
                );
                return Err(BusError::Rejected {
                    stage: rejection.stage,
                    reason: rejection.reason,
                });
            }
        };

        let frame = message.encode()?;
        match self.transport.send(&frame) {
            Ok(()) => {
                BusStats::bump(&self.stats.sent);
                Ok(PublishOutcome::Sent)
            }
            Err(err) => Ok(self.enqueue(&message.topic, frame, &err)),
        }
    }

    /// Queue a frame whose first attempt failed.
    fn enqueue(&self, topic: &str, frame: String, err: &TransportError) -> PublishOutcome {
        if self.config.max_retries == 0 {
            self.report_exhausted(topic, None, 1, err);
            return PublishOutcome::Dropped;
        }

        let next_retry_at = Instant::now() + self.backoff.delay(1);
        let envelope_id = {
            let mut state = self.state.lock();
            if state.closed {
                return PublishOutcome::Dropped;
            }
            state.queue.enqueue(topic, frame, 1, next_retry_at)
        };
        BusStats::bump(&self.stats.queued);
        self.log(
            LogRecord::new(
                LogLevel::Debug,
                "queued",
                format!("send failed ({err}); {envelope_id} queued for retry"),
            )
            .topic(topic),
        );
        self.wake.notify_one();
        PublishOutcome::Queued
    }

    /// Queue frames the transport accepted but never wrote.
    ///
    /// They were sent before anything still waiting for a retry, so they go
    /// to the front. Each restarts its retry budget.
    fn requeue_undelivered(&self, frames: &[String]) {
        let n = frames.len() as u64;
        BusStats::add(&self.stats.undelivered, n);

        if self.config.max_retries == 0 {
            let err = TransportError::Send("link dropped before the frame was written".into());
            for frame in frames {
                let topic = Message::decode(frame).map(|m| m.topic).unwrap_or_default();
                self.report_exhausted(&topic, None, 1, &err);
            }
            return;
        }

        let batch: Vec<(String, String)> = frames
            .iter()
            .map(|frame| {
                let topic = Message::decode(frame).map(|m| m.topic).unwrap_or_default();
                (topic, frame.clone())
            })
            .collect();
        let next_retry_at = Instant::now() + self.backoff.delay(1);
        let requeued = {
            let mut state = self.state.lock();
            if state.closed {
                false
            } else {
                state.queue.requeue_front(batch, 1, next_retry_at);
                true
            }
        };

        if requeued {
            BusStats::add(&self.stats.queued, n);
            self.log(LogRecord::new(
                LogLevel::Warn,
                "undelivered",
                format!("{n} sent messages never left the link; queued for retry"),
            ));
            self.wake.notify_one();
        } else {
            self.log(LogRecord::new(
                LogLevel::Warn,
                "undelivered",
                format!("{n} sent messages never left the link; bus closed, discarding"),
            ));
        }
    }

    /// Attempt the selected queue entries once each, oldest first.
    ///
    /// Only one flush runs at a time.
    fn flush(&self, mode: FlushMode) {
        let _serial = self.flush_lock.lock();
        let batch = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.queue.take(mode)
        };
        if batch.is_empty() {
            return;
        }

        let mut retained: Vec<QueueEntry> = Vec::new();
        for mut entry in batch {
            entry.attempts += 1;
            BusStats::bump(&self.stats.retried);
            match self.transport.send(&entry.frame) {
                Ok(()) => {
                    BusStats::bump(&self.stats.sent);
                    self.log(
                        LogRecord::new(
                            LogLevel::Debug,
                            "retry_sent",
                            format!("{} sent on attempt {}", entry.envelope_id, entry.attempts),
                        )
                        .topic(&entry.topic),
                    );
                }
                Err(err) if entry.attempts > self.config.max_retries => {
                    self.report_exhausted(
                        &entry.topic,
                        Some(entry.envelope_id),
                        entry.attempts,
                        &err,
                    );
                }
                Err(_) => {
                    entry.next_retry_at = Instant::now() + self.backoff.delay(entry.attempts);
                    retained.push(entry);
                }
            }
        }

        if !retained.is_empty() {
            let mut state = self.state.lock();
            if !state.closed {
                state.queue.restore(retained);
            }
        }
        self.wake.notify_one();
    }

    fn report_exhausted(
        &self,
        topic: &str,
        envelope_id: Option<Uuid>,
        attempts: u32,
        err: &TransportError,
    ) {
        BusStats::bump(&self.stats.exhausted);
        let what = envelope_id.map_or_else(|| "message".to_string(), |id| id.to_string());
        self.log(
            LogRecord::new(
                LogLevel::Error,
                "delivery_exhausted",
                format!("dropping {what} after {attempts} attempts: {err}"),
            )
            .topic(topic),
        );
    }

    fn on_connection_state(&self, state: ConnectionState) {
        self.connection_tx.send_replace(state);
        self.log(LogRecord::new(
            LogLevel::Info,
            "connection_state",
            format!("connection {state}"),
        ));
        if state.is_open() {
            self.flush(FlushMode::All);
        }
    }

    fn handle_frame(&self, frame: &str) {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                BusStats::bump(&self.stats.unparseable);
                self.log(LogRecord::new(
                    LogLevel::Warn,
                    "unparseable_frame",
                    format!("discarding frame: {err}"),
                ));
                return;
            }
        };
        BusStats::bump(&self.stats.received);

        if let Some(id) = &message.id {
            let fresh = {
                let mut state = self.state.lock();
                if state.closed {
                    return;
                }
                state.replay.check_and_insert(&message.topic, id, self.clock.now())
            };
            if !fresh {
                BusStats::bump(&self.stats.duplicates);
                self.log(
                    LogRecord::new(
                        LogLevel::Debug,
                        "duplicate_frame",
                        format!("already dispatched {id}"),
                    )
                    .topic(&message.topic),
                );
                return;
            }
        }

        let topic = message.topic.clone();
        let ctx = PipelineContext::new(Direction::Inbound, self.sink.clone());
        let message = match self.pipeline.run(message, &ctx) {
            Ok(message) => message,
            Err(rejection) => {
                BusStats::bump(&self.stats.rejected_inbound);
                self.log(
                    LogRecord::new(
                        LogLevel::Error,
                        "validation_failed",
                        format!(
                            "inbound message rejected by {}: {}",
                            rejection.stage, rejection.reason
                        ),
                    )
                    .topic(&topic),
                );
                return;
            }
        };

        if message.id.is_some() {
            self.state.lock().pending.complete(&message);
        }
        self.dispatch(&message);
    }

    /// Invoke every current subscriber of the message's topic.
    fn dispatch(&self, message: &Message) {
        let subscribers = self.state.lock().subscribers.snapshot(&message.topic);
        for subscriber in subscribers {
            BusStats::bump(&self.stats.dispatched);
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(message)));
            match outcome {
                Ok(Ok(())) => subscriber.faults.store(0, Ordering::Relaxed),
                Ok(Err(err)) => self.record_fault(&subscriber, &err.to_string()),
                Err(panic) => self.record_fault(&subscriber, &panic_message(panic.as_ref())),
            }
        }
    }

    fn record_fault(&self, subscriber: &Subscriber, reason: &str) {
        BusStats::bump(&self.stats.subscriber_faults);
        let consecutive = subscriber.faults.fetch_add(1, Ordering::Relaxed) + 1;
        self.log(
            LogRecord::new(
                LogLevel::Warn,
                "subscriber_fault",
                format!("{} failed: {reason}", subscriber.id),
            )
            .topic(&subscriber.topic),
        );
        if consecutive == self.config.fault_threshold {
            self.log(
                LogRecord::new(
                    LogLevel::Error,
                    "repeated_subscriber_fault",
                    format!("{} failed {consecutive} times in a row", subscriber.id),
                )
                .topic(&subscriber.topic),
            );
        }
    }

    fn close(&self) {
        let (discarded, cancelled) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.subscribers.clear();
            state.replay.clear();
            (
                state.queue.clear(),
                state.pending.fail_all(&BusError::Closed),
            )
        };

        self.shutdown_tx.send_replace(true);
        self.transport.close();

        if discarded > 0 {
            self.log(LogRecord::new(
                LogLevel::Warn,
                "queue_discarded",
                format!("discarded {discarded} queued messages on close"),
            ));
        }
        self.log(LogRecord::new(
            LogLevel::Info,
            "bus_closed",
            format!("bus closed ({cancelled} pending requests cancelled)"),
        ));
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if !self.state.get_mut().closed {
            self.transport.close();
        }
    }
}

/// Retries due queue entries until the bus shuts down.
///
/// Holds only a weak reference between wakeups so the bus can be dropped.
async fn run_ticker(
    inner: Weak<BusInner>,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let deadline = match inner.upgrade() {
            Some(inner) => inner.state.lock().queue.next_deadline(),
            None => return,
        };

        let due = async {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown.changed() => return,
            () = wake.notified() => {}
            () = due => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                inner.flush(FlushMode::Due(Instant::now()));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
