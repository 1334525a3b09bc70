//! # Subscriptions
//!
//! Topic to handler registry plus the handles consumers hold.
//!
//! Dispatch takes a snapshot of a topic's handlers and releases the bus lock
//! before invoking any of them, so a handler may subscribe or unsubscribe
//! (including itself) without affecting the pass already in progress.

use crate::error::HandlerError;
use crate::message::Message;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// Callback invoked for each validated message on a topic.
pub type Handler = Arc<dyn Fn(&Message) -> Result<(), HandlerError> + Send + Sync>;

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A registered handler and its fault counter.
pub(crate) struct Subscriber {
    pub id: SubscriptionId,
    pub topic: String,
    pub handler: Handler,
    /// Consecutive failed invocations.
    pub faults: AtomicU32,
}

/// Topic to subscriber map. Lives under the bus lock.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    topics: HashMap<String, Vec<Arc<Subscriber>>>,
    next_id: u64,
}

impl SubscriberRegistry {
    pub fn add(&mut self, topic: &str, handler: Handler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(Arc::new(Subscriber {
                id,
                topic: topic.to_string(),
                handler,
                faults: AtomicU32::new(0),
            }));
        id
    }

    pub fn remove(&mut self, topic: &str, id: SubscriptionId) -> bool {
        let Some(subscribers) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// Remove every subscriber of `topic`, returning how many there were.
    pub fn clear_topic(&mut self, topic: &str) -> usize {
        self.topics.remove(topic).map_or(0, |s| s.len())
    }

    /// Current subscribers of `topic` in registration order.
    pub fn snapshot(&self, topic: &str) -> Vec<Arc<Subscriber>> {
        self.topics.get(topic).cloned().unwrap_or_default()
    }

    /// Topics with at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }
}

/// Cloneable, idempotent unsubscribe token.
#[derive(Clone)]
pub struct SubscriptionHandle {
    topic: String,
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    cancel: Arc<dyn Fn(&str, SubscriptionId) + Send + Sync>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        topic: &str,
        id: SubscriptionId,
        cancel: Arc<dyn Fn(&str, SubscriptionId) + Send + Sync>,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            id,
            active: Arc::new(AtomicBool::new(true)),
            cancel,
        }
    }

    /// Remove this registration. Later calls do nothing.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            (self.cancel)(&self.topic, self.id);
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// False once `unsubscribe` has run on any clone.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// A live registration.
///
/// When dropped, the subscription is automatically removed.
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    detached: bool,
}

impl Subscription {
    pub(crate) fn new(handle: SubscriptionHandle) -> Self {
        Self {
            handle,
            detached: false,
        }
    }

    pub fn topic(&self) -> &str {
        self.handle.topic()
    }

    pub fn id(&self) -> SubscriptionId {
        self.handle.id()
    }

    /// A token that can unsubscribe from elsewhere, e.g. inside the handler.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn unsubscribe(self) {
        self.handle.unsubscribe();
    }

    /// Keep the registration alive for the bus's lifetime.
    pub fn detach(mut self) -> SubscriptionHandle {
        self.detached = true;
        self.handle.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.handle.unsubscribe();
        }
    }
}

/// Messages on one topic as an async stream.
///
/// The underlying subscription lives as long as the stream.
pub struct MessageStream {
    inner: UnboundedReceiverStream<Message>,
    subscription: Subscription,
}

impl MessageStream {
    pub(crate) fn new(inner: UnboundedReceiverStream<Message>, subscription: Subscription) -> Self {
        Self {
            inner,
            subscription,
        }
    }

    pub fn topic(&self) -> &str {
        self.subscription.topic()
    }
}

impl Stream for MessageStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
