//! Pending request store.
//!
//! Maps `(response topic, correlation id)` to the caller waiting in
//! [`crate::MessageBus::request`]. Completion happens on the inbound path,
//! before the reply is dispatched to ordinary subscribers.

use crate::error::BusError;
use crate::message::Message;
use std::collections::HashMap;
use tokio::sync::oneshot;

type Key = (String, String);

#[derive(Debug, Default)]
pub struct PendingRequests {
    waiting: HashMap<Key, oneshot::Sender<Result<Message, BusError>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a reply on `topic` carrying `id`.
    pub fn register(&mut self, topic: &str, id: &str) -> oneshot::Receiver<Result<Message, BusError>> {
        let (tx, rx) = oneshot::channel();
        self.waiting.insert((topic.to_string(), id.to_string()), tx);
        rx
    }

    /// Hand `message` to its waiting caller, if any.
    pub fn complete(&mut self, message: &Message) -> bool {
        let Some(id) = &message.id else {
            return false;
        };
        match self.waiting.remove(&(message.topic.clone(), id.clone())) {
            // A receiver dropped by a timed-out caller is not an error.
            Some(tx) => tx.send(Ok(message.clone())).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&mut self, topic: &str, id: &str) -> bool {
        self.waiting
            .remove(&(topic.to_string(), id.to_string()))
            .is_some()
    }

    /// Fail every waiting caller with `error`.
    pub fn fail_all(&mut self, error: &BusError) -> usize {
        let n = self.waiting.len();
        for (_, tx) in self.waiting.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        n
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
