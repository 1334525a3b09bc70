//! # Replay Guard
//!
//! Suppresses inbound frames the server sends twice, typically a reply
//! re-sent after a reconnect.
//!
//! - Only frames carrying an `id` are tracked, keyed by `(topic, id)`.
//! - A key is remembered for the replay window, measured from first sight.
//! - Expired keys are garbage-collected lazily on insertion.

use crate::clock::Timestamp;
use std::collections::HashMap;

/// Time-bounded set of recently seen `(topic, id)` pairs.
#[derive(Debug)]
pub struct ReplayGuard {
    /// Key -> time first seen (ms).
    seen: HashMap<(String, String), Timestamp>,

    window_ms: u64,

    last_gc: Timestamp,

    gc_interval_ms: u64,
}

impl ReplayGuard {
    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL: u64 = 10_000;

    pub fn new(window_ms: u64) -> Self {
        Self {
            seen: HashMap::new(),
            window_ms,
            last_gc: 0,
            gc_interval_ms: Self::DEFAULT_GC_INTERVAL.min(window_ms.max(1)),
        }
    }

    /// Record `(topic, id)` at `now`.
    ///
    /// Returns `false` if the pair was already seen inside the window.
    pub fn check_and_insert(&mut self, topic: &str, id: &str, now: Timestamp) -> bool {
        if now.saturating_sub(self.last_gc) >= self.gc_interval_ms {
            self.garbage_collect(now);
            self.last_gc = now;
        }

        let key = (topic.to_string(), id.to_string());
        match self.seen.get(&key) {
            Some(&first_seen) if now.saturating_sub(first_seen) < self.window_ms => false,
            _ => {
                self.seen.insert(key, now);
                true
            }
        }
    }

    pub fn contains(&self, topic: &str, id: &str) -> bool {
        self.seen.contains_key(&(topic.to_string(), id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    fn garbage_collect(&mut self, now: Timestamp) {
        let window = self.window_ms;
        self.seen
            .retain(|_, &mut first_seen| now.saturating_sub(first_seen) < window);
    }
}
