//! # Outbound Retry Queue
//!
//! Holds encoded frames whose send attempt failed. Each entry keeps the
//! identity and frame it was created with; retries reuse both.
//!
//! Entries are ordered by enqueue sequence. Taking entries out for a send
//! and putting the survivors back never reorders them relative to entries
//! that stayed in the queue. Frames the link handed back go in front of
//! everything, since they were sent before anything still waiting here.

use std::collections::VecDeque;
use tokio::time::Instant;
use uuid::Uuid;

/// One message awaiting (re)transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Stable identity across retries.
    pub envelope_id: Uuid,
    pub topic: String,
    /// Encoded frame, produced once at publish time.
    pub frame: String,
    /// Send attempts made so far, including the initial one.
    pub attempts: u32,
    pub next_retry_at: Instant,
    seq: i64,
}

/// Which entries a flush takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Every entry, regardless of schedule (connection just opened).
    All,
    /// Entries whose retry time has passed.
    Due(Instant),
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<QueueEntry>,
    next_seq: i64,
    /// Lowest sequence handed out so far.
    first_seq: i64,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry after its first failed attempt.
    pub fn enqueue(
        &mut self,
        topic: &str,
        frame: String,
        attempts: u32,
        next_retry_at: Instant,
    ) -> Uuid {
        let envelope_id = Uuid::new_v4();
        self.next_seq += 1;
        self.entries.push_back(QueueEntry {
            envelope_id,
            topic: topic.to_string(),
            frame,
            attempts,
            next_retry_at,
            seq: self.next_seq,
        });
        envelope_id
    }

    /// Put `(topic, frame)` pairs ahead of every queued entry, keeping their
    /// relative order. Returns the new identities in the same order.
    pub fn requeue_front(
        &mut self,
        frames: Vec<(String, String)>,
        attempts: u32,
        next_retry_at: Instant,
    ) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(frames.len());
        for (topic, frame) in frames.into_iter().rev() {
            let envelope_id = Uuid::new_v4();
            self.first_seq -= 1;
            self.entries.push_front(QueueEntry {
                envelope_id,
                topic,
                frame,
                attempts,
                next_retry_at,
                seq: self.first_seq,
            });
            ids.push(envelope_id);
        }
        ids.reverse();
        ids
    }

    /// Remove and return the entries selected by `mode`, oldest first.
    pub fn take(&mut self, mode: FlushMode) -> Vec<QueueEntry> {
        match mode {
            FlushMode::All => self.entries.drain(..).collect(),
            FlushMode::Due(now) => {
                let mut taken = Vec::new();
                let mut kept = VecDeque::with_capacity(self.entries.len());
                for entry in self.entries.drain(..) {
                    if entry.next_retry_at <= now {
                        taken.push(entry);
                    } else {
                        kept.push_back(entry);
                    }
                }
                self.entries = kept;
                taken
            }
        }
    }

    /// Put entries back, restoring enqueue order.
    pub fn restore(&mut self, entries: Vec<QueueEntry>) {
        if entries.is_empty() {
            return;
        }
        self.entries.extend(entries);
        self.entries.make_contiguous().sort_by_key(|e| e.seq);
    }

    /// Earliest scheduled retry.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.next_retry_at).min()
    }

    /// Remove everything, returning how many entries were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}
