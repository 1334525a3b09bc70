//! Bus counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated without taking the bus lock.
#[derive(Debug, Default)]
pub struct BusStats {
    /// `publish` calls accepted by an open bus
    pub published: AtomicU64,
    /// Frames handed to the transport successfully
    pub sent: AtomicU64,
    /// Messages that entered the retry queue
    pub queued: AtomicU64,
    /// Retry attempts (successful or not)
    pub retried: AtomicU64,
    /// Messages dropped after exhausting their retries
    pub exhausted: AtomicU64,
    /// Sent frames the link handed back unwritten
    pub undelivered: AtomicU64,
    pub rejected_outbound: AtomicU64,
    pub rejected_inbound: AtomicU64,
    /// Parsed inbound frames
    pub received: AtomicU64,
    /// Handler invocations
    pub dispatched: AtomicU64,
    pub subscriber_faults: AtomicU64,
    pub duplicates: AtomicU64,
    pub unparseable: AtomicU64,
}

/// Point-in-time copy of [`BusStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStatsSnapshot {
    pub published: u64,
    pub sent: u64,
    pub queued: u64,
    pub retried: u64,
    pub exhausted: u64,
    pub undelivered: u64,
    pub rejected_outbound: u64,
    pub rejected_inbound: u64,
    pub received: u64,
    pub dispatched: u64,
    pub subscriber_faults: u64,
    pub duplicates: u64,
    pub unparseable: u64,
}

impl BusStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        BusStatsSnapshot {
            published: load(&self.published),
            sent: load(&self.sent),
            queued: load(&self.queued),
            retried: load(&self.retried),
            exhausted: load(&self.exhausted),
            undelivered: load(&self.undelivered),
            rejected_outbound: load(&self.rejected_outbound),
            rejected_inbound: load(&self.rejected_inbound),
            received: load(&self.received),
            dispatched: load(&self.dispatched),
            subscriber_faults: load(&self.subscriber_faults),
            duplicates: load(&self.duplicates),
            unparseable: load(&self.unparseable),
        }
    }
}
