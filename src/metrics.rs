#![forbid(unsafe_code)]

// Process-wide notification counters, shared lock-free by every session

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

/// Counters shared between every session and the fleet monitor.
///
/// `sent` counts dispatch *attempts*: it is incremented after every send,
/// including sends the transport reported as failed. It is not a count of
/// confirmed deliveries. `received` counts inbound notifications observed.
///
/// Both values only ever grow. Cloning is cheap and yields a handle to the
/// same counters.
#[derive(Clone, Default)]
pub struct SharedCounters {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    sent: AtomicU64,
    received: AtomicU64,
}

/// Point-in-time read of both counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub sent: u64,
    pub received: u64,
}

impl SharedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.inner.sent.fetch_add(1, Relaxed);
    }

    pub fn record_received(&self) {
        self.inner.received.fetch_add(1, Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.inner.sent.load(Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.inner.received.load(Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            sent: self.sent(),
            received: self.received(),
        }
    }
}

impl std::fmt::Debug for SharedCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCounters")
            .field("sent", &self.sent())
            .field("received", &self.received())
            .finish()
    }
}
