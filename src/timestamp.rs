//! Monotonic timestamps and the shared measurement ledger
//!
//! Workers record one `(start, end)` wall-clock pair per completed request;
//! the controller drains the accumulated pairs once per measurement window.
//! All readings come from a process-local monotonic origin, never from a
//! wall clock that can step.

use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;

use crate::client::ContextStat;

/// Nanoseconds per second
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

static MONOTONIC_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Current monotonic time in nanoseconds since the process-local origin
///
/// The first call anchors the origin; all later readings are measured
/// against it, so values are comparable across threads for the lifetime
/// of the process.
#[must_use]
pub fn now_ns() -> u64 {
    let origin = *MONOTONIC_ORIGIN.get_or_init(Instant::now);
    u64::try_from(Instant::now().duration_since(origin).as_nanos()).unwrap_or(u64::MAX)
}

/// Start and end reading of one completed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampPair {
    /// Monotonic reading taken immediately before the request was issued
    pub start_ns: u64,
    /// Monotonic reading taken immediately after the response arrived
    pub end_ns: u64,
}

impl TimestampPair {
    /// Request latency in nanoseconds
    ///
    /// A pair whose start exceeds its end (clock regression) contributes
    /// zero latency but is still retained for counting.
    #[must_use]
    pub fn latency_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Unordered collection of timestamp pairs produced by workers
///
/// The buffer itself is not synchronized; it lives inside [`StatusLedger`]
/// and is only touched under the ledger mutex.
#[derive(Debug, Default)]
pub struct TimestampBuffer {
    pairs: Vec<TimestampPair>,
}

impl TimestampBuffer {
    /// Append one completed request
    pub fn append(&mut self, pair: TimestampPair) {
        self.pairs.push(pair);
    }

    /// Take all accumulated pairs, leaving the buffer empty
    ///
    /// Ownership of the storage transfers to the caller in one swap; no
    /// entries are copied.
    pub fn drain(&mut self) -> Vec<TimestampPair> {
        std::mem::take(&mut self.pairs)
    }

    /// Number of pairs currently buffered
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when no pairs are buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

struct LedgerInner {
    buffer: TimestampBuffer,
    slots: Vec<ContextStat>,
}

/// Shared home of the timestamp buffer and the per-worker context stats
///
/// One mutex covers both: a worker's append and its stat-slot overwrite
/// happen atomically with respect to the controller's drain and snapshot.
/// The lock is held only around these short copy operations, never across
/// an RPC call or a condition wait.
pub struct StatusLedger {
    inner: Mutex<LedgerInner>,
}

impl StatusLedger {
    /// Create an empty ledger with no worker slots
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                buffer: TimestampBuffer::default(),
                slots: Vec::new(),
            }),
        }
    }

    /// Add one stat slot for a newly spawned worker, returning its index
    pub fn add_slot(&self) -> usize {
        let mut inner = self.lock();
        inner.slots.push(ContextStat::default());
        inner.slots.len() - 1
    }

    /// Record one completed request for the worker owning `slot`
    ///
    /// Appends the timestamp pair and overwrites the worker's stat slot
    /// with the context's current cumulative counters.
    pub fn record(&self, slot: usize, pair: TimestampPair, stat: ContextStat) {
        let mut inner = self.lock();
        inner.buffer.append(pair);
        if let Some(entry) = inner.slots.get_mut(slot) {
            *entry = stat;
        }
    }

    /// Drain every buffered timestamp pair
    pub fn drain(&self) -> Vec<TimestampPair> {
        self.lock().buffer.drain()
    }

    /// Snapshot of the cumulative context stats summed across all workers
    #[must_use]
    pub fn accumulated_stat(&self) -> ContextStat {
        let inner = self.lock();
        let mut total = ContextStat::default();
        for stat in &inner.slots {
            total.completed_request_count += stat.completed_request_count;
            total.cumulative_total_request_time_ns += stat.cumulative_total_request_time_ns;
            total.cumulative_send_time_ns += stat.cumulative_send_time_ns;
            total.cumulative_receive_time_ns += stat.cumulative_receive_time_ns;
        }
        total
    }

    /// Number of pairs currently buffered
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StatusLedger {
    fn default() -> Self {
        Self::new()
    }
}
