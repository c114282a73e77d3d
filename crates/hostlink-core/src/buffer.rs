//! Bounded record buffer between collectors and the output sink

use crate::record::Record;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Drops between two overflow warnings
pub const OVERFLOW_WARN_INTERVAL: u64 = 5000;

/// Thread-safe FIFO store of pending records
pub trait EventBuffer: Send + Sync {
    /// Append a record, silently dropping it when the buffer is full
    fn add(&self, record: Record);

    /// Re-insert records from a failed flush
    fn add_batch(&self, records: Vec<Record>);

    /// Atomically take every buffered record, or nothing when cancelled
    fn next(&self, token: &CancellationToken) -> Vec<Record>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Buffer counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub len: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub overflow_warnings: u64,
    pub evicted: u64,
}

/// In-memory [`EventBuffer`]
///
/// `add` enforces `capacity`. `add_batch` bypasses it so records from a
/// failed send are not lost, but never grows past twice the capacity: the
/// earliest inserted records are evicted first.
pub struct InMemoryBuffer {
    records: Mutex<VecDeque<Record>>,
    capacity: usize,
    ceiling: usize,
    dropped: AtomicU64,
    overflow_warnings: AtomicU64,
    evicted: AtomicU64,
}

impl InMemoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity,
            ceiling: capacity.saturating_mul(2),
            dropped: AtomicU64::new(0),
            overflow_warnings: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            len: self.len(),
            capacity: self.capacity,
            dropped: self.dropped.load(Ordering::Relaxed),
            overflow_warnings: self.overflow_warnings.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    fn record_drop(&self, schema: &str) {
        let previous = self.dropped.fetch_add(1, Ordering::Relaxed);
        if previous % OVERFLOW_WARN_INTERVAL == 0 {
            self.overflow_warnings.fetch_add(1, Ordering::Relaxed);
            warn!(
                capacity = self.capacity,
                schema,
                dropped_total = previous + 1,
                "Buffer full, dropping records"
            );
        } else {
            trace!(capacity = self.capacity, schema, "Buffer full, dropped record");
        }
    }
}

impl EventBuffer for InMemoryBuffer {
    fn add(&self, record: Record) {
        let mut records = self.records.lock();
        if records.len() >= self.capacity {
            drop(records);
            self.record_drop(record.schema());
            return;
        }
        records.push_back(record);
    }

    fn add_batch(&self, batch: Vec<Record>) {
        if batch.is_empty() {
            return;
        }
        let mut records = self.records.lock();
        records.extend(batch);
        let excess = records.len().saturating_sub(self.ceiling);
        if excess > 0 {
            records.drain(..excess);
            drop(records);
            self.evicted.fetch_add(excess as u64, Ordering::Relaxed);
            warn!(
                evicted = excess,
                ceiling = self.ceiling,
                "Buffer over hard limit after re-insert, evicted oldest records"
            );
        }
    }

    fn next(&self, token: &CancellationToken) -> Vec<Record> {
        if token.is_cancelled() {
            return Vec::new();
        }
        let mut records = self.records.lock();
        std::mem::take(&mut *records).into()
    }

    fn len(&self) -> usize {
        self.records.lock().len()
    }
}
