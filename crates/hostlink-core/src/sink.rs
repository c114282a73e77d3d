//! Event sink: drains the buffer and hands chunks to the output
//!
//! A flush takes everything currently buffered and sends it in chunks of at
//! most `maximum_flush_size` records. Records leave the flush in exactly two
//! ways: delivered (`Ok(true)` from the output) or re-inserted into the
//! buffer. Re-insertion is handled by [`FlushContext`]'s `Drop`, so it also
//! happens when the flush future is cancelled or dropped mid-send.

use crate::buffer::EventBuffer;
use crate::error::{AgentError, AgentResult};
use crate::output::EventOutput;
use crate::record::Record;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sink counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub records_flushed: u64,
    pub records_requeued: u64,
    pub chunks_sent: u64,
    pub chunks_failed: u64,
}

/// Collector-facing facade over the buffer plus the flush logic
pub struct EventSink {
    buffer: Arc<dyn EventBuffer>,
    output: Arc<dyn EventOutput>,
    maximum_flush_size: usize,

    records_flushed: AtomicU64,
    records_requeued: AtomicU64,
    chunks_sent: AtomicU64,
    chunks_failed: AtomicU64,
}

impl EventSink {
    pub fn new(
        buffer: Arc<dyn EventBuffer>,
        output: Arc<dyn EventOutput>,
        maximum_flush_size: usize,
    ) -> Self {
        Self {
            buffer,
            output,
            maximum_flush_size: maximum_flush_size.max(1),
            records_flushed: AtomicU64::new(0),
            records_requeued: AtomicU64::new(0),
            chunks_sent: AtomicU64::new(0),
            chunks_failed: AtomicU64::new(0),
        }
    }

    /// Forward a record to the buffer
    pub fn push(&self, record: Record) {
        self.buffer.add(record);
    }

    pub fn buffer(&self) -> &Arc<dyn EventBuffer> {
        &self.buffer
    }

    pub fn output_name(&self) -> &str {
        self.output.name()
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            records_requeued: self.records_requeued.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
        }
    }

    /// Drain the buffer and send it in chunks
    ///
    /// Cancellation of `token` is swallowed. Any other output error,
    /// including `Cancelled` while `token` is live, propagates after the
    /// undelivered records have been re-inserted.
    pub async fn flush(&self, token: &CancellationToken) -> AgentResult<()> {
        if token.is_cancelled() {
            return Ok(());
        }

        let records = self.buffer.next(token);
        if records.is_empty() {
            return Ok(());
        }

        info!("Flushing {} data records", records.len());

        let mut flush = FlushContext::new(self, records);
        while flush.take_chunk(self.maximum_flush_size) {
            match self.output.send(&flush.in_flight, token).await {
                Ok(true) => flush.delivered(),
                Ok(false) => flush.failed(),
                Err(AgentError::Cancelled) if token.is_cancelled() => {
                    debug!("Flush cancelled, re-inserting undelivered records");
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        output = self.output.name(),
                        error = %e,
                        "Unexpected error during flush"
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// Tracks the records of one flush that have not been delivered yet
struct FlushContext<'a> {
    sink: &'a EventSink,
    pending: VecDeque<Record>,
    in_flight: Vec<Record>,
    failed: Vec<Record>,
}

impl<'a> FlushContext<'a> {
    fn new(sink: &'a EventSink, records: Vec<Record>) -> Self {
        Self {
            sink,
            pending: records.into(),
            in_flight: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn take_chunk(&mut self, size: usize) -> bool {
        let n = size.min(self.pending.len());
        self.in_flight = self.pending.drain(..n).collect();
        !self.in_flight.is_empty()
    }

    fn delivered(&mut self) {
        let count = self.in_flight.len() as u64;
        self.in_flight.clear();
        self.sink.records_flushed.fetch_add(count, Ordering::Relaxed);
        self.sink.chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn failed(&mut self) {
        warn!(
            "Flush failed. Re-inserting {} records into the buffer",
            self.in_flight.len()
        );
        self.sink.chunks_failed.fetch_add(1, Ordering::Relaxed);
        self.failed.append(&mut self.in_flight);
    }
}

impl Drop for FlushContext<'_> {
    fn drop(&mut self) {
        let mut undelivered = std::mem::take(&mut self.failed);
        undelivered.append(&mut self.in_flight);
        undelivered.extend(self.pending.drain(..));
        if undelivered.is_empty() {
            return;
        }
        self.sink
            .records_requeued
            .fetch_add(undelivered.len() as u64, Ordering::Relaxed);
        self.sink.buffer.add_batch(undelivered);
    }
}
