//! Output transports for drained record chunks

mod console;

pub use console::ConsoleEventOutput;

use crate::error::AgentResult;
use crate::record::Record;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Destination for record chunks
///
/// `Ok(true)` means the chunk was delivered, `Ok(false)` is a handled
/// transport failure and the caller requeues the chunk.
/// `Err(AgentError::Cancelled)` reports cooperative cancellation; any other
/// error is unexpected and propagates.
#[async_trait]
pub trait EventOutput: Send + Sync {
    /// Output name for logging
    fn name(&self) -> &str;

    /// Deliver one chunk of records
    async fn send(&self, records: &[Record], token: &CancellationToken) -> AgentResult<bool>;
}
