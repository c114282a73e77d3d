use crate::error::AgentResult;
use crate::service::Service;
use crate::sink::EventSink;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Periodically flushes the sink: sleep first, then flush
pub struct PushService {
    sink: Arc<EventSink>,
    interval: RwLock<Duration>,
}

impl PushService {
    pub fn new(sink: Arc<EventSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval: RwLock::new(interval),
        }
    }

    pub fn interval(&self) -> Duration {
        *self.interval.read()
    }

    pub fn set_interval(&self, interval: Duration) {
        *self.interval.write() = interval;
    }
}

#[async_trait]
impl Service for PushService {
    fn name(&self) -> &str {
        "output"
    }

    async fn execute(&self, token: &CancellationToken) -> AgentResult<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval()) => {}
            }

            if let Err(e) = self.sink.flush(token).await {
                error!(output = self.sink.output_name(), error = %e, "Error flushing records");
            }
        }
        Ok(())
    }

    /// Last best-effort flush, bounded by the stop deadline
    async fn on_stop(&self, token: &CancellationToken) -> AgentResult<()> {
        debug!("Final flush before shutdown");
        if let Err(e) = self.sink.flush(token).await {
            warn!(error = %e, "Final flush failed");
        }
        Ok(())
    }
}
