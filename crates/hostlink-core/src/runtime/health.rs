use crate::buffer::EventBuffer;
use crate::error::AgentResult;
use crate::record::Record;
use crate::service::{ErrorPolicy, IntervalService};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Schema of the agent's own liveness records
pub const AGENT_UPTIME_SCHEMA: &str = "Agent.Uptime";

/// Emits an uptime record every interval
pub struct AgentHealthService {
    buffer: Arc<dyn EventBuffer>,
    interval: RwLock<Duration>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl AgentHealthService {
    pub fn new(buffer: Arc<dyn EventBuffer>, interval: Duration) -> Self {
        Self {
            buffer,
            interval: RwLock::new(interval),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn set_interval(&self, interval: Duration) {
        *self.interval.write() = interval;
    }

    fn uptime_record(&self) -> Record {
        let uptime = self.started.elapsed();
        Record::new(AGENT_UPTIME_SCHEMA)
            .with("startTime", self.started_at)
            .with("interval", format_span(self.interval()))
            .with("value", format_span(uptime))
            .with("counter", uptime.as_secs_f64() * 1000.0)
    }
}

#[async_trait]
impl IntervalService for AgentHealthService {
    fn name(&self) -> &str {
        "agenthealth"
    }

    fn interval(&self) -> Duration {
        *self.interval.read()
    }

    fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::Continue
    }

    async fn execute_single(&self, _token: &CancellationToken) -> AgentResult<()> {
        self.buffer.add(self.uptime_record());
        Ok(())
    }
}

/// `[d.]hh:mm:ss.fff`
fn format_span(span: Duration) -> String {
    let total = span.as_secs();
    let (days, hours) = (total / 86_400, (total % 86_400) / 3_600);
    let (minutes, seconds) = ((total % 3_600) / 60, total % 60);
    let millis = span.subsec_millis();
    if days > 0 {
        format!("{days}.{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}
