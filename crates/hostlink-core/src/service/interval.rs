use super::Service;
use crate::config::SourceConfig;
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// What an interval loop does when one iteration fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log and end the loop; the service stops normally
    #[default]
    Exit,
    /// Log and keep iterating
    Continue,
    /// Propagate the error to the supervisor
    Escalate,
}

/// A service that does one unit of work every `interval`
#[async_trait]
pub trait IntervalService: Send + Sync {
    fn name(&self) -> &str;

    /// Read before every sleep, so configuration changes apply on the next cycle
    fn interval(&self) -> Duration;

    fn is_enabled(&self) -> bool {
        true
    }

    fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::Exit
    }

    async fn on_start(&self, _token: &CancellationToken) -> AgentResult<()> {
        Ok(())
    }

    async fn execute_single(&self, token: &CancellationToken) -> AgentResult<()>;

    fn update_configuration(&self, _config: &SourceConfig) {}
}

/// Runs an [`IntervalService`] as a [`Service`]: work first, then sleep
pub struct IntervalRunner<T> {
    inner: T,
}

impl<T: IntervalService> IntervalRunner<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: IntervalService> Service for IntervalRunner<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    async fn on_start(&self, token: &CancellationToken) -> AgentResult<()> {
        self.inner.on_start(token).await
    }

    async fn execute(&self, token: &CancellationToken) -> AgentResult<()> {
        while !token.is_cancelled() {
            match self.inner.execute_single(token).await {
                Ok(()) => {}
                Err(AgentError::Cancelled) if token.is_cancelled() => break,
                Err(e) => {
                    let policy = self.inner.error_policy();
                    error!(
                        service = self.inner.name(),
                        policy = ?policy,
                        error = %e,
                        "Exception during service execution"
                    );
                    match policy {
                        ErrorPolicy::Exit => break,
                        ErrorPolicy::Continue => {}
                        ErrorPolicy::Escalate => return Err(e),
                    }
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.inner.interval()) => {}
            }
        }
        Ok(())
    }

    fn update_configuration(&self, config: &SourceConfig) {
        self.inner.update_configuration(config);
    }
}
