//! Service lifecycle contract
//!
//! Every long-running unit of the agent (collectors, the push loop, the
//! agent health emitter) implements [`Service`] and is run by a
//! [`ServiceHost`], which owns its task, its cancellation token and the
//! escalation of unexpected failures to the [`FatalHandler`].

mod host;
mod interval;

pub use host::{AbortOnFatal, FatalHandler, RecordingFatalHandler, ServiceHost, StopOutcome};
pub use interval::{ErrorPolicy, IntervalRunner, IntervalService};

use crate::config::SourceConfig;
use crate::error::AgentResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a hosted service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// A long-running unit of work with start, execute and stop phases
#[async_trait]
pub trait Service: Send + Sync {
    /// Service name for logging
    fn name(&self) -> &str;

    /// Disabled services are never started
    fn is_enabled(&self) -> bool {
        true
    }

    /// Prepare resources; runs on the service task before `execute`
    async fn on_start(&self, _token: &CancellationToken) -> AgentResult<()> {
        Ok(())
    }

    /// Main body; returns when `token` is cancelled or the work is done
    async fn execute(&self, token: &CancellationToken) -> AgentResult<()>;

    /// Release resources; `token` fires when the stop deadline passes
    async fn on_stop(&self, _token: &CancellationToken) -> AgentResult<()> {
        Ok(())
    }

    /// Apply a configuration block; blocks for other collector types are ignored
    fn update_configuration(&self, _config: &SourceConfig) {}
}
