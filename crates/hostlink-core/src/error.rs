//! Error types for hostlink-core

use crate::config::ConfigError;
use thiserror::Error;

/// Errors surfaced by outputs, services and the runtime
#[derive(Debug, Error)]
pub enum AgentError {
    /// Cooperative cancellation observed through a cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Output transport failed in a way the output could not handle itself
    #[error("Output error: {0}")]
    Output(String),

    /// Service lifecycle or execution failure
    #[error("Service error: {0}")]
    Service(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// True for cooperative cancellation, which is never reported as a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }

    /// Create an output error from a message
    pub fn output(message: impl Into<String>) -> Self {
        AgentError::Output(message.into())
    }

    /// Create a service error from a message
    pub fn service(message: impl Into<String>) -> Self {
        AgentError::Service(message.into())
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
