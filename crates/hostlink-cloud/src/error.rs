//! Error types for hostlink-cloud

use hostlink_core::AgentError;
use thiserror::Error;

/// Errors from the ingestion service client, token handling and handshake
#[derive(Debug, Error)]
pub enum CloudError {
    /// Network/HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Authentication rejected by the server
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Refresh requested before any refresh token was known
    #[error("Authentication not initialized")]
    NotInitialized,

    /// Token could not be decoded
    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// Rate limited by server
    #[error("Rate limited: retry after {0}s")]
    RateLimited(u64),

    /// Unexpected HTTP status
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// Token storage error
    #[error("Token storage error: {0}")]
    TokenStore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

impl CloudError {
    /// Check if this error means the credentials are unusable
    pub fn is_auth_error(&self) -> bool {
        match self {
            CloudError::Auth(_) | CloudError::NotInitialized | CloudError::InvalidToken(_) => {
                true
            }
            CloudError::Server { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    /// Create a server error from status and message
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        CloudError::Server {
            status,
            message: message.into(),
        }
    }
}

impl From<CloudError> for AgentError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Cancelled => AgentError::Cancelled,
            other => AgentError::Output(other.to_string()),
        }
    }
}

/// Result type for cloud operations
pub type CloudResult<T> = Result<T, CloudError>;
