//! Hostlink Cloud - remote delivery of agent records
//!
//! This crate connects the agent to the ingestion service:
//!
//! - **Remote output** - uploads record chunks as JSON arrays
//! - **Authenticator** - refresh-ahead access tokens with single-flight refresh
//! - **Handshake** - stored token, registration token, then manual approval;
//!   repeated when the service later rejects the refresh token
//! - **Token storage** - the refresh token persisted under the data path
//! - **Device identity** - stable identifier used on registration
//!
//! ## Quick Start
//!
//! ```no_run
//! use hostlink_cloud::CloudConnector;
//! use hostlink_core::AgentConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::default();
//!     let connector = CloudConnector::from_config(&config.output)?;
//!
//!     // Blocks until the service grants an access token
//!     connector.handshake().perform(&CancellationToken::new()).await?;
//!
//!     let output = connector.output();
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod clock;
pub mod device;
pub mod error;
pub mod handshake;
pub mod jwt;
pub mod output;
pub mod token_store;
pub mod types;

// Re-exports for convenience
pub use auth::{HandshakeAuth, OutputAuth, OutputAuthenticator};
pub use client::ApiClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use device::device_identifier;
pub use error::{CloudError, CloudResult};
pub use handshake::{AgentHandshake, Reauthenticator};
pub use output::{RemoteEventOutput, RemoteOutputStats};
pub use token_store::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use types::{RefreshResponse, RegistrationRequest, RegistrationResponse};

use hostlink_core::config::OutputConfig;
use std::sync::Arc;
use uuid::Uuid;

/// Wires client, token storage, authenticator, handshake and output together
///
/// The handshake and the output share one authenticator, so the token the
/// handshake establishes is the one uploads refresh from.
pub struct CloudConnector {
    client: ApiClient,
    storage: Arc<dyn TokenStorage>,
    auth: Arc<OutputAuthenticator>,
    clock: Arc<dyn Clock>,
    subscription: Uuid,
    registration_token: Option<String>,
}

impl CloudConnector {
    /// Connector for a remote `[output]` section
    pub fn from_config(config: &OutputConfig) -> CloudResult<Self> {
        if config.is_console() {
            return Err(CloudError::Config(
                "console endpoint does not use the ingestion service".to_string(),
            ));
        }

        let client = ApiClient::new(&config.endpoint, config.request_timeout)?;
        let storage = Arc::new(FileTokenStorage::new(&config.data_path)?);
        Ok(Self::new(client, storage, config.subscription)
            .with_registration_token(config.registration_token().map(str::to_string)))
    }

    pub fn new(client: ApiClient, storage: Arc<dyn TokenStorage>, subscription: Uuid) -> Self {
        Self::with_clock(client, storage, subscription, Arc::new(SystemClock))
    }

    pub fn with_clock(
        client: ApiClient,
        storage: Arc<dyn TokenStorage>,
        subscription: Uuid,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let auth = Arc::new(OutputAuthenticator::with_clock(
            client.clone(),
            storage.clone(),
            clock.clone(),
        ));
        Self {
            client,
            storage,
            auth,
            clock,
            subscription,
            registration_token: None,
        }
    }

    pub fn with_registration_token(mut self, token: Option<String>) -> Self {
        self.registration_token = token;
        self
    }

    pub fn authenticator(&self) -> Arc<OutputAuthenticator> {
        self.auth.clone()
    }

    /// Handshake for this machine
    pub fn handshake(&self) -> AgentHandshake {
        AgentHandshake::new(
            self.client.clone(),
            self.storage.clone(),
            self.auth.clone(),
            self.subscription,
            device_identifier(),
        )
        .with_registration_token(self.registration_token.clone())
        .with_clock(self.clock.clone())
    }

    /// Output uploading through the shared authenticator
    ///
    /// Repeats the handshake when the service rejects the refresh token.
    pub fn output(&self) -> Arc<RemoteEventOutput> {
        let reauth = Arc::new(Reauthenticator::new(self.handshake()));
        Arc::new(
            RemoteEventOutput::new(self.client.clone(), self.auth.clone(), self.subscription)
                .with_reauthentication(reauth),
        )
    }
}
