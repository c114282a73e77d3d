//! Remote event output
//!
//! Uploads record chunks to `PUT {endpoint}/inflow/{subscription}`. HTTP
//! failures are reported as `Ok(false)` so the sink requeues the chunk.
//! When the service rejects the refresh token, the output repeats the agent
//! handshake through its [`Reauthenticator`] before giving up on the chunk.

use crate::auth::OutputAuth;
use crate::client::ApiClient;
use crate::error::{CloudError, CloudResult};
use crate::handshake::Reauthenticator;
use async_trait::async_trait;
use hostlink_core::{AgentError, AgentResult, EventOutput, Record};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Upload counters
#[derive(Debug, Clone, Default)]
pub struct RemoteOutputStats {
    pub requests_sent: u64,
    pub requests_failed: u64,
    pub unauthorized: u64,
    pub records_uploaded: u64,
}

/// Event output backed by the ingestion service
pub struct RemoteEventOutput {
    client: ApiClient,
    auth: Arc<dyn OutputAuth>,
    reauth: Option<Arc<Reauthenticator>>,
    subscription: Uuid,
    requests_sent: AtomicU64,
    requests_failed: AtomicU64,
    unauthorized: AtomicU64,
    records_uploaded: AtomicU64,
}

impl RemoteEventOutput {
    pub fn new(client: ApiClient, auth: Arc<dyn OutputAuth>, subscription: Uuid) -> Self {
        Self {
            client,
            auth,
            reauth: None,
            subscription,
            requests_sent: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            unauthorized: AtomicU64::new(0),
            records_uploaded: AtomicU64::new(0),
        }
    }

    /// Repeat the handshake when the refresh token is rejected
    pub fn with_reauthentication(mut self, reauth: Arc<Reauthenticator>) -> Self {
        self.reauth = Some(reauth);
        self
    }

    pub fn stats(&self) -> RemoteOutputStats {
        RemoteOutputStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            unauthorized: self.unauthorized.load(Ordering::Relaxed),
            records_uploaded: self.records_uploaded.load(Ordering::Relaxed),
        }
    }
}

impl RemoteEventOutput {
    async fn access_token(&self, token: &CancellationToken) -> CloudResult<Option<String>> {
        let error = match self.auth.try_access_token(token).await {
            Err(e) if e.is_auth_error() => e,
            other => return other,
        };
        let Some(reauth) = &self.reauth else {
            return Err(error);
        };

        warn!(error = %error, "Upload credentials rejected");
        if reauth.recover(token).await? {
            self.auth.try_access_token(token).await
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl EventOutput for RemoteEventOutput {
    fn name(&self) -> &str {
        "remote"
    }

    async fn send(&self, records: &[Record], token: &CancellationToken) -> AgentResult<bool> {
        if records.is_empty() {
            return Ok(true);
        }

        let body = serde_json::to_vec(records)?;

        let access_token = match self.access_token(token).await {
            Ok(Some(access_token)) => access_token,
            Ok(None) => return Ok(false),
            Err(CloudError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                error!(error = %e, "Unable to authorize upload");
                return Ok(false);
            }
        };

        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        let result = tokio::select! {
            _ = token.cancelled() => return Err(AgentError::Cancelled),
            result = self.client.put_inflow(self.subscription, body, &access_token) => result,
        };

        match result {
            Ok(()) => {
                debug!(count = records.len(), "Uploaded records");
                self.records_uploaded
                    .fetch_add(records.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                if e.is_auth_error() {
                    self.unauthorized.fetch_add(1, Ordering::Relaxed);
                    self.auth.invalidate();
                }
                warn!(
                    url = %self.client.inflow_url(self.subscription),
                    error = %e,
                    "Failed to upload records"
                );
                Ok(false)
            }
        }
    }
}
