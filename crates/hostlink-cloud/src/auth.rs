//! Access token lifecycle
//!
//! [`OutputAuthenticator`] holds the refresh token obtained by the handshake
//! and trades it for short-lived access tokens. Access tokens are refreshed
//! halfway through their validity so an almost-expired token is never sent.
//! Concurrent callers that find the token due share one refresh round-trip.

use crate::client::ApiClient;
use crate::clock::{Clock, SystemClock};
use crate::error::{CloudError, CloudResult};
use crate::jwt;
use crate::token_store::TokenStorage;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Authorization for data-plane requests
#[async_trait]
pub trait OutputAuth: Send + Sync {
    /// Bearer token for the next request, refreshing first when one is due
    ///
    /// `Ok(None)` means no token could be obtained and the request must not
    /// be sent.
    async fn try_access_token(&self, token: &CancellationToken) -> CloudResult<Option<String>>;

    /// Drop the cached access token so the next call refreshes
    fn invalidate(&self);
}

/// Seeding of the refresh token by the handshake
#[async_trait]
pub trait HandshakeAuth: OutputAuth {
    async fn set_initial_token(&self, refresh_token: &str) -> CloudResult<()>;
}

#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    refresh_at: Option<DateTime<Utc>>,
    refresh_token: Option<String>,
}

impl TokenState {
    fn requires_refresh(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_none() || self.refresh_at.is_none_or(|at| at <= now)
    }
}

/// Token authenticator backed by the refresh endpoint
pub struct OutputAuthenticator {
    client: ApiClient,
    storage: Arc<dyn TokenStorage>,
    clock: Arc<dyn Clock>,
    state: Mutex<TokenState>,
    /// Single-flight gate for refreshes
    gate: tokio::sync::Mutex<()>,
}

impl OutputAuthenticator {
    pub fn new(client: ApiClient, storage: Arc<dyn TokenStorage>) -> Self {
        Self::with_clock(client, storage, Arc::new(SystemClock))
    }

    pub fn with_clock(
        client: ApiClient,
        storage: Arc<dyn TokenStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            storage,
            clock,
            state: Mutex::new(TokenState::default()),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// When the current access token is due for refresh
    pub fn refresh_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().refresh_at
    }

    pub fn has_access_token(&self) -> bool {
        self.state.lock().access_token.is_some()
    }

    fn requires_refresh(&self) -> bool {
        self.state.lock().requires_refresh(self.clock.now())
    }

    async fn refresh(&self, token: &CancellationToken) -> CloudResult<()> {
        let _gate = tokio::select! {
            _ = token.cancelled() => return Err(CloudError::Cancelled),
            guard = self.gate.lock() => guard,
        };

        // Another caller may have refreshed while we waited
        if !self.requires_refresh() {
            debug!("Access token refreshed by a concurrent caller");
            return Ok(());
        }

        let result = self.refresh_locked(token).await;
        if let Err(e) = &result {
            if !matches!(e, CloudError::Cancelled) {
                error!(error = %e, "Failed to get access token");
            }
            self.state.lock().access_token = None;
        }
        result
    }

    async fn refresh_locked(&self, token: &CancellationToken) -> CloudResult<()> {
        let refresh_token = self
            .state
            .lock()
            .refresh_token
            .clone()
            .ok_or(CloudError::NotInitialized)?;

        info!("Refreshing access token");
        let response = tokio::select! {
            _ = token.cancelled() => return Err(CloudError::Cancelled),
            response = self.client.refresh(&refresh_token) => response?,
        };

        // The server rotates refresh tokens, keep the new one even if the
        // access token below turns out to be unusable
        self.state.lock().refresh_token = Some(response.refresh_token.clone());
        if let Err(e) = self.storage.store(&response.refresh_token).await {
            warn!(error = %e, "Failed to persist refresh token");
        }

        let access_token = response.granted_access_token().map(str::to_string);
        let refresh_at = match &access_token {
            Some(access) => Some(self.refresh_deadline(jwt::expires_at(access)?)),
            None => None,
        };

        let mut state = self.state.lock();
        state.access_token = access_token;
        state.refresh_at = refresh_at;
        if let Some(at) = refresh_at {
            debug!(refresh_at = %at, "Access token refreshed");
        }
        Ok(())
    }

    /// Halfway between now and `expires`
    fn refresh_deadline(&self, expires: DateTime<Utc>) -> DateTime<Utc> {
        let now = self.clock.now();
        now + (expires - now).max(Duration::zero()) / 2
    }
}

#[async_trait]
impl OutputAuth for OutputAuthenticator {
    async fn try_access_token(&self, token: &CancellationToken) -> CloudResult<Option<String>> {
        if self.requires_refresh() {
            self.refresh(token).await?;
        }

        let access_token = self.state.lock().access_token.clone();
        if access_token.is_none() {
            warn!("No access token resolved. Agent requires permissions for upload");
        }
        Ok(access_token)
    }

    fn invalidate(&self) {
        debug!("Invalidating access token");
        self.state.lock().access_token = None;
    }
}

#[async_trait]
impl HandshakeAuth for OutputAuthenticator {
    async fn set_initial_token(&self, refresh_token: &str) -> CloudResult<()> {
        self.state.lock().refresh_token = Some(refresh_token.to_string());
        self.storage.store(refresh_token).await
    }
}
