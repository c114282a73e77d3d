//! Agent handshake
//!
//! Establishes the refresh token the authenticator works from. Runs once
//! before the runtime starts and tries, in order:
//!
//! 1. the refresh token persisted by a previous run
//! 2. registration pre-approved by the configured registration token
//! 3. anonymous registration awaiting operator approval
//!
//! and retries the whole sequence with exponential backoff until one of them
//! yields an access token or the caller cancels.
//!
//! [`Reauthenticator`] repeats the handshake later, when the service stops
//! accepting the refresh token the first one established.

use crate::auth::HandshakeAuth;
use crate::client::ApiClient;
use crate::clock::{Clock, SystemClock};
use crate::error::{CloudError, CloudResult};
use crate::jwt;
use crate::token_store::TokenStorage;
use crate::types::RegistrationRequest;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// First delay between handshake rounds
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(5);

/// Longest delay between handshake rounds
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Doubles `delay`, capped at `max`
pub fn next_backoff(delay: Duration, max: Duration) -> Duration {
    delay.saturating_mul(2).min(max)
}

/// Bootstrap of trust with the ingestion service
pub struct AgentHandshake {
    client: ApiClient,
    storage: Arc<dyn TokenStorage>,
    auth: Arc<dyn HandshakeAuth>,
    clock: Arc<dyn Clock>,
    subscription: Uuid,
    registration_token: Option<String>,
    device_id: String,
    initial_backoff: Duration,
    max_backoff: Duration,
    /// Longest retry-after the server asked for during the current round
    retry_after: Mutex<Option<Duration>>,
}

impl AgentHandshake {
    pub fn new(
        client: ApiClient,
        storage: Arc<dyn TokenStorage>,
        auth: Arc<dyn HandshakeAuth>,
        subscription: Uuid,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            storage,
            auth,
            clock: Arc::new(SystemClock),
            subscription,
            registration_token: None,
            device_id: device_id.into(),
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            retry_after: Mutex::new(None),
        }
    }

    /// Static credential that pre-approves registration
    pub fn with_registration_token(mut self, token: Option<String>) -> Self {
        self.registration_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Run the handshake until it succeeds
    ///
    /// Only returns an error when `token` is cancelled.
    pub async fn perform(&self, token: &CancellationToken) -> CloudResult<()> {
        let mut delay = self.initial_backoff;
        info!("Executing agent handshake");

        while !self.attempt(token).await? {
            let wait = self.retry_delay(delay);
            warn!("Agent handshake failed. Next handshake attempt in {:?}", wait);
            tokio::select! {
                _ = token.cancelled() => return Err(CloudError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            delay = next_backoff(delay, self.max_backoff);
        }

        info!("Agent handshake completed successfully");
        Ok(())
    }

    /// One round of stored token, registration token and manual approval
    ///
    /// `Ok(true)` once a strategy yields an access token.
    pub async fn attempt(&self, token: &CancellationToken) -> CloudResult<bool> {
        if token.is_cancelled() {
            return Err(CloudError::Cancelled);
        }
        self.retry_after.lock().take();

        Ok(self.with_stored_token(token).await?
            || self.with_configured_token(token).await?
            || self.with_manual_approval(token).await?)
    }

    /// `delay`, stretched to the longest retry-after of the last round
    fn retry_delay(&self, delay: Duration) -> Duration {
        self.retry_after
            .lock()
            .take()
            .map_or(delay, |after| after.max(delay))
    }

    fn note_failure(&self, error: &CloudError) {
        if let CloudError::RateLimited(secs) = error {
            let after = Duration::from_secs(*secs);
            let mut retry_after = self.retry_after.lock();
            *retry_after = Some(retry_after.map_or(after, |current| current.max(after)));
        }
    }

    async fn with_stored_token(&self, token: &CancellationToken) -> CloudResult<bool> {
        let stored = match self.storage.retrieve().await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("No stored refresh token");
                return Ok(false);
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stored refresh token");
                return Ok(false);
            }
        };

        match jwt::is_expired(&stored, self.clock.now()) {
            Ok(false) => {}
            Ok(true) => {
                info!("Stored refresh token expired, discarding");
                self.discard_stored().await;
                return Ok(false);
            }
            Err(e) => {
                error!(error = %e, "Failed to deserialize stored token");
                self.discard_stored().await;
                return Ok(false);
            }
        }

        self.refresh_with(&stored, token).await
    }

    async fn with_configured_token(&self, token: &CancellationToken) -> CloudResult<bool> {
        let Some(registration_token) = self.registration_token.as_deref() else {
            return Ok(false);
        };

        let Some(handshake_token) = self.register(Some(registration_token), token).await? else {
            warn!("Handshake with configured registration token failed");
            return Ok(false);
        };

        if !self.refresh_with(&handshake_token, token).await? {
            warn!("Refresh with configured registration token failed");
            return Ok(false);
        }
        Ok(true)
    }

    async fn with_manual_approval(&self, token: &CancellationToken) -> CloudResult<bool> {
        let Some(handshake_token) = self.register(None, token).await? else {
            warn!("Handshake with manual approval failed");
            return Ok(false);
        };

        if !self.refresh_with(&handshake_token, token).await? {
            warn!("Refresh with manual approval failed");
            return Ok(false);
        }
        Ok(true)
    }

    /// Post a registration and seed the authenticator with the handshake token
    async fn register(
        &self,
        registration_token: Option<&str>,
        token: &CancellationToken,
    ) -> CloudResult<Option<String>> {
        let request = RegistrationRequest::for_machine(&self.device_id, self.subscription);
        let result = tokio::select! {
            _ = token.cancelled() => return Err(CloudError::Cancelled),
            result = self.client.handshake(&request, registration_token) => result,
        };

        match result {
            Ok(response) => {
                if let Err(e) = self.auth.set_initial_token(&response.handshake_token).await {
                    warn!(error = %e, "Failed to persist handshake token");
                }
                Ok(Some(response.handshake_token))
            }
            Err(e) => {
                warn!(error = %e, "Agent handshake had an unsuccessful response");
                self.note_failure(&e);
                Ok(None)
            }
        }
    }

    /// Exchange `refresh_token`, succeeding only when an access token is granted
    async fn refresh_with(
        &self,
        refresh_token: &str,
        token: &CancellationToken,
    ) -> CloudResult<bool> {
        let result = tokio::select! {
            _ = token.cancelled() => return Err(CloudError::Cancelled),
            result = self.client.refresh(refresh_token) => result,
        };

        match result {
            Ok(response) => {
                if let Err(e) = self.auth.set_initial_token(&response.refresh_token).await {
                    warn!(error = %e, "Failed to persist refresh token");
                }
                Ok(response.granted_access_token().is_some())
            }
            Err(e) => {
                warn!(error = %e, "Unable to refresh with token");
                self.note_failure(&e);
                Ok(false)
            }
        }
    }

    async fn discard_stored(&self) {
        if let Err(e) = self.storage.delete().await {
            warn!(error = %e, "Failed to delete stored refresh token");
        }
    }
}

#[derive(Debug)]
struct ReauthState {
    delay: Duration,
    not_before: Option<DateTime<Utc>>,
}

/// Repeats the handshake after the service rejects the agent's credentials
///
/// Each call makes at most one handshake round. A failed round closes the
/// gate for the current backoff delay, or longer when the service asked to
/// be left alone, so callers on a short interval do not hammer it.
pub struct Reauthenticator {
    handshake: AgentHandshake,
    state: tokio::sync::Mutex<ReauthState>,
}

impl Reauthenticator {
    pub fn new(handshake: AgentHandshake) -> Self {
        let delay = handshake.initial_backoff;
        Self {
            handshake,
            state: tokio::sync::Mutex::new(ReauthState {
                delay,
                not_before: None,
            }),
        }
    }

    /// When the next round is allowed, if a failed round closed the gate
    pub async fn not_before(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.not_before
    }

    /// Run one handshake round unless still backing off
    ///
    /// `Ok(true)` when the authenticator holds fresh credentials.
    pub async fn recover(&self, token: &CancellationToken) -> CloudResult<bool> {
        let mut state = tokio::select! {
            _ = token.cancelled() => return Err(CloudError::Cancelled),
            state = self.state.lock() => state,
        };

        let now = self.handshake.clock.now();
        if let Some(at) = state.not_before.filter(|at| now < *at) {
            debug!(retry_at = %at, "Agent handshake backing off");
            return Ok(false);
        }

        info!("Credentials rejected, repeating agent handshake");
        if self.handshake.attempt(token).await? {
            info!("Agent handshake completed successfully");
            state.delay = self.handshake.initial_backoff;
            state.not_before = None;
            return Ok(true);
        }

        let wait = self.handshake.retry_delay(state.delay);
        warn!("Agent handshake failed. Next handshake attempt in {:?}", wait);
        state.not_before = chrono::Duration::from_std(wait)
            .ok()
            .and_then(|wait| now.checked_add_signed(wait));
        state.delay = next_backoff(state.delay, self.handshake.max_backoff);
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OutputAuthenticator;
    use crate::token_store::MemoryTokenStorage;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut delay = INITIAL_BACKOFF;
        let mut seen = vec![delay];
        for _ in 0..8 {
            delay = next_backoff(delay, MAX_BACKOFF);
            seen.push(delay);
        }

        let secs: Vec<u64> = seen.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![5, 10, 20, 40, 80, 160, 300, 300, 300]);
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(next_backoff(Duration::MAX, MAX_BACKOFF), MAX_BACKOFF);
    }

    #[test]
    fn test_retry_delay_stretches_to_rate_limit() {
        let client = ApiClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let storage = Arc::new(MemoryTokenStorage::new());
        let auth = Arc::new(OutputAuthenticator::new(client.clone(), storage.clone()));
        let handshake = AgentHandshake::new(client, storage, auth, Uuid::nil(), "device");
        let delay = Duration::from_secs(5);

        assert_eq!(handshake.retry_delay(delay), delay);

        handshake.note_failure(&CloudError::RateLimited(30));
        handshake.note_failure(&CloudError::RateLimited(10));
        handshake.note_failure(&CloudError::server(503, "busy"));
        assert_eq!(handshake.retry_delay(delay), Duration::from_secs(30));
        assert_eq!(handshake.retry_delay(delay), delay, "consumed by the first wait");

        handshake.note_failure(&CloudError::RateLimited(1));
        assert_eq!(handshake.retry_delay(delay), delay);
    }
}
