//! HTTP client for the ingestion service REST API

use crate::error::{CloudError, CloudResult};
use crate::types::{RefreshResponse, RegistrationRequest, RegistrationResponse};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const REFRESH_PATH: &str = "agents/collector-client/refresh";
const HANDSHAKE_PATH: &str = "agents/collector-client/handshake";

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the ingestion service
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> CloudResult<Self> {
        url::Url::parse(base_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("hostlink-agent/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL records for `subscription` are uploaded to
    pub fn inflow_url(&self, subscription: Uuid) -> String {
        format!("{}/inflow/{}", self.base_url, subscription)
    }

    /// Upload a pre-serialized JSON array of records
    pub async fn put_inflow(
        &self,
        subscription: Uuid,
        body: Vec<u8>,
        access_token: &str,
    ) -> CloudResult<()> {
        let response = self
            .client
            .put(self.inflow_url(subscription))
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = read_body(response).await;
        if status == StatusCode::UNAUTHORIZED {
            Err(CloudError::Auth(body))
        } else {
            Err(CloudError::server(status.as_u16(), body))
        }
    }

    /// Exchange a refresh or handshake token for a new token pair
    pub async fn refresh(&self, refresh_token: &str) -> CloudResult<RefreshResponse> {
        let url = format!("{}/{}", self.base_url, REFRESH_PATH);

        debug!("Requesting token refresh");

        let response = self
            .client
            .get(&url)
            .bearer_auth(refresh_token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Register this agent, optionally pre-approved by a registration token
    pub async fn handshake(
        &self,
        request: &RegistrationRequest,
        registration_token: Option<&str>,
    ) -> CloudResult<RegistrationResponse> {
        let url = format!("{}/{}", self.base_url, HANDSHAKE_PATH);

        debug!(
            machine = %request.machine_identifier,
            authorized = registration_token.is_some(),
            "Posting agent handshake"
        );

        let mut builder = self.client.post(&url).json(request);
        if let Some(token) = registration_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        self.handle_response(response).await
    }

    /// Generic response handler
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> CloudResult<T> {
        let status = response.status();

        match status {
            _ if status.is_success() => {
                let body = response.json::<T>().await?;
                Ok(body)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = read_body(response).await;
                Err(CloudError::Auth(format!("{status}: {body}")))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                warn!("Rate limited, retry after {}s", retry_after);
                Err(CloudError::RateLimited(retry_after))
            }
            _ => {
                let body = read_body(response).await;
                Err(CloudError::server(status.as_u16(), body))
            }
        }
    }
}

async fn read_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
