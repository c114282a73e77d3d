//! Wire models for the ingestion service API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response of `GET /agents/collector-client/refresh`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    /// Replacement refresh token, persisted for the next start
    #[serde(rename = "RefreshToken", alias = "refreshToken", alias = "refresh_token")]
    pub refresh_token: String,

    /// Short-lived bearer token for data-plane calls
    #[serde(
        rename = "AccessToken",
        alias = "accessToken",
        alias = "access_token",
        default
    )]
    pub access_token: Option<String>,

    #[serde(
        rename = "ExpiresUtc",
        alias = "expiresUtc",
        alias = "expires_utc",
        default
    )]
    pub expires_utc: Option<DateTime<Utc>>,
}

impl RefreshResponse {
    /// The access token, if the server granted a non-blank one
    pub fn granted_access_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }
}

/// Body of `POST /agents/collector-client/handshake`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistrationRequest {
    pub name: String,
    pub host_name: String,
    /// Stable device identifier, see [`crate::device::device_identifier`]
    pub machine_identifier: String,
    pub attributes: Vec<String>,
    pub subscription: Uuid,
}

impl RegistrationRequest {
    /// Registration for this machine
    pub fn for_machine(machine_identifier: impl Into<String>, subscription: Uuid) -> Self {
        let name = hostlink_core::record::machine_name().to_string();
        Self {
            host_name: name.clone(),
            name,
            machine_identifier: machine_identifier.into(),
            attributes: Vec::new(),
            subscription,
        }
    }
}

/// Response of `POST /agents/collector-client/handshake`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// Token to present to the refresh endpoint
    #[serde(
        rename = "HandshakeToken",
        alias = "handshakeToken",
        alias = "handshake_token"
    )]
    pub handshake_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_response_pascal_case() {
        let json = r#"{
            "RefreshToken": "r1",
            "AccessToken": "a1",
            "ExpiresUtc": "2030-01-01T00:00:00Z"
        }"#;
        let response: RefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.refresh_token, "r1");
        assert_eq!(response.granted_access_token(), Some("a1"));
        assert!(response.expires_utc.is_some());
    }

    #[test]
    fn test_refresh_response_camel_case() {
        let json = r#"{"refreshToken": "r1", "accessToken": "  "}"#;
        let response: RefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.refresh_token, "r1");
        assert_eq!(response.granted_access_token(), None);
        assert!(response.expires_utc.is_none());
    }

    #[test]
    fn test_registration_request_serialization() {
        let subscription = Uuid::new_v4();
        let request = RegistrationRequest {
            name: "host-a".to_string(),
            host_name: "host-a".to_string(),
            machine_identifier: "abc".to_string(),
            attributes: Vec::new(),
            subscription,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["Name"], "host-a");
        assert_eq!(json["HostName"], "host-a");
        assert_eq!(json["MachineIdentifier"], "abc");
        assert_eq!(json["Attributes"], serde_json::json!([]));
        assert_eq!(json["Subscription"], subscription.to_string());
    }

    #[test]
    fn test_registration_response_aliases() {
        let a: RegistrationResponse = serde_json::from_str(r#"{"HandshakeToken":"h"}"#).unwrap();
        let b: RegistrationResponse = serde_json::from_str(r#"{"handshakeToken":"h"}"#).unwrap();
        assert_eq!(a, b);
    }
}
