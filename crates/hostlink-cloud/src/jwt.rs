//! Expiry inspection of bearer tokens
//!
//! The agent never verifies token signatures, it only reads `exp` to decide
//! when to refresh. Verification is the server's job.

use crate::error::{CloudError, CloudResult};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: Option<i64>,
}

/// Read the `exp` claim of `token` without verifying its signature
pub fn expires_at(token: &str) -> CloudResult<DateTime<Utc>> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    let exp = data
        .claims
        .exp
        .ok_or_else(|| CloudError::from(jsonwebtoken::errors::Error::from(missing_exp())))?;

    DateTime::from_timestamp(exp, 0)
        .ok_or_else(|| CloudError::from(jsonwebtoken::errors::Error::from(ErrorKind::InvalidToken)))
}

/// Whether `token` has expired at `now`
///
/// A token without a readable `exp` claim is an error, not expired.
pub fn is_expired(token: &str, now: DateTime<Utc>) -> CloudResult<bool> {
    Ok(expires_at(token)? <= now)
}

fn missing_exp() -> ErrorKind {
    ErrorKind::MissingRequiredClaim("exp".to_string())
}


#[cfg(test)]
mod tests {
    use super::test_tokens::token_expiring;
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn test_expires_at_reads_exp() {
        let exp = DateTime::from_timestamp(Utc::now().timestamp() + 3600, 0).unwrap();
        let token = token_expiring(exp);
        assert_eq!(expires_at(&token).unwrap(), exp);
    }

    #[test]
    fn test_expired_token_still_decodes() {
        let exp = DateTime::from_timestamp(Utc::now().timestamp() - 3600, 0).unwrap();
        let token = token_expiring(exp);
        assert_eq!(expires_at(&token).unwrap(), exp);
        assert!(is_expired(&token, Utc::now()).unwrap());
        assert!(!is_expired(&token, exp - Duration::seconds(1)).unwrap());
    }

    #[test]
    fn test_foreign_signature_accepted() {
        let token = encode(
            &Header::default(),
            &serde_json::json!({ "exp": 4_102_444_800i64 }),
            &EncodingKey::from_secret(b"someone-else"),
        )
        .unwrap();
        assert_eq!(expires_at(&token).unwrap().timestamp(), 4_102_444_800);
    }

    #[test]
    fn test_missing_exp() {
        let token = encode(
            &Header::default(),
            &serde_json::json!({ "sub": "agent" }),
            &EncodingKey::from_secret(b"k"),
        )
        .unwrap();
        assert!(matches!(expires_at(&token), Err(CloudError::InvalidToken(_))));
    }

    #[test]
    fn test_garbage_token() {
        assert!(expires_at("not-a-jwt").is_err());
        assert!(is_expired("", Utc::now()).is_err());
    }
}
