//! Signed, time-limited session tokens.
//!
//! Tokens are compact JWTs signed with HMAC-SHA256:
//!
//! ```text
//! base64url(header) "." base64url(claims) "." base64url(signature)
//! ```
//!
//! They are never stored server-side, so there is no revocation: a token
//! is valid until `exp` passes.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::crypto::SecretKey;
use crate::errors::{KeeperError, Result};
use crate::storage::UserId;

/// Default lifetime of an issued token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// The payload carried by every token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    /// Expiry as a unix timestamp in seconds.
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Issues and validates session tokens under one signing key.
#[derive(Clone, Debug)]
pub struct TokenService {
    key: SecretKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(key: SecretKey, ttl: Duration) -> Self {
        Self { key, ttl }
    }

    /// Mint a token for `user_id` that expires `ttl` from now.
    pub fn issue(&self, user_id: UserId) -> Result<String> {
        self.issue_at(user_id, Utc::now())
    }

    /// Mint a token as if the current time were `now`.
    pub fn issue_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<String> {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            user_id,
            exp: now.timestamp().saturating_add(ttl),
        };
        self.encode(&claims)
    }

    /// Validate a token and return the user it was issued to.
    pub fn validate(&self, token: &str) -> Result<UserId> {
        self.validate_at(token, Utc::now())
    }

    /// Validate a token as if the current time were `now`.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<UserId> {
        let claims = self.decode(token)?;
        if claims.exp <= now.timestamp() {
            debug!(user_id = claims.user_id, "token expired");
            return Err(KeeperError::denied("token expired"));
        }
        Ok(claims.user_id)
    }

    fn encode(&self, claims: &Claims) -> Result<String> {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{header}.{payload}");

        let signature = self.mac()?.chain_update(signing_input.as_bytes()).finalize();
        let signature = URL_SAFE_NO_PAD.encode(signature.into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    fn decode(&self, token: &str) -> Result<Claims> {
        let token = token.trim();
        if token.is_empty() {
            return Err(KeeperError::denied("missing token"));
        }

        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(KeeperError::denied("invalid token"));
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(segments[0].as_bytes())
            .map_err(|_| KeeperError::denied("invalid token"))?;
        let header: Header = serde_json::from_slice(&header_bytes)
            .map_err(|_| KeeperError::denied("invalid token"))?;
        if header.alg != ALGORITHM {
            return Err(KeeperError::denied("invalid token"));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(segments[2].as_bytes())
            .map_err(|_| KeeperError::denied("invalid token"))?;
        let signing_input = format!("{}.{}", segments[0], segments[1]);
        self.mac()?
            .chain_update(signing_input.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| KeeperError::denied("invalid token"))?;

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].as_bytes())
            .map_err(|_| KeeperError::denied("invalid token"))?;
        serde_json::from_slice(&payload).map_err(|_| KeeperError::denied("invalid token"))
    }

    fn mac(&self) -> Result<Hmac<Sha256>> {
        Hmac::<Sha256>::new_from_slice(self.key.as_bytes())
            .map_err(|e| KeeperError::Internal(format!("invalid signing key: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(SecretKey::new("jwt-signing-key"), DEFAULT_TOKEN_TTL)
    }

    #[test]
    fn token_has_three_segments() {
        let token = service().issue(7).unwrap();
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn claims_carry_expiry() {
        let svc = service();
        let now = Utc::now();
        let token = svc.issue_at(7, now).unwrap();
        let claims = svc.decode(&token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.exp, now.timestamp() + 3600);
        assert!(claims.expires_at().is_some());
    }

    #[test]
    fn empty_token_is_missing() {
        let err = service().validate("   ").unwrap_err();
        assert_eq!(err.to_string(), "missing token");
    }

    #[test]
    fn unsigned_algorithm_is_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"user_id":1,"exp":99999999999}"#);
        let token = format!("{header}.{payload}.");
        let err = service().validate(&token).unwrap_err();
        assert_eq!(err.to_string(), "invalid token");
    }

    #[test]
    fn swapped_payload_breaks_signature() {
        let svc = service();
        let token = svc.issue(1).unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"user_id":2,"exp":99999999999}"#);
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert!(svc.validate(&forged).is_err());
    }
}
