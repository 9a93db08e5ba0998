//! Request integrity tags.
//!
//! A client that shares the server's hash key sends
//! `HashSHA256 = base64(HMAC-SHA256(key, body))` with every call, where
//! `body` is the compact JSON encoding of the request body.  The server
//! recomputes the tag over the body it received and compares.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::{KeeperError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 of `data` under `key`.
pub fn compute_mac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| KeeperError::Internal(format!("invalid HMAC key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Compute the tag and encode it the way it travels in call metadata.
pub fn sign_body(key: &[u8], data: &[u8]) -> Result<String> {
    Ok(BASE64.encode(compute_mac(key, data)?))
}

/// Check a base64 tag against `data`.
///
/// Uses `hmac::Mac::verify_slice`, which compares in constant time.
/// Undecodable tags are treated exactly like wrong ones.
pub fn verify_body(key: &[u8], data: &[u8], encoded_tag: &str) -> Result<()> {
    let tag = BASE64
        .decode(encoded_tag.trim().as_bytes())
        .map_err(|_| KeeperError::denied("hashes don't match"))?;

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| KeeperError::Internal(format!("invalid HMAC key: {e}")))?;
    mac.update(data);
    mac.verify_slice(&tag)
        .map_err(|_| KeeperError::denied("hashes don't match"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_body_verifies() {
        let tag = sign_body(b"hash-key", br#"{"message":"ping"}"#).unwrap();
        verify_body(b"hash-key", br#"{"message":"ping"}"#, &tag).unwrap();
    }

    #[test]
    fn mutated_body_is_rejected() {
        let tag = sign_body(b"hash-key", br#"{"message":"ping"}"#).unwrap();
        let err = verify_body(b"hash-key", br#"{"message":"pong"}"#, &tag).unwrap_err();
        assert_eq!(err.to_string(), "hashes don't match");
    }

    #[test]
    fn garbage_tag_is_a_mismatch() {
        let err = verify_body(b"k", b"{}", "not//base64!!").unwrap_err();
        assert_eq!(err.to_string(), "hashes don't match");
    }

    #[test]
    fn mac_is_32_bytes() {
        assert_eq!(compute_mac(b"k", b"data").unwrap().len(), 32);
    }
}
