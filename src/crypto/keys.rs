//! Key holders for the server's symmetric secrets.
//!
//! The envelope key, the token signing key and the request-integrity key
//! all arrive as configuration strings.  `SecretKey` owns their bytes and
//! zeroes them when dropped so they do not linger after shutdown.

use zeroize::Zeroize;

use super::encryption::check_key_size;
use crate::errors::Result;

/// A symmetric key that automatically zeroes its memory when dropped.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey {
    bytes: Vec<u8>,
}

impl SecretKey {
    /// Wrap key bytes of any length (MAC and token signing keys).
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Wrap an AES key, rejecting lengths other than 16, 24 or 32 bytes.
    pub fn aead(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        check_key_size(bytes.len())?;
        Ok(Self { bytes })
    }

    /// Access the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({} bytes)", self.bytes.len())
    }
}
