//! Envelope encryption of stored secret fields.

use super::encryption::{decrypt_text, encrypt_text};
use super::keys::SecretKey;
use crate::errors::Result;

/// Encrypts sensitive fields before they reach the storage gateway and
/// decrypts them on the way back out.
///
/// Field encryption can be switched off with `encrypt_fields = false`, in
/// which case values pass through untouched.  User passwords are always
/// sealed regardless of the switch, because login compares against the
/// decrypted value.
#[derive(Clone, Debug)]
pub struct FieldCipher {
    key: SecretKey,
    enabled: bool,
}

impl FieldCipher {
    pub fn new(key: SecretKey, enabled: bool) -> Self {
        Self { key, enabled }
    }

    /// Encrypt a secret field for storage.
    pub fn seal(&self, value: &str) -> Result<String> {
        if !self.enabled {
            return Ok(value.to_string());
        }
        encrypt_text(self.key.as_bytes(), value)
    }

    /// Decrypt a secret field read from storage.
    pub fn open(&self, stored: &str) -> Result<String> {
        if !self.enabled {
            return Ok(stored.to_string());
        }
        decrypt_text(self.key.as_bytes(), stored)
    }

    pub fn seal_password(&self, password: &str) -> Result<String> {
        encrypt_text(self.key.as_bytes(), password)
    }

    pub fn open_password(&self, stored: &str) -> Result<String> {
        decrypt_text(self.key.as_bytes(), stored)
    }
}
