//! Cryptographic primitives for SecretKeeper.
//!
//! This module provides:
//! - AES-GCM encryption and decryption with 128/192/256-bit keys (`encryption`)
//! - Zeroizing key holders (`keys`)
//! - HMAC-SHA256 request integrity tags (`integrity`)
//! - Envelope encryption of stored secret fields (`field`)

pub mod encryption;
pub mod field;
pub mod integrity;
pub mod keys;

pub use encryption::{decrypt, decrypt_text, encrypt, encrypt_text};
pub use field::FieldCipher;
pub use integrity::{sign_body, verify_body};
pub use keys::SecretKey;
