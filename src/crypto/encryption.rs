//! AES-GCM authenticated encryption.
//!
//! Each call to `encrypt` generates a fresh random 12-byte nonce and
//! prepends it to the ciphertext.  `decrypt` splits the nonce back out
//! before decrypting.  The key length selects the variant:
//! 16 bytes for AES-128, 24 for AES-192, 32 for AES-256.
//!
//! Layout of the returned byte buffer:
//!   [ 12-byte nonce | ciphertext + 16-byte auth tag ]
//!
//! `encrypt_text` / `decrypt_text` wrap the same layout in standard
//! base64 so it can live in a TEXT column or a JSON string.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::errors::{KeeperError, Result};

/// AES-192 in GCM mode with the standard 96-bit nonce.
type Aes192Gcm = AesGcm<Aes192, U12>;

/// Size of the GCM nonce in bytes (identical for all three key sizes).
pub const NONCE_LEN: usize = 12;

/// Key lengths accepted by `encrypt` and `decrypt`.
pub const VALID_KEY_SIZES: [usize; 3] = [16, 24, 32];

/// Returns an error unless `len` is one of the AES key sizes.
pub fn check_key_size(len: usize) -> Result<()> {
    if VALID_KEY_SIZES.contains(&len) {
        Ok(())
    } else {
        Err(KeeperError::InvalidKeySize(len))
    }
}

/// Encrypt `plaintext` with a 16, 24 or 32-byte `key`.
///
/// Returns the nonce prepended to the ciphertext (nonce || ciphertext).
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    match key.len() {
        16 => seal::<Aes128Gcm>(key, plaintext),
        24 => seal::<Aes192Gcm>(key, plaintext),
        32 => seal::<Aes256Gcm>(key, plaintext),
        n => Err(KeeperError::InvalidKeySize(n)),
    }
}

/// Decrypt data that was produced by `encrypt`.
///
/// Every failure after the key-size check is reported as
/// `DecryptionFailed`, whatever the cause.
pub fn decrypt(key: &[u8], ciphertext_with_nonce: &[u8]) -> Result<Vec<u8>> {
    match key.len() {
        16 => open::<Aes128Gcm>(key, ciphertext_with_nonce),
        24 => open::<Aes192Gcm>(key, ciphertext_with_nonce),
        32 => open::<Aes256Gcm>(key, ciphertext_with_nonce),
        n => Err(KeeperError::InvalidKeySize(n)),
    }
}

/// Encrypt a string and encode the result as base64 text.
pub fn encrypt_text(key: &[u8], plaintext: &str) -> Result<String> {
    let sealed = encrypt(key, plaintext.as_bytes())?;
    Ok(BASE64.encode(sealed))
}

/// Reverse of `encrypt_text`.
pub fn decrypt_text(key: &[u8], encoded: &str) -> Result<String> {
    check_key_size(key.len())?;
    let sealed = BASE64
        .decode(encoded.as_bytes())
        .map_err(|_| KeeperError::DecryptionFailed)?;
    let plaintext = decrypt(key, &sealed)?;
    String::from_utf8(plaintext).map_err(|_| KeeperError::DecryptionFailed)
}

fn seal<C>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    C: Aead + AeadCore + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| KeeperError::InvalidKeySize(key.len()))?;

    let nonce = C::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| KeeperError::EncryptionFailed(format!("encryption error: {e}")))?;

    // Prepend the nonce so the caller only needs to store one blob.
    let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn open<C>(key: &[u8], ciphertext_with_nonce: &[u8]) -> Result<Vec<u8>>
where
    C: Aead + AeadCore + KeyInit,
{
    if ciphertext_with_nonce.len() < NONCE_LEN {
        return Err(KeeperError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = ciphertext_with_nonce.split_at(NONCE_LEN);
    let nonce = aes_gcm::aead::Nonce::<C>::from_slice(nonce_bytes);

    let cipher = C::new_from_slice(key).map_err(|_| KeeperError::DecryptionFailed)?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| KeeperError::DecryptionFailed)
}
