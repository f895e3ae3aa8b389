//! encryption module
//!
//! Provides AES-256-GCM sealing for the token file. The sealed form is a single line of
//! text, `ivHex:authTagHex:cipherHex`, all lowercase hex.

mod key_provider;

#[cfg(feature = "keyring")]
pub use key_provider::KeyringKeyProvider;
pub use key_provider::{
    EnvKeyProvider, KeyProvider, PassphraseKeyProvider, StaticKeyProvider, SymmetricKey,
    PBKDF2_ITERATIONS,
};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::error::{CoreError, CoreResult};

const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
pub(crate) const KEY_LENGTH: usize = 32; // AES-256

/// Encrypt data into the `iv:tag:cipher` text envelope.
///
/// A fresh random IV is drawn on every call.
pub fn seal(plaintext: &[u8], key: &SymmetricKey) -> CoreResult<String> {
    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CoreError::KeyUnavailable(format!("Failed to create cipher: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    // aes-gcm appends the tag to the ciphertext
    let mut ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CoreError::PersistenceFailure(format!("Encryption failed: {e}")))?;
    let tag = ciphertext.split_off(ciphertext.len() - TAG_LENGTH);

    Ok(format!(
        "{}:{}:{}",
        hex::encode(nonce_bytes),
        hex::encode(tag),
        hex::encode(ciphertext)
    ))
}

/// Decrypt an `iv:tag:cipher` envelope.
///
/// Every failure (malformed envelope, bad hex, wrong key, tampered or truncated data) is a
/// [`CoreError::DecryptionFailure`].
pub fn open(envelope: &str, key: &SymmetricKey) -> CoreResult<Vec<u8>> {
    let mut parts = envelope.trim().split(':');
    let (Some(iv_hex), Some(tag_hex), Some(cipher_hex), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CoreError::DecryptionFailure(
            "expected three ':'-separated fields".to_string(),
        ));
    };

    let nonce_bytes = decode_field(iv_hex, "iv")?;
    let tag = decode_field(tag_hex, "auth tag")?;
    let mut ciphertext = decode_field(cipher_hex, "ciphertext")?;

    if nonce_bytes.len() != NONCE_LENGTH {
        return Err(CoreError::DecryptionFailure(format!(
            "Invalid iv length: expected {NONCE_LENGTH}, got {}",
            nonce_bytes.len()
        )));
    }
    if tag.len() != TAG_LENGTH {
        return Err(CoreError::DecryptionFailure(format!(
            "Invalid auth tag length: expected {TAG_LENGTH}, got {}",
            tag.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CoreError::KeyUnavailable(format!("Failed to create cipher: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    ciphertext.extend_from_slice(&tag);
    cipher.decrypt(nonce, ciphertext.as_ref()).map_err(|_| {
        CoreError::DecryptionFailure("invalid key or corrupted data".to_string())
    })
}

fn decode_field(field: &str, name: &str) -> CoreResult<Vec<u8>> {
    hex::decode(field).map_err(|e| CoreError::DecryptionFailure(format!("Invalid {name}: {e}")))
}
