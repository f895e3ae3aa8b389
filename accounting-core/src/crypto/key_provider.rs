//! Symmetric key sources for the token file.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac_array;
use sha2::Sha256;

use super::KEY_LENGTH;
use crate::error::{CoreError, CoreResult};

/// PBKDF2-HMAC-SHA256 iteration count (OWASP 2023 recommendation).
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Fixed salt for passphrase-derived keys; the token file has no header to carry a random one.
const PASSPHRASE_SALT: &[u8] = b"accounting-mcp/token-store/v1";

/// 256-bit AES key. `Debug` never prints the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_LENGTH]);

impl SymmetricKey {
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse a key given as 64 hex characters or as base64 of 32 bytes.
    pub fn parse(encoded: &str) -> CoreResult<Self> {
        let encoded = encoded.trim();
        let bytes = if encoded.len() == KEY_LENGTH * 2 {
            hex::decode(encoded)
                .map_err(|e| CoreError::KeyUnavailable(format!("Invalid hex key: {e}")))?
        } else {
            BASE64
                .decode(encoded)
                .map_err(|e| CoreError::KeyUnavailable(format!("Invalid base64 key: {e}")))?
        };

        let bytes: [u8; KEY_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
            CoreError::KeyUnavailable(format!(
                "Encryption key must be {KEY_LENGTH} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Source of the key used to seal and open the token file.
pub trait KeyProvider: Send + Sync {
    fn symmetric_key(&self) -> CoreResult<SymmetricKey>;
}

/// Fixed in-memory key.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    key: SymmetricKey,
}

impl StaticKeyProvider {
    #[must_use]
    pub fn new(key: SymmetricKey) -> Self {
        Self { key }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn symmetric_key(&self) -> CoreResult<SymmetricKey> {
        Ok(self.key.clone())
    }
}

/// Reads the key from an environment variable on every use.
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    #[must_use]
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl KeyProvider for EnvKeyProvider {
    fn symmetric_key(&self) -> CoreResult<SymmetricKey> {
        let value = std::env::var(&self.var)
            .map_err(|_| CoreError::KeyUnavailable(format!("{} is not set", self.var)))?;
        SymmetricKey::parse(&value)
    }
}

/// Derives the key from a passphrase once, at construction.
pub struct PassphraseKeyProvider {
    key: SymmetricKey,
}

impl PassphraseKeyProvider {
    #[must_use]
    pub fn new(passphrase: &str) -> Self {
        Self::with_iterations(passphrase, PBKDF2_ITERATIONS)
    }

    #[must_use]
    pub fn with_iterations(passphrase: &str, iterations: u32) -> Self {
        let key =
            pbkdf2_hmac_array::<Sha256, KEY_LENGTH>(passphrase.as_bytes(), PASSPHRASE_SALT, iterations);
        Self {
            key: SymmetricKey(key),
        }
    }
}

impl KeyProvider for PassphraseKeyProvider {
    fn symmetric_key(&self) -> CoreResult<SymmetricKey> {
        Ok(self.key.clone())
    }
}

/// Keeps a random key in the system keychain, generating it on first use.
#[cfg(feature = "keyring")]
pub struct KeyringKeyProvider {
    service: String,
    user: String,
}

#[cfg(feature = "keyring")]
impl KeyringKeyProvider {
    const SERVICE_NAME: &'static str = "accounting-mcp";
    const KEY_ENTRY: &'static str = "token-encryption-key";

    #[must_use]
    pub fn new() -> Self {
        Self {
            service: Self::SERVICE_NAME.to_string(),
            user: Self::KEY_ENTRY.to_string(),
        }
    }

    fn entry(&self) -> CoreResult<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.user)
            .map_err(|e| CoreError::KeyUnavailable(e.to_string()))
    }
}

#[cfg(feature = "keyring")]
impl Default for KeyringKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "keyring")]
impl KeyProvider for KeyringKeyProvider {
    fn symmetric_key(&self) -> CoreResult<SymmetricKey> {
        use rand::RngCore;

        let entry = self.entry()?;
        match entry.get_password() {
            Ok(stored) => SymmetricKey::parse(&stored),
            Err(keyring::Error::NoEntry) => {
                let mut bytes = [0u8; KEY_LENGTH];
                rand::rng().fill_bytes(&mut bytes);
                entry
                    .set_password(&hex::encode(bytes))
                    .map_err(|e| CoreError::KeyUnavailable(e.to_string()))?;
                log::info!("Generated new token encryption key in system keychain");
                Ok(SymmetricKey(bytes))
            }
            Err(e) => Err(CoreError::KeyUnavailable(e.to_string())),
        }
    }
}
