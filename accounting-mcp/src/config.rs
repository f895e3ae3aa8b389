//! Environment-based configuration
//!
//! The server is launched by an MCP client as a subprocess, so everything is configured through
//! environment variables. Parsing goes through a lookup function so tests can inject values.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use accounting_core::credentials::default_storage_path;
use accounting_core::crypto::{EnvKeyProvider, KeyProvider, PassphraseKeyProvider};
use anyhow::{bail, Context};

pub const ENV_TOKEN_PATH: &str = "ACCOUNTING_MCP_TOKEN_PATH";
pub const ENV_TOKEN_SEED: &str = "ACCOUNTING_MCP_TOKENS_B64";
pub const ENV_ENCRYPTION_KEY: &str = "ACCOUNTING_MCP_ENCRYPTION_KEY";
pub const ENV_PASSPHRASE: &str = "ACCOUNTING_MCP_PASSPHRASE";
pub const ENV_API_BASE_URL: &str = "ACCOUNTING_API_BASE_URL";
pub const ENV_OAUTH_TOKEN_URL: &str = "ACCOUNTING_OAUTH_TOKEN_URL";
pub const ENV_OAUTH_CLIENT_ID: &str = "ACCOUNTING_OAUTH_CLIENT_ID";
pub const ENV_OAUTH_CLIENT_SECRET: &str = "ACCOUNTING_OAUTH_CLIENT_SECRET";

/// Where the token encryption key comes from.
pub enum KeySource {
    /// 32-byte key in [`ENV_ENCRYPTION_KEY`]
    EnvKey,
    /// Key derived from [`ENV_PASSPHRASE`]
    Passphrase(String),
    /// Random key kept in the OS keychain
    #[cfg(feature = "keyring")]
    Keyring,
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvKey => f.write_str("EnvKey"),
            Self::Passphrase(_) => f.write_str("Passphrase(<redacted>)"),
            #[cfg(feature = "keyring")]
            Self::Keyring => f.write_str("Keyring"),
        }
    }
}

/// OAuth client used for refresh grants.
pub struct OAuthClientConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Server configuration
#[derive(Debug)]
pub struct McpConfig {
    pub token_path: PathBuf,
    /// Base64 token file contents used when the token file does not exist
    pub token_seed: Option<String>,
    pub key_source: KeySource,
    pub api_base_url: String,
    pub oauth: OAuthClientConfig,
}

impl McpConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let token_path = get(ENV_TOKEN_PATH).map_or_else(default_storage_path, PathBuf::from);

        let key_source = if get(ENV_ENCRYPTION_KEY).is_some() {
            KeySource::EnvKey
        } else if let Some(passphrase) = get(ENV_PASSPHRASE) {
            KeySource::Passphrase(passphrase)
        } else {
            Self::fallback_key_source()?
        };

        let api_base_url = get(ENV_API_BASE_URL)
            .with_context(|| format!("{ENV_API_BASE_URL} must be set"))?
            .trim_end_matches('/')
            .to_string();
        let token_url =
            get(ENV_OAUTH_TOKEN_URL).with_context(|| format!("{ENV_OAUTH_TOKEN_URL} must be set"))?;
        let client_id =
            get(ENV_OAUTH_CLIENT_ID).with_context(|| format!("{ENV_OAUTH_CLIENT_ID} must be set"))?;

        Ok(Self {
            token_path,
            token_seed: get(ENV_TOKEN_SEED),
            key_source,
            api_base_url,
            oauth: OAuthClientConfig {
                token_url,
                client_id,
                client_secret: get(ENV_OAUTH_CLIENT_SECRET),
            },
        })
    }

    #[cfg(feature = "keyring")]
    fn fallback_key_source() -> anyhow::Result<KeySource> {
        Ok(KeySource::Keyring)
    }

    #[cfg(not(feature = "keyring"))]
    fn fallback_key_source() -> anyhow::Result<KeySource> {
        bail!("Set {ENV_ENCRYPTION_KEY} or {ENV_PASSPHRASE} to encrypt the token store")
    }

    /// Build the key provider for the configured source.
    pub fn key_provider(&self) -> Arc<dyn KeyProvider> {
        match &self.key_source {
            KeySource::EnvKey => Arc::new(EnvKeyProvider::new(ENV_ENCRYPTION_KEY)),
            KeySource::Passphrase(passphrase) => Arc::new(PassphraseKeyProvider::new(passphrase)),
            #[cfg(feature = "keyring")]
            KeySource::Keyring => Arc::new(accounting_core::crypto::KeyringKeyProvider::new()),
        }
    }
}
