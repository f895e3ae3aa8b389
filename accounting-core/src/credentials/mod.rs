//! Encrypted per-company token storage
//!
//! [`CredentialStore`] owns the company id → [`TokenRecord`] mapping. The whole mapping is the
//! unit of persistence: every mutation re-serializes, re-encrypts and replaces the token file.

mod storage_path;
mod token;

pub use storage_path::{default_storage_path, APP_DIR_NAME, TOKEN_FILE_NAME};
pub use token::{
    TokenExpiryStatus, TokenRecord, TokenResponse, EXPIRY_BUFFER_SECS, NEAR_EXPIRY_THRESHOLD_SECS,
};

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::sync::{Mutex, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::crypto::{self, KeyProvider};
use crate::error::{CoreError, CoreResult};

/// Result of [`CredentialStore::load_tokens`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The token file (or seed) was decrypted and parsed.
    Loaded { companies: usize },
    /// Neither a token file nor a seed exists.
    EmptyStore,
}

/// Encrypted token store, one instance per token file.
pub struct CredentialStore {
    /// Backing file; `None` keeps tokens in memory only.
    path: Option<PathBuf>,
    /// Base64 of a token file, used when the file does not exist.
    seed: Option<String>,
    key_provider: Arc<dyn KeyProvider>,
    clock: Arc<dyn Clock>,
    tokens: RwLock<HashMap<u64, TokenRecord>>,
    /// Held across mutate-and-persist so concurrent writers cannot interleave.
    writer: Mutex<()>,
}

impl CredentialStore {
    /// Create an empty store. Call [`Self::load_tokens`] to read existing tokens.
    #[must_use]
    pub fn new(path: Option<PathBuf>, key_provider: Arc<dyn KeyProvider>) -> Self {
        Self {
            path,
            seed: None,
            key_provider,
            clock: Arc::new(SystemClock),
            tokens: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed contents (base64 of the token file format) used when the backing file is absent.
    #[must_use]
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Per-OS default token file location.
    #[must_use]
    pub fn get_default_storage_path() -> PathBuf {
        default_storage_path()
    }

    /// Replace in-memory state with the decrypted token file.
    ///
    /// A missing file without a seed is [`LoadOutcome::EmptyStore`]. A file that fails to
    /// decrypt is a [`CoreError::DecryptionFailure`] and leaves the current state untouched.
    pub async fn load_tokens(&self) -> CoreResult<LoadOutcome> {
        let _guard = self.writer.lock().await;

        let Some(envelope) = self.read_source().await? else {
            self.tokens.write().await.clear();
            log::info!("No token store found, starting empty");
            return Ok(LoadOutcome::EmptyStore);
        };

        let key = self.key_provider.symmetric_key()?;
        let plaintext = crypto::open(&envelope, &key)?;
        let entries: Vec<(u64, TokenRecord)> = serde_json::from_slice(&plaintext)
            .map_err(|e| CoreError::SerializationError(format!("Invalid token store: {e}")))?;

        let loaded: HashMap<u64, TokenRecord> = entries.into_iter().collect();
        let companies = loaded.len();
        *self.tokens.write().await = loaded;

        log::info!("Loaded tokens for {companies} companies");
        Ok(LoadOutcome::Loaded { companies })
    }

    /// Upsert the token for `company_id` and persist the whole mapping.
    ///
    /// `expires_at` is fixed here as `created_at + expires_in`; a response without
    /// `created_at` is treated as issued now.
    pub async fn set_token(
        &self,
        company_id: u64,
        response: &TokenResponse,
    ) -> CoreResult<TokenRecord> {
        if company_id == 0 {
            return Err(CoreError::ValidationError(
                "company id must be a positive integer".to_string(),
            ));
        }

        let _guard = self.writer.lock().await;

        let created_at = response
            .created_at
            .unwrap_or_else(|| self.clock.now_secs());
        let record = TokenRecord::from_response(response, created_at);

        let snapshot = {
            let mut tokens = self.tokens.write().await;
            tokens.insert(company_id, record.clone());
            tokens.clone()
        };

        self.persist(&snapshot).await?;
        log::info!(
            "Stored token for company {company_id}, expires at {}",
            record.expires_at
        );
        Ok(record)
    }

    /// Look up the token for `company_id`. No expiry check.
    pub async fn get_token(&self, company_id: u64) -> Option<TokenRecord> {
        self.tokens.read().await.get(&company_id).cloned()
    }

    /// Delete the token for `company_id` and persist. Returns whether a token existed.
    pub async fn remove_token(&self, company_id: u64) -> CoreResult<bool> {
        let _guard = self.writer.lock().await;

        let (removed, snapshot) = {
            let mut tokens = self.tokens.write().await;
            let removed = tokens.remove(&company_id).is_some();
            (removed, tokens.clone())
        };

        if removed {
            self.persist(&snapshot).await?;
            log::info!("Removed token for company {company_id}");
        }
        Ok(removed)
    }

    /// Ids of all companies with a stored token, ascending.
    pub async fn get_all_company_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.tokens.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// True iff the token has at most [`EXPIRY_BUFFER_SECS`] of validity left.
    pub fn is_token_expired(&self, record: &TokenRecord) -> bool {
        record.is_expired_at(self.clock.now_secs())
    }

    /// Expiry class of `record`. `Expired` exactly when [`Self::is_token_expired`] holds.
    pub fn get_token_expiry_status(&self, record: &TokenRecord) -> TokenExpiryStatus {
        record.expiry_status_at(self.clock.now_secs())
    }

    /// Current time of the store's clock in epoch seconds.
    pub fn now_secs(&self) -> i64 {
        self.clock.now_secs()
    }

    async fn read_source(&self) -> CoreResult<Option<String>> {
        if let Some(path) = &self.path {
            match tokio::fs::read_to_string(path).await {
                Ok(contents) => return Ok(Some(contents)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(CoreError::DecryptionFailure(
                        "token file is not valid text".to_string(),
                    ));
                }
                Err(e) => {
                    return Err(CoreError::StorageError(format!(
                        "Failed to read {}: {e}",
                        path.display()
                    )));
                }
            }
        }

        let Some(seed) = &self.seed else {
            return Ok(None);
        };

        log::info!("Token file absent, loading tokens from seed");
        let bytes = BASE64
            .decode(seed.trim())
            .map_err(|e| CoreError::DecryptionFailure(format!("Invalid token seed: {e}")))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| CoreError::DecryptionFailure("token seed is not valid text".to_string()))
    }

    async fn persist(&self, tokens: &HashMap<u64, TokenRecord>) -> CoreResult<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let mut entries: Vec<(&u64, &TokenRecord)> = tokens.iter().collect();
        entries.sort_unstable_by_key(|(id, _)| **id);
        let plaintext = serde_json::to_vec(&entries)
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;

        let key = self.key_provider.symmetric_key()?;
        let sealed = crypto::seal(&plaintext, &key)?;

        let display = path.display().to_string();
        tokio::task::spawn_blocking(move || write_replacing(&path, &sealed))
            .await
            .map_err(|e| CoreError::PersistenceFailure(format!("Task join error: {e}")))?
            .map_err(|e| {
                log::error!("Failed to write token store {display}: {e}");
                CoreError::PersistenceFailure(format!("Failed to write {display}: {e}"))
            })?;

        log::debug!("Persisted {} tokens to {display}", tokens.len());
        Ok(())
    }
}

/// Write `contents` to a sibling temp file with owner-only permissions, then rename over `path`.
fn write_replacing(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    // the temp file may predate this write with a wider mode
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp_path, path)
}
