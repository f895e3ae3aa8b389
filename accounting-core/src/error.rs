//! Unified error type definition

use serde::Serialize;
use thiserror::Error;

pub use crate::traits::UpstreamError;

/// Core layer error type
#[derive(Error, Debug, Serialize)]
#[serde(tag = "code", content = "details")]
pub enum CoreError {
    /// Token file exists but could not be authenticated or decrypted
    #[error("Token store decryption failed: {0}")]
    DecryptionFailure(String),

    /// Writing the encrypted token file failed
    #[error("Token store persistence failed: {0}")]
    PersistenceFailure(String),

    /// The symmetric key could not be obtained from its source
    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),

    /// No usable token for the company
    #[error("Company {0} is not authorized")]
    NotAuthorized(u64),

    /// serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Upstream API error
    #[error("{0}")]
    Upstream(#[from] UpstreamError),
}

impl CoreError {
    /// Whether it is expected behavior (user input, missing authorization, etc.), used for log classification.
    ///
    /// Level `warn` should be used when returning `true` and level `error` when returning `false`.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::NotAuthorized(_) | Self::ValidationError(_) => true,
            Self::Upstream(e) => e.is_expected(),
            _ => false,
        }
    }

    /// Whether the failure means the company needs to (re)authorize.
    #[must_use]
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Self::NotAuthorized(_) | Self::Upstream(UpstreamError::Unauthorized)
        )
    }
}

/// Core layer Result type alias
pub type CoreResult<T> = std::result::Result<T, CoreError>;
