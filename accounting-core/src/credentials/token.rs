//! OAuth token types and expiry classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tokens with this many seconds left (or fewer) are treated as unusable.
pub const EXPIRY_BUFFER_SECS: i64 = 300;

/// Tokens with at most this many seconds left are refreshed proactively.
pub const NEAR_EXPIRY_THRESHOLD_SECS: i64 = 3600;

/// Token response returned by the upstream authorization server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    /// Lifetime in seconds, relative to `created_at`.
    pub expires_in: i64,
    /// Issue instant in epoch seconds. Filled from the store's clock when absent.
    #[serde(default)]
    pub created_at: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Stored token material for one company.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope: String,
    /// Absolute expiry instant in epoch seconds.
    pub expires_at: i64,
}

impl TokenRecord {
    /// Build a record from a token response issued at `created_at`.
    #[must_use]
    pub fn from_response(response: &TokenResponse, created_at: i64) -> Self {
        Self {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            token_type: response.token_type.clone(),
            scope: response.scope.clone(),
            expires_at: created_at.saturating_add(response.expires_in),
        }
    }

    /// Seconds of validity left at `now_secs` (negative once past expiry).
    #[must_use]
    pub fn remaining_secs(&self, now_secs: i64) -> i64 {
        self.expires_at.saturating_sub(now_secs)
    }

    #[must_use]
    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        self.remaining_secs(now_secs) <= EXPIRY_BUFFER_SECS
    }

    #[must_use]
    pub fn expiry_status_at(&self, now_secs: i64) -> TokenExpiryStatus {
        TokenExpiryStatus::from_remaining(self.remaining_secs(now_secs))
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Token freshness bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenExpiryStatus {
    /// Within the safety buffer or past expiry.
    Expired,
    /// Still usable, should be refreshed.
    NearExpiry,
    Valid,
}

impl TokenExpiryStatus {
    #[must_use]
    pub fn from_remaining(remaining_secs: i64) -> Self {
        if remaining_secs <= EXPIRY_BUFFER_SECS {
            Self::Expired
        } else if remaining_secs <= NEAR_EXPIRY_THRESHOLD_SECS {
            Self::NearExpiry
        } else {
            Self::Valid
        }
    }
}
