//! Upstream accounting API abstraction Trait

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::cache::QueryParams;
use crate::credentials::TokenResponse;

/// Errors returned by an [`UpstreamApi`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "details")]
pub enum UpstreamError {
    /// The access token was rejected (HTTP 401) or the refresh grant was refused.
    #[error("Upstream rejected the access token")]
    Unauthorized,

    /// Non-success HTTP status other than 401.
    #[error("Upstream returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Request could not be sent or the response could not be read
    #[error("Network error: {0}")]
    Network(String),

    /// Response body was not the expected JSON
    #[error("Parse error: {0}")]
    Parse(String),
}

impl UpstreamError {
    /// Client-side errors are expected; server and transport failures are not.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::Unauthorized => true,
            Self::Http { status, .. } => (400..500).contains(status),
            Self::Network(_) | Self::Parse(_) => false,
        }
    }
}

/// Upstream accounting API, scoped per company.
///
/// Implementations perform a single attempt per call; retries are the caller's business.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Read `endpoint` for `company_id`.
    async fn get(
        &self,
        access_token: &str,
        company_id: u64,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<Value, UpstreamError>;

    /// Create a record under `endpoint` for `company_id`.
    async fn post(
        &self,
        access_token: &str,
        company_id: u64,
        endpoint: &str,
        body: &Value,
    ) -> Result<Value, UpstreamError>;

    /// Exchange a refresh token for a new token response.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, UpstreamError>;
}
