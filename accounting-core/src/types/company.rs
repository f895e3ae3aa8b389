use serde::Serialize;

use crate::credentials::{TokenExpiryStatus, TokenRecord};

/// Secret-free view of one company's authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanySummary {
    pub company_id: u64,
    pub status: TokenExpiryStatus,
    /// Epoch seconds
    pub expires_at: i64,
    /// RFC3339 rendering of `expires_at`
    pub expires_at_iso: Option<String>,
    pub scope: String,
    pub can_refresh: bool,
}

impl CompanySummary {
    #[must_use]
    pub fn from_record(company_id: u64, record: &TokenRecord, now_secs: i64) -> Self {
        Self {
            company_id,
            status: record.expiry_status_at(now_secs),
            expires_at: record.expires_at,
            expires_at_iso: chrono::DateTime::from_timestamp(record.expires_at, 0)
                .map(|dt| dt.to_rfc3339()),
            scope: record.scope.clone(),
            can_refresh: record.refresh_token.is_some(),
        }
    }
}
