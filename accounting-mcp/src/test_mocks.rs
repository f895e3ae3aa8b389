use super::*;

use std::collections::HashSet;

use accounting_core::cache::ResponseCache;
use accounting_core::clock::ManualClock;
use accounting_core::credentials::{CredentialStore, TokenResponse};
use accounting_core::crypto::{StaticKeyProvider, SymmetricKey};
use accounting_core::services::ServiceContext;
use accounting_core::traits::UpstreamApi;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

pub const NOW: i64 = 1_700_000_000;

/// Scriptable upstream that records every call.
#[derive(Default)]
pub struct MockUpstream {
    get_calls: Mutex<Vec<(String, u64, String, QueryParams)>>,
    post_calls: Mutex<Vec<(u64, String, Value)>>,
    refresh_calls: Mutex<Vec<String>>,
    rejected_tokens: Mutex<HashSet<String>>,
    /// If Some, get and post return this error
    error: Mutex<Option<UpstreamError>>,
    /// If Some, get and post sleep this long first
    delay: Mutex<Option<Duration>>,
}

impl MockUpstream {
    pub async fn reject_token(&self, token: &str) {
        self.rejected_tokens.lock().await.insert(token.to_string());
    }

    pub async fn set_error(&self, error: Option<UpstreamError>) {
        *self.error.lock().await = error;
    }

    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().await = delay;
    }

    pub async fn get_calls(&self) -> Vec<(String, u64, String, QueryParams)> {
        self.get_calls.lock().await.clone()
    }

    pub async fn post_calls(&self) -> Vec<(u64, String, Value)> {
        self.post_calls.lock().await.clone()
    }

    pub async fn refresh_calls(&self) -> Vec<String> {
        self.refresh_calls.lock().await.clone()
    }

    async fn respond(&self, access_token: &str, value: Value) -> Result<Value, UpstreamError> {
        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejected_tokens.lock().await.contains(access_token) {
            return Err(UpstreamError::Unauthorized);
        }
        if let Some(error) = self.error.lock().await.clone() {
            return Err(error);
        }
        Ok(value)
    }
}

#[async_trait]
impl UpstreamApi for MockUpstream {
    async fn get(
        &self,
        access_token: &str,
        company_id: u64,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<Value, UpstreamError> {
        let mut calls = self.get_calls.lock().await;
        calls.push((
            access_token.to_string(),
            company_id,
            endpoint.to_string(),
            params.clone(),
        ));
        let call = calls.len();
        drop(calls);

        self.respond(
            access_token,
            json!([{ "endpoint": endpoint, "call": call }]),
        )
        .await
    }

    async fn post(
        &self,
        access_token: &str,
        company_id: u64,
        endpoint: &str,
        body: &Value,
    ) -> Result<Value, UpstreamError> {
        self.post_calls
            .lock()
            .await
            .push((company_id, endpoint.to_string(), body.clone()));

        self.respond(access_token, json!({ "id": 42, "created": body }))
            .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, UpstreamError> {
        let mut calls = self.refresh_calls.lock().await;
        calls.push(refresh_token.to_string());
        let n = calls.len();
        drop(calls);

        Ok(TokenResponse {
            access_token: format!("refreshed-{n}"),
            refresh_token: Some(format!("refreshed-refresh-{n}")),
            token_type: "Bearer".to_string(),
            scope: "api".to_string(),
            expires_in: 21_600,
            created_at: Some(NOW),
        })
    }
}

pub fn token_response(access: &str, expires_in: i64) -> TokenResponse {
    TokenResponse {
        access_token: access.to_string(),
        refresh_token: Some(format!("{access}-refresh")),
        token_type: "Bearer".to_string(),
        scope: "api".to_string(),
        expires_in,
        created_at: Some(NOW),
    }
}

pub struct TestServer {
    pub server: AccountingMcp,
    pub ctx: Arc<ServiceContext>,
    pub upstream: Arc<MockUpstream>,
}

/// Build a server over an in-memory token store holding a valid token for each company.
pub(super) async fn build_server(companies: &[u64], timeouts: ToolTimeouts) -> TestServer {
    let clock = Arc::new(ManualClock::at_secs(NOW));
    let store = CredentialStore::new(
        None,
        Arc::new(StaticKeyProvider::new(SymmetricKey::from_bytes([3; 32]))),
    )
    .with_clock(clock.clone());
    for &company_id in companies {
        store
            .set_token(company_id, &token_response(&format!("tok-{company_id}"), 21_600))
            .await
            .unwrap();
    }

    let upstream = Arc::new(MockUpstream::default());
    let ctx = Arc::new(ServiceContext::new(
        Arc::new(store),
        Arc::new(ResponseCache::with_capacity(100, clock)),
        Arc::clone(&upstream) as Arc<dyn UpstreamApi>,
    ));
    let account_service = Arc::new(AccountService::new(Arc::clone(&ctx)));

    TestServer {
        server: AccountingMcp::with_timeouts(account_service, timeouts),
        ctx,
        upstream,
    }
}
