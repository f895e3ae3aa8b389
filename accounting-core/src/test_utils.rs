//! Test helper module
//!
//! Provides a mock upstream and factories for a service wired to a manual clock.

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::cache::{QueryParams, ResponseCache, DEFAULT_CACHE_CAPACITY};
use crate::clock::ManualClock;
use crate::credentials::{CredentialStore, TokenResponse};
use crate::crypto::{StaticKeyProvider, SymmetricKey};
use crate::services::{AccountService, ServiceContext};
use crate::traits::{UpstreamApi, UpstreamError};

pub const NOW: i64 = 1_700_000_000;

// ===== MockUpstream =====

#[derive(Default)]
pub struct MockUpstream {
    get_calls: Mutex<Vec<(String, u64, String, QueryParams)>>,
    post_calls: Mutex<Vec<(String, u64, String, Value)>>,
    refresh_calls: Mutex<Vec<String>>,
    /// Access tokens answered with 401
    rejected_tokens: Mutex<HashSet<String>>,
    /// If Some, refresh returns this error
    refresh_error: Mutex<Option<UpstreamError>>,
    /// If Some, get returns this error
    get_error: Mutex<Option<UpstreamError>>,
    /// Refresh responses leave out the refresh token (no rotation)
    omit_refresh_token: Mutex<bool>,
    /// Refresh tokens whose grant takes this long
    refresh_delays: Mutex<HashMap<String, Duration>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reject_token(&self, token: &str) {
        self.rejected_tokens.lock().await.insert(token.to_string());
    }

    pub async fn set_refresh_error(&self, err: Option<UpstreamError>) {
        *self.refresh_error.lock().await = err;
    }

    pub async fn omit_refresh_token(&self) {
        *self.omit_refresh_token.lock().await = true;
    }

    pub async fn delay_refresh(&self, refresh_token: &str, delay: Duration) {
        self.refresh_delays
            .lock()
            .await
            .insert(refresh_token.to_string(), delay);
    }

    pub async fn set_get_error(&self, err: Option<UpstreamError>) {
        *self.get_error.lock().await = err;
    }

    pub async fn get_calls(&self) -> Vec<(String, u64, String, QueryParams)> {
        self.get_calls.lock().await.clone()
    }

    pub async fn post_calls(&self) -> Vec<(String, u64, String, Value)> {
        self.post_calls.lock().await.clone()
    }

    pub async fn refresh_calls(&self) -> Vec<String> {
        self.refresh_calls.lock().await.clone()
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

        if self.rejected_tokens.lock().await.contains(access_token) {
            return Err(UpstreamError::Unauthorized);
        }
        if let Some(err) = self.get_error.lock().await.clone() {
            return Err(err);
        }
        Ok(json!({ "endpoint": endpoint, "call": call }))
    }

    async fn post(
        &self,
        access_token: &str,
        company_id: u64,
        endpoint: &str,
        body: &Value,
    ) -> Result<Value, UpstreamError> {
        self.post_calls.lock().await.push((
            access_token.to_string(),
            company_id,
            endpoint.to_string(),
            body.clone(),
        ));

        if self.rejected_tokens.lock().await.contains(access_token) {
            return Err(UpstreamError::Unauthorized);
        }
        Ok(json!({ "id": 1, "created": body }))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, UpstreamError> {
        let mut calls = self.refresh_calls.lock().await;
        calls.push(refresh_token.to_string());
        let n = calls.len();
        drop(calls);

        let delay = self.refresh_delays.lock().await.get(refresh_token).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.refresh_error.lock().await.clone() {
            return Err(err);
        }
        let rotated = !*self.omit_refresh_token.lock().await;
        Ok(TokenResponse {
            access_token: format!("refreshed-access-{n}"),
            refresh_token: rotated.then(|| format!("refreshed-refresh-{n}")),
            token_type: "Bearer".to_string(),
            scope: "api".to_string(),
            expires_in: 7200,
            created_at: None,
        })
    }
}

// ===== Factories =====

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

pub struct TestHarness {
    pub service: AccountService,
    pub ctx: Arc<ServiceContext>,
    pub upstream: Arc<MockUpstream>,
    pub clock: Arc<ManualClock>,
}

pub fn create_test_harness() -> TestHarness {
    let clock = Arc::new(ManualClock::at_secs(NOW));
    let keys = Arc::new(StaticKeyProvider::new(SymmetricKey::from_bytes([3; 32])));
    let store = Arc::new(CredentialStore::new(None, keys).with_clock(clock.clone()));
    let cache = Arc::new(ResponseCache::with_capacity(
        DEFAULT_CACHE_CAPACITY,
        clock.clone(),
    ));
    let upstream = Arc::new(MockUpstream::new());

    let ctx = Arc::new(ServiceContext::new(store, cache, upstream.clone()));
    TestHarness {
        service: AccountService::new(Arc::clone(&ctx)),
        ctx,
        upstream,
        clock,
    }
}
