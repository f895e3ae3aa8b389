//! Per-company access to the upstream API
//!
//! Composes the credential store, the response cache and the upstream API: tokens are refreshed
//! before they expire (or after a 401), reads go through the cache, and mutations invalidate the
//! affected cache namespace.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::cache::{generate_cache_key, QueryParams};
use crate::credentials::{LoadOutcome, TokenExpiryStatus};
use crate::error::{CoreError, CoreResult};
use crate::services::ServiceContext;
use crate::traits::UpstreamError;
use crate::types::CompanySummary;

/// Upstream access service
pub struct AccountService {
    ctx: Arc<ServiceContext>,
    /// Single-flight guards for token refreshes, one per company.
    refresh_locks: std::sync::Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl AccountService {
    /// Create an account service instance
    #[must_use]
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self {
            ctx,
            refresh_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn refresh_lock(&self, company_id: u64) -> Arc<Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(company_id).or_default())
    }

    /// Reload the token store and drop every cached response.
    pub async fn reload_credentials(&self) -> CoreResult<LoadOutcome> {
        let outcome = self.ctx.credential_store().load_tokens().await?;
        self.ctx.response_cache().clear();
        Ok(outcome)
    }

    // ===== Companies =====

    /// Authorization summary for every stored company.
    pub async fn list_companies(&self) -> Vec<CompanySummary> {
        let store = self.ctx.credential_store();
        let now = store.now_secs();

        let mut summaries = Vec::new();
        for company_id in store.get_all_company_ids().await {
            if let Some(record) = store.get_token(company_id).await {
                summaries.push(CompanySummary::from_record(company_id, &record, now));
            }
        }
        summaries
    }

    /// Authorization summary for one company.
    pub async fn company_status(&self, company_id: u64) -> CoreResult<CompanySummary> {
        let store = self.ctx.credential_store();
        let record = store
            .get_token(company_id)
            .await
            .ok_or(CoreError::NotAuthorized(company_id))?;
        Ok(CompanySummary::from_record(
            company_id,
            &record,
            store.now_secs(),
        ))
    }

    /// Forget a company's token and every cached response for it.
    ///
    /// Returns whether a token was stored.
    pub async fn disconnect(&self, company_id: u64) -> CoreResult<bool> {
        let removed = self.ctx.credential_store().remove_token(company_id).await?;
        let dropped = self
            .ctx
            .response_cache()
            .invalidate(&format!("{company_id}:"));
        log::info!("Disconnected company {company_id}, dropped {dropped} cached responses");
        Ok(removed)
    }

    // ===== Tokens =====

    /// Usable access token for `company_id`, refreshing it first unless it is comfortably valid.
    pub async fn access_token(&self, company_id: u64) -> CoreResult<String> {
        let store = self.ctx.credential_store();
        let record = store
            .get_token(company_id)
            .await
            .ok_or(CoreError::NotAuthorized(company_id))?;

        if store.get_token_expiry_status(&record) == TokenExpiryStatus::Valid {
            return Ok(record.access_token);
        }
        self.refresh_access_token(company_id, None).await
    }

    /// Refresh the token of `company_id`.
    ///
    /// `rejected` is the access token the upstream just answered 401 for; without it the refresh
    /// is proactive. Only one refresh per company runs at a time, and a task that waited for the
    /// lock reuses the token another task already obtained.
    async fn refresh_access_token(
        &self,
        company_id: u64,
        rejected: Option<&str>,
    ) -> CoreResult<String> {
        let lock = self.refresh_lock(company_id);
        let _guard = lock.lock().await;

        let store = self.ctx.credential_store();
        let current = store
            .get_token(company_id)
            .await
            .ok_or(CoreError::NotAuthorized(company_id))?;
        let status = store.get_token_expiry_status(&current);

        match rejected {
            Some(rejected)
                if current.access_token != rejected && status != TokenExpiryStatus::Expired =>
            {
                return Ok(current.access_token);
            }
            None if status == TokenExpiryStatus::Valid => return Ok(current.access_token),
            _ => {}
        }

        // a near-expiry token is still usable if the proactive refresh cannot happen
        let usable = rejected.is_none() && status == TokenExpiryStatus::NearExpiry;

        let Some(refresh_token) = current.refresh_token.as_deref() else {
            if usable {
                return Ok(current.access_token);
            }
            log::warn!("Company {company_id} has no refresh token, re-authorization required");
            return Err(CoreError::NotAuthorized(company_id));
        };

        match self.ctx.upstream().refresh_token(refresh_token).await {
            Ok(mut response) => {
                // a grant without a new refresh token leaves the current one valid
                if response.refresh_token.is_none() {
                    response.refresh_token.clone_from(&current.refresh_token);
                }
                let record = store.set_token(company_id, &response).await?;
                log::info!("Refreshed token for company {company_id}");
                Ok(record.access_token)
            }
            Err(e) if usable => {
                log::warn!("Proactive token refresh for company {company_id} failed: {e}");
                Ok(current.access_token)
            }
            Err(UpstreamError::Unauthorized) => {
                log::warn!("Refresh token for company {company_id} was rejected");
                Err(CoreError::NotAuthorized(company_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run an upstream call, refreshing the token and retrying once if it is rejected.
    async fn call_with_refresh<T, F, Fut>(&self, company_id: u64, call: F) -> CoreResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let token = self.access_token(company_id).await?;

        match call(token.clone()).await {
            Err(UpstreamError::Unauthorized) => {
                log::info!("Access token for company {company_id} rejected, refreshing");
                let fresh = self.refresh_access_token(company_id, Some(&token)).await?;
                call(fresh).await.map_err(|e| match e {
                    UpstreamError::Unauthorized => CoreError::NotAuthorized(company_id),
                    other => other.into(),
                })
            }
            result => Ok(result?),
        }
    }

    // ===== Upstream =====

    /// Cached read of `endpoint`. Misses are fetched and stored for `ttl`.
    pub async fn fetch(
        &self,
        company_id: u64,
        endpoint: &str,
        params: &QueryParams,
        ttl: Duration,
    ) -> CoreResult<Value> {
        let key = generate_cache_key(company_id, endpoint, Some(params));
        if let Some(hit) = self.ctx.response_cache().get(&key) {
            log::debug!("Cache hit: {key}");
            return Ok(hit);
        }

        let upstream = self.ctx.upstream();
        let value = self
            .call_with_refresh(company_id, move |token| async move {
                upstream.get(&token, company_id, endpoint, params).await
            })
            .await?;

        self.ctx.response_cache().set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Create a record under `resource` and drop every cached read of that resource.
    pub async fn mutate(&self, company_id: u64, resource: &str, body: &Value) -> CoreResult<Value> {
        let upstream = self.ctx.upstream();
        let created = self
            .call_with_refresh(company_id, move |token| async move {
                upstream.post(&token, company_id, resource, body).await
            })
            .await?;

        let dropped = self
            .ctx
            .response_cache()
            .invalidate(&format!("{company_id}:{resource}"));
        log::debug!("Created {resource} for company {company_id}, invalidated {dropped} entries");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn access_token_requires_stored_token() {
        let h = create_test_harness();
        let err = h.service.access_token(1).await.unwrap_err();
        assert!(matches!(err, CoreError::NotAuthorized(1)));
    }

    #[tokio::test]
    async fn valid_token_is_used_without_refresh() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("fresh", 7200))
            .await
            .unwrap();

        assert_eq!(h.service.access_token(1).await.unwrap(), "fresh");
        assert!(h.upstream.refresh_calls().await.is_empty());
    }

    #[tokio::test]
    async fn near_expiry_token_is_refreshed_proactively() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("old", 600))
            .await
            .unwrap();

        let token = h.service.access_token(1).await.unwrap();
        assert_eq!(token, "refreshed-access-1");
        assert_eq!(h.upstream.refresh_calls().await, vec!["old-refresh"]);

        let stored = h.ctx.credential_store().get_token(1).await.unwrap();
        assert_eq!(stored.access_token, "refreshed-access-1");
        assert_eq!(stored.expires_at, NOW + 7200);
    }

    #[tokio::test]
    async fn near_expiry_token_survives_failed_refresh() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("old", 600))
            .await
            .unwrap();
        h.upstream
            .set_refresh_error(Some(UpstreamError::Network("down".to_string())))
            .await;

        assert_eq!(h.service.access_token(1).await.unwrap(), "old");
    }

    #[tokio::test]
    async fn expired_token_with_failed_refresh_is_an_error() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("old", 100))
            .await
            .unwrap();
        h.upstream
            .set_refresh_error(Some(UpstreamError::Unauthorized))
            .await;

        let err = h.service.access_token(1).await.unwrap_err();
        assert!(matches!(err, CoreError::NotAuthorized(1)));
        assert_eq!(
            h.ctx.credential_store().get_token(1).await.unwrap().access_token,
            "old"
        );
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_is_not_authorized() {
        let h = create_test_harness();
        let mut response = token_response("old", 100);
        response.refresh_token = None;
        h.ctx.credential_store().set_token(1, &response).await.unwrap();

        let err = h.service.access_token(1).await.unwrap_err();
        assert!(err.is_authorization());
        assert!(h.upstream.refresh_calls().await.is_empty());
    }

    #[tokio::test]
    async fn fetch_caches_reads() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("tok", 7200))
            .await
            .unwrap();
        let params = QueryParams::new().with("name", "ABC");

        let first = h.service.fetch(1, "partners", &params, TTL).await.unwrap();
        let second = h.service.fetch(1, "partners", &params, TTL).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.upstream.get_calls().await.len(), 1);
        assert_eq!(h.ctx.response_cache().size(), 1);
    }

    #[tokio::test]
    async fn fetch_refetches_after_ttl() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("tok", 7200))
            .await
            .unwrap();
        let params = QueryParams::new();

        h.service.fetch(1, "sections", &params, TTL).await.unwrap();
        h.clock.advance(TTL + Duration::from_secs(1));
        h.service.fetch(1, "sections", &params, TTL).await.unwrap();

        assert_eq!(h.upstream.get_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn fetch_retries_once_after_unauthorized() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("revoked", 7200))
            .await
            .unwrap();
        h.upstream.reject_token("revoked").await;

        let value = h
            .service
            .fetch(1, "partners", &QueryParams::new(), TTL)
            .await
            .unwrap();
        assert_eq!(value["endpoint"], "partners");

        let calls = h.upstream.get_calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "revoked");
        assert_eq!(calls[1].0, "refreshed-access-1");
    }

    #[tokio::test]
    async fn fetch_gives_up_after_second_unauthorized() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("revoked", 7200))
            .await
            .unwrap();
        h.upstream.reject_token("revoked").await;
        h.upstream.reject_token("refreshed-access-1").await;

        let err = h
            .service
            .fetch(1, "partners", &QueryParams::new(), TTL)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotAuthorized(1)));
        assert_eq!(h.ctx.response_cache().size(), 0);
    }

    #[tokio::test]
    async fn upstream_errors_are_not_cached() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("tok", 7200))
            .await
            .unwrap();
        h.upstream
            .set_get_error(Some(UpstreamError::Http {
                status: 500,
                message: "boom".to_string(),
            }))
            .await;

        let err = h
            .service
            .fetch(1, "partners", &QueryParams::new(), TTL)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Upstream(UpstreamError::Http { status: 500, .. })));
        assert_eq!(h.ctx.response_cache().size(), 0);
    }

    #[tokio::test]
    async fn mutate_invalidates_resource_namespace() {
        let h = create_test_harness();
        let store = h.ctx.credential_store();
        store.set_token(1, &token_response("tok", 7200)).await.unwrap();
        store.set_token(12, &token_response("tok12", 7200)).await.unwrap();

        let by_name = QueryParams::new().with("name", "ABC");
        h.service.fetch(1, "partners", &QueryParams::new(), TTL).await.unwrap();
        h.service.fetch(1, "partners", &by_name, TTL).await.unwrap();
        h.service.fetch(1, "sections", &QueryParams::new(), TTL).await.unwrap();
        h.service.fetch(12, "partners", &QueryParams::new(), TTL).await.unwrap();
        assert_eq!(h.ctx.response_cache().size(), 4);

        let body = json!({ "name": "New Partner" });
        h.service.mutate(1, "partners", &body).await.unwrap();

        assert_eq!(h.ctx.response_cache().size(), 2);
        assert!(h.ctx.response_cache().get("1:sections:all").is_some());
        assert!(h.ctx.response_cache().get("12:partners:all").is_some());
        assert_eq!(h.upstream.post_calls().await[0].3, body);
    }

    #[tokio::test]
    async fn failed_mutation_keeps_cache() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("tok", 7200))
            .await
            .unwrap();
        h.service.fetch(1, "partners", &QueryParams::new(), TTL).await.unwrap();

        h.upstream.reject_token("tok").await;
        h.upstream.reject_token("refreshed-access-1").await;
        assert!(h.service.mutate(1, "partners", &json!({})).await.is_err());
        assert_eq!(h.ctx.response_cache().size(), 1);
    }

    #[tokio::test]
    async fn disconnect_removes_token_and_company_cache() {
        let h = create_test_harness();
        let store = h.ctx.credential_store();
        store.set_token(1, &token_response("tok", 7200)).await.unwrap();
        store.set_token(12, &token_response("tok12", 7200)).await.unwrap();
        h.service.fetch(1, "partners", &QueryParams::new(), TTL).await.unwrap();
        h.service.fetch(12, "partners", &QueryParams::new(), TTL).await.unwrap();

        assert!(h.service.disconnect(1).await.unwrap());
        assert!(store.get_token(1).await.is_none());
        assert_eq!(h.ctx.response_cache().size(), 1);
        assert!(!h.service.disconnect(1).await.unwrap());
    }

    #[tokio::test]
    async fn list_companies_reports_status() {
        let h = create_test_harness();
        let store = h.ctx.credential_store();
        store.set_token(2, &token_response("a", 7200)).await.unwrap();
        store.set_token(1, &token_response("b", 600)).await.unwrap();

        let companies = h.service.list_companies().await;
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[0].company_id, 1);
        assert_eq!(companies[0].status, TokenExpiryStatus::NearExpiry);
        assert_eq!(companies[1].status, TokenExpiryStatus::Valid);
    }

    #[tokio::test]
    async fn company_status_for_unknown_company() {
        let h = create_test_harness();
        assert!(matches!(
            h.service.company_status(5).await,
            Err(CoreError::NotAuthorized(5))
        ));
    }

    #[tokio::test]
    async fn refresh_without_rotation_keeps_refresh_token() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("old", 600))
            .await
            .unwrap();
        h.upstream.omit_refresh_token().await;

        assert_eq!(h.service.access_token(1).await.unwrap(), "refreshed-access-1");
        let stored = h.ctx.credential_store().get_token(1).await.unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("old-refresh"));

        h.clock.advance(Duration::from_secs(7200));
        assert_eq!(h.service.access_token(1).await.unwrap(), "refreshed-access-2");
        assert_eq!(
            h.upstream.refresh_calls().await,
            vec!["old-refresh", "old-refresh"]
        );
    }

    #[tokio::test]
    async fn slow_refresh_does_not_block_other_companies() {
        let h = create_test_harness();
        let store = h.ctx.credential_store();
        store.set_token(1, &token_response("slow", 600)).await.unwrap();
        store.set_token(2, &token_response("fast", 600)).await.unwrap();
        h.upstream
            .delay_refresh("slow-refresh", Duration::from_millis(500))
            .await;

        let (slow, fast) = tokio::join!(h.service.access_token(1), async {
            tokio::time::timeout(Duration::from_millis(200), h.service.access_token(2)).await
        });

        assert!(slow.is_ok());
        let fast = fast.expect("refresh of company 2 waited for company 1");
        assert!(fast.unwrap().starts_with("refreshed-access-"));
    }

    #[tokio::test]
    async fn reload_credentials_resets_cache() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("tok", 7200))
            .await
            .unwrap();
        h.service.fetch(1, "sections", &QueryParams::new(), TTL).await.unwrap();

        // memory-only store: reloading finds nothing on disk
        assert_eq!(
            h.service.reload_credentials().await.unwrap(),
            LoadOutcome::EmptyStore
        );
        assert_eq!(h.ctx.response_cache().size(), 0);
        assert!(h.ctx.credential_store().get_all_company_ids().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_refreshes_hit_upstream_once() {
        let h = create_test_harness();
        h.ctx
            .credential_store()
            .set_token(1, &token_response("old", 600))
            .await
            .unwrap();

        let (a, b) = tokio::join!(h.service.access_token(1), h.service.access_token(1));
        assert_eq!(a.unwrap(), "refreshed-access-1");
        assert_eq!(b.unwrap(), "refreshed-access-1");
        assert_eq!(h.upstream.refresh_calls().await.len(), 1);
    }
}
