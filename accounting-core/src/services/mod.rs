//! Business logic service layer

mod account_service;

pub use account_service::AccountService;

use std::sync::Arc;

use serde_json::Value;

use crate::cache::ResponseCache;
use crate::credentials::CredentialStore;
use crate::traits::UpstreamApi;

/// Service context - holds all dependencies
///
/// The binary builds this once at startup and injects the token store, the response cache and
/// the upstream API implementation.
pub struct ServiceContext {
    credential_store: Arc<CredentialStore>,
    response_cache: Arc<ResponseCache<Value>>,
    upstream: Arc<dyn UpstreamApi>,
}

impl ServiceContext {
    /// Create a service context
    #[must_use]
    pub fn new(
        credential_store: Arc<CredentialStore>,
        response_cache: Arc<ResponseCache<Value>>,
        upstream: Arc<dyn UpstreamApi>,
    ) -> Self {
        Self {
            credential_store,
            response_cache,
            upstream,
        }
    }

    #[must_use]
    pub fn credential_store(&self) -> &CredentialStore {
        &self.credential_store
    }

    #[must_use]
    pub fn response_cache(&self) -> &ResponseCache<Value> {
        &self.response_cache
    }

    #[must_use]
    pub fn upstream(&self) -> &dyn UpstreamApi {
        self.upstream.as_ref()
    }
}
