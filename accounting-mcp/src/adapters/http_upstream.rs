//! `UpstreamApi` over HTTP
//!
//! Company-scoped resources live under `{base}/{company_id}/{endpoint}` and are called with a
//! bearer token. Token refresh is a standard OAuth `refresh_token` grant against the token URL.

use std::time::Duration;

use accounting_core::credentials::TokenResponse;
use accounting_core::traits::{UpstreamApi, UpstreamError};
use accounting_core::QueryParams;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use crate::config::OAuthClientConfig;
use crate::utils::log_sanitizer::truncate_for_log;

/// Per-request timeout of the HTTP client.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// reqwest-backed upstream API client
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    oauth: OAuthClientConfig,
}

impl HttpUpstream {
    pub fn new(base_url: impl Into<String>, oauth: OAuthClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            oauth,
        })
    }

    fn resource_url(&self, company_id: u64, endpoint: &str) -> String {
        format!(
            "{}/{company_id}/{}",
            self.base_url,
            endpoint.trim_start_matches('/')
        )
    }

    /// Send `request` and read a JSON body. 401 becomes [`UpstreamError::Unauthorized`].
    async fn execute(&self, request: RequestBuilder, label: &str) -> Result<Value, UpstreamError> {
        tracing::debug!("[upstream] {label}");

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.without_url().to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Network(format!("failed to read response body: {e}")))?;

        tracing::debug!("[upstream] {label} -> {}", status.as_u16());

        if status == StatusCode::UNAUTHORIZED {
            return Err(UpstreamError::Unauthorized);
        }
        if !status.is_success() {
            let message = truncate_for_log(&body);
            tracing::warn!("[upstream] {label} failed with HTTP {}: {message}", status.as_u16());
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                message,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                "[upstream] {label} returned invalid JSON: {e}; body: {}",
                truncate_for_log(&body)
            );
            UpstreamError::Parse(e.to_string())
        })
    }
}

/// Render a parameter value as a query-string value.
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn query_pairs(params: &QueryParams) -> Vec<(String, String)> {
    params
        .defined()
        .map(|(name, value)| (name.to_string(), query_value(value)))
        .collect()
}

#[async_trait]
impl UpstreamApi for HttpUpstream {
    async fn get(
        &self,
        access_token: &str,
        company_id: u64,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<Value, UpstreamError> {
        let request = self
            .client
            .get(self.resource_url(company_id, endpoint))
            .bearer_auth(access_token)
            .query(&query_pairs(params));
        self.execute(request, &format!("GET {company_id}/{endpoint}"))
            .await
    }

    async fn post(
        &self,
        access_token: &str,
        company_id: u64,
        endpoint: &str,
        body: &Value,
    ) -> Result<Value, UpstreamError> {
        let request = self
            .client
            .post(self.resource_url(company_id, endpoint))
            .bearer_auth(access_token)
            .json(body);
        self.execute(request, &format!("POST {company_id}/{endpoint}"))
            .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, UpstreamError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.oauth.client_id.as_str()),
        ];
        if let Some(secret) = self.oauth.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let request = self.client.post(&self.oauth.token_url).form(&form);
        let value = match self.execute(request, "POST oauth/token").await {
            // invalid_grant is reported as 400
            Err(UpstreamError::Http { status: 400, .. }) => return Err(UpstreamError::Unauthorized),
            other => other?,
        };

        serde_json::from_value(value).map_err(|e| UpstreamError::Parse(e.to_string()))
    }
}
