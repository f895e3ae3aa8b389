//! MCP Server entry point for the accounting API
//!
//! Starts the MCP server with stdio transport. Company tokens are read from the encrypted token
//! store; a store that exists but cannot be decrypted stops the server instead of being
//! silently replaced.

mod adapters;
mod config;
mod schemas;
mod server;
mod utils;

use std::process::ExitCode;
use std::sync::Arc;

use accounting_core::cache::ResponseCache;
use accounting_core::crypto::KeyProvider;
use accounting_core::services::{AccountService, ServiceContext};
use accounting_core::{CredentialStore, LoadOutcome};
use adapters::HttpUpstream;
use anyhow::Context;
use config::McpConfig;
use rmcp::ServiceExt;
use server::AccountingMcp;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the service graph from configuration and load the token store.
async fn build_server(config: McpConfig) -> anyhow::Result<AccountingMcp> {
    let key_provider = config.key_provider();
    // surface key problems before any tool call needs the key
    key_provider
        .symmetric_key()
        .context("token encryption key is unavailable")?;

    let mut store = CredentialStore::new(Some(config.token_path.clone()), key_provider);
    if let Some(seed) = config.token_seed {
        store = store.with_seed(seed);
    }

    let token_path = config.token_path.display().to_string();
    let upstream = HttpUpstream::new(config.api_base_url, config.oauth)?;

    let ctx = Arc::new(ServiceContext::new(
        Arc::new(store),
        Arc::new(ResponseCache::new()),
        Arc::new(upstream),
    ));
    let account_service = Arc::new(AccountService::new(Arc::clone(&ctx)));

    match account_service
        .reload_credentials()
        .await
        .with_context(|| format!("failed to load {token_path}"))?
    {
        LoadOutcome::Loaded { companies } => {
            tracing::info!("Loaded tokens for {companies} companies");
        }
        LoadOutcome::EmptyStore => {
            tracing::warn!("No authorized companies yet - data tools will report not authorized");
        }
    }

    Ok(AccountingMcp::new(account_service))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing to stderr (MCP uses stdout for protocol)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_ansi(false),
        )
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    tracing::info!("Starting Accounting MCP Server");

    let config = match McpConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Token store: {}", config.token_path.display());

    let mcp_server = match build_server(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to initialize: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("MCP server initialized with 8 tools");

    // Start serving via stdio
    tracing::info!("Starting MCP server on stdio transport");
    let service = match mcp_server.serve(rmcp::transport::stdio()).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start MCP server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Wait for the server to complete
    if let Err(e) = service.waiting().await {
        tracing::error!("MCP server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
