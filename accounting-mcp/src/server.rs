//! MCP Server implementation for the accounting API.
//!
//! Exposes 8 tools for AI agents to read and create records on behalf of authorized companies.

use std::future::Future;
use std::sync::Arc;

use accounting_core::services::AccountService;
use accounting_core::traits::UpstreamError;
use accounting_core::{CoreError, CoreResult, QueryParams};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    tool, tool_handler, tool_router,
};
use serde::Serialize;
use serde_json::json;
use tokio::time::{Duration, timeout};

use crate::schemas::{
    CompanyParams, CreateInvoiceParams, CreatePartnerParams, ListCompaniesParams,
    ListInvoicesParams, ListPartnersParams,
};

// Upstream resources
const PARTNERS: &str = "partners";
const SECTIONS: &str = "sections";
const INVOICES: &str = "invoices";

// Cache lifetimes per resource
const PARTNERS_TTL: Duration = Duration::from_secs(5 * 60);
const SECTIONS_TTL: Duration = Duration::from_secs(60 * 60);
const INVOICES_TTL: Duration = Duration::from_secs(60);

// Timeouts for upstream-backed tools, token refresh included
const READ_TIMEOUT_SECS: u64 = 45;
const WRITE_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Copy)]
struct ToolTimeouts {
    read: Duration,
    write: Duration,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(READ_TIMEOUT_SECS),
            write: Duration::from_secs(WRITE_TIMEOUT_SECS),
        }
    }
}

/// Sanitize error messages to prevent sensitive information leakage.
///
/// Logs the full error to stderr but returns a generic message to the client.
fn sanitize_internal_error(error: impl std::fmt::Display, context: &str) -> McpError {
    tracing::error!("{context} error: {error}");
    McpError::internal_error(
        format!("{context} failed - check server logs for details"),
        None,
    )
}

/// Map a core error to a tool error.
///
/// Authorization problems and upstream validation errors are actionable for the agent and keep
/// their message; everything else is sanitized.
fn map_core_error(context: &str, error: CoreError) -> McpError {
    match error {
        CoreError::NotAuthorized(company_id) => {
            tracing::warn!("{context}: company {company_id} is not authorized");
            McpError::invalid_request(
                format!("Company {company_id} is not authorized - reconnect it to continue"),
                None,
            )
        }
        CoreError::Upstream(UpstreamError::Unauthorized) => {
            tracing::warn!("{context}: upstream rejected the credentials");
            McpError::invalid_request("Upstream rejected the credentials".to_string(), None)
        }
        CoreError::Upstream(UpstreamError::Http { status, message })
            if matches!(status, 400 | 404 | 422) =>
        {
            tracing::warn!("{context}: upstream returned HTTP {status}");
            McpError::invalid_params(format!("Upstream returned HTTP {status}: {message}"), None)
        }
        other => sanitize_internal_error(other, context),
    }
}

fn json_result<T: Serialize>(value: &T, context: &str) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| sanitize_internal_error(e, &format!("Serialize {context} result")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Execute an upstream-backed operation with timeout, error mapping, and JSON serialization.
async fn run_upstream_tool<T: Serialize>(
    duration: Duration,
    future: impl Future<Output = CoreResult<T>>,
    tool_name: &str,
) -> Result<CallToolResult, McpError> {
    let result = timeout(duration, future)
        .await
        .map_err(|_| McpError::internal_error(format!("{tool_name} timeout"), None))?
        .map_err(|e| map_core_error(tool_name, e))?;

    json_result(&result, tool_name)
}

/// MCP Server for the accounting API.
///
/// Provides AI agents with per-company access to partners, invoice sections and invoices
/// through the Model Context Protocol.
#[derive(Clone)]
pub struct AccountingMcp {
    /// Token-aware, cached upstream access.
    account_service: Arc<AccountService>,
    /// Timeout configuration for upstream calls.
    timeouts: ToolTimeouts,
    /// Tool router generated by macro.
    tool_router: ToolRouter<Self>,
}

impl AccountingMcp {
    /// Create a new MCP server instance.
    #[must_use]
    pub fn new(account_service: Arc<AccountService>) -> Self {
        Self::with_timeouts(account_service, ToolTimeouts::default())
    }

    fn with_timeouts(account_service: Arc<AccountService>, timeouts: ToolTimeouts) -> Self {
        Self {
            account_service,
            timeouts,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl AccountingMcp {
    /// List all authorized companies.
    #[tool(
        description = "List all companies with a stored authorization, including token status (valid, near_expiry, expired)"
    )]
    async fn list_companies(
        &self,
        _params: Parameters<ListCompaniesParams>,
    ) -> Result<CallToolResult, McpError> {
        let companies = self.account_service.list_companies().await;
        json_result(&companies, "List companies")
    }

    /// Authorization status of one company.
    #[tool(description = "Show the token status of one company (expiry time, scope, refreshability)")]
    async fn token_status(
        &self,
        Parameters(params): Parameters<CompanyParams>,
    ) -> Result<CallToolResult, McpError> {
        let summary = self
            .account_service
            .company_status(params.company_id)
            .await
            .map_err(|e| map_core_error("Token status", e))?;
        json_result(&summary, "Token status")
    }

    /// List partners of a company.
    #[tool(description = "List the partners (customers and suppliers) of a company, optionally filtered by name or email")]
    async fn list_partners(
        &self,
        Parameters(params): Parameters<ListPartnersParams>,
    ) -> Result<CallToolResult, McpError> {
        let query = QueryParams::new()
            .with_opt("name", params.name)
            .with_opt("email", params.email)
            .with_opt("page", params.page);

        run_upstream_tool(
            self.timeouts.read,
            self.account_service
                .fetch(params.company_id, PARTNERS, &query, PARTNERS_TTL),
            "List partners",
        )
        .await
    }

    /// Create a partner.
    #[tool(description = "Create a new partner for a company")]
    async fn create_partner(
        &self,
        Parameters(params): Parameters<CreatePartnerParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.name.trim().is_empty() {
            return Err(McpError::invalid_params(
                "Partner name must not be empty".to_string(),
                None,
            ));
        }
        let body = serde_json::to_value(&params)
            .map_err(|e| sanitize_internal_error(e, "Serialize partner"))?;

        run_upstream_tool(
            self.timeouts.write,
            self.account_service
                .mutate(params.company_id, PARTNERS, &body),
            "Create partner",
        )
        .await
    }

    /// List invoice sections.
    #[tool(description = "List the invoice sections (numbering blocks) of a company; needed for create_invoice")]
    async fn list_sections(
        &self,
        Parameters(params): Parameters<CompanyParams>,
    ) -> Result<CallToolResult, McpError> {
        run_upstream_tool(
            self.timeouts.read,
            self.account_service.fetch(
                params.company_id,
                SECTIONS,
                &QueryParams::new(),
                SECTIONS_TTL,
            ),
            "List sections",
        )
        .await
    }

    /// List invoices of a company.
    #[tool(description = "List the invoices of a company with date, partner and payment status filters")]
    async fn list_invoices(
        &self,
        Parameters(params): Parameters<ListInvoicesParams>,
    ) -> Result<CallToolResult, McpError> {
        let query = QueryParams::new()
            .with_opt("start_date", params.start_date)
            .with_opt("end_date", params.end_date)
            .with_opt("partner_id", params.partner_id)
            .with_opt("payment_status", params.payment_status)
            .with_opt("page", params.page);

        run_upstream_tool(
            self.timeouts.read,
            self.account_service
                .fetch(params.company_id, INVOICES, &query, INVOICES_TTL),
            "List invoices",
        )
        .await
    }

    /// Create an invoice.
    #[tool(description = "Create an invoice for a partner in a given invoice section")]
    async fn create_invoice(
        &self,
        Parameters(params): Parameters<CreateInvoiceParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.items.is_empty() {
            return Err(McpError::invalid_params(
                "An invoice needs at least one item".to_string(),
                None,
            ));
        }
        let body = serde_json::to_value(&params)
            .map_err(|e| sanitize_internal_error(e, "Serialize invoice"))?;

        run_upstream_tool(
            self.timeouts.write,
            self.account_service
                .mutate(params.company_id, INVOICES, &body),
            "Create invoice",
        )
        .await
    }

    /// Disconnect a company.
    #[tool(description = "Forget the stored authorization and cached data of a company")]
    async fn disconnect_company(
        &self,
        Parameters(params): Parameters<CompanyParams>,
    ) -> Result<CallToolResult, McpError> {
        let removed = self
            .account_service
            .disconnect(params.company_id)
            .await
            .map_err(|e| map_core_error("Disconnect company", e))?;

        json_result(
            &json!({ "companyId": params.company_id, "disconnected": removed }),
            "Disconnect company",
        )
    }
}

#[tool_handler]
impl ServerHandler for AccountingMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Accounting MCP Server - Work with the accounting data of authorized companies. \
                 Use list_companies to see which companies are connected and token_status to check \
                 one of them. list_partners, list_sections and list_invoices read data; \
                 create_partner and create_invoice create records. \
                 Every data tool takes a company_id from list_companies."
                    .into(),
            ),
        }
    }
}

#[cfg(test)]
#[path = "test_mocks.rs"]
#[allow(clippy::unwrap_used, clippy::panic)]
pub(crate) mod test_mocks;

#[cfg(test)]
#[path = "server_tests.rs"]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests;

#[cfg(test)]
#[path = "client_integration_tests.rs"]
#[allow(clippy::unwrap_used, clippy::panic)]
mod client_integration_tests;
