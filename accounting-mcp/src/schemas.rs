//! MCP tool parameter schemas
//!
//! Defines the input parameter structures for all MCP tools.
//! All structs derive `Debug`, `Deserialize`, and `JsonSchema` as required by rmcp. The create
//! tools also derive `Serialize`: their fields (minus `company_id`) are the upstream request body.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for `list_companies` tool.
///
/// This tool takes no parameters, but we need an empty struct for the schema.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListCompaniesParams {}

/// Parameters for tools that only need a company.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CompanyParams {
    #[schemars(description = "The company ID")]
    pub company_id: u64,
}

/// Parameters for `list_partners` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListPartnersParams {
    #[schemars(description = "The company ID")]
    pub company_id: u64,

    #[schemars(description = "Filter by partner name (substring match)")]
    pub name: Option<String>,

    #[schemars(description = "Filter by partner email address")]
    pub email: Option<String>,

    #[schemars(description = "Page number (1-indexed, default: 1)")]
    pub page: Option<u32>,
}

/// Postal address of a partner.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct AddressParams {
    #[schemars(description = "ISO 3166-1 alpha-2 country code, e.g. HU")]
    pub country_code: String,

    #[schemars(description = "Postal code")]
    pub post_code: String,

    #[schemars(description = "City")]
    pub city: String,

    #[schemars(description = "Street address")]
    pub address: String,
}

/// Parameters for `create_partner` tool.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct CreatePartnerParams {
    #[serde(skip_serializing)]
    #[schemars(description = "The company ID")]
    pub company_id: u64,

    #[schemars(description = "Partner name")]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Contact email address")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Tax number")]
    pub taxcode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Postal address")]
    pub address: Option<AddressParams>,
}

/// Parameters for `list_invoices` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListInvoicesParams {
    #[schemars(description = "The company ID")]
    pub company_id: u64,

    #[schemars(description = "Only invoices issued on or after this date (YYYY-MM-DD)")]
    pub start_date: Option<String>,

    #[schemars(description = "Only invoices issued on or before this date (YYYY-MM-DD)")]
    pub end_date: Option<String>,

    #[schemars(description = "Only invoices of this partner ID")]
    pub partner_id: Option<u64>,

    #[schemars(description = "Payment status filter (e.g. paid, outstanding, expired)")]
    pub payment_status: Option<String>,

    #[schemars(description = "Page number (1-indexed, default: 1)")]
    pub page: Option<u32>,
}

/// One line of an invoice.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct InvoiceItemParams {
    #[schemars(description = "Item name")]
    pub name: String,

    #[schemars(description = "Quantity")]
    pub quantity: f64,

    #[schemars(description = "Unit of measure, e.g. pcs or hour")]
    pub unit: String,

    #[schemars(description = "Net unit price")]
    pub net_unit_price: f64,

    #[schemars(description = "VAT rate, e.g. 27 or AAM")]
    pub vat: String,
}

/// Parameters for `create_invoice` tool.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct CreateInvoiceParams {
    #[serde(skip_serializing)]
    #[schemars(description = "The company ID")]
    pub company_id: u64,

    #[schemars(description = "Partner ID of the buyer")]
    pub partner_id: u64,

    #[schemars(description = "Invoice section (numbering block) ID, see list_sections")]
    pub block_id: u64,

    #[schemars(description = "Fulfillment date (YYYY-MM-DD)")]
    pub fulfillment_date: String,

    #[schemars(description = "Payment due date (YYYY-MM-DD)")]
    pub due_date: String,

    #[schemars(description = "Payment method, e.g. transfer, cash or card")]
    pub payment_method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "ISO 4217 currency code (default: HUF)")]
    pub currency: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Free-text comment printed on the invoice")]
    pub comment: Option<String>,

    #[schemars(description = "Invoice lines (at least one)")]
    pub items: Vec<InvoiceItemParams>,
}
