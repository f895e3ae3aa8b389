//! Accounting MCP Core Library
//!
//! Provides the credential lifecycle and response caching that sit between every MCP tool
//! invocation and the upstream accounting API:
//! - Encrypted per-company token storage (`CredentialStore`)
//! - Bounded TTL response cache (`ResponseCache`) and its key builder
//! - Upstream access with token refresh and cache invalidation (`AccountService`)
//!
//! The upstream API and the encryption key source are injected through traits, so the core
//! carries no HTTP client and no hardcoded key derivation.

pub mod cache;
pub mod clock;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod services;
pub mod traits;
pub mod types;

#[cfg(test)]
mod test_utils;

// Re-export common types
pub use cache::{generate_cache_key, QueryParams, ResponseCache};
pub use credentials::{CredentialStore, LoadOutcome};
pub use error::{CoreError, CoreResult};
pub use services::ServiceContext;
pub use traits::{UpstreamApi, UpstreamError};
