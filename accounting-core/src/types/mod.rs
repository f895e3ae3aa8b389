//! Shared type definitions

mod company;

pub use company::CompanySummary;

pub use crate::cache::QueryParams;
pub use crate::credentials::{TokenExpiryStatus, TokenRecord, TokenResponse};
