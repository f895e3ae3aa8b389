//! Upstream abstraction trait definition

mod upstream_api;

pub use upstream_api::{UpstreamApi, UpstreamError};
