//! Adapters binding the core traits to the outside world
//!
//! - **`HttpUpstream`**: the upstream accounting API over reqwest, including the OAuth
//!   refresh grant.

mod http_upstream;

pub use http_upstream::HttpUpstream;
