//! Deterministic cache keys for upstream reads.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Hex characters kept from the parameter digest.
const DIGEST_HEX_LENGTH: usize = 16;

/// Query parameters of an upstream read.
///
/// A `None` value means "not provided": it is dropped from both the request and the cache key.
/// `Some(Value::Null)` is a provided null and does take part in the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(BTreeMap<String, Option<Value>>);

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provided value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), Some(value.into()));
        self
    }

    /// Add an optional value; `None` is kept as "not provided".
    #[must_use]
    pub fn with_opt<V: Into<Value>>(mut self, name: impl Into<String>, value: Option<V>) -> Self {
        self.0.insert(name.into(), value.map(Into::into));
        self
    }

    /// Provided parameters in ascending name order.
    pub fn defined(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0
            .iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| (name.as_str(), v)))
    }

    /// Whether no parameter has a provided value.
    #[must_use]
    pub fn is_effectively_empty(&self) -> bool {
        self.defined().next().is_none()
    }
}

impl<K: Into<String>> FromIterator<(K, Option<Value>)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, Option<Value>)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Build the cache key for a read of `endpoint` on behalf of `company_id`.
///
/// Without provided parameters the key is `"{company_id}:{endpoint}:all"`; otherwise the last
/// segment is a 16-character hex digest of the canonical parameter JSON.
#[must_use]
pub fn generate_cache_key(company_id: u64, endpoint: &str, params: Option<&QueryParams>) -> String {
    match params {
        Some(params) if !params.is_effectively_empty() => {
            format!("{company_id}:{endpoint}:{}", params_digest(params))
        }
        _ => format!("{company_id}:{endpoint}:all"),
    }
}

fn params_digest(params: &QueryParams) -> String {
    let object: Map<String, Value> = params
        .defined()
        .map(|(name, value)| (name.to_string(), canonicalize(value)))
        .collect();
    let canonical = Value::Object(object).to_string();

    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    digest[..DIGEST_HEX_LENGTH].to_string()
}

/// Rebuild objects with keys in ascending order, independent of serde_json's map backend.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
