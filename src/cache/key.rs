//! Cache key strategy
//!
//! Keys take the form `namespace:identifier[:paramsHash]`. The optional params hash
//! is a SHA-256 digest of the parameters with their keys sorted, truncated to
//! [`CACHE_KEY_HASH_LENGTH`] hex characters. Truncation is acceptable because the
//! hash is always scoped by namespace and identifier.

use super::errors::{CacheError, CacheResult};
use crate::constants::{CACHE_KEY_HASH_LENGTH, CACHE_KEY_SEPARATOR};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Components recovered from a cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCacheKey {
    pub namespace: String,
    pub identifier: String,
    pub params_hash: Option<String>,
}

/// Builds and parses namespaced, hash-suffixed cache keys
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheKeyStrategy;

impl CacheKeyStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Build `namespace:identifier[:paramsHash]`.
    ///
    /// The hash segment is only appended for a non-empty parameter map, and is
    /// independent of the map's iteration order.
    pub fn generate_key(
        &self,
        namespace: &str,
        identifier: &str,
        params: Option<&HashMap<String, Value>>,
    ) -> String {
        match params.filter(|p| !p.is_empty()) {
            Some(params) => format!(
                "{namespace}{sep}{identifier}{sep}{hash}",
                sep = CACHE_KEY_SEPARATOR,
                hash = self.params_hash(params)
            ),
            None => format!("{namespace}{CACHE_KEY_SEPARATOR}{identifier}"),
        }
    }

    /// Split a key back into its components.
    ///
    /// The first segment is the namespace. A trailing segment that looks like a
    /// params hash is only treated as one when at least namespace and identifier
    /// precede it; everything in between is the identifier (identifiers such as
    /// URLs may themselves contain the separator).
    pub fn parse_key(&self, key: &str) -> CacheResult<ParsedCacheKey> {
        let segments: Vec<&str> = key.split(CACHE_KEY_SEPARATOR).collect();
        if segments.len() < 2 {
            return Err(CacheError::InvalidKeyFormat(format!(
                "expected at least 2 segments in '{key}'"
            )));
        }

        let namespace = segments[0];
        let (identifier_segments, params_hash) = match segments.split_last() {
            Some((last, rest)) if rest.len() >= 2 && is_params_hash(last) => {
                (&rest[1..], Some((*last).to_string()))
            }
            _ => (&segments[1..], None),
        };
        let identifier = identifier_segments.join(&CACHE_KEY_SEPARATOR.to_string());

        if namespace.is_empty() || identifier.is_empty() {
            return Err(CacheError::InvalidKeyFormat(format!(
                "empty namespace or identifier in '{key}'"
            )));
        }

        Ok(ParsedCacheKey {
            namespace: namespace.to_string(),
            identifier,
            params_hash,
        })
    }

    /// Full SHA-256 hex digest of `input`
    pub fn generate_hash(&self, input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn params_hash(&self, params: &HashMap<String, Value>) -> String {
        let sorted: BTreeMap<&String, &Value> = params.iter().collect();
        let canonical = serde_json::to_string(&sorted).unwrap_or_default();
        let mut digest = self.generate_hash(&canonical);
        digest.truncate(CACHE_KEY_HASH_LENGTH);
        digest
    }
}

fn is_params_hash(segment: &str) -> bool {
    segment.len() == CACHE_KEY_HASH_LENGTH && segment.chars().all(|c| c.is_ascii_hexdigit())
}
