//! # Request Identity
//!
//! Deterministic fingerprint of a normalized [`ProcessingRequest`]. The identity
//! seeds the deduplication key, the cache key and the artifact file names, so two
//! logically identical requests must always collapse onto the same value.
//!
//! The canonical form is a JSON object whose keys are emitted in sorted order
//! (`serde_json::Map` is ordered), hashed with SHA-256.

use crate::resource::ProcessingRequest;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque, hex-encoded SHA-256 fingerprint of a processing request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestIdentity(String);

impl RequestIdentity {
    /// Compute the identity of a request after normalization
    pub fn from_request(request: &ProcessingRequest) -> Self {
        Self::from_canonical(&canonical_form(&request.normalized()))
    }

    /// Compute the identity of an arbitrary JSON description of a request.
    ///
    /// Object keys are re-ordered recursively, so the insertion order of the
    /// source document never affects the result.
    pub fn from_value(value: &Value) -> Self {
        Self::from_canonical(&canonicalize(value))
    }

    fn from_canonical(canonical: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Every identity-relevant attribute, absent ones as `null`
fn canonical_form(request: &ProcessingRequest) -> Value {
    json!({
        "resource_target": request.resource_target,
        "width": request.resize.width,
        "height": request.resize.height,
        "fit": request.resize.fit,
        "position": request.resize.position,
        "background": request.resize.background,
        "trim_threshold": request.resize.trim_threshold,
        "quality": request.quality,
        "format": request.format,
    })
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
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
