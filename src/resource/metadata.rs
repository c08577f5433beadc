//! Resource metadata sidecar
//!
//! Written once per transformed artifact as `{identity}.rsm` and carried in the
//! cache beside the content. Never mutated, only replaced wholesale. The JSON
//! shape is `{version, size, format, dateCreated, privateTTL, publicTTL}` with
//! the date in epoch milliseconds and both TTLs in milliseconds.

use crate::constants::METADATA_VERSION;
use crate::resource::ImageFormat;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetaData {
    pub version: u32,
    /// Artifact size in bytes, as a decimal string
    pub size: String,
    pub format: String,
    /// Epoch milliseconds
    pub date_created: i64,
    /// Browser cache lifetime in milliseconds
    #[serde(rename = "privateTTL")]
    pub private_ttl: u64,
    /// Shared cache lifetime in milliseconds
    #[serde(rename = "publicTTL")]
    pub public_ttl: u64,
}

impl ResourceMetaData {
    pub fn new(size_bytes: u64, format: &str, private_ttl: Duration, public_ttl: Duration) -> Self {
        Self {
            version: METADATA_VERSION,
            size: size_bytes.to_string(),
            format: format.to_string(),
            date_created: Utc::now().timestamp_millis(),
            private_ttl: private_ttl.as_millis() as u64,
            public_ttl: public_ttl.as_millis() as u64,
        }
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.parse().ok()
    }

    pub fn date_created(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.date_created)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    pub fn private_ttl(&self) -> Duration {
        Duration::from_millis(self.private_ttl)
    }

    pub fn public_ttl(&self) -> Duration {
        Duration::from_millis(self.public_ttl)
    }

    /// Strong validator derived from creation time and size
    pub fn etag(&self) -> String {
        format!(
            "\"{:x}-{}\"",
            self.date_created,
            self.size_bytes().map_or_else(|| self.size.clone(), |size| format!("{size:x}"))
        )
    }

    /// `Last-Modified` header value (RFC 2822 date in GMT)
    pub fn last_modified(&self) -> String {
        self.date_created()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }

    /// `Cache-Control` header value
    pub fn cache_control(&self) -> String {
        format!(
            "public, max-age={}, s-maxage={}",
            self.private_ttl().as_secs(),
            self.public_ttl().as_secs()
        )
    }

    pub fn content_type(&self) -> &'static str {
        ImageFormat::parse(&self.format)
            .map(|format| format.content_type())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
    }

    /// Whether an `If-None-Match` header matches this resource
    pub fn is_not_modified(&self, if_none_match: Option<&str>) -> bool {
        let Some(header) = if_none_match else {
            return false;
        };
        let etag = self.etag();
        header.split(',').map(str::trim).any(|candidate| {
            candidate == "*" || candidate.trim_start_matches("W/") == etag
        })
    }

    /// Metadata of a supported schema version
    pub fn is_current(&self) -> bool {
        self.version == METADATA_VERSION
    }
}
