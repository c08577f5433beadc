//! Upstream fetching
//!
//! [`ResourceFetcher`] is the seam the resolution pipeline fetches through;
//! [`HttpResourceFetcher`] is the `reqwest` implementation. Bodies are exposed
//! as byte streams so large images are persisted without being buffered whole.

use crate::config::FetchConfig;
use crate::resource::{ImageFormat, ResolutionError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{redirect, Client, StatusCode};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Streaming response body
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("Upstream returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("Invalid upstream URL '{0}'")]
    InvalidUrl(String),

    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    #[error("Default asset unavailable at {path}: {message}")]
    DefaultAssetUnavailable { path: String, message: String },
}

impl FetchError {
    fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Transport {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

impl From<FetchError> for ResolutionError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::CircuitOpen { component } => Self::CircuitOpen { component },
            other => Self::UnableToFetchResource(other.to_string()),
        }
    }
}

/// A fetched resource before it is persisted
pub struct FetchedResource {
    /// `None` when the response carried no readable body
    pub body: Option<ByteStream>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl FetchedResource {
    /// Resource backed by an in-memory buffer
    pub fn from_bytes(data: Bytes, content_type: Option<String>) -> Self {
        let content_length = Some(data.len() as u64);
        Self {
            body: Some(stream::once(async move { Ok(data) }).boxed()),
            content_type,
            content_length,
        }
    }

    /// Resource whose response had no body
    pub fn empty(content_type: Option<String>) -> Self {
        Self {
            body: None,
            content_type,
            content_length: None,
        }
    }
}

impl std::fmt::Debug for FetchedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedResource")
            .field("has_body", &self.body.is_some())
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// HTTP client collaborator
#[async_trait]
pub trait ResourceFetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError>;
}

/// `reqwest` backed fetcher with a client-level timeout
#[derive(Debug, Clone)]
pub struct HttpResourceFetcher {
    client: Client,
}

impl HttpResourceFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;

        let start_time = Instant::now();
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = url, status = status.as_u16(), "Upstream fetch rejected");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        debug!(
            url = url,
            status = status.as_u16(),
            content_length = ?content_length,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Upstream responded"
        );

        if status == StatusCode::NO_CONTENT {
            return Ok(FetchedResource::empty(content_type));
        }

        let owned_url = url.to_string();
        let body = response
            .bytes_stream()
            .map_err(move |e| FetchError::from_reqwest(&owned_url, e))
            .boxed();

        Ok(FetchedResource {
            body: Some(body),
            content_type,
            content_length,
        })
    }
}

/// Read the configured default asset served while an upstream is unavailable
pub async fn load_default_asset(path: &Path) -> Result<FetchedResource, FetchError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| FetchError::DefaultAssetUnavailable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    let content_type = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ImageFormat::parse)
        .map(|format| format.content_type().to_string());

    Ok(FetchedResource::from_bytes(Bytes::from(data), content_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_default_asset_is_streamed_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"\x89PNG fallback").unwrap();

        let resource = load_default_asset(file.path()).await.unwrap();
        assert_eq!(resource.content_type.as_deref(), Some("image/png"));
        assert_eq!(resource.content_length, Some(13));

        let chunks: Vec<Bytes> = resource.body.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"\x89PNG fallback");
    }

    #[tokio::test]
    async fn test_missing_default_asset() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_default_asset(&dir.path().join("missing.png")).await;
        assert!(matches!(
            result,
            Err(FetchError::DefaultAssetUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_sending() {
        let fetcher = HttpResourceFetcher::from_config(&FetchConfig::default()).unwrap();
        let result = fetcher.fetch("not a url").await;
        assert_eq!(
            result.unwrap_err(),
            FetchError::InvalidUrl("not a url".to_string())
        );
    }

    #[test]
    fn test_circuit_open_maps_to_resolution_error() {
        let error: ResolutionError = FetchError::CircuitOpen {
            component: "images.example.com".to_string(),
        }
        .into();
        assert_eq!(
            error,
            ResolutionError::CircuitOpen {
                component: "images.example.com".to_string()
            }
        );

        let error: ResolutionError = FetchError::Timeout {
            url: "https://x/y.png".to_string(),
        }
        .into();
        assert!(matches!(error, ResolutionError::UnableToFetchResource(_)));
    }
}
