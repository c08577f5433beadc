//! Request validation gate
//!
//! The pipeline treats validation as pass/fail: any error is terminal and no
//! cache, fetch or transform work happens for the request.

use crate::config::LimitsConfig;
use crate::constants::limits;
use crate::resource::{ProcessingRequest, ResolutionError};

/// Validation collaborator consulted before any work is done
pub trait RequestValidator: Send + Sync + std::fmt::Debug {
    fn validate(&self, request: &ProcessingRequest) -> Result<(), ResolutionError>;
}

/// Structural checks plus the resize pixel cap
#[derive(Debug, Clone)]
pub struct DefaultRequestValidator {
    max_pixels: u64,
}

impl DefaultRequestValidator {
    pub fn new(max_pixels: u64) -> Self {
        Self { max_pixels }
    }

    pub fn from_config(limits: &LimitsConfig) -> Self {
        Self::new(limits.max_pixels())
    }

    pub fn max_pixels(&self) -> u64 {
        self.max_pixels
    }

    fn validate_target(target: &str) -> Result<(), ResolutionError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ResolutionError::InvalidRequest(
                "resource target is required".to_string(),
            ));
        }

        let url = url::Url::parse(target).map_err(|e| {
            ResolutionError::InvalidRequest(format!("resource target '{target}' is not a URL: {e}"))
        })?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ResolutionError::InvalidRequest(format!(
                    "unsupported resource scheme '{scheme}'"
                )))
            }
        }

        if url.host_str().is_none() {
            return Err(ResolutionError::InvalidRequest(format!(
                "resource target '{target}' has no host"
            )));
        }
        Ok(())
    }

    fn validate_resize(&self, request: &ProcessingRequest) -> Result<(), ResolutionError> {
        let resize = &request.resize;
        if resize.width == Some(0) || resize.height == Some(0) {
            return Err(ResolutionError::InvalidRequest(
                "resize dimensions must be greater than 0".to_string(),
            ));
        }

        if let Some(threshold) = resize.trim_threshold {
            if !threshold.is_finite() || !(0.0..=limits::MAX_TRIM_THRESHOLD).contains(&threshold) {
                return Err(ResolutionError::InvalidRequest(format!(
                    "trim threshold must be between 0 and {}, got {threshold}",
                    limits::MAX_TRIM_THRESHOLD
                )));
            }
        }

        if resize.width.is_none() && resize.height.is_none() {
            return Ok(());
        }

        // A single given dimension is checked against the cap on its own
        let width = u64::from(resize.width.unwrap_or(1));
        let height = u64::from(resize.height.unwrap_or(1));
        if width.saturating_mul(height) > self.max_pixels {
            return Err(ResolutionError::RequestedResizeTargetTooLarge {
                width,
                height,
                max_pixels: self.max_pixels,
            });
        }
        Ok(())
    }
}

impl Default for DefaultRequestValidator {
    fn default() -> Self {
        Self::new(limits::MAX_RESIZE_PIXELS)
    }
}

impl RequestValidator for DefaultRequestValidator {
    fn validate(&self, request: &ProcessingRequest) -> Result<(), ResolutionError> {
        Self::validate_target(&request.resource_target)?;
        self.validate_resize(request)?;

        if let Some(quality) = request.quality {
            if !(limits::MIN_QUALITY..=limits::MAX_QUALITY).contains(&quality) {
                return Err(ResolutionError::InvalidRequest(format!(
                    "quality must be between {} and {}, got {quality}",
                    limits::MIN_QUALITY,
                    limits::MAX_QUALITY
                )));
            }
        }
        Ok(())
    }
}
