//! Processing request model
//!
//! The normalized shape of an inbound "fetch and transform this image" request,
//! as handed over by the (external) HTTP parameter parsing layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the image should fit the requested box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFit {
    Cover,
    Contain,
    Fill,
    Inside,
    Outside,
}

/// Output formats the transform collaborator is able to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
    Gif,
    Tiff,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
            ImageFormat::Gif => "gif",
            ImageFormat::Tiff => "tiff",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Avif => "image/avif",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Tiff => "image/tiff",
        }
    }

    /// Parse a format name, accepting the common `jpg` alias
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::Webp),
            "avif" => Some(ImageFormat::Avif),
            "gif" => Some(ImageFormat::Gif),
            "tiff" | "tif" => Some(ImageFormat::Tiff),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resize, crop and trim options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResizeOptions {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fit: Option<ResizeFit>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub trim_threshold: Option<f64>,
}

/// A request to resolve (fetch, transform, cache) one remote image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRequest {
    /// Upstream URL of the source image
    pub resource_target: String,
    #[serde(default)]
    pub resize: ResizeOptions,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub format: Option<ImageFormat>,
}

impl ProcessingRequest {
    pub fn new(resource_target: impl Into<String>) -> Self {
        Self {
            resource_target: resource_target.into(),
            resize: ResizeOptions::default(),
            quality: None,
            format: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.resize.width = Some(width);
        self.resize.height = Some(height);
        self
    }

    pub fn with_fit(mut self, fit: ResizeFit) -> Self {
        self.resize.fit = Some(fit);
        self
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.resize.position = Some(position.into());
        self
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.resize.background = Some(background.into());
        self
    }

    pub fn with_trim(mut self, threshold: f64) -> Self {
        self.resize.trim_threshold = Some(threshold);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Canonical copy used for identity computation.
    ///
    /// Whitespace around textual options is insignificant and colour/position
    /// names are case-insensitive.
    pub fn normalized(&self) -> Self {
        let clean = |value: &Option<String>| {
            value
                .as_ref()
                .map(|v| v.trim().to_ascii_lowercase())
                .filter(|v| !v.is_empty())
        };

        Self {
            resource_target: self.resource_target.trim().to_string(),
            resize: ResizeOptions {
                width: self.resize.width,
                height: self.resize.height,
                fit: self.resize.fit,
                position: clean(&self.resize.position),
                background: clean(&self.resize.background),
                trim_threshold: self.resize.trim_threshold,
            },
            quality: self.quality,
            format: self.format,
        }
    }
}
