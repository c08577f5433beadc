//! Proptest strategies for requests and cache keys

#![allow(dead_code)]

use pixelgate_core::resource::{ImageFormat, ProcessingRequest, ResizeFit};
use proptest::prelude::*;
use serde_json::Value;
use std::collections::HashMap;

pub fn format_strategy() -> impl Strategy<Value = ImageFormat> {
    prop_oneof![
        Just(ImageFormat::Jpeg),
        Just(ImageFormat::Png),
        Just(ImageFormat::Webp),
        Just(ImageFormat::Avif),
        Just(ImageFormat::Gif),
        Just(ImageFormat::Tiff),
    ]
}

pub fn fit_strategy() -> impl Strategy<Value = ResizeFit> {
    prop_oneof![
        Just(ResizeFit::Cover),
        Just(ResizeFit::Contain),
        Just(ResizeFit::Fill),
        Just(ResizeFit::Inside),
        Just(ResizeFit::Outside),
    ]
}

pub fn target_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,12}(/[a-z0-9_-]{1,12}){0,3}"
        .prop_map(|path| format!("https://images.example.com/{path}.jpg"))
}

pub fn request_strategy() -> impl Strategy<Value = ProcessingRequest> {
    (
        target_strategy(),
        proptest::option::of(1u32..8000),
        proptest::option::of(1u32..8000),
        proptest::option::of(fit_strategy()),
        proptest::option::of("[a-z]{3,8}"),
        proptest::option::of("#[0-9a-f]{6}"),
        proptest::option::of(1u8..=100),
        proptest::option::of(format_strategy()),
    )
        .prop_map(
            |(target, width, height, fit, position, background, quality, format)| {
                let mut request = ProcessingRequest::new(target);
                request.resize.width = width;
                request.resize.height = height;
                request.resize.fit = fit;
                request.resize.position = position;
                request.resize.background = background;
                request.quality = quality;
                request.format = format;
                request
            },
        )
}

/// Namespace segments never contain the separator
pub fn namespace_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

/// Identifiers may themselves contain `:` (URLs), but never end in a
/// hash-looking segment
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_./-]{0,20}(:[a-z][a-z0-9_./-]{0,10}){0,2}"
}

pub fn params_strategy() -> impl Strategy<Value = HashMap<String, Value>> {
    proptest::collection::hash_map("[a-z]{1,8}", any::<i64>().prop_map(Value::from), 1..6)
}
