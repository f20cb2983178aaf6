use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
    Tiff,
    Unknown,
}

impl SourceFormat {
    pub fn label(&self) -> &'static str {
        match self {
            SourceFormat::Png => "png",
            SourceFormat::Jpeg => "jpeg",
            SourceFormat::Gif => "gif",
            SourceFormat::Webp => "webp",
            SourceFormat::Bmp => "bmp",
            SourceFormat::Tiff => "tiff",
            SourceFormat::Unknown => "unknown",
        }
    }
}

/// Raw upload as handed over by the caller, with whatever format could be sniffed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub format: SourceFormat,
}

impl SourceImage {
    pub fn new(bytes: Vec<u8>, format: SourceFormat) -> Self {
        Self { bytes, format }
    }
}

/// Canonical transport form of one reference image.
///
/// `content_hash` is a hex digest of the encoded image bytes. Two values with
/// the same hash are duplicates. `size_bytes` is the length of the base64
/// text in `data`, which is what the size ceiling applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedImage {
    pub data: String,
    pub mime_type: String,
    pub content_hash: String,
    pub size_bytes: usize,
    pub width: u32,
    pub height: u32,
    pub source_format: SourceFormat,
}

impl NormalizedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn short_hash(&self) -> &str {
        let end = self.content_hash.len().min(12);
        &self.content_hash[..end]
    }

    /// Event-safe description without the image payload.
    pub fn summary(&self) -> Map<String, Value> {
        match json!({
            "content_hash": self.content_hash,
            "mime_type": self.mime_type,
            "size_bytes": self.size_bytes,
            "width": self.width,
            "height": self.height,
            "source_format": self.source_format.label(),
        }) {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Locator of a produced image. The pipeline never dereferences it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageReference(String);

impl ImageReference {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
