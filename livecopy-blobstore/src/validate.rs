//! Upload validation: images only, bounded size.

use crate::ValidationError;
use serde::{Deserialize, Serialize};

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Svg,
}

impl ImageFormat {
    /// Detects the format from the leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }
        if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            return Some(Self::Gif);
        }
        if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            return Some(Self::Webp);
        }
        if looks_like_svg(bytes) {
            return Some(Self::Svg);
        }
        None
    }

    /// Parses a MIME type, ignoring parameters and case.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match normalize_mime(mime).as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            "image/svg+xml" => Some(Self::Svg),
            _ => None,
        }
    }

    /// Canonical MIME type.
    pub const fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Svg => "image/svg+xml",
        }
    }

    /// File extension used for stored names.
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Svg => "svg",
        }
    }
}

fn normalize_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        Err(e) => match std::str::from_utf8(&head[..e.valid_up_to()]) {
            Ok(text) => text,
            Err(_) => return false,
        },
    };
    svg_prefix(text)
}

fn svg_prefix(text: &str) -> bool {
    let text = text.trim_start_matches('\u{feff}').trim_start();
    (text.starts_with("<svg") || text.starts_with("<?xml")) && text.contains("<svg")
}

/// What uploads are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetPolicy {
    /// Maximum asset size in bytes.
    pub max_bytes: usize,
    /// Allowed MIME types.
    pub allowed_types: Vec<String>,
}

impl Default for AssetPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024, // 5 MB
            allowed_types: vec![
                "image/png".to_string(),
                "image/jpeg".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
                "image/svg+xml".to_string(),
            ],
        }
    }
}

impl AssetPolicy {
    /// Validates an upload and returns its detected format.
    pub fn validate(&self, bytes: &[u8], content_type: &str) -> Result<ImageFormat, ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(ValidationError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let declared = ImageFormat::from_mime(content_type)
            .filter(|f| self.allowed_types.iter().any(|t| ImageFormat::from_mime(t) == Some(*f)))
            .ok_or_else(|| ValidationError::DisallowedType(content_type.to_string()))?;

        match ImageFormat::sniff(bytes) {
            Some(actual) if actual == declared => Ok(declared),
            _ => Err(ValidationError::ContentMismatch(declared.mime().to_string())),
        }
    }
}
