//! Object storage for user uploads and relocated provider outputs.

pub mod hash;
pub mod local;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use crate::error::StorageError;

pub use hash::{compute_hash, sign_download, verify_download};
pub use local::LocalFileStorage;

/// Lifetime of signed URLs handed to providers and callers.
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(60 * 60);

/// Largest object accepted from an upload or a provider download.
pub const MAX_OBJECT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCategory {
    Images,
    Videos,
}

impl StorageCategory {
    pub fn folder(&self) -> &'static str {
        match self {
            StorageCategory::Images => "images",
            StorageCategory::Videos => "videos",
        }
    }
}

/// How stored assets are exposed to providers and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssetUrlMode {
    #[default]
    Public,
    Signed,
}

impl FromStr for AssetUrlMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(AssetUrlMode::Public),
            "signed" => Ok(AssetUrlMode::Signed),
            other => Err(format!("expected `public` or `signed`, got `{other}`")),
        }
    }
}

impl fmt::Display for AssetUrlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetUrlMode::Public => f.write_str("public"),
            AssetUrlMode::Signed => f.write_str("signed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub size: usize,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Downloads `url` and stores the body under a fresh key in `category`.
    async fn upload_from_url(&self, url: &str, category: StorageCategory) -> Result<StoredObject, StorageError>;

    async fn upload_buffer(
        &self,
        bytes: &[u8],
        category: StorageCategory,
        content_type: Option<&str>,
    ) -> Result<StoredObject, StorageError>;

    fn public_url(&self, key: &str) -> String;

    fn signed_download_url(&self, key: &str, ttl: Duration) -> String;

    async fn upload_data_url(&self, data_url: &str, category: StorageCategory) -> Result<StoredObject, StorageError> {
        let (content_type, bytes) = decode_data_url(data_url)?;
        self.upload_buffer(&bytes, category, Some(&content_type)).await
    }

    /// URL for `key` in the requested exposure mode.
    fn asset_url(&self, key: &str, mode: AssetUrlMode) -> String {
        match mode {
            AssetUrlMode::Public => self.public_url(key),
            AssetUrlMode::Signed => self.signed_download_url(key, DEFAULT_SIGNED_URL_TTL),
        }
    }
}

pub fn is_data_url(value: &str) -> bool {
    value.trim_start().starts_with("data:")
}

/// Splits a `data:<mime>;base64,<payload>` URL into its mime type and bytes.
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>), StorageError> {
    let rest = data_url
        .trim()
        .strip_prefix("data:")
        .ok_or(StorageError::InvalidDataUrl)?;
    let (meta, payload) = rest.split_once(',').ok_or(StorageError::InvalidDataUrl)?;
    let content_type = meta
        .strip_suffix(";base64")
        .ok_or(StorageError::InvalidDataUrl)?;
    let content_type = if content_type.is_empty() {
        "application/octet-stream"
    } else {
        content_type
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| StorageError::InvalidDataUrl)?;
    Ok((content_type.to_ascii_lowercase(), bytes))
}

pub fn get_extension_from_mime_type(mime_type: &str) -> Option<&'static str> {
    let ext = match mime_type.to_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/avif" => "avif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => return None,
    };
    Some(ext)
}

pub fn get_mime_type_from_key(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// Sniffs common image formats from the leading bytes.
pub fn detect_mime_type(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    match format {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::Gif => Some("image/gif"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_urls_decode_to_mime_and_bytes() {
        let (mime, bytes) = decode_data_url("data:image/PNG;base64,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn malformed_data_urls_are_rejected() {
        for input in ["image/png;base64,aGVsbG8=", "data:image/png,hello", "data:image/png;base64,@@"] {
            assert!(matches!(decode_data_url(input), Err(StorageError::InvalidDataUrl)), "{input}");
        }
    }

    #[test]
    fn video_mime_types_map_to_extensions() {
        assert_eq!(get_extension_from_mime_type("video/quicktime"), Some("mov"));
        assert_eq!(get_extension_from_mime_type("Video/MP4"), Some("mp4"));
        assert_eq!(get_extension_from_mime_type("text/html"), None);
        assert_eq!(get_mime_type_from_key("videos/a.MP4"), "video/mp4");
        assert_eq!(get_mime_type_from_key("images/noext"), "application/octet-stream");
    }

    #[test]
    fn png_signature_is_sniffed() {
        let header = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_mime_type(&header), Some("image/png"));
        assert_eq!(detect_mime_type(b"not an image"), None);
    }

    #[test]
    fn asset_url_mode_parses() {
        assert_eq!("Signed".parse::<AssetUrlMode>().unwrap(), AssetUrlMode::Signed);
        assert!("private".parse::<AssetUrlMode>().is_err());
    }
}
