use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{
    MAX_OBJECT_BYTES, ObjectStorage, StorageCategory, StoredObject, detect_mime_type, get_extension_from_mime_type,
    sign_download,
};
use crate::config::normalize_base_url;
use crate::error::StorageError;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const OCTET_STREAM: &str = "application/octet-stream";

/// Directory-backed storage whose keys are served under `base_url`.
#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    base_dir: PathBuf,
    base_url: String,
    download_base_url: String,
    signing_secret: String,
    client: Client,
    max_object_bytes: usize,
}

impl LocalFileStorage {
    pub fn new(base_dir: PathBuf, base_url: String) -> Self {
        let base_url = normalize_base_url(&base_url);
        Self {
            base_dir,
            download_base_url: base_url.clone(),
            base_url,
            signing_secret: String::new(),
            client: Client::new(),
            max_object_bytes: MAX_OBJECT_BYTES,
        }
    }

    /// Enables signed download URLs served from `download_base_url`.
    pub fn with_signing(mut self, secret: impl Into<String>, download_base_url: &str) -> Self {
        self.signing_secret = secret.into();
        self.download_base_url = normalize_base_url(download_base_url);
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_max_object_bytes(mut self, limit: usize) -> Self {
        self.max_object_bytes = limit;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn signing_secret(&self) -> &str {
        &self.signing_secret
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.resolve_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    /// Maps a key onto the base directory, refusing to climb out of it.
    pub fn resolve_path(&self, key: &str) -> PathBuf {
        let normalized: PathBuf = Path::new(key.trim_start_matches('/'))
            .components()
            .filter(|component| matches!(component, std::path::Component::Normal(_)))
            .collect();
        self.base_dir.join(normalized)
    }

    fn object_key(category: StorageCategory, content_type: &str) -> String {
        match get_extension_from_mime_type(content_type) {
            Some(ext) => format!("{}/{}.{ext}", category.folder(), Uuid::new_v4()),
            None => format!("{}/{}", category.folder(), Uuid::new_v4()),
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalFileStorage {
    async fn upload_from_url(&self, url: &str, category: StorageCategory) -> Result<StoredObject, StorageError> {
        let fetch_error = |message: String| StorageError::Fetch {
            url: url.to_string(),
            message,
        };
        let mut response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|err| fetch_error(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {status}")));
        }
        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty() && value != OCTET_STREAM);
        let too_large = || StorageError::TooLarge {
            url: url.to_string(),
            limit: self.max_object_bytes,
        };
        if response
            .content_length()
            .is_some_and(|length| length > self.max_object_bytes as u64)
        {
            return Err(too_large());
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|err| fetch_error(err.to_string()))? {
            if bytes.len() + chunk.len() > self.max_object_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        self.upload_buffer(&bytes, category, header_type.as_deref()).await
    }

    async fn upload_buffer(
        &self,
        bytes: &[u8],
        category: StorageCategory,
        content_type: Option<&str>,
    ) -> Result<StoredObject, StorageError> {
        let content_type = content_type
            .filter(|value| *value != OCTET_STREAM)
            .map(str::to_string)
            .or_else(|| detect_mime_type(bytes).map(str::to_string))
            .unwrap_or_else(|| OCTET_STREAM.to_string());
        let key = Self::object_key(category, &content_type);
        self.put(&key, bytes).await?;
        debug!(key = %key, size = bytes.len(), content_type = %content_type, "stored object");

        Ok(StoredObject {
            url: self.public_url(&key),
            key,
            content_type,
            size: bytes.len(),
        })
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn signed_download_url(&self, key: &str, ttl: Duration) -> String {
        let key = key.trim_start_matches('/');
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = sign_download(&self.signing_secret, key, expires);
        format!("{}/{key}?expires={expires}&signature={signature}", self.download_base_url)
    }
}
