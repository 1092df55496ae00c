//! Blob store implementations.
//!
//! * [`FsBlobStore`] writes into a local directory served under a public base
//!   URL. Content type, cache control and user metadata go to a
//!   `{file}.meta.json` sidecar because plain files cannot carry them.
//! * [`HttpBlobStore`] PUTs to an S3-compatible endpoint, carrying user
//!   metadata as `x-amz-meta-*` headers.

use super::{join_url, validate_key, BlobMetadata, BlobStore, CACHE_CONTROL};
use crate::error::BlobError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

// ── Local directory ──────────────────────────────────────────────────────────

/// Blob store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar<'a> {
    content_type: &'a str,
    cache_control: &'a str,
    content_length: usize,
    metadata: &'a BlobMetadata,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path a key is stored at.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    /// Writes atomically (temp file + rename) so readers never see a partial PNG.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BlobMetadata,
    ) -> Result<String, BlobError> {
        validate_key(key)?;
        let path = self.path_for(key);
        let io_err = |source| BlobError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let sidecar = Sidecar {
            content_type,
            cache_control: CACHE_CONTROL,
            content_length: bytes.len(),
            metadata,
        };
        let sidecar_json = serde_json::to_vec_pretty(&sidecar).map_err(|e| BlobError::Upload {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".tmp");
        tokio::fs::write(&tmp_path, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(io_err)?;

        let mut meta_path = path.into_os_string();
        meta_path.push(".meta.json");
        tokio::fs::write(&meta_path, sidecar_json)
            .await
            .map_err(io_err)?;

        debug!("Stored blob {} ({} bytes)", key, bytes.len());
        Ok(join_url(&self.base_url, key))
    }
}

// ── S3-compatible HTTP endpoint ──────────────────────────────────────────────

/// Blob store that PUTs objects to an S3-compatible bucket URL.
///
/// Request signing is not performed; point it at a bucket that accepts
/// bearer-authenticated or pre-authorised writes.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    public_base_url: Option<String>,
    bearer_token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, BlobError> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BlobError::Upload {
                key: String::new(),
                reason: format!("HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint,
            public_base_url: None,
            bearer_token: None,
        })
    }

    /// Base URL of returned locators, if it differs from the write endpoint
    /// (e.g. a CDN in front of the bucket).
    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = Some(url.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BlobMetadata,
    ) -> Result<String, BlobError> {
        validate_key(key)?;
        let url = join_url(&self.endpoint, key);
        let size = bytes.len();

        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CACHE_CONTROL, CACHE_CONTROL)
            .body(bytes);
        for (name, value) in metadata {
            request = request.header(format!("x-amz-meta-{name}"), value);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| BlobError::Upload {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(BlobError::Upload {
                key: key.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        debug!("Uploaded blob {} ({} bytes) to {}", key, size, url);
        let base = self.public_base_url.as_deref().unwrap_or(&self.endpoint);
        Ok(join_url(base, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_writes_file_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "https://cdn.test/");
        let mut meta = BlobMetadata::new();
        meta.insert("item-number".into(), "3".into());

        let locator = store
            .put("exam-images/j/q3/table_r1_1.png", vec![1, 2, 3], "image/png", &meta)
            .await
            .unwrap();
        assert_eq!(locator, "https://cdn.test/exam-images/j/q3/table_r1_1.png");

        let path = store.path_for("exam-images/j/q3/table_r1_1.png");
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);

        let sidecar: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join("exam-images/j/q3/table_r1_1.png.meta.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar["contentType"], "image/png");
        assert_eq!(sidecar["metadata"]["item-number"], "3");
        assert_eq!(sidecar["cacheControl"], CACHE_CONTROL);
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "https://cdn.test");
        let err = store
            .put("../escape.png", vec![0], "image/png", &BlobMetadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidKey { .. }));
    }

    #[test]
    fn http_store_locator_base() {
        let store = HttpBlobStore::new("https://bucket.s3.test", 5)
            .unwrap()
            .with_public_base_url("https://cdn.test");
        assert_eq!(store.public_base_url.as_deref(), Some("https://cdn.test"));
    }
}
