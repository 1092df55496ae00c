//! Durable storage seams: blob storage for cropped regions and record
//! storage for finished jobs.
//!
//! Both are traits so the pipeline never knows whether it is talking to a
//! local directory, an S3-compatible bucket, SQLite or a JSON file.

pub mod blob;
pub mod document;
pub mod sqlite;

pub use blob::{FsBlobStore, HttpBlobStore};
pub use document::JsonDocumentStore;
pub use sqlite::SqliteRecordStore;

use crate::error::{BlobError, StoreError};
use crate::model::FinalRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// User metadata attached to a stored blob (`item-number`, `image-type`, …).
pub type BlobMetadata = BTreeMap<String, String>;

/// `Cache-Control` sent with every stored region image.
pub const CACHE_CONTROL: &str = "public, max-age=31536000";

/// Object storage for region images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return the public locator URL.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BlobMetadata,
    ) -> Result<String, BlobError>;
}

/// One durable destination for finished job records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short label used in persistence warnings (`relational`, `document`).
    fn name(&self) -> &str;

    async fn insert(&self, record: &FinalRecord) -> Result<(), StoreError>;
}

/// Reject keys that are empty, absolute, or climb out of the bucket.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|s| s.is_empty() || s == "." || s == "..");
    if bad {
        return Err(BlobError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Join a base URL and a key with exactly one slash.
pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("exam-images/job/q1/table_r1_1.png").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs/key.png").is_err());
        assert!(validate_key("a/../b.png").is_err());
        assert!(validate_key("a//b.png").is_err());
    }

    #[test]
    fn url_join() {
        assert_eq!(join_url("https://cdn.test/", "a/b.png"), "https://cdn.test/a/b.png");
        assert_eq!(join_url("https://cdn.test", "a.png"), "https://cdn.test/a.png");
    }
}
