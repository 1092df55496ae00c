//! Denormalised document store: one JSON file per job.
//!
//! The whole [`FinalRecord`] is stored as-is, plus a `searchableText` field,
//! at `{root}/{job_id}.json`.

use super::RecordStore;
use crate::error::StoreError;
use crate::model::FinalRecord;
use crate::pipeline::persist::searchable_text;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// [`RecordStore`] writing one JSON document per job into a directory.
#[derive(Debug, Clone)]
pub struct JsonDocumentStore {
    root: PathBuf,
}

impl JsonDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.root.join(format!("{job_id}.json"))
    }

    /// Load a stored document, if present.
    pub async fn get(&self, job_id: Uuid) -> Result<Option<Value>, StoreError> {
        match tokio::fs::read(self.path_for(job_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RecordStore for JsonDocumentStore {
    fn name(&self) -> &str {
        "document"
    }

    /// Atomic write: temp file, then rename.
    async fn insert(&self, record: &FinalRecord) -> Result<(), StoreError> {
        let mut doc = serde_json::to_value(record)?;
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("searchableText".into(), Value::from(searchable_text(record)));
        }
        let json = serde_json::to_vec_pretty(&doc)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(record.job_id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!("Document store: {} ({} bytes)", path.display(), json.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::model::{Metadata, QualityNotes, StageTimings};
    use chrono::Utc;

    fn empty_record() -> FinalRecord {
        let mut metadata = Metadata::new();
        metadata.insert("year".into(), Value::from("2026"));
        FinalRecord {
            job_id: Uuid::new_v4(),
            document_type: "exam".into(),
            metadata,
            items: vec![],
            unlinked_assets: vec![],
            failed_regions: vec![],
            notes: QualityNotes::default(),
            persistence: None,
            timings: StageTimings::default(),
            status: JobStatus::Linked,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn insert_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDocumentStore::new(dir.path().join("docs"));
        let rec = empty_record();
        store.insert(&rec).await.unwrap();

        let doc = store.get(rec.job_id).await.unwrap().expect("stored");
        assert_eq!(doc["jobId"], rec.job_id.to_string());
        assert_eq!(doc["searchableText"], "2026");
        assert!(!dir.path().join(format!("docs/{}.json.tmp", rec.job_id)).exists());
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDocumentStore::new(dir.path());
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
