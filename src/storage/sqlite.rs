//! Relational record store on SQLite.
//!
//! The final record is normalised into three tables: `documents` (one row
//! per job), `items` and `assets`. A record is written in one transaction,
//! so a failure leaves no half-inserted job behind.
//!
//! ## Why spawn_blocking?
//!
//! `rusqlite` is synchronous. The connection sits behind a mutex and every
//! call runs on the blocking pool so Tokio workers never wait on disk I/O.

use super::RecordStore;
use crate::error::StoreError;
use crate::model::FinalRecord;
use crate::pipeline::persist::searchable_text;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    document_type TEXT NOT NULL,
    metadata TEXT NOT NULL,
    status TEXT NOT NULL,
    item_count INTEGER NOT NULL,
    asset_count INTEGER NOT NULL,
    searchable_text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS items (
    document_id TEXT NOT NULL,
    item_number INTEGER NOT NULL,
    text TEXT NOT NULL,
    passage TEXT,
    choices TEXT NOT NULL,
    markers TEXT,
    item_type TEXT,
    difficulty TEXT,
    points REAL,
    has_images INTEGER NOT NULL,
    image_count INTEGER NOT NULL,
    PRIMARY KEY (document_id, item_number),
    FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS assets (
    id TEXT NOT NULL,
    document_id TEXT NOT NULL,
    item_number INTEGER,
    kind TEXT NOT NULL,
    description TEXT,
    essential INTEGER NOT NULL,
    locator TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    page INTEGER NOT NULL,
    crop_x INTEGER NOT NULL,
    crop_y INTEGER NOT NULL,
    crop_width INTEGER NOT NULL,
    crop_height INTEGER NOT NULL,
    byte_size INTEGER NOT NULL,
    uploaded_at TEXT NOT NULL,
    PRIMARY KEY (document_id, id),
    FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_assets_item ON assets(document_id, item_number);
"#;

/// SQLite-backed [`RecordStore`].
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open or create the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".into()))?;
        f(&mut conn)
    }

    /// Number of asset rows stored for a job.
    pub fn asset_count(&self, job_id: &str) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM assets WHERE document_id = ?1",
                params![job_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Stored search field of a job, if the job exists.
    pub fn searchable_text(&self, job_id: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT searchable_text FROM documents WHERE id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    fn insert_blocking(&self, record: &FinalRecord) -> Result<(), StoreError> {
        let search = searchable_text(record);
        let metadata = serde_json::to_string(&record.metadata)?;
        let doc_id = record.job_id.to_string();

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                r#"
                INSERT INTO documents (id, document_type, metadata, status, item_count, asset_count, searchable_text, created_at, completed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    doc_id,
                    record.document_type,
                    metadata,
                    record.status.to_string(),
                    record.items.len() as i64,
                    record.total_assets() as i64,
                    search,
                    record.created_at.to_rfc3339(),
                    record.completed_at.map(|t| t.to_rfc3339()),
                ],
            )?;

            for linked in &record.items {
                let item = &linked.item;
                let markers = item.markers.as_ref().map(serde_json::to_string).transpose()?;
                tx.execute(
                    r#"
                    INSERT INTO items (document_id, item_number, text, passage, choices, markers, item_type, difficulty, points, has_images, image_count)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#,
                    params![
                        doc_id,
                        item.item_number,
                        item.text,
                        item.passage,
                        serde_json::to_string(&item.choices)?,
                        markers,
                        item.item_type,
                        item.difficulty,
                        item.points,
                        !linked.images.is_empty(),
                        linked.images.len() as i64,
                    ],
                )?;
            }

            for asset in record.assets() {
                let d = &asset.description;
                let s = &asset.storage;
                tx.execute(
                    r#"
                    INSERT INTO assets (id, document_id, item_number, kind, description, essential, locator, storage_key, page, crop_x, crop_y, crop_width, crop_height, byte_size, uploaded_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                    "#,
                    params![
                        d.region_id,
                        doc_id,
                        d.item_number,
                        d.kind,
                        d.description,
                        d.essential,
                        s.locator,
                        s.key,
                        s.requested.page,
                        s.crop.x,
                        s.crop.y,
                        s.crop.width,
                        s.crop.height,
                        s.byte_size as i64,
                        s.uploaded_at.to_rfc3339(),
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })?;

        debug!(
            "Relational store: job {} written ({} items)",
            record.job_id,
            record.items.len()
        );
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &str {
        "relational"
    }

    async fn insert(&self, record: &FinalRecord) -> Result<(), StoreError> {
        let store = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.insert_blocking(&record))
            .await
            .map_err(|e| StoreError::Unavailable(format!("insert task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::model::{
        AssetDescription, AssetStorage, CropBox, ExtractedAsset, ImageStatistics, Item, LinkedItem,
        Metadata, ProcessingStatus, QualityNotes, Rect, StageTimings,
    };
    use chrono::Utc;
    use serde_json::Value;
    use uuid::Uuid;

    fn record() -> FinalRecord {
        let mut metadata = Metadata::new();
        metadata.insert("subject".into(), Value::from("biology"));
        let asset = ExtractedAsset {
            description: AssetDescription {
                region_id: "img_q1_table_000".into(),
                item_number: Some(1),
                kind: "table".into(),
                description: None,
                essential: true,
                content_analysis: None,
            },
            storage: AssetStorage {
                locator: "https://cdn.test/a.png".into(),
                key: "a.png".into(),
                requested: Rect { page: 1, x: 0, y: 0, width: 60, height: 60 },
                crop: CropBox { x: 0, y: 0, width: 60, height: 60 },
                byte_size: 10,
                padding: 0,
                uploaded_at: Utc::now(),
                status: ProcessingStatus::Completed,
            },
        };
        FinalRecord {
            job_id: Uuid::new_v4(),
            document_type: "exam".into(),
            metadata,
            items: vec![LinkedItem {
                item: Item {
                    item_number: 1,
                    text: "What is shown?".into(),
                    passage: None,
                    choices: vec![],
                    markers: None,
                    item_type: None,
                    difficulty: None,
                    points: None,
                    regions: vec![],
                    has_images: true,
                    image_count: 1,
                },
                images: vec![asset],
                image_types: vec!["table".into()],
                has_essential_images: true,
                image_statistics: ImageStatistics::default(),
            }],
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
    async fn insert_writes_all_tables_in_one_transaction() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let rec = record();
        store.insert(&rec).await.unwrap();
        let id = rec.job_id.to_string();
        assert_eq!(store.asset_count(&id).unwrap(), 1);
        assert_eq!(
            store.searchable_text(&id).unwrap().as_deref(),
            Some("biology What is shown?")
        );
    }

    #[tokio::test]
    async fn reinserting_the_same_job_is_rejected_and_rolled_back() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let rec = record();
        store.insert(&rec).await.unwrap();
        assert!(store.insert(&rec).await.is_err());
        assert_eq!(store.asset_count(&rec.job_id.to_string()).unwrap(), 1);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/records.db");
        SqliteRecordStore::open(&path).unwrap();
        assert!(path.exists());
    }
}
