//! Persistence: write the final record to two independent stores at once.
//!
//! The relational store and the document store are written concurrently
//! with `tokio::join!`. Neither write depends on the other, and a failure in
//! one never cancels or rolls back the other:
//!
//! | relational | document | outcome                 |
//! |------------|----------|-------------------------|
//! | ok         | ok       | `Persisted`             |
//! | ok / err   | err / ok | `PartiallyPersisted`    |
//! | err        | err      | `Failed`                |
//!
//! Blobs uploaded during region extraction are not deleted on `Failed`;
//! their keys remain on the returned record.

use crate::error::PersistenceWarning;
use crate::model::FinalRecord;
use crate::storage::RecordStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// How durable the final record ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PersistOutcome {
    Persisted,
    PartiallyPersisted,
    Failed,
}

/// Outcome plus one warning per failed store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub outcome: PersistOutcome,
    pub warnings: Vec<PersistenceWarning>,
}

/// Writes records to the relational and document stores.
pub struct PersistenceCoordinator {
    relational: Arc<dyn RecordStore>,
    document: Arc<dyn RecordStore>,
}

impl PersistenceCoordinator {
    pub fn new(relational: Arc<dyn RecordStore>, document: Arc<dyn RecordStore>) -> Self {
        Self {
            relational,
            document,
        }
    }

    pub async fn persist(&self, record: &FinalRecord) -> PersistReport {
        let (relational, document) = tokio::join!(
            self.relational.insert(record),
            self.document.insert(record)
        );

        let mut warnings = Vec::new();
        for (store, result) in [(&self.relational, relational), (&self.document, document)] {
            if let Err(e) = result {
                warn!("Job {}: {} store write failed: {}", record.job_id, store.name(), e);
                warnings.push(PersistenceWarning {
                    store: store.name().to_string(),
                    detail: e.to_string(),
                });
            }
        }

        let outcome = match warnings.len() {
            0 => PersistOutcome::Persisted,
            1 => PersistOutcome::PartiallyPersisted,
            _ => PersistOutcome::Failed,
        };
        match outcome {
            PersistOutcome::Persisted => info!("Job {}: record persisted", record.job_id),
            PersistOutcome::PartiallyPersisted => {
                warn!("Job {}: record only partially persisted", record.job_id)
            }
            PersistOutcome::Failed => error!(
                "Job {}: no store accepted the record; {} uploaded blobs remain",
                record.job_id,
                record.total_assets()
            ),
        }

        PersistReport { outcome, warnings }
    }
}

/// Plain-text search field: metadata subject, year and exam type, then each
/// item's text, passage and choice texts, space-joined.
///
/// Numeric metadata (`"year": 2024`) is rendered as text; other non-string
/// values are skipped.
pub fn searchable_text(record: &FinalRecord) -> String {
    let header: Vec<String> = ["subject", "year", "examType"]
        .iter()
        .filter_map(|k| record.metadata.get(*k).and_then(scalar_text))
        .collect();
    let mut parts: Vec<&str> = header.iter().map(String::as_str).collect();

    for linked in &record.items {
        let item = &linked.item;
        parts.push(&item.text);
        if let Some(passage) = &item.passage {
            parts.push(passage);
        }
        parts.extend(item.choices.iter().map(|c| c.text.as_str()));
    }

    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
