//! # scan2struct
//!
//! Turn scanned multi-page documents (exam papers and similar) into a
//! structured record plus a set of cropped, durably stored image assets,
//! using a Vision Language Model as the structuring oracle.
//!
//! ## Why this crate?
//!
//! OCR gives you text but loses the structure: which choice belongs to which
//! question, which table illustrates which item. Here every page is
//! rasterised and the whole document goes to a VLM in a single call. The
//! model returns items, choices and the pixel rectangles of every figure;
//! the crate then crops those rectangles out of the rendered pages, stores
//! them, links each asset back to its item and writes the result to two
//! stores.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL, reject non-PDF
//!  ├─ 2. Render    rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Extract   one oracle call, JSON repair, validation, id generation
//!  ├─ 4. Regions   crop + upload every candidate concurrently, failures isolated
//!  ├─ 5. Link      join items and assets by item number
//!  ├─ 6. Persist   relational + document store, concurrently
//!  └─ 7. Cleanup   remove working storage, success or not
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scan2struct::storage::{FsBlobStore, JsonDocumentStore, SqliteRecordStore};
//! use scan2struct::{DocumentType, Pipeline, PipelineConfig, Response};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::builder().crop_padding(4).build()?;
//!     let pipeline = Pipeline::builder(config)
//!         .blob_store(Arc::new(FsBlobStore::new("out/assets", "https://cdn.example.com")))
//!         .relational_store(Arc::new(SqliteRecordStore::open("out/records.db".as_ref())?))
//!         .document_store(Arc::new(JsonDocumentStore::new("out/documents")))
//!         .build()?;
//!
//!     let result = pipeline.process_input("exam.pdf", DocumentType::Exam).await;
//!     let response = Response::from_result(result, false);
//!     println!("{}", serde_json::to_string_pretty(&response.body)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scan2struct` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! scan2struct = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod job;
pub mod model;
pub mod observer;
pub mod pipeline;
pub mod process;
pub mod prompts;
pub mod response;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DocumentType, PipelineConfig, PipelineConfigBuilder};
pub use error::{
    BlobError, OracleError, OracleResponseError, PersistenceWarning, PipelineError, RegionError,
    StoreError,
};
pub use job::{JobStatus, JobWorkspace, ProcessingJob};
pub use model::{
    AssetDescription, AssetStorage, Choice, CropBox, ExtractedAsset, FinalRecord, ImageStatistics,
    Item, LinkedItem, Metadata, PageImage, ProcessingStatus, QualityNotes, Rect, RegionCandidate,
    StageTimings, StructuredDocument, ValidationReport,
};
pub use observer::{NoopObserver, PipelineObserver, SharedObserver};
pub use pipeline::oracle::{ExtractionOracle, LlmOracle, OracleReply};
pub use pipeline::persist::PersistOutcome;
pub use pipeline::render::{PdfiumRasterizer, Rasterizer};
pub use process::{Pipeline, PipelineBuilder};
pub use response::{Envelope, ErrorBody, Response};
