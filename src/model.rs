//! Data model shared by every pipeline stage.
//!
//! All types serialise to camelCase JSON because the same shapes travel to
//! the document store and back out through the request boundary.

use crate::job::JobStatus;
use crate::pipeline::persist::PersistOutcome;
use crate::error::RegionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Free-form document-level metadata as returned by the oracle.
pub type Metadata = serde_json::Map<String, Value>;

/// One rasterised page on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageImage {
    /// 1-based page number.
    pub page_number: u32,
    /// PNG written by the rasteriser inside the job's working storage.
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Page-relative rectangle in pixels, origin at the page's top-left corner.
///
/// `width` and `height` are strictly positive once a candidate has passed
/// validation; `x`/`y` may be negative and are clamped during cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rect {
    pub page: u32,
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

/// The pixel box actually cut out of the page after padding and clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// An oracle-proposed rectangle believed to contain a visual asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionCandidate {
    pub region_id: String,
    /// Owning item; `None` when the oracle did not say.
    pub item_number: Option<u32>,
    /// Free-form type tag, e.g. `table`, `graph`, `figure`.
    pub kind: String,
    pub bounds: Rect,
    pub essential: bool,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_analysis: Option<Value>,
}

/// One answer option of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub label: String,
    pub text: String,
}

/// One numbered unit of the document (an exam question, a form field, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Join key between text structure and cropped assets.
    pub item_number: u32,
    pub text: String,
    pub passage: Option<String>,
    pub choices: Vec<Choice>,
    /// Special symbols the oracle spotted (`㉠㉡`, `ⓐⓑ`, …), kept as-is.
    pub markers: Option<Value>,
    pub item_type: Option<String>,
    pub difficulty: Option<String>,
    pub points: Option<f64>,
    /// Region candidates the oracle associated with this item.
    pub regions: Vec<RegionCandidate>,
    pub has_images: bool,
    pub image_count: usize,
}

/// Validated, post-processed oracle output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredDocument {
    pub metadata: Metadata,
    /// Ascending by item number, no duplicates.
    pub items: Vec<Item>,
    /// Flat candidate list; this is what the region engine crops.
    pub regions: Vec<RegionCandidate>,
}

impl StructuredDocument {
    /// `metadata.documentType`, if the oracle reported one.
    pub fn document_type(&self) -> Option<&str> {
        self.metadata.get("documentType").and_then(Value::as_str)
    }
}

/// Errors and warnings gathered while validating the oracle's reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub item_count: usize,
    pub region_count: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of processing one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ProcessingStatus {
    Completed,
    Failed { reason: String },
}

/// Semantic description of an asset: what the oracle said it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescription {
    pub region_id: String,
    pub item_number: Option<u32>,
    pub kind: String,
    pub description: Option<String>,
    pub essential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_analysis: Option<Value>,
}

impl From<&RegionCandidate> for AssetDescription {
    fn from(c: &RegionCandidate) -> Self {
        Self {
            region_id: c.region_id.clone(),
            item_number: c.item_number,
            kind: c.kind.clone(),
            description: c.description.clone(),
            essential: c.essential,
            content_analysis: c.content_analysis.clone(),
        }
    }
}

/// Storage facts about an asset: where the bytes live and how big they are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetStorage {
    /// Public URL returned by the blob store.
    pub locator: String,
    /// Blob store key.
    pub key: String,
    /// Rectangle the oracle asked for.
    pub requested: Rect,
    /// Rectangle actually cropped.
    pub crop: CropBox,
    pub byte_size: usize,
    pub padding: u32,
    pub uploaded_at: DateTime<Utc>,
    pub status: ProcessingStatus,
}

/// A cropped and durably stored region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedAsset {
    #[serde(flatten)]
    pub description: AssetDescription,
    #[serde(flatten)]
    pub storage: AssetStorage,
}

impl ExtractedAsset {
    pub fn region_id(&self) -> &str {
        &self.description.region_id
    }

    pub fn item_number(&self) -> Option<u32> {
        self.description.item_number
    }
}

/// Per-item image aggregates recomputed during linking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatistics {
    pub total_images: usize,
    pub images_by_type: BTreeMap<String, usize>,
    /// Σ width × height over the item's crops.
    pub total_pixel_area: u64,
}

/// An item merged with its stored assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedItem {
    #[serde(flatten)]
    pub item: Item,
    pub images: Vec<ExtractedAsset>,
    pub image_types: Vec<String>,
    pub has_essential_images: bool,
    pub image_statistics: ImageStatistics,
}

/// Quality and degradation notes attached to the final record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityNotes {
    pub validation: ValidationReport,
    /// Non-fatal problems raised after extraction (regions, persistence).
    pub warnings: Vec<String>,
    /// True when anything was dropped or only partially persisted.
    pub degraded: bool,
}

/// Wall-clock time spent per stage, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    pub rasterize_ms: u64,
    pub extract_ms: u64,
    pub regions_ms: u64,
    pub persist_ms: u64,
    pub total_ms: u64,
}

/// The complete output of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalRecord {
    pub job_id: Uuid,
    pub document_type: String,
    pub metadata: Metadata,
    pub items: Vec<LinkedItem>,
    /// Assets whose item number matched no item.
    pub unlinked_assets: Vec<ExtractedAsset>,
    pub failed_regions: Vec<RegionError>,
    pub notes: QualityNotes,
    pub persistence: Option<PersistOutcome>,
    pub timings: StageTimings,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FinalRecord {
    /// Every stored asset, linked first then unlinked.
    pub fn assets(&self) -> impl Iterator<Item = &ExtractedAsset> {
        self.items
            .iter()
            .flat_map(|i| i.images.iter())
            .chain(self.unlinked_assets.iter())
    }

    pub fn total_assets(&self) -> usize {
        self.assets().count()
    }

    pub fn item(&self, item_number: u32) -> Option<&LinkedItem> {
        self.items.iter().find(|i| i.item.item_number == item_number)
    }
}
