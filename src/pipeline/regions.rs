//! Region extraction: crop every candidate out of its page and store it.
//!
//! Each candidate is handled independently. A missing page, a crop below
//! [`MIN_REGION_PX`], a decode error or a rejected upload becomes one
//! [`RegionError`] in the batch; it never affects sibling candidates and
//! [`RegionExtractor::extract_regions`] itself cannot fail.
//!
//! ## Why clamp by intersection?
//!
//! The oracle's rectangles are estimates and routinely spill past the page
//! edge. The padded rectangle is intersected with the page bounds, so a
//! region hanging off the right edge shrinks instead of shifting.
//!
//! ## Concurrency
//!
//! All candidates run at once by default (`region_concurrency = None`); a
//! cap bounds memory when a document has dozens of figures. Decode, crop and
//! encode run on the blocking pool. Results are re-ordered to candidate
//! order so the batch is deterministic.

use crate::config::{PipelineConfig, MIN_REGION_PX};
use crate::error::RegionError;
use crate::model::{
    AssetDescription, AssetStorage, CropBox, ExtractedAsset, PageImage, ProcessingStatus, Rect,
    RegionCandidate,
};
use crate::observer::{NoopObserver, SharedObserver};
use crate::pipeline::encode::{self, PNG_MIME};
use crate::storage::{BlobMetadata, BlobStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Value of the `uploaded-by` blob metadata entry.
const UPLOADED_BY: &str = "scan2struct";
/// Value of the `version` blob metadata entry.
const ASSET_VERSION: &str = "1.0";

/// Settled outcome of one region batch.
#[derive(Debug, Clone, Default)]
pub struct RegionBatch {
    /// Stored assets, in candidate order.
    pub assets: Vec<ExtractedAsset>,
    /// Failed candidates, in candidate order.
    pub failures: Vec<RegionError>,
}

/// Crops and stores region candidates.
pub struct RegionExtractor {
    blob: Arc<dyn BlobStore>,
    padding: u32,
    key_prefix: String,
    concurrency: Option<usize>,
    observer: SharedObserver,
}

impl RegionExtractor {
    pub fn new(blob: Arc<dyn BlobStore>, config: &PipelineConfig) -> Self {
        Self {
            blob,
            padding: config.crop_padding,
            key_prefix: config.key_prefix.clone(),
            concurrency: config.region_concurrency,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Process every candidate and wait for all of them to settle.
    pub async fn extract_regions(
        &self,
        pages: &[PageImage],
        candidates: &[RegionCandidate],
        job_id: Uuid,
    ) -> RegionBatch {
        self.observer.on_regions_start(job_id, candidates.len());
        info!(
            "Job {}: extracting {} regions from {} pages",
            job_id,
            candidates.len(),
            pages.len()
        );

        let mut outcomes: Vec<(usize, Result<ExtractedAsset, RegionError>)> =
            Vec::with_capacity(candidates.len());
        let mut seen = HashSet::new();
        let mut runnable = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            if seen.insert(candidate.region_id.as_str()) {
                runnable.push((index, candidate));
            } else {
                outcomes.push((
                    index,
                    Err(RegionError::Duplicate {
                        region_id: candidate.region_id.clone(),
                    }),
                ));
            }
        }

        let limit = self.concurrency.unwrap_or(runnable.len()).max(1);
        let settled: Vec<_> = stream::iter(runnable.into_iter().map(|(index, candidate)| {
            let page = pages.iter().find(|p| p.page_number == candidate.bounds.page);
            async move {
                let result = self.process_one(page, candidate, job_id).await;
                match &result {
                    Ok(asset) => self.observer.on_region_stored(job_id, asset),
                    Err(e) => self
                        .observer
                        .on_region_failed(job_id, e.region_id(), &e.to_string()),
                }
                (index, result)
            }
        }))
        .buffer_unordered(limit)
        .collect()
        .await;
        outcomes.extend(settled);
        outcomes.sort_by_key(|(index, _)| *index);

        let mut batch = RegionBatch::default();
        for (_, outcome) in outcomes {
            match outcome {
                Ok(asset) => batch.assets.push(asset),
                Err(e) => {
                    warn!("Job {}: {}", job_id, e);
                    batch.failures.push(e);
                }
            }
        }

        info!(
            "Job {}: regions settled, {} stored, {} failed",
            job_id,
            batch.assets.len(),
            batch.failures.len()
        );
        batch
    }

    async fn process_one(
        &self,
        page: Option<&PageImage>,
        candidate: &RegionCandidate,
        job_id: Uuid,
    ) -> Result<ExtractedAsset, RegionError> {
        let region_id = candidate.region_id.clone();
        let page = page.ok_or_else(|| RegionError::PageMissing {
            region_id: region_id.clone(),
            page: candidate.bounds.page,
        })?;

        let crop = clamp_crop(&candidate.bounds, page.width, page.height, self.padding);
        if crop.width < MIN_REGION_PX || crop.height < MIN_REGION_PX {
            return Err(RegionError::Geometry {
                region_id,
                width: crop.width as i64,
                height: crop.height as i64,
                min: MIN_REGION_PX,
            });
        }

        let png = crop_png(page.path.clone(), crop)
            .await
            .map_err(|detail| RegionError::Image {
                region_id: region_id.clone(),
                detail,
            })?;
        let byte_size = png.len();

        let uploaded_at = Utc::now();
        let key = blob_key(
            &self.key_prefix,
            job_id,
            candidate.item_number,
            &candidate.kind,
            &candidate.region_id,
            uploaded_at.timestamp_millis(),
        );
        let metadata = blob_metadata(candidate);

        let locator = self
            .blob
            .put(&key, png, PNG_MIME, &metadata)
            .await
            .map_err(|e| RegionError::Storage {
                region_id: region_id.clone(),
                detail: e.to_string(),
            })?;

        debug!(
            "Region {} stored at {} ({}x{}, {} bytes)",
            region_id, locator, crop.width, crop.height, byte_size
        );

        Ok(ExtractedAsset {
            description: AssetDescription::from(candidate),
            storage: AssetStorage {
                locator,
                key,
                requested: candidate.bounds,
                crop,
                byte_size,
                padding: self.padding,
                uploaded_at,
                status: ProcessingStatus::Completed,
            },
        })
    }
}

/// Decode the page, cut out `crop` at full resolution and PNG-encode it.
async fn crop_png(path: PathBuf, crop: CropBox) -> Result<Vec<u8>, String> {
    tokio::task::spawn_blocking(move || {
        let page = image::open(&path).map_err(|e| format!("{}: {e}", path.display()))?;
        let region = page.crop_imm(crop.x, crop.y, crop.width, crop.height);
        encode::encode_png(&region).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("crop task panicked: {e}"))?
}

/// Expand `rect` by `padding` on every side and intersect it with the page.
///
/// The result may be empty (zero width or height) when the rectangle lies
/// entirely off the page.
pub fn clamp_crop(rect: &Rect, page_width: u32, page_height: u32, padding: u32) -> CropBox {
    let pad = padding as i64;
    let (pw, ph) = (page_width as i64, page_height as i64);

    let x0 = rect.x.saturating_sub(pad).clamp(0, pw);
    let y0 = rect.y.saturating_sub(pad).clamp(0, ph);
    let x1 = rect
        .x
        .saturating_add(rect.width as i64)
        .saturating_add(pad)
        .clamp(0, pw);
    let y1 = rect
        .y
        .saturating_add(rect.height as i64)
        .saturating_add(pad)
        .clamp(0, ph);

    CropBox {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0).max(0) as u32,
        height: (y1 - y0).max(0) as u32,
    }
}

/// `{prefix}/{job_id}/q{item}/{type}_{region_id}_{timestamp_ms}.png`.
///
/// `q{item}` becomes `unassigned` when the region has no owning item.
pub fn blob_key(
    prefix: &str,
    job_id: Uuid,
    item_number: Option<u32>,
    kind: &str,
    region_id: &str,
    timestamp_ms: i64,
) -> String {
    let prefix = prefix
        .split('/')
        .filter(|s| !s.is_empty())
        .map(sanitize)
        .collect::<Vec<_>>()
        .join("/");
    let item = match item_number {
        Some(n) => format!("q{n}"),
        None => "unassigned".to_string(),
    };
    format!(
        "{prefix}/{job_id}/{item}/{}_{}_{timestamp_ms}.png",
        sanitize(kind),
        sanitize(region_id)
    )
}

/// Keep ASCII alphanumerics, `-`, `_` and `.`; replace everything else.
pub fn sanitize(segment: &str) -> String {
    let s: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if s.is_empty() || s.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        s
    }
}

fn blob_metadata(candidate: &RegionCandidate) -> BlobMetadata {
    let mut meta = BlobMetadata::new();
    meta.insert(
        "item-number".into(),
        candidate
            .item_number
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unassigned".into()),
    );
    meta.insert("image-type".into(), sanitize(&candidate.kind));
    meta.insert("original-image-id".into(), sanitize(&candidate.region_id));
    meta.insert("uploaded-by".into(), UPLOADED_BY.into());
    meta.insert("version".into(), ASSET_VERSION.into());
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlobError;
    use crate::storage::FsBlobStore;
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};

    fn rect(page: u32, x: i64, y: i64, width: u32, height: u32) -> Rect {
        Rect {
            page,
            x,
            y,
            width,
            height,
        }
    }

    fn candidate(id: &str, item: Option<u32>, bounds: Rect) -> RegionCandidate {
        RegionCandidate {
            region_id: id.into(),
            item_number: item,
            kind: "table".into(),
            bounds,
            essential: true,
            description: None,
            content_analysis: None,
        }
    }

    fn write_page(dir: &std::path::Path, n: u32, w: u32, h: u32) -> PageImage {
        let path = dir.join(format!("page_{n}.png"));
        RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]))
            .save(&path)
            .unwrap();
        PageImage {
            page_number: n,
            path,
            width: w,
            height: h,
        }
    }

    #[test]
    fn clamp_inside_page_is_identity() {
        let c = clamp_crop(&rect(1, 150, 300, 400, 200), 1000, 1400, 0);
        assert_eq!(c, CropBox { x: 150, y: 300, width: 400, height: 200 });
    }

    #[test]
    fn clamp_intersects_with_page_edges() {
        let c = clamp_crop(&rect(1, -20, 1350, 100, 100), 1000, 1400, 0);
        assert_eq!(c, CropBox { x: 0, y: 1350, width: 80, height: 50 });

        let off = clamp_crop(&rect(1, 2000, 0, 100, 100), 1000, 1400, 0);
        assert_eq!(off.width, 0);
    }

    #[test]
    fn clamp_applies_padding() {
        let c = clamp_crop(&rect(1, 100, 100, 60, 60), 1000, 1400, 10);
        assert_eq!(c, CropBox { x: 90, y: 90, width: 80, height: 80 });
    }

    #[test]
    fn clamp_saturates_extreme_coordinates() {
        let far = clamp_crop(&rect(1, i64::MAX, i64::MAX, u32::MAX, u32::MAX), 1000, 1400, 8);
        assert_eq!((far.width, far.height), (0, 0));

        let wide = clamp_crop(&rect(1, i64::MIN, 0, u32::MAX, 100), 1000, 1400, 8);
        assert_eq!(wide, CropBox { x: 0, y: 0, width: 0, height: 108 });
    }

    #[test]
    fn key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            blob_key("exam-images", id, Some(3), "table", "img_q3_table_000", 42),
            format!("exam-images/{id}/q3/table_img_q3_table_000_42.png")
        );
        assert_eq!(
            blob_key("/a//b/", id, None, "bar chart", "x/../y", 7),
            format!("a/b/{id}/unassigned/bar_chart_x_.._y_7.png")
        );
    }

    #[test]
    fn sanitize_never_yields_traversal() {
        assert_eq!(sanitize(".."), "_");
        assert_eq!(sanitize(""), "_");
        assert_eq!(sanitize("표"), "_");
    }

    #[tokio::test]
    async fn batch_partitions_successes_and_failures() {
        let work = tempfile::tempdir().unwrap();
        let blobs = tempfile::tempdir().unwrap();
        let page = write_page(work.path(), 1, 1000, 1400);
        let store = Arc::new(FsBlobStore::new(blobs.path(), "https://cdn.test"));
        let extractor = RegionExtractor::new(store, &PipelineConfig::default());

        let candidates = vec![
            candidate("ok", Some(1), rect(1, 150, 300, 400, 200)),
            candidate("tiny", Some(1), rect(1, 0, 0, 10, 10)),
            candidate("nopage", Some(2), rect(9, 0, 0, 100, 100)),
            candidate("ok", Some(1), rect(1, 0, 0, 100, 100)),
        ];
        let batch = extractor
            .extract_regions(&[page], &candidates, Uuid::new_v4())
            .await;

        assert_eq!(batch.assets.len(), 1);
        let asset = &batch.assets[0];
        assert_eq!((asset.storage.crop.width, asset.storage.crop.height), (400, 200));
        assert!(asset.storage.locator.starts_with("https://cdn.test/exam-images/"));
        let stored = image::open(blobs.path().join(&asset.storage.key)).unwrap();
        assert_eq!((stored.width(), stored.height()), (400, 200));

        let kinds: Vec<&str> = batch.failures.iter().map(|f| f.region_id()).collect();
        assert_eq!(kinds, vec!["tiny", "nopage", "ok"]);
        assert!(matches!(batch.failures[0], RegionError::Geometry { .. }));
        assert!(matches!(batch.failures[1], RegionError::PageMissing { page: 9, .. }));
        assert!(matches!(batch.failures[2], RegionError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn extreme_coordinates_fail_alone() {
        let work = tempfile::tempdir().unwrap();
        let blobs = tempfile::tempdir().unwrap();
        let page = write_page(work.path(), 1, 1000, 1400);
        let store = Arc::new(FsBlobStore::new(blobs.path(), "https://cdn.test"));
        let config = PipelineConfig::builder().crop_padding(4).build().unwrap();
        let extractor = RegionExtractor::new(store, &config);

        let candidates = vec![
            candidate("far", Some(1), rect(1, i64::MAX, 0, 100, 100)),
            candidate("ok", Some(1), rect(1, 0, 0, 100, 100)),
        ];
        let batch = extractor
            .extract_regions(&[page], &candidates, Uuid::new_v4())
            .await;

        assert_eq!(batch.assets.len(), 1);
        assert_eq!(batch.assets[0].region_id(), "ok");
        assert!(matches!(
            batch.failures[..],
            [RegionError::Geometry { ref region_id, width: 0, .. }] if region_id == "far"
        ));
    }

    struct RejectingStore;

    #[async_trait]
    impl BlobStore for RejectingStore {
        async fn put(
            &self,
            key: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
            _metadata: &BlobMetadata,
        ) -> Result<String, BlobError> {
            Err(BlobError::Upload {
                key: key.to_string(),
                reason: "bucket offline".into(),
            })
        }
    }

    #[tokio::test]
    async fn storage_failure_is_isolated() {
        let work = tempfile::tempdir().unwrap();
        let page = write_page(work.path(), 1, 200, 200);
        let config = PipelineConfig::builder().region_concurrency(1).build().unwrap();
        let extractor = RegionExtractor::new(Arc::new(RejectingStore), &config);
        let batch = extractor
            .extract_regions(&[page], &[candidate("a", None, rect(1, 0, 0, 100, 100))], Uuid::new_v4())
            .await;
        assert!(batch.assets.is_empty());
        match &batch.failures[0] {
            RegionError::Storage { detail, .. } => assert!(detail.contains("bucket offline")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
