//! The pipeline orchestrator: one call, one job, one final record.
//!
//! [`Pipeline::process`] sequences every stage under a single job id and
//! owns the job state machine ([`crate::job`]):
//!
//! * **Fatal half**: rasterisation and the oracle call. Any error here marks
//!   the job `Failed`, cleans working storage and returns `Err`.
//! * **Isolated half**: regions, linking, persistence. Failures are recorded
//!   on the [`FinalRecord`] and the job always reaches `CleanedUp`.
//!
//! `Persisted` means the persistence stage ran; [`FinalRecord::persistence`]
//! says how durable the record actually is. The copy written to the stores
//! is the record as of `Linked`.

use crate::config::{DocumentType, PipelineConfig};
use crate::error::PipelineError;
use crate::job::{JobStatus, ProcessingJob};
use crate::model::{FinalRecord, PageImage, QualityNotes, StageTimings};
use crate::observer::{NoopObserver, SharedObserver};
use crate::pipeline::extract::{Extraction, ExtractionAdapter};
use crate::pipeline::oracle::{ExtractionOracle, LlmOracle};
use crate::pipeline::persist::{PersistOutcome, PersistenceCoordinator};
use crate::pipeline::regions::RegionExtractor;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::{cleanup, input, link};
use crate::storage::{BlobStore, RecordStore};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// A configured document pipeline. Cheap to share behind an `Arc`; jobs do
/// not share mutable state.
pub struct Pipeline {
    config: PipelineConfig,
    rasterizer: Arc<dyn Rasterizer>,
    oracle_name: String,
    extractor: ExtractionAdapter,
    regions: RegionExtractor,
    persistence: PersistenceCoordinator,
    observer: SharedObserver,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("oracle", &self.oracle_name)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            rasterizer: None,
            oracle: None,
            blob: None,
            relational: None,
            document: None,
            observer: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read a path or download a URL, then [`Pipeline::process`] it.
    pub async fn process_input(
        &self,
        input_str: &str,
        document_type: DocumentType,
    ) -> Result<FinalRecord, PipelineError> {
        let bytes = input::resolve_input(input_str, self.config.download_timeout_secs).await?;
        self.process(&bytes, document_type).await
    }

    /// Run one document through every stage.
    ///
    /// # Errors
    /// Returns `Err` only for fatal failures: invalid input (before any job
    /// exists), rasterisation, the oracle call, or an unusable reply.
    /// Working storage is always removed before returning.
    pub async fn process(
        &self,
        document: &[u8],
        document_type: DocumentType,
    ) -> Result<FinalRecord, PipelineError> {
        input::validate_document(document)?;

        let started = Instant::now();
        let mut job = ProcessingJob::new(&self.config.work_dir);
        let job_id = job.id();
        info!(
            "Job {}: started ({} bytes, type={})",
            job_id,
            document.len(),
            document_type
        );
        self.observer.on_status(job_id, JobStatus::Created);

        let outcome = self.run(&mut job, document, document_type).await;

        let clean = cleanup::cleanup(job.workspace()).await;

        match outcome {
            Ok(mut record) => {
                self.advance(&mut job, JobStatus::CleanedUp)?;
                if !clean {
                    record
                        .notes
                        .warnings
                        .push("working storage was not fully removed".into());
                }
                record.status = job.status();
                record.completed_at = Some(Utc::now());
                record.timings.total_ms = started.elapsed().as_millis() as u64;
                info!(
                    "Job {}: done in {}ms ({} items, {} assets, {} failed regions, degraded={})",
                    job_id,
                    record.timings.total_ms,
                    record.items.len(),
                    record.total_assets(),
                    record.failed_regions.len(),
                    record.notes.degraded
                );
                Ok(record)
            }
            Err(e) => {
                error!("Job {}: failed: {}", job_id, e);
                if job.fail() {
                    self.observer.on_status(job_id, JobStatus::Failed);
                }
                Err(e)
            }
        }
    }

    fn advance(&self, job: &mut ProcessingJob, next: JobStatus) -> Result<(), PipelineError> {
        job.advance(next)?;
        self.observer.on_status(job.id(), next);
        Ok(())
    }

    async fn run(
        &self,
        job: &mut ProcessingJob,
        document: &[u8],
        document_type: DocumentType,
    ) -> Result<FinalRecord, PipelineError> {
        let job_id = job.id();
        let mut timings = StageTimings::default();

        // ── Step 1: Rasterise ────────────────────────────────────────────────
        let t = Instant::now();
        let pages = self.rasterizer.rasterize(document, job.workspace()).await?;
        timings.rasterize_ms = t.elapsed().as_millis() as u64;
        info!(
            "Job {}: rasterised {} pages in {}ms",
            job_id,
            pages.len(),
            timings.rasterize_ms
        );
        self.observer.on_pages_rendered(job_id, pages.len());
        self.advance(job, JobStatus::Rasterized)?;

        // ── Step 2: Structured extraction ────────────────────────────────────
        let t = Instant::now();
        let extraction = self.extractor.extract(&pages, document_type).await?;
        timings.extract_ms = t.elapsed().as_millis() as u64;
        self.advance(job, JobStatus::Extracted)?;

        // ── Step 3: Regions (isolated failures from here on) ─────────────────
        let t = Instant::now();
        let batch = self
            .regions
            .extract_regions(&pages, &extraction.document.regions, job_id)
            .await;
        timings.regions_ms = t.elapsed().as_millis() as u64;
        self.advance(job, JobStatus::RegionsProcessed)?;

        // ── Step 4: Link ─────────────────────────────────────────────────────
        let linked = link::link(&extraction.document, &batch.assets);
        if !linked.unlinked.is_empty() {
            warn!(
                "Job {}: {} assets matched no item",
                job_id,
                linked.unlinked.len()
            );
        }
        self.advance(job, JobStatus::Linked)?;

        let warnings: Vec<String> = batch.failures.iter().map(|f| f.to_string()).collect();
        let degraded = !extraction.report.is_valid() || !batch.failures.is_empty();

        let mut record = FinalRecord {
            job_id,
            document_type: extraction
                .document
                .document_type()
                .unwrap_or(document_type.as_str())
                .to_string(),
            metadata: self.enriched_metadata(&extraction, &pages, batch.assets.len(), batch.failures.len()),
            items: linked.items,
            unlinked_assets: linked.unlinked,
            failed_regions: batch.failures,
            notes: QualityNotes {
                validation: extraction.report.clone(),
                warnings,
                degraded,
            },
            persistence: None,
            timings,
            status: job.status(),
            created_at: job.created_at(),
            completed_at: None,
        };

        // ── Step 5: Persist ──────────────────────────────────────────────────
        let t = Instant::now();
        let report = self.persistence.persist(&record).await;
        record.timings.persist_ms = t.elapsed().as_millis() as u64;
        record
            .notes
            .warnings
            .extend(report.warnings.iter().map(|w| w.to_string()));
        if report.outcome == PersistOutcome::Failed {
            record.notes.warnings.push(format!(
                "record was not persisted; {} uploaded assets remain in blob storage",
                record.total_assets()
            ));
        }
        record.notes.degraded |= report.outcome != PersistOutcome::Persisted;
        record.persistence = Some(report.outcome);
        self.advance(job, JobStatus::Persisted)?;

        Ok(record)
    }

    fn enriched_metadata(
        &self,
        extraction: &Extraction,
        pages: &[PageImage],
        stored: usize,
        failed: usize,
    ) -> crate::model::Metadata {
        let mut metadata = extraction.document.metadata.clone();
        let facts = [
            ("pageCount", Value::from(pages.len())),
            ("extractedImageCount", Value::from(stored)),
            ("failedImageCount", Value::from(failed)),
            ("oracle", Value::from(self.oracle_name.as_str())),
            ("inputTokens", Value::from(extraction.input_tokens)),
            ("outputTokens", Value::from(extraction.output_tokens)),
            ("processedAt", Value::from(Utc::now().to_rfc3339())),
        ];
        for (key, value) in facts {
            metadata.insert(key.to_string(), value);
        }
        metadata
    }
}

/// Builder for [`Pipeline`].
///
/// The blob store and both record stores are required. The rasteriser
/// defaults to [`PdfiumRasterizer`] and the oracle to [`LlmOracle`] resolved
/// from the config or environment.
pub struct PipelineBuilder {
    config: PipelineConfig,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    oracle: Option<Arc<dyn ExtractionOracle>>,
    blob: Option<Arc<dyn BlobStore>>,
    relational: Option<Arc<dyn RecordStore>>,
    document: Option<Arc<dyn RecordStore>>,
    observer: Option<SharedObserver>,
}

impl PipelineBuilder {
    pub fn rasterizer(mut self, r: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(r);
        self
    }

    pub fn oracle(mut self, o: Arc<dyn ExtractionOracle>) -> Self {
        self.oracle = Some(o);
        self
    }

    pub fn blob_store(mut self, b: Arc<dyn BlobStore>) -> Self {
        self.blob = Some(b);
        self
    }

    pub fn relational_store(mut self, s: Arc<dyn RecordStore>) -> Self {
        self.relational = Some(s);
        self
    }

    pub fn document_store(mut self, s: Arc<dyn RecordStore>) -> Self {
        self.document = Some(s);
        self
    }

    pub fn observer(mut self, o: SharedObserver) -> Self {
        self.observer = Some(o);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let missing = |what: &str| PipelineError::InvalidConfig(format!("{what} is required"));
        let blob = self.blob.ok_or_else(|| missing("blob store"))?;
        let relational = self.relational.ok_or_else(|| missing("relational store"))?;
        let document = self.document.ok_or_else(|| missing("document store"))?;

        let rasterizer = match self.rasterizer {
            Some(r) => r,
            None => Arc::new(PdfiumRasterizer::new(&self.config)),
        };
        let oracle: Arc<dyn ExtractionOracle> = match self.oracle {
            Some(o) => o,
            None => Arc::new(LlmOracle::from_config(&self.config)?),
        };
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));

        Ok(Pipeline {
            oracle_name: oracle.name().to_string(),
            extractor: ExtractionAdapter::new(oracle, &self.config),
            regions: RegionExtractor::new(blob, &self.config).with_observer(Arc::clone(&observer)),
            persistence: PersistenceCoordinator::new(relational, document),
            rasterizer,
            observer,
            config: self.config,
        })
    }
}
