//! Observer trait for stage and per-region pipeline events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::process::PipelineBuilder::observer`] to follow a job as it moves
//! through rasterisation, extraction, region cropping and persistence.
//!
//! # Why callbacks instead of channels?
//!
//! A callback is the least-invasive integration point: the host can forward
//! events to a progress bar, a job table or a broadcast channel without the
//! library knowing how it communicates. Region events fire from concurrent
//! tasks, so the trait is `Send + Sync`.

use crate::job::JobStatus;
use crate::model::ExtractedAsset;
use std::sync::Arc;
use uuid::Uuid;

/// Receives pipeline events. Every method defaults to a no-op.
///
/// # Thread safety
///
/// `on_region_stored` and `on_region_failed` may be called concurrently.
/// Protect shared state with `Mutex` or atomics.
pub trait PipelineObserver: Send + Sync {
    /// The job moved to a new state.
    fn on_status(&self, job_id: Uuid, status: JobStatus) {
        let _ = (job_id, status);
    }

    /// Pages were rasterised.
    fn on_pages_rendered(&self, job_id: Uuid, page_count: usize) {
        let _ = (job_id, page_count);
    }

    /// Region processing is about to start for `total` candidates.
    fn on_regions_start(&self, job_id: Uuid, total: usize) {
        let _ = (job_id, total);
    }

    /// One region was cropped and stored.
    fn on_region_stored(&self, job_id: Uuid, asset: &ExtractedAsset) {
        let _ = (job_id, asset);
    }

    /// One region failed; `error` is human-readable.
    fn on_region_failed(&self, job_id: Uuid, region_id: &str, error: &str) {
        let _ = (job_id, region_id, error);
    }
}

/// Default observer when none is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Shared observer handle as stored by the pipeline.
pub type SharedObserver = Arc<dyn PipelineObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        statuses: AtomicUsize,
        failures: AtomicUsize,
    }

    impl PipelineObserver for Counting {
        fn on_status(&self, _job_id: Uuid, _status: JobStatus) {
            self.statuses.fetch_add(1, Ordering::SeqCst);
        }

        fn on_region_failed(&self, _job_id: Uuid, _region_id: &str, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_accepts_everything() {
        let obs: SharedObserver = Arc::new(NoopObserver);
        let id = Uuid::new_v4();
        obs.on_status(id, JobStatus::Created);
        obs.on_pages_rendered(id, 3);
        obs.on_regions_start(id, 2);
        obs.on_region_failed(id, "r1", "too small");
    }

    #[test]
    fn overridden_methods_receive_events() {
        let obs = Counting::default();
        let id = Uuid::new_v4();
        obs.on_status(id, JobStatus::Created);
        obs.on_status(id, JobStatus::Rasterized);
        obs.on_region_failed(id, "r1", "too small");
        obs.on_pages_rendered(id, 1);
        assert_eq!(obs.statuses.load(Ordering::SeqCst), 2);
        assert_eq!(obs.failures.load(Ordering::SeqCst), 1);
    }
}
