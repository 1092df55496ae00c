//! Job identity and the job state machine.
//!
//! ```text
//! Created ─▶ Rasterized ─▶ Extracted ─▶ RegionsProcessed ─▶ Linked ─▶ Persisted ─▶ CleanedUp
//!    │            │            │
//!    └────────────┴────────────┴──▶ Failed
//! ```
//!
//! Transitions only move forward. `Failed` is terminal and can only be
//! entered before region processing starts; after that point every failure
//! is isolated and the job always reaches `CleanedUp`.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where a job is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Created,
    Rasterized,
    Extracted,
    RegionsProcessed,
    Linked,
    Persisted,
    CleanedUp,
    Failed,
}

impl JobStatus {
    /// Position on the happy path; `Failed` has none.
    fn rank(self) -> Option<u8> {
        match self {
            JobStatus::Created => Some(0),
            JobStatus::Rasterized => Some(1),
            JobStatus::Extracted => Some(2),
            JobStatus::RegionsProcessed => Some(3),
            JobStatus::Linked => Some(4),
            JobStatus::Persisted => Some(5),
            JobStatus::CleanedUp => Some(6),
            JobStatus::Failed => None,
        }
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to == from + 1,
            (Some(from), None) => from <= 2,
            (None, _) => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::CleanedUp | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Created => "created",
            JobStatus::Rasterized => "rasterized",
            JobStatus::Extracted => "extracted",
            JobStatus::RegionsProcessed => "regions-processed",
            JobStatus::Linked => "linked",
            JobStatus::Persisted => "persisted",
            JobStatus::CleanedUp => "cleaned-up",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-job scratch directory for rasterised pages and intermediate files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    job_id: Uuid,
    root: PathBuf,
}

impl JobWorkspace {
    pub fn new(root: impl Into<PathBuf>, job_id: Uuid) -> Self {
        Self {
            job_id,
            root: root.into(),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Working-storage root shared by all jobs.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{job_id}/`, owned by this job alone.
    pub fn dir(&self) -> PathBuf {
        self.root.join(self.job_id.to_string())
    }

    /// `{root}/{job_id}.pdf`, the stored copy of the submitted document.
    pub fn source_path(&self) -> PathBuf {
        self.root.join(format!("{}.pdf", self.job_id))
    }

    /// `{root}/{job_id}/page_{n}.png`.
    pub fn page_path(&self, page_number: u32) -> PathBuf {
        self.dir().join(format!("page_{page_number}.png"))
    }
}

/// One end-to-end pipeline invocation.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    id: Uuid,
    status: JobStatus,
    created_at: DateTime<Utc>,
    workspace: JobWorkspace,
    history: Vec<(JobStatus, DateTime<Utc>)>,
}

impl ProcessingJob {
    /// Start a job with a fresh v4 id under the given working-storage root.
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self::with_id(work_root, Uuid::new_v4())
    }

    pub fn with_id(work_root: impl Into<PathBuf>, id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Created,
            created_at: now,
            workspace: JobWorkspace::new(work_root, id),
            history: vec![(JobStatus::Created, now)],
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn workspace(&self) -> &JobWorkspace {
        &self.workspace
    }

    pub fn history(&self) -> &[(JobStatus, DateTime<Utc>)] {
        &self.history
    }

    /// Move to `next`, rejecting anything that is not the next legal state.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), PipelineError> {
        if !self.status.can_advance_to(next) {
            return Err(PipelineError::Internal(format!(
                "job {}: illegal transition {} → {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.history.push((next, Utc::now()));
        Ok(())
    }

    /// Mark the job failed. Returns `false` when the current state no longer
    /// allows failing (region processing already started).
    pub fn fail(&mut self) -> bool {
        self.advance(JobStatus::Failed).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAPPY_PATH: [JobStatus; 7] = [
        JobStatus::Created,
        JobStatus::Rasterized,
        JobStatus::Extracted,
        JobStatus::RegionsProcessed,
        JobStatus::Linked,
        JobStatus::Persisted,
        JobStatus::CleanedUp,
    ];

    #[test]
    fn happy_path_is_accepted_in_order() {
        let mut job = ProcessingJob::new("/tmp/work");
        for next in &HAPPY_PATH[1..] {
            job.advance(*next).expect("legal transition");
        }
        assert_eq!(job.status(), JobStatus::CleanedUp);
        assert_eq!(job.history().len(), HAPPY_PATH.len());
    }

    #[test]
    fn skipping_or_going_back_is_rejected() {
        let mut job = ProcessingJob::new("/tmp/work");
        assert!(job.advance(JobStatus::Extracted).is_err());
        job.advance(JobStatus::Rasterized).unwrap();
        assert!(job.advance(JobStatus::Created).is_err());
        assert_eq!(job.status(), JobStatus::Rasterized);
    }

    #[test]
    fn failed_only_reachable_before_region_processing() {
        for (i, status) in HAPPY_PATH.iter().enumerate() {
            assert_eq!(
                status.can_advance_to(JobStatus::Failed),
                i <= 2,
                "from {status}"
            );
        }
        assert!(!JobStatus::Failed.can_advance_to(JobStatus::CleanedUp));
    }

    #[test]
    fn fail_after_regions_is_refused() {
        let mut job = ProcessingJob::new("/tmp/work");
        job.advance(JobStatus::Rasterized).unwrap();
        job.advance(JobStatus::Extracted).unwrap();
        job.advance(JobStatus::RegionsProcessed).unwrap();
        assert!(!job.fail());
        assert_eq!(job.status(), JobStatus::RegionsProcessed);
    }

    #[test]
    fn workspace_paths_are_namespaced_by_job() {
        let id = Uuid::new_v4();
        let job = ProcessingJob::with_id("/tmp/work", id);
        let ws = job.workspace();
        assert_eq!(ws.dir(), PathBuf::from(format!("/tmp/work/{id}")));
        assert_eq!(ws.source_path(), PathBuf::from(format!("/tmp/work/{id}.pdf")));
        assert!(ws.page_path(3).ends_with("page_3.png"));
    }
}
