//! Working-storage cleanup, run once at the end of every job.
//!
//! Removes `{root}/{job_id}/` (page images) and `{root}/{job_id}.pdf` (the
//! stored source document). Errors are logged and swallowed: a leftover temp
//! file must never turn a finished job into a failed one.

use crate::job::JobWorkspace;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

/// Remove the job's working storage. Returns `true` when nothing was left behind.
pub async fn cleanup(workspace: &JobWorkspace) -> bool {
    let dir_ok = remove(&workspace.dir(), true).await;
    let file_ok = remove(&workspace.source_path(), false).await;
    debug!(
        "Job {}: working storage cleaned (complete={})",
        workspace.job_id(),
        dir_ok && file_ok
    );
    dir_ok && file_ok
}

async fn remove(path: &Path, is_dir: bool) -> bool {
    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Cleanup of {} failed: {}", path.display(), e);
            false
        }
    }
}
