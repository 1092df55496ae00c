//! Input resolution: turn a user-supplied path or URL into document bytes.
//!
//! The pipeline works on bytes so hosts that already hold an upload in
//! memory can skip this module entirely. Every byte source ends in
//! [`validate_document`], which checks the `%PDF` magic before any job is
//! created; a bad upload therefore never leaves working storage behind.

use crate::error::PipelineError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a local file or download a URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Vec<u8>, PipelineError> {
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    validate_document(&bytes)?;
    Ok(bytes)
}

/// Reject empty submissions and anything that is not a PDF.
pub fn validate_document(bytes: &[u8]) -> Result<(), PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::validation("document is empty"));
    }
    if !bytes.starts_with(b"%PDF") {
        let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(PipelineError::validation(format!(
            "only PDF documents are accepted (magic bytes {magic:02x?})"
        )));
    }
    Ok(())
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, PipelineError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read local document: {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PipelineError::FileNotFound { path })
        }
        Err(e) => Err(PipelineError::validation(format!(
            "cannot read '{}': {e}",
            path.display()
        ))),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, PipelineError> {
    info!("Downloading document from: {}", url);

    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn validation_rules() {
        assert!(validate_document(b"%PDF-1.7\n...").is_ok());
        assert_eq!(validate_document(b"").unwrap_err().status_code(), 400);
        let err = validate_document(b"\x89PNG\r\n").unwrap_err();
        assert!(err.to_string().contains("only PDF"));
    }

    #[tokio::test]
    async fn missing_local_file() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_file_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let err = resolve_input(path.to_str().unwrap(), 5).await.unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }
}
