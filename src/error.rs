//! Error types for the scan2struct library.
//!
//! Failures split along the same line the pipeline does:
//!
//! * [`PipelineError`] is **fatal**: the job cannot produce a record at all
//!   (bad input, rasterisation failed, the oracle was unreachable or its
//!   reply held no usable JSON). Returned as `Err(PipelineError)` from
//!   [`crate::process::Pipeline::process`] after working storage is cleaned.
//!
//! * [`RegionError`] is **isolated**: one region candidate could not be
//!   cropped or stored. Recorded on the final record; sibling regions and the
//!   rest of the job carry on.
//!
//! * [`StoreError`] / [`PersistenceWarning`]: one of the two durable stores
//!   rejected the record. Downgrades the persistence outcome, never aborts.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The submitted document or document-type hint is unusable.
    #[error("Invalid input: {message}")]
    Validation { message: String },

    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// The rasteriser could not turn the document into page images.
    #[error("Rasterisation failed: {detail}")]
    Rasterization { detail: String },

    /// The oracle call itself failed (transport, provider, auth).
    #[error("Oracle call failed: {0}")]
    OracleTransport(#[from] OracleError),

    /// The oracle answered, but the answer is not a usable document.
    #[error(transparent)]
    OracleResponse(#[from] OracleResponseError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The oracle provider could not be constructed.
    #[error("Oracle provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Shorthand for [`PipelineError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        PipelineError::Validation {
            message: message.into(),
        }
    }

    /// HTTP status class a request boundary should answer with.
    ///
    /// Every error whose [`kind`](Self::kind) is `ValidationError` is the
    /// caller's input and answers 400.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::Validation { .. }
            | PipelineError::FileNotFound { .. }
            | PipelineError::DownloadFailed { .. } => 400,
            _ => 500,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation { .. }
            | PipelineError::FileNotFound { .. }
            | PipelineError::DownloadFailed { .. } => "ValidationError",
            PipelineError::OracleResponse(_) => "OracleResponseError",
            PipelineError::Rasterization { .. } | PipelineError::OracleTransport(_) => {
                "PipelineFatalError"
            }
            PipelineError::InvalidConfig(_) | PipelineError::ProviderNotConfigured { .. } => {
                "ConfigurationError"
            }
            PipelineError::Internal(_) => "InternalError",
        }
    }
}

/// The oracle's reply could not be turned into a structured document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleResponseError {
    /// No extraction strategy found parsable JSON in the reply.
    #[error("No valid JSON found in oracle response (starts with {preview:?})")]
    NoJson { preview: String },

    /// JSON parsed, but the required top-level shape is missing.
    #[error("Oracle response has an invalid shape: {}", errors.join("; "))]
    InvalidShape { errors: Vec<String> },
}

/// Transport-level oracle failure, after retries.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    /// A page image could not be prepared for the request.
    #[error("page {page}: image encoding failed: {detail}")]
    Encoding { page: u32, detail: String },

    /// The provider returned an error on every attempt.
    #[error("provider failed after {retries} retries: {detail}")]
    Provider { retries: u32, detail: String },
}

/// A non-fatal error for a single region candidate.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RegionError {
    /// The candidate points at a page the rasteriser never produced.
    #[error("region {region_id}: page {page} not found")]
    PageMissing { region_id: String, page: u32 },

    /// The clamped crop is below the minimum size on at least one side.
    #[error("region {region_id}: crop too small: {width}x{height} (minimum {min}px)")]
    Geometry {
        region_id: String,
        width: i64,
        height: i64,
        min: u32,
    },

    /// Decoding the page or encoding the crop failed.
    #[error("region {region_id}: image processing failed: {detail}")]
    Image { region_id: String, detail: String },

    /// The blob store rejected the upload.
    #[error("region {region_id}: storage failed: {detail}")]
    Storage { region_id: String, detail: String },

    /// Another candidate in the same job already used this identifier.
    #[error("region {region_id}: duplicate region identifier")]
    Duplicate { region_id: String },
}

impl RegionError {
    /// Identifier of the region that failed.
    pub fn region_id(&self) -> &str {
        match self {
            RegionError::PageMissing { region_id, .. }
            | RegionError::Geometry { region_id, .. }
            | RegionError::Image { region_id, .. }
            | RegionError::Storage { region_id, .. }
            | RegionError::Duplicate { region_id } => region_id,
        }
    }
}

/// Blob store write failure.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("I/O error writing '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of '{key}' failed: {reason}")]
    Upload { key: String, reason: String },

    #[error("invalid blob key '{key}'")]
    InvalidKey { key: String },
}

/// Durable record store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One store failed while the other may have succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceWarning {
    /// Name of the store that failed.
    pub store: String,
    /// Human-readable failure reason.
    pub detail: String,
}

impl std::fmt::Display for PersistenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} store write failed: {}", self.store, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let e = PipelineError::validation("file is required");
        assert_eq!(e.status_code(), 400);
        assert_eq!(e.kind(), "ValidationError");
        assert!(e.to_string().contains("file is required"));
    }

    #[test]
    fn unreachable_url_is_the_callers_input() {
        let e = PipelineError::DownloadFailed {
            url: "https://example.invalid/exam.pdf".into(),
            reason: "HTTP 404".into(),
        };
        assert_eq!(e.kind(), "ValidationError");
        assert_eq!(e.status_code(), 400);
    }

    #[test]
    fn oracle_shape_maps_to_500() {
        let e: PipelineError = OracleResponseError::InvalidShape {
            errors: vec!["metadata section missing".into()],
        }
        .into();
        assert_eq!(e.status_code(), 500);
        assert_eq!(e.kind(), "OracleResponseError");
        assert!(e.to_string().contains("metadata section missing"));
    }

    #[test]
    fn geometry_display() {
        let e = RegionError::Geometry {
            region_id: "img_q1_table_000".into(),
            width: 10,
            height: 10,
            min: 50,
        };
        let msg = e.to_string();
        assert!(msg.contains("10x10"), "got: {msg}");
        assert_eq!(e.region_id(), "img_q1_table_000");
    }

    #[test]
    fn region_error_serialises_with_kind_tag() {
        let e = RegionError::PageMissing {
            region_id: "r1".into(),
            page: 4,
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["kind"], "pageMissing");
        assert_eq!(v["page"], 4);
    }

    #[test]
    fn persistence_warning_display() {
        let w = PersistenceWarning {
            store: "relational".into(),
            detail: "disk full".into(),
        };
        assert_eq!(w.to_string(), "relational store write failed: disk full");
    }
}
