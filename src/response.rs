//! Request-boundary envelopes.
//!
//! A host (HTTP handler, CLI, queue worker) turns the result of
//! [`crate::process::Pipeline::process`] into one of two JSON shapes:
//!
//! ```text
//! { "success": true,  "message": "...", "data": { ...FinalRecord } }
//! { "success": false, "message": "...", "error": { "kind": "...", "detail": "..." } }
//! ```
//!
//! Validation errors answer 400 and carry their message, since it describes
//! the caller's own input. Everything else answers 500 with a generic message;
//! `detail` is only filled in when `expose_error_detail` is set.
//! Authentication (401) belongs to the host.

use crate::error::PipelineError;
use crate::model::FinalRecord;
use serde::Serialize;

/// Body of an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Either envelope, serialised without a tag.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Success {
        success: bool,
        message: String,
        data: Box<FinalRecord>,
    },
    Error {
        success: bool,
        message: String,
        error: ErrorBody,
    },
}

/// HTTP status plus envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub status: u16,
    pub body: Envelope,
}

impl Response {
    pub fn success(record: FinalRecord) -> Self {
        let message = format!(
            "Document processed: {} items, {} images{}",
            record.items.len(),
            record.total_assets(),
            if record.notes.degraded { " (degraded)" } else { "" }
        );
        Self {
            status: 200,
            body: Envelope::Success {
                success: true,
                message,
                data: Box::new(record),
            },
        }
    }

    pub fn error(err: &PipelineError, expose_detail: bool) -> Self {
        let status = err.status_code();
        let message = if status == 400 {
            err.to_string()
        } else {
            "Document processing failed".to_string()
        };
        Self {
            status,
            body: Envelope::Error {
                success: false,
                message,
                error: ErrorBody {
                    kind: err.kind(),
                    detail: expose_detail.then(|| err.to_string()),
                },
            },
        }
    }

    pub fn from_result(result: Result<FinalRecord, PipelineError>, expose_detail: bool) -> Self {
        match result {
            Ok(record) => Self::success(record),
            Err(e) => Self::error(&e, expose_detail),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.body, Envelope::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;

    #[test]
    fn validation_error_is_400_with_message() {
        let r = Response::error(&PipelineError::validation("file is required"), false);
        assert_eq!(r.status, 400);
        let v = serde_json::to_value(&r.body).unwrap();
        assert_eq!(v["success"], false);
        assert!(v["message"].as_str().unwrap().contains("file is required"));
        assert_eq!(v["error"]["kind"], "ValidationError");
        assert!(v["error"].get("detail").is_none());
    }

    #[test]
    fn pipeline_error_hides_detail_unless_exposed() {
        let err: PipelineError = OracleError::Provider {
            retries: 3,
            detail: "api key sk-secret rejected".into(),
        }
        .into();

        let hidden = serde_json::to_value(&Response::error(&err, false).body).unwrap();
        assert_eq!(hidden["message"], "Document processing failed");
        assert!(!hidden.to_string().contains("sk-secret"));

        let shown = Response::error(&err, true);
        assert_eq!(shown.status, 500);
        let v = serde_json::to_value(&shown.body).unwrap();
        assert!(v["error"]["detail"].as_str().unwrap().contains("sk-secret"));
    }
}
