//! Configuration types for the extraction pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The config is handed to each component when it
//! is constructed; nothing reads process-global settings after that, so two
//! pipelines with different buckets or prompts can run side by side.

use crate::error::PipelineError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Smallest crop side, in pixels, that is ever stored.
pub const MIN_REGION_PX: u32 = 50;

/// Configuration for a document-extraction pipeline.
///
/// # Example
/// ```rust
/// use scan2struct::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .work_dir("/var/tmp/scan2struct")
///     .crop_padding(8)
///     .model("claude-sonnet-4-20250514")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root directory for per-job working storage. Default: `$TMPDIR/scan2struct`.
    pub work_dir: PathBuf,

    /// Maximum rendered page dimension (width or height) in pixels. Default: 2000.
    ///
    /// Region coordinates returned by the oracle are relative to these
    /// rendered images, so changing this between rasterisation and cropping
    /// would invalidate them.
    pub max_rendered_pixels: u32,

    /// Extra pixels added on every side of a region before clamping. Default: 0.
    pub crop_padding: u32,

    /// Leading path segment of every blob key. Default: `exam-images`.
    pub key_prefix: String,

    /// Upper bound on concurrently processed regions within one job.
    /// `None` (default) processes every candidate at once.
    pub region_concurrency: Option<usize>,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the oracle call. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the oracle may generate. Default: 20000.
    ///
    /// The reply carries every item of the document in one JSON payload, so
    /// this is far larger than a per-page budget would be.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transport failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom extraction prompt. If None, uses [`crate::prompts::extraction_prompt`].
    pub prompt: Option<String>,

    /// Number of choices every item is expected to carry. Default: 5.
    ///
    /// A mismatch only produces a validation warning.
    pub expected_choice_count: usize,

    /// Include error detail in error envelopes. Default: false.
    pub expose_error_detail: bool,

    /// HTTP download timeout for URL inputs, in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("scan2struct"),
            max_rendered_pixels: 2000,
            crop_padding: 0,
            key_prefix: "exam-images".to_string(),
            region_concurrency: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 20_000,
            max_retries: 3,
            retry_backoff_ms: 500,
            prompt: None,
            expected_choice_count: 5,
            expose_error_detail: false,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("work_dir", &self.work_dir)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("crop_padding", &self.crop_padding)
            .field("key_prefix", &self.key_prefix)
            .field("region_concurrency", &self.region_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("expected_choice_count", &self.expected_choice_count)
            .field("expose_error_detail", &self.expose_error_detail)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn crop_padding(mut self, px: u32) -> Self {
        self.config.crop_padding = px;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn region_concurrency(mut self, n: usize) -> Self {
        self.config.region_concurrency = Some(n.max(1));
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn expected_choice_count(mut self, n: usize) -> Self {
        self.config.expected_choice_count = n;
        self
    }

    pub fn expose_error_detail(mut self, v: bool) -> Self {
        self.config.expose_error_detail = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.work_dir.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "work_dir must not be empty".into(),
            ));
        }
        if c.key_prefix.trim_matches('/').is_empty() {
            return Err(PipelineError::InvalidConfig(
                "key_prefix must contain at least one path segment".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Caller's hint about what kind of document was submitted.
///
/// The hint selects the prompt preamble; the oracle may still report a more
/// specific `documentType` in its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// Let the oracle decide.
    Auto,
    /// Multiple-choice exam paper. (default)
    #[default]
    Exam,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Auto => "auto",
            DocumentType::Exam => "exam",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DocumentType::Auto),
            "exam" => Ok(DocumentType::Exam),
            "" => Err(PipelineError::validation("documentType is required")),
            other => Err(PipelineError::validation(format!(
                "Unsupported document type '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_rendered_pixels, 2000);
        assert_eq!(c.crop_padding, 0);
        assert_eq!(c.key_prefix, "exam-images");
        assert_eq!(c.expected_choice_count, 5);
        assert!(c.region_concurrency.is_none());
        assert!(!c.expose_error_detail);
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = PipelineConfig::builder()
            .temperature(9.0)
            .region_concurrency(0)
            .max_rendered_pixels(10)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.region_concurrency, Some(1));
        assert_eq!(c.max_rendered_pixels, 100);

        let err = PipelineConfig::builder().key_prefix("///").build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn document_type_parsing() {
        assert_eq!("EXAM".parse::<DocumentType>().unwrap(), DocumentType::Exam);
        assert_eq!(" auto ".parse::<DocumentType>().unwrap(), DocumentType::Auto);
        let err = "invoice".parse::<DocumentType>().unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!("".parse::<DocumentType>().is_err());
    }
}
