//! Oracle interaction: submit the prompt and every page image in one call.
//!
//! [`ExtractionOracle`] is the narrow contract the extraction adapter talks
//! to: prompt text plus page images in, raw reply text out. [`LlmOracle`]
//! implements it on top of an `edgequake_llm` vision provider. Prompt
//! engineering lives in [`crate::prompts`] and response repair in
//! [`crate::pipeline::repair`]; this module only moves bytes.
//!
//! ## Retry Strategy
//!
//! Transport failures (HTTP 429 / 5xx, dropped connections) are retried with
//! exponential backoff (`retry_backoff_ms * 2^attempt`). The call has no
//! timeout: a large document can legitimately take minutes to describe.

use crate::config::PipelineConfig;
use crate::error::{OracleError, PipelineError};
use crate::model::PageImage;
use crate::pipeline::encode;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Raw oracle reply, fully buffered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleReply {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub retries: u32,
}

impl OracleReply {
    /// A reply carrying only text, for adapters without token accounting.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// The external document-understanding service.
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Label used in logs and record metadata.
    fn name(&self) -> &str;

    /// Send `prompt` with every page image and return the complete reply.
    async fn complete(&self, prompt: &str, pages: &[PageImage]) -> Result<OracleReply, OracleError>;
}

/// [`ExtractionOracle`] backed by an `edgequake_llm` vision provider.
pub struct LlmOracle {
    provider: Arc<dyn LLMProvider>,
    label: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            label: config.model.clone().unwrap_or_else(|| "llm".to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Resolve a provider from the config (or the environment) and wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExtractionOracle for LlmOracle {
    fn name(&self) -> &str {
        &self.label
    }

    /// ## Message Layout
    ///
    /// A single user message: the prompt text followed by every page PNG in
    /// page order. Pages are read from working storage right before the call
    /// so only one copy of the base64 payload is held in memory.
    async fn complete(&self, prompt: &str, pages: &[PageImage]) -> Result<OracleReply, OracleError> {
        let start = Instant::now();

        let mut images: Vec<ImageData> = Vec::with_capacity(pages.len());
        for page in pages {
            let png = tokio::fs::read(&page.path)
                .await
                .map_err(|e| OracleError::Encoding {
                    page: page.page_number,
                    detail: e.to_string(),
                })?;
            images.push(encode::encode_page_png(&png));
        }

        let messages = vec![ChatMessage::user_with_images(prompt, images)];
        let options = self.options();

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Oracle: retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    let duration = start.elapsed();
                    info!(
                        "Oracle answered: {} chars, {} input tokens, {} output tokens, {:?}",
                        response.content.len(),
                        response.prompt_tokens,
                        response.completion_tokens,
                        duration
                    );
                    return Ok(OracleReply {
                        text: response.content,
                        input_tokens: response.prompt_tokens as u64,
                        output_tokens: response.completion_tokens as u64,
                        duration_ms: duration.as_millis() as u64,
                        retries: attempt,
                    });
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Oracle: attempt {} failed: {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(OracleError::Provider {
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`SCAN2STRUCT_PROVIDER` + `SCAN2STRUCT_MODEL`).
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config
            .model
            .as_deref()
            .unwrap_or("claude-sonnet-4-20250514");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("SCAN2STRUCT_PROVIDER"),
        std::env::var("SCAN2STRUCT_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set ANTHROPIC_API_KEY, OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    debug!("Oracle provider auto-detected from environment");
    Ok(llm_provider)
}
