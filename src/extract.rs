//! Main-content extraction through a language model.
//!
//! Converted pages still carry navigation, banners and footers. The
//! processing stage hands the full Markdown to a [`ContentExtractor`], which
//! asks a model to keep only the article body.
//!
//! ## Failure is not fatal
//!
//! Extraction is an improvement, not a requirement: every error surfaces
//! as an [`ExtractionError`] and the caller publishes the unextracted
//! Markdown instead. There are no retries here; one bounded call is made
//! and its outcome reported.
//!
//! ## Response parsing
//!
//! The model is asked to wrap its answer in `<content>` tags. The answer
//! is taken from the first opening tag to the last closing tag, tags
//! excluded and surrounding whitespace trimmed. When either tag is
//! missing the whole response is used.

use crate::config::PipelineConfig;
use crate::error::{ExtractionError, WebclipError};
use crate::markdown::postprocess;
use crate::prompts::{extraction_request, CONTENT_CLOSE, CONTENT_OPEN, EXTRACTION_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default model when a provider is named without one.
const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Reduces converted page Markdown to its main content.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, markdown: &str, url: &str) -> Result<String, ExtractionError>;
}

/// [`ContentExtractor`] backed by an `edgequake-llm` provider.
pub struct LlmExtractor {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
    options: CompletionOptions,
}

impl LlmExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            timeout: config.extraction_timeout(),
            options: build_options(config),
        }
    }

    /// Resolve a provider from `config` and the environment.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, WebclipError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl ContentExtractor for LlmExtractor {
    async fn extract(&self, markdown: &str, url: &str) -> Result<String, ExtractionError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user(extraction_request(markdown, url)),
        ];

        let response = bounded(self.timeout, self.provider.chat(&messages, Some(&self.options)))
            .await?
            .map_err(|e| ExtractionError::Failed {
                detail: e.to_string(),
            })?;

        info!(
            url,
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "extraction complete"
        );

        let content = postprocess::clean_extracted(&parse_tagged_content(&response.content));
        if content.is_empty() {
            warn!(url, "model returned no content");
            return Err(ExtractionError::Failed {
                detail: "model returned an empty response".into(),
            });
        }
        debug!(url, before = markdown.len(), after = content.len(), "main content extracted");
        Ok(content)
    }
}

/// Run `fut` with an upper bound, mapping expiry to [`ExtractionError::Timeout`].
pub async fn bounded<F, T>(limit: Duration, fut: F) -> Result<T, ExtractionError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ExtractionError::Timeout {
            secs: limit.as_secs(),
        })
}

/// Text between the first `<content>` and the last `</content>`, trimmed.
///
/// Falls back to the whole response when either tag is missing or the
/// closing tag precedes the opening one.
pub fn parse_tagged_content(response: &str) -> String {
    let open = response.find(CONTENT_OPEN);
    let close = response.rfind(CONTENT_CLOSE);
    match (open, close) {
        (Some(open), Some(close)) if close >= open + CONTENT_OPEN.len() => {
            response[open + CONTENT_OPEN.len()..close].trim().to_string()
        }
        _ => response.to_string(),
    }
}

fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, WebclipError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        WebclipError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`**, when both are set.
/// 4. **`OPENAI_API_KEY`** present: OpenAI with the configured model.
/// 5. **Auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, WebclipError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| WebclipError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_content_extracted_and_trimmed() {
        let resp = "Sure!\n<content>\n# Title\n\nBody\n</content>\nHope this helps.";
        assert_eq!(parse_tagged_content(resp), "# Title\n\nBody");
    }

    #[test]
    fn first_open_last_close() {
        let resp = "<content>a</content> noise <content>b</content>";
        assert_eq!(parse_tagged_content(resp), "a</content> noise <content>b");
    }

    #[test]
    fn missing_close_returns_full_response() {
        let resp = "<content>half an answer";
        assert_eq!(parse_tagged_content(resp), resp);
    }

    #[test]
    fn missing_open_returns_full_response() {
        let resp = "no tags here</content>";
        assert_eq!(parse_tagged_content(resp), resp);
    }

    #[test]
    fn close_before_open_returns_full_response() {
        let resp = "</content> backwards <content>";
        assert_eq!(parse_tagged_content(resp), resp);
    }

    #[test]
    fn build_options_from_config() {
        let config = PipelineConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    #[tokio::test]
    async fn bounded_times_out() {
        let result = bounded(
            Duration::from_millis(20),
            tokio::time::sleep(Duration::from_secs(10)),
        )
        .await;
        assert!(matches!(result, Err(ExtractionError::Timeout { .. })));
    }

    #[tokio::test]
    async fn bounded_passes_through() {
        let result = bounded(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
