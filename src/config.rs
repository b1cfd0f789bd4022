//! Configuration for the capture pipeline.
//!
//! All operational parameters live in [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. The values mirror what the hosting queue and
//! functions impose (timeouts, batch limits, concurrency caps); none of
//! them change the meaning of a capture, only how fast and how often it is
//! attempted.

use crate::error::WebclipError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maximum number of blocks the destination accepts in one append call.
pub const MAX_BLOCKS_PER_APPEND: usize = 100;

/// Configuration for the ingress router, stages and workers.
///
/// # Example
/// ```rust
/// use edgequake_webclip::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .process_concurrency(2)
///     .extraction_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.process_concurrency, 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Run main-content extraction for `document` captures. Default: true.
    pub extract_main_content: bool,

    /// Upper bound on one extraction call, in seconds. Default: 300.
    ///
    /// Long articles produce long completions; five minutes covers them
    /// while still releasing the processing slot if the model hangs.
    pub extraction_timeout_secs: u64,

    /// Timeout for fetching a page that arrived without HTML. Default: 30.
    pub fetch_timeout_secs: u64,

    /// User-Agent sent by the fetch stage.
    pub user_agent: String,

    /// Window in which repeated sends with the same dedup key collapse. Default: 300.
    ///
    /// Zero disables deduplication.
    pub dedup_window_secs: u64,

    /// How long persisted payloads are kept. Default: 7 days.
    pub payload_retention_secs: u64,

    /// In-flight messages on the processing queue. Default: 1.
    ///
    /// Both the document store and the model are rate-limited; one at a
    /// time is the safe default.
    pub process_concurrency: usize,

    /// In-flight messages on the fetch queue. Default: 8.
    pub fetch_concurrency: usize,

    /// Deliveries of one message before it is dead-lettered. Default: 3.
    pub max_receive_count: u32,

    /// Delay before a failed message becomes visible again, in ms. Default: 1000.
    pub redelivery_delay_ms: u64,

    /// Idle poll interval of the stage workers, in ms. Default: 250.
    pub poll_interval_ms: u64,

    /// Blocks per append call to the document store (1–100). Default: 100.
    pub max_blocks_per_append: usize,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for extraction. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate for one extraction. Default: 8192.
    pub max_tokens: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extract_main_content: true,
            extraction_timeout_secs: 300,
            fetch_timeout_secs: 30,
            user_agent: concat!("edgequake-webclip/", env!("CARGO_PKG_VERSION")).to_string(),
            dedup_window_secs: 300,
            payload_retention_secs: 7 * 24 * 60 * 60,
            process_concurrency: 1,
            fetch_concurrency: 8,
            max_receive_count: 3,
            redelivery_delay_ms: 1000,
            poll_interval_ms: 250,
            max_blocks_per_append: MAX_BLOCKS_PER_APPEND,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("extract_main_content", &self.extract_main_content)
            .field("extraction_timeout_secs", &self.extraction_timeout_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("dedup_window_secs", &self.dedup_window_secs)
            .field("payload_retention_secs", &self.payload_retention_secs)
            .field("process_concurrency", &self.process_concurrency)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("max_receive_count", &self.max_receive_count)
            .field("max_blocks_per_append", &self.max_blocks_per_append)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
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

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn payload_retention(&self) -> Duration {
        Duration::from_secs(self.payload_retention_secs)
    }

    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn extract_main_content(mut self, v: bool) -> Self {
        self.config.extract_main_content = v;
        self
    }

    pub fn extraction_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extraction_timeout_secs = secs;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn dedup_window_secs(mut self, secs: u64) -> Self {
        self.config.dedup_window_secs = secs;
        self
    }

    pub fn payload_retention_secs(mut self, secs: u64) -> Self {
        self.config.payload_retention_secs = secs;
        self
    }

    pub fn process_concurrency(mut self, n: usize) -> Self {
        self.config.process_concurrency = n.max(1);
        self
    }

    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.config.fetch_concurrency = n.max(1);
        self
    }

    pub fn max_receive_count(mut self, n: u32) -> Self {
        self.config.max_receive_count = n.max(1);
        self
    }

    pub fn redelivery_delay_ms(mut self, ms: u64) -> Self {
        self.config.redelivery_delay_ms = ms;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.max(1);
        self
    }

    pub fn max_blocks_per_append(mut self, n: usize) -> Self {
        self.config.max_blocks_per_append = n.clamp(1, MAX_BLOCKS_PER_APPEND);
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

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, WebclipError> {
        let c = &self.config;
        if c.extraction_timeout_secs == 0 {
            return Err(WebclipError::InvalidConfig(
                "Extraction timeout must be ≥ 1s".into(),
            ));
        }
        if c.fetch_timeout_secs == 0 {
            return Err(WebclipError::InvalidConfig(
                "Fetch timeout must be ≥ 1s".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(WebclipError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
