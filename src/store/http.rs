//! HTTP page retrieval for captures that arrived without HTML.

use super::PageFetcher;
use crate::config::PipelineConfig;
use crate::error::WebclipError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// [`PageFetcher`] over `reqwest`.
///
/// No retries: a failed fetch is reported to the stage, which records it
/// and lets the queue redeliver.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, WebclipError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.fetch_timeout())
            .build()
            .map_err(|e| WebclipError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout: config.fetch_timeout(),
        })
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> WebclipError {
        if e.is_timeout() {
            WebclipError::FetchTimeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            }
        } else {
            WebclipError::FetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

/// Whether a `Content-Type` value denotes a text document.
pub(crate) fn is_text_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/") || mime == "application/xhtml+xml"
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, WebclipError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.5")
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebclipError::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        // A missing Content-Type is treated as text.
        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_text_content_type(content_type) {
                return Err(WebclipError::NotText {
                    url: url.to_string(),
                    content_type: content_type.to_string(),
                });
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(url, e))?;
        debug!(url, bytes = body.len(), "page fetched");
        Ok(body)
    }
}
