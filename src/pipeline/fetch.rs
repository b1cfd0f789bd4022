//! Fetch stage: retrieve HTML for captures that arrived without it.
//!
//! Runs only for requests routed to [`QueueRef::Fetch`]. On success the
//! payload is rewritten with the page HTML and a message with the same
//! identity is forwarded to the processing queue. On failure a `Failed`
//! document explains what happened and the error is returned so the queue
//! redelivers.

use crate::capture::{PipelineMessage, QueueRef};
use crate::document::DocumentStatus;
use crate::error::WebclipError;
use crate::store::{DocumentStore, MessageQueue, PageFetcher, PayloadStore};
use std::sync::Arc;
use tracing::{info, warn};

/// What the fetch stage did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// HTML fetched, payload updated, message forwarded.
    Forwarded,
    /// The payload already had HTML; nothing to do.
    AlreadySatisfied,
}

#[derive(Clone)]
pub struct FetchStage {
    payloads: Arc<dyn PayloadStore>,
    queue: Arc<dyn MessageQueue>,
    documents: Arc<dyn DocumentStore>,
    fetcher: Arc<dyn PageFetcher>,
}

impl FetchStage {
    pub fn new(
        payloads: Arc<dyn PayloadStore>,
        queue: Arc<dyn MessageQueue>,
        documents: Arc<dyn DocumentStore>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            payloads,
            queue,
            documents,
            fetcher,
        }
    }

    pub async fn run(&self, message: &PipelineMessage) -> Result<FetchOutcome, WebclipError> {
        let mut request = self.payloads.get(&message.location).await?;
        if request.has_html() {
            info!(identity = %message.identity, "payload already has HTML; skipping fetch");
            return Ok(FetchOutcome::AlreadySatisfied);
        }

        let html = match self.fetcher.fetch(&request.url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %request.url, "fetch failed: {e}");
                self.record_failure(&request.title, &request.url, &e).await;
                return Err(e);
            }
        };

        request.html = Some(html);
        self.payloads.put(&message.location, &request).await?;

        let key = message.identity.as_str();
        self.queue.send(QueueRef::Process, key, key, message).await?;
        info!(url = %request.url, identity = %message.identity, "page fetched; forwarded to processing");
        Ok(FetchOutcome::Forwarded)
    }

    /// Best effort: a failure while recording the failure is only logged.
    async fn record_failure(&self, title: &str, url: &str, error: &WebclipError) {
        let result = async {
            let id = self.documents.create_document(title, url).await?;
            self.documents
                .add_comment(&id, &fetch_failure_comment(error))
                .await?;
            self.documents.set_status(&id, DocumentStatus::Failed).await
        }
        .await;
        if let Err(e) = result {
            warn!(url, "could not record fetch failure: {e}");
        }
    }
}

/// Plain-language explanation shown on the `Failed` document.
pub fn fetch_failure_comment(error: &WebclipError) -> String {
    match error {
        WebclipError::FetchTimeout { secs, .. } => {
            format!("The page did not respond within {secs} seconds, so it could not be saved.")
        }
        WebclipError::NotText { content_type, .. } => format!(
            "The link points to a file of type {content_type}, not a web page, so it could not be saved."
        ),
        other => format!("The page could not be downloaded: {other}"),
    }
}
