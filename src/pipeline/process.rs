//! Processing stage: convert, extract, publish.
//!
//! ```text
//! load payload ─▶ has HTML? ── no ──▶ Failed document + comment (terminal)
//!                    │
//!                   yes
//!                    ▼
//!   convert ─▶ create document (In progress)
//!                    │
//!        document mode and extraction enabled?
//!          yes ─▶ extract ── error ──▶ comment, keep raw Markdown
//!                    │
//!                    ▼
//!            append content ─▶ Done
//! ```
//!
//! Destination errors propagate so the queue redelivers; a redelivery
//! starts over with a fresh document (the previous one is archived).
//! Once the document is terminal the payload is marked settled, so
//! [`Pipeline::recover`](super::Pipeline::recover) skips it after a restart.

use crate::capture::{CaptureMode, CaptureRequest, PipelineMessage};
use crate::config::PipelineConfig;
use crate::document::{DocumentId, DocumentStatus};
use crate::error::WebclipError;
use crate::extract::ContentExtractor;
use crate::markdown::html_to_markdown;
use crate::store::{DocumentStore, PayloadStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Comment added when a capture reaches processing without HTML.
pub const MISSING_HTML_COMMENT: &str =
    "The page content was not captured, so there was nothing to save.";

/// What the processing stage did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Content published. `extracted` is false when raw Markdown was used.
    Done { id: DocumentId, extracted: bool },
    /// The payload had no HTML; a `Failed` document was recorded.
    Failed { id: DocumentId },
}

#[derive(Clone)]
pub struct ProcessingStage {
    config: Arc<PipelineConfig>,
    payloads: Arc<dyn PayloadStore>,
    documents: Arc<dyn DocumentStore>,
    extractor: Option<Arc<dyn ContentExtractor>>,
}

impl ProcessingStage {
    pub fn new(
        config: Arc<PipelineConfig>,
        payloads: Arc<dyn PayloadStore>,
        documents: Arc<dyn DocumentStore>,
        extractor: Option<Arc<dyn ContentExtractor>>,
    ) -> Self {
        Self {
            config,
            payloads,
            documents,
            extractor,
        }
    }

    pub async fn run(&self, message: &PipelineMessage) -> Result<ProcessOutcome, WebclipError> {
        let request = self.payloads.get(&message.location).await?;

        let Some(html) = request.html.as_deref().filter(|h| !h.trim().is_empty()) else {
            let missing = WebclipError::MissingHtml {
                url: request.url.clone(),
            };
            warn!(identity = %message.identity, "{missing}");
            let id = self
                .documents
                .create_document(&request.title, &request.url)
                .await?;
            self.documents.add_comment(&id, MISSING_HTML_COMMENT).await?;
            self.settle(&id, DocumentStatus::Failed).await?;
            self.mark_payload_settled(message, &request).await;
            return Ok(ProcessOutcome::Failed { id });
        };

        let markdown = html_to_markdown(html, &request.url);
        let id = self
            .documents
            .create_document(&request.title, &request.url)
            .await?;

        let mut extracted = false;
        let mut content = markdown;
        if let Some(extractor) = self.extractor_for(request.mode) {
            match extractor.extract(&content, &request.url).await {
                Ok(main) => {
                    content = main;
                    extracted = true;
                }
                Err(e) => {
                    warn!(url = %request.url, "{e}; publishing unextracted content");
                    self.documents
                        .add_comment(
                            &id,
                            &format!(
                                "Main-content extraction did not succeed ({e}). \
                                 The full page is saved instead."
                            ),
                        )
                        .await?;
                }
            }
        }

        self.documents.append_content(&id, &content).await?;
        self.settle(&id, DocumentStatus::Done).await?;
        self.mark_payload_settled(message, &request).await;
        info!(url = %request.url, document = %id, extracted, "capture published");
        Ok(ProcessOutcome::Done { id, extracted })
    }

    fn extractor_for(&self, mode: CaptureMode) -> Option<&Arc<dyn ContentExtractor>> {
        if mode == CaptureMode::Document && self.config.extract_main_content {
            self.extractor.as_ref()
        } else {
            None
        }
    }

    /// Best effort: a lost mark only means the capture is processed again
    /// after a restart.
    async fn mark_payload_settled(&self, message: &PipelineMessage, request: &CaptureRequest) {
        if let Err(e) = self.payloads.mark_settled(&message.location, request).await {
            warn!(identity = %message.identity, "could not mark payload settled: {e}");
        }
    }

    /// Move a freshly created document to its terminal status.
    async fn settle(&self, id: &DocumentId, status: DocumentStatus) -> Result<(), WebclipError> {
        let next = DocumentStatus::InProgress.transition(status)?;
        self.documents.set_status(id, next).await
    }
}
