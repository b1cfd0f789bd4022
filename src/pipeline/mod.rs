//! Capture pipeline: ingress, fetch and processing stages over a queue.
//!
//! Each submodule implements one step. Stages never call each other
//! directly; they hand a [`PipelineMessage`] (a payload reference, never
//! the page itself) to the next queue, so any stage can be redelivered
//! without repeating the ones before it.
//!
//! ## Data Flow
//!
//! ```text
//!              ┌──────── has HTML ────────┐
//!              │                          ▼
//! ingress ─────┤                    process queue ──▶ processing ──▶ document
//! (validate,   │                          ▲          (convert, extract,
//!  persist)    └─ no HTML ─▶ fetch queue ─┘            publish)
//!                             (fetch stage)
//! ```
//!
//! 1. [`ingress`]: validate, persist the payload, route by whether HTML
//!    was captured
//! 2. [`fetch`]: download the page for captures without HTML
//! 3. [`process`]: HTML to Markdown, optional main-content extraction,
//!    publish to the [`DocumentStore`]
//! 4. [`worker`]: queue consumer loop shared by both stages
//!
//! [`PipelineMessage`]: crate::capture::PipelineMessage

pub mod fetch;
pub mod ingress;
pub mod process;
pub mod worker;

pub use fetch::{FetchOutcome, FetchStage};
pub use ingress::{Admission, IngressRouter};
pub use process::{ProcessOutcome, ProcessingStage};
pub use worker::{StageHandler, Worker};

use crate::capture::QueueRef;
use crate::config::PipelineConfig;
use crate::error::WebclipError;
use crate::extract::ContentExtractor;
use crate::store::{DocumentStore, MessageQueue, PageFetcher, PayloadStore};
use std::sync::Arc;
use tokio::sync::watch;

/// Payload namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "captures";

/// The wired-up pipeline: one set of collaborators shared by every stage.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    payloads: Arc<dyn PayloadStore>,
    queue: Arc<dyn MessageQueue>,
    documents: Arc<dyn DocumentStore>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Option<Arc<dyn ContentExtractor>>,
    namespace: String,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        payloads: Arc<dyn PayloadStore>,
        queue: Arc<dyn MessageQueue>,
        documents: Arc<dyn DocumentStore>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            payloads,
            queue,
            documents,
            fetcher,
            extractor: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Enable main-content extraction for `document` captures.
    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ingress(&self) -> IngressRouter {
        IngressRouter::new(
            Arc::clone(&self.payloads),
            Arc::clone(&self.queue),
            self.namespace.clone(),
        )
    }

    pub fn fetch_stage(&self) -> FetchStage {
        FetchStage::new(
            Arc::clone(&self.payloads),
            Arc::clone(&self.queue),
            Arc::clone(&self.documents),
            Arc::clone(&self.fetcher),
        )
    }

    pub fn processing_stage(&self) -> ProcessingStage {
        ProcessingStage::new(
            Arc::clone(&self.config),
            Arc::clone(&self.payloads),
            Arc::clone(&self.documents),
            self.extractor.clone(),
        )
    }

    pub fn fetch_worker(&self) -> Worker {
        Worker::new(
            QueueRef::Fetch,
            Arc::clone(&self.queue),
            Arc::new(self.fetch_stage()),
            self.config.fetch_concurrency,
            self.config.poll_interval(),
        )
    }

    pub fn process_worker(&self) -> Worker {
        Worker::new(
            QueueRef::Process,
            Arc::clone(&self.queue),
            Arc::new(self.processing_stage()),
            self.config.process_concurrency,
            self.config.poll_interval(),
        )
    }

    /// Re-enqueue captures whose payload was stored but never settled.
    /// Call once at startup, before the workers run.
    pub async fn recover(&self) -> Result<usize, WebclipError> {
        self.ingress().recover().await
    }

    /// Run both stages until neither queue has a deliverable message.
    /// Returns the number of deliveries settled.
    pub async fn drain(&self) -> Result<usize, WebclipError> {
        let fetch = self.fetch_worker();
        let process = self.process_worker();
        let mut total = 0;
        loop {
            let (fetched, processed) = futures::try_join!(fetch.drain(), process.drain())?;
            if fetched + processed == 0 {
                return Ok(total);
            }
            total += fetched + processed;
        }
    }

    /// Run both workers until `shutdown` flips to `true`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), WebclipError> {
        let fetch = self.fetch_worker();
        let process = self.process_worker();
        futures::try_join!(fetch.run(shutdown.clone()), process.run(shutdown))?;
        Ok(())
    }
}
