//! Collaborator seams: where payloads, messages and documents live.
//!
//! The stages never talk to a concrete backend. They see four async traits:
//!
//! | Trait | Role | Implementations |
//! |---|---|---|
//! | [`PayloadStore`] | full capture payload, keyed by identity | [`MemoryPayloadStore`], [`FsPayloadStore`] |
//! | [`MessageQueue`] | reference-only hand-off between stages | [`MemoryQueue`] |
//! | [`DocumentStore`] | destination knowledge base | [`MemoryDocumentStore`], [`NotionDocumentStore`] |
//! | [`PageFetcher`] | retrieval of pages captured without HTML | [`HttpFetcher`] |
//!
//! ## Why traits?
//!
//! Every stage must be re-runnable under at-least-once delivery, and the
//! properties that matter (one live document per URL, no interleaved
//! writes, failures recorded as `Failed`) are only observable on the
//! backends. In-memory implementations record every call so the tests can
//! assert on them directly.

pub mod blocks;
mod document;
mod http;
mod notion;
mod payload;
mod queue;

pub use document::{MemoryDocumentStore, StoreOp, StoredDocument};
pub use http::HttpFetcher;
pub use notion::{NotionConfig, NotionDocumentStore};
pub use payload::{FsPayloadStore, MemoryPayloadStore};
pub use queue::{MemoryQueue, QueueSettings};

use crate::capture::{CaptureRequest, PayloadLocation, PipelineMessage, QueueRef};
use crate::document::{DocumentId, DocumentStatus};
use crate::error::WebclipError;
use async_trait::async_trait;

/// Durable storage for capture payloads.
///
/// A payload has a single writer at any time: the ingress router, then the
/// fetch stage for the same identity, serialised by the queue group.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Write (or overwrite) the payload at `location`.
    async fn put(
        &self,
        location: &PayloadLocation,
        request: &CaptureRequest,
    ) -> Result<(), WebclipError>;

    /// Read the payload at `location`.
    async fn get(&self, location: &PayloadLocation) -> Result<CaptureRequest, WebclipError>;

    /// Record that `request`, as read from `location`, reached a terminal
    /// document. A payload overwritten since it was read stays unsettled.
    async fn mark_settled(
        &self,
        location: &PayloadLocation,
        request: &CaptureRequest,
    ) -> Result<(), WebclipError>;

    /// Payloads in `namespace` that were written but never settled, oldest
    /// first. These are the captures a restart must re-enqueue.
    async fn unsettled(&self, namespace: &str) -> Result<Vec<PayloadLocation>, WebclipError>;
}

/// Result of a [`MessageQueue::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Enqueued,
    /// The dedup key was seen within the dedup window; nothing was queued.
    Deduplicated,
}

/// A message handed to a consumer, to be settled with `ack` or `nack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: PipelineMessage,
    pub group_key: String,
    /// How many times this message has been received, including this one.
    pub receive_count: u32,
    pub(crate) receipt: u64,
}

/// FIFO queue with per-group ordering and send deduplication.
///
/// At most one message per group is in flight: a group whose head has been
/// received is skipped by `receive` until that message is settled.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(
        &self,
        queue: QueueRef,
        group_key: &str,
        dedup_key: &str,
        message: &PipelineMessage,
    ) -> Result<SendOutcome, WebclipError>;

    /// Take the next deliverable message, if any. Never blocks.
    async fn receive(&self, queue: QueueRef) -> Result<Option<Delivery>, WebclipError>;

    /// The message was handled; remove it.
    async fn ack(&self, queue: QueueRef, delivery: &Delivery) -> Result<(), WebclipError>;

    /// The message failed; make it visible again after the redelivery
    /// delay, or dead-letter it once its receive count is exhausted.
    async fn nack(&self, queue: QueueRef, delivery: &Delivery) -> Result<(), WebclipError>;
}

/// Destination knowledge base.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Archive any existing documents for `url`, then create a new one in
    /// `InProgress`.
    async fn create_document(&self, title: &str, url: &str) -> Result<DocumentId, WebclipError>;

    /// Append Markdown content, split into blocks and written in batches.
    async fn append_content(&self, id: &DocumentId, markdown: &str) -> Result<(), WebclipError>;

    async fn set_status(&self, id: &DocumentId, status: DocumentStatus)
        -> Result<(), WebclipError>;

    async fn add_comment(&self, id: &DocumentId, text: &str) -> Result<(), WebclipError>;
}

/// Retrieves the HTML of a page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, WebclipError>;
}
