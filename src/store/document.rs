//! In-memory document store that records every call.

use super::blocks::{markdown_to_blocks, Block};
use super::DocumentStore;
use crate::config::MAX_BLOCKS_PER_APPEND;
use crate::document::{DocumentId, DocumentStatus};
use crate::error::WebclipError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A document as the store sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub title: String,
    pub url: String,
    pub status: DocumentStatus,
    pub archived: bool,
    pub blocks: Vec<Block>,
    /// Appended Markdown, concatenated in call order.
    pub markdown: String,
    /// Number of batched block writes.
    pub append_calls: usize,
    pub comments: Vec<String>,
}

/// One recorded store operation, keyed by the document's URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Archive { url: String, id: DocumentId },
    Create { url: String, id: DocumentId },
    Append { url: String, id: DocumentId },
    Status { url: String, id: DocumentId, status: DocumentStatus },
    Comment { url: String, id: DocumentId },
}

impl StoreOp {
    pub fn url(&self) -> &str {
        match self {
            StoreOp::Archive { url, .. }
            | StoreOp::Create { url, .. }
            | StoreOp::Append { url, .. }
            | StoreOp::Status { url, .. }
            | StoreOp::Comment { url, .. } => url,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    documents: Vec<StoredDocument>,
    ops: Vec<StoreOp>,
}

/// [`DocumentStore`] kept in memory.
///
/// Status changes are validated against the lifecycle, so an illegal
/// transition fails here the way a careless caller would want it to.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    state: Mutex<State>,
    max_blocks_per_append: usize,
    latency: Duration,
    failing_appends: AtomicUsize,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_blocks_per_append: MAX_BLOCKS_PER_APPEND,
            latency: Duration::ZERO,
            failing_appends: AtomicUsize::new(0),
        }
    }

    pub fn with_max_blocks_per_append(mut self, n: usize) -> Self {
        self.max_blocks_per_append = n.clamp(1, MAX_BLOCKS_PER_APPEND);
        self
    }

    /// Sleep this long inside every operation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next `n` append calls fail with a publish error.
    pub fn fail_next_appends(&self, n: usize) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    pub fn documents(&self) -> Vec<StoredDocument> {
        self.state
            .lock()
            .map(|s| s.documents.clone())
            .unwrap_or_default()
    }

    /// Documents for `url` that are not archived.
    pub fn live_documents(&self, url: &str) -> Vec<StoredDocument> {
        self.documents()
            .into_iter()
            .filter(|d| d.url == url && !d.archived)
            .collect()
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.state.lock().map(|s| s.ops.clone()).unwrap_or_default()
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, WebclipError> {
        self.state
            .lock()
            .map_err(|e| WebclipError::publish(operation, e))
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create_document(&self, title: &str, url: &str) -> Result<DocumentId, WebclipError> {
        self.pause().await;
        let mut state = self.lock("create_document")?;
        let State { documents, ops } = &mut *state;

        for doc in documents.iter_mut().filter(|d| d.url == url && !d.archived) {
            doc.archived = true;
            ops.push(StoreOp::Archive {
                url: url.to_string(),
                id: doc.id.clone(),
            });
        }

        let id = DocumentId(format!("doc-{}", documents.len() + 1));
        documents.push(StoredDocument {
            id: id.clone(),
            title: title.to_string(),
            url: url.to_string(),
            status: DocumentStatus::InProgress,
            archived: false,
            blocks: Vec::new(),
            markdown: String::new(),
            append_calls: 0,
            comments: Vec::new(),
        });
        ops.push(StoreOp::Create {
            url: url.to_string(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn append_content(&self, id: &DocumentId, markdown: &str) -> Result<(), WebclipError> {
        self.pause().await;
        let failing = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WebclipError::publish("append_content", "injected failure"));
        }

        let blocks = markdown_to_blocks(markdown);
        let mut state = self.lock("append_content")?;
        let State { documents, ops } = &mut *state;
        let doc = find_in(documents, id, "append_content")?;
        for batch in blocks.chunks(self.max_blocks_per_append) {
            doc.blocks.extend_from_slice(batch);
            doc.append_calls += 1;
            ops.push(StoreOp::Append {
                url: doc.url.clone(),
                id: id.clone(),
            });
        }
        doc.markdown.push_str(markdown);
        Ok(())
    }

    async fn set_status(
        &self,
        id: &DocumentId,
        status: DocumentStatus,
    ) -> Result<(), WebclipError> {
        self.pause().await;
        let mut state = self.lock("set_status")?;
        let State { documents, ops } = &mut *state;
        let doc = find_in(documents, id, "set_status")?;
        doc.status = doc.status.transition(status)?;
        ops.push(StoreOp::Status {
            url: doc.url.clone(),
            id: id.clone(),
            status,
        });
        Ok(())
    }

    async fn add_comment(&self, id: &DocumentId, text: &str) -> Result<(), WebclipError> {
        self.pause().await;
        let mut state = self.lock("add_comment")?;
        let State { documents, ops } = &mut *state;
        let doc = find_in(documents, id, "add_comment")?;
        doc.comments.push(text.to_string());
        ops.push(StoreOp::Comment {
            url: doc.url.clone(),
            id: id.clone(),
        });
        Ok(())
    }
}

fn find_in<'a>(
    documents: &'a mut [StoredDocument],
    id: &DocumentId,
    operation: &'static str,
) -> Result<&'a mut StoredDocument, WebclipError> {
    documents
        .iter_mut()
        .find(|d| &d.id == id)
        .ok_or_else(|| WebclipError::publish(operation, format!("no document with id {id}")))
}
