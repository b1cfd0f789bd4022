//! Error types for the edgequake-webclip library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`WebclipError`]: **Fatal for the unit of work**: the capture cannot
//!   make progress (bad capture shape, page could not be fetched, the
//!   document store rejected a write). Stage handlers return it so the host
//!   queue can apply its redelivery policy.
//!
//! * [`ExtractionError`]: **Recovered locally**: the language model did not
//!   return usable content in time. The processing stage logs it as a
//!   diagnostic comment and publishes the unextracted Markdown instead.
//!
//! Users never see either type directly: a failed capture surfaces as a
//! document with `Failed` status plus a plain-language comment.

use crate::document::DocumentStatus;
use thiserror::Error;

/// All fatal errors returned by the edgequake-webclip library.
#[derive(Debug, Error)]
pub enum WebclipError {
    // ── Ingress errors ────────────────────────────────────────────────────
    /// The capture request does not have the required shape.
    #[error("Invalid capture request: {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    // ── Fetch errors ──────────────────────────────────────────────────────
    /// The page could not be retrieved.
    #[error("Failed to fetch '{url}': {reason}")]
    FetchFailed { url: String, reason: String },

    /// Retrieving the page exceeded the configured timeout.
    #[error("Fetching '{url}' timed out after {secs}s")]
    FetchTimeout { url: String, secs: u64 },

    /// The server answered with something that is not text.
    #[error("'{url}' returned non-text content ({content_type})")]
    NotText { url: String, content_type: String },

    // ── Processing errors ─────────────────────────────────────────────────
    /// A message reached the processing stage without HTML in its payload.
    #[error("HTML content is missing for '{url}'")]
    MissingHtml { url: String },

    /// The destination document store rejected an operation.
    #[error("Document store {operation} failed: {detail}")]
    Publish {
        operation: &'static str,
        detail: String,
    },

    /// A status change that the document lifecycle does not allow.
    #[error("Invalid status transition {from} → {to}")]
    InvalidStatusTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    // ── Storage / queue errors ────────────────────────────────────────────
    /// No payload is stored under the given key.
    #[error("No capture payload stored under '{key}'")]
    PayloadNotFound { key: String },

    /// The payload store failed to read or write an object.
    #[error("Payload store error for '{key}': {detail}")]
    PayloadStore { key: String, detail: String },

    /// The message queue rejected an operation.
    #[error("Queue '{queue}' error: {detail}")]
    Queue { queue: String, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebclipError {
    /// `true` for errors caused by the shape of the capture request itself.
    ///
    /// These are rejected at ingress and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(self, WebclipError::Validation { .. })
    }

    /// `true` when redelivering the same message could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            WebclipError::Validation { .. }
                | WebclipError::MissingHtml { .. }
                | WebclipError::InvalidStatusTransition { .. }
                | WebclipError::InvalidConfig(_)
        )
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        WebclipError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn publish(operation: &'static str, detail: impl ToString) -> Self {
        WebclipError::Publish {
            operation,
            detail: detail.to_string(),
        }
    }
}

/// A non-fatal failure of the main-content extractor.
///
/// The pipeline keeps going with the unextracted Markdown.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractionError {
    /// The model did not answer within the bounded wait.
    #[error("content extraction timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The model call failed.
    #[error("content extraction failed: {detail}")]
    Failed { detail: String },
}
