//! # edgequake-webclip
//!
//! Save web pages from a browser bookmarklet into a knowledge base.
//!
//! ## Why this crate?
//!
//! Clipping a page is a fire-and-forget action: the user clicks once and
//! moves on, so nothing after the click may block them or silently lose the
//! page. The capture is persisted and acknowledged immediately, then a
//! queue-driven pipeline turns it into a clean Markdown document, optionally
//! trimmed to its main content by an LLM, and publishes it. Every stage is
//! safe to re-run, so at-least-once delivery never yields duplicates.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bookmarklet
//!  │
//!  ├─ 1. Ingress   validate, persist payload, enqueue a reference
//!  ├─ 2. Fetch     download the page when the capture had no HTML
//!  ├─ 3. Convert   HTML → Markdown (pure, total)
//!  ├─ 4. Extract   LLM keeps the main content (document captures only)
//!  └─ 5. Publish   archive older copies, create, append, set status
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use edgequake_webclip::html_to_markdown;
//!
//! let md = html_to_markdown(r#"<a href="/x">t</a>"#, "https://ex.com/");
//! assert_eq!(md, "[t](https://ex.com/x)");
//! ```
//!
//! Wiring the whole pipeline with in-memory collaborators:
//!
//! ```rust,no_run
//! use edgequake_webclip::store::{HttpFetcher, MemoryDocumentStore, MemoryPayloadStore, MemoryQueue};
//! use edgequake_webclip::{CaptureRequest, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let fetcher = Arc::new(HttpFetcher::new(&config)?);
//!     let pipeline = Pipeline::new(
//!         config,
//!         Arc::new(MemoryPayloadStore::new()),
//!         Arc::new(MemoryQueue::default()),
//!         Arc::new(MemoryDocumentStore::new()),
//!         fetcher,
//!     );
//!     pipeline
//!         .ingress()
//!         .admit(CaptureRequest::new("https://example.com/", "Example"))
//!         .await?;
//!     pipeline.drain().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `server` | on     | HTTP capture boundary (axum + tower-http) |
//! | `cli`    | on     | Enables the `webclip` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable both when embedding only the converter and pipeline:
//! ```toml
//! edgequake-webclip = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod capture;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod markdown;
pub mod pipeline;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use capture::{
    CaptureForm, CaptureMode, CaptureRequest, DeliveryHint, InvokeKind, PayloadLocation,
    PipelineMessage, QueueRef, RequestIdentity,
};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use document::{DocumentId, DocumentStatus};
pub use error::{ExtractionError, WebclipError};
pub use extract::{ContentExtractor, LlmExtractor};
pub use markdown::{html_to_markdown, MarkdownConverter};
pub use pipeline::{IngressRouter, Pipeline};
