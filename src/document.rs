//! Destination document identity and status lifecycle.
//!
//! ```text
//! NotStarted ──▶ InProgress ──▶ Done
//!                    │
//!                    └────────▶ Failed
//! ```
//!
//! `Done` and `Failed` are terminal. Documents are created directly in
//! `InProgress`; `NotStarted` exists because the destination database
//! exposes it as a selectable value.

use crate::error::WebclipError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier assigned by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a destination document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentStatus {
    #[serde(rename = "Not started")]
    NotStarted,
    #[serde(rename = "In progress")]
    InProgress,
    Done,
    Failed,
}

impl DocumentStatus {
    /// The display name used by the destination database.
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::NotStarted => "Not started",
            DocumentStatus::InProgress => "In progress",
            DocumentStatus::Done => "Done",
            DocumentStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Done | DocumentStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (NotStarted, InProgress) | (InProgress, Done) | (InProgress, Failed)
        )
    }

    /// Validate a transition, returning the new status.
    pub fn transition(self, next: DocumentStatus) -> Result<DocumentStatus, WebclipError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(WebclipError::InvalidStatusTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
