//! The capture envelope and the references that flow between stages.
//!
//! A [`CaptureRequest`] is produced by the browser bookmarklet, validated
//! once at ingress, persisted under its [`RequestIdentity`], and then only
//! ever referred to by a [`PipelineMessage`]. Full-page HTML can be many
//! megabytes, so it never travels through the queue itself.

use crate::error::WebclipError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Whether the capture holds the whole page or a user selection.
///
/// Only whole documents go through main-content extraction; a selection is
/// already what the user wants to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Document,
    Selection,
}

impl FromStr for CaptureMode {
    type Err = WebclipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "document" => Ok(CaptureMode::Document),
            "selection" => Ok(CaptureMode::Selection),
            other => Err(WebclipError::validation(
                "mode",
                format!("expected 'document' or 'selection', got '{other}'"),
            )),
        }
    }
}

/// The delivery channel the bookmarklet managed to use.
///
/// Affects only the acknowledgement returned to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvokeKind {
    #[default]
    Fetch,
    FormBlank,
    FormSelf,
    WindowOpen,
}

impl FromStr for InvokeKind {
    type Err = WebclipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fetch" => Ok(InvokeKind::Fetch),
            "form-blank" => Ok(InvokeKind::FormBlank),
            "form-self" => Ok(InvokeKind::FormSelf),
            "window-open" => Ok(InvokeKind::WindowOpen),
            other => Err(WebclipError::validation(
                "invoke",
                format!("unknown invoke kind '{other}'"),
            )),
        }
    }
}

/// Raw capture fields as they arrive over the wire.
///
/// Forms and query strings only carry strings, so every field is optional
/// text here and gets typed by [`CaptureRequest::from_form`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureForm {
    pub url: Option<String>,
    pub title: Option<String>,
    pub html: Option<String>,
    pub mode: Option<String>,
    pub invoke: Option<String>,
}

/// A validated capture: the unit of work of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default)]
    pub mode: CaptureMode,
    #[serde(default)]
    pub invoke: InvokeKind,
}

impl CaptureRequest {
    /// Build a request for a page whose HTML still has to be fetched.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            html: None,
            mode: CaptureMode::Document,
            invoke: InvokeKind::Fetch,
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_mode(mut self, mode: CaptureMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_invoke(mut self, invoke: InvokeKind) -> Self {
        self.invoke = invoke;
        self
    }

    /// Type and validate raw wire fields.
    ///
    /// A missing or blank title falls back to the URL.
    pub fn from_form(form: CaptureForm) -> Result<Self, WebclipError> {
        let url = form
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| WebclipError::validation("url", "missing"))?;

        let title = form
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| url.clone());

        let mode = match form.mode.as_deref().map(str::trim) {
            None | Some("") => CaptureMode::default(),
            Some(m) => m.parse()?,
        };
        let invoke = match form.invoke.as_deref().map(str::trim) {
            None | Some("") => InvokeKind::default(),
            Some(i) => i.parse()?,
        };

        let request = Self {
            url,
            title,
            html: form.html,
            mode,
            invoke,
        };
        request.validate()?;
        Ok(request)
    }

    /// Check the invariants every request reaching ingress must satisfy.
    pub fn validate(&self) -> Result<(), WebclipError> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| WebclipError::validation("url", format!("'{}': {e}", self.url)))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(WebclipError::validation(
                    "url",
                    format!("unsupported scheme '{other}'"),
                ))
            }
        }
        if parsed.host_str().is_none() {
            return Err(WebclipError::validation("url", "missing host"));
        }
        Ok(())
    }

    /// `true` when the request carries usable markup.
    pub fn has_html(&self) -> bool {
        self.html.as_deref().is_some_and(|h| !h.trim().is_empty())
    }

    /// The identity derived from this request's URL.
    pub fn identity(&self) -> RequestIdentity {
        RequestIdentity::from_url(&self.url)
    }
}

/// Deterministic fingerprint of a capture URL (hex SHA-256).
///
/// Used as payload key, message group key and deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestIdentity(String);

impl RequestIdentity {
    pub fn from_url(url: &str) -> Self {
        Self(hex::encode(Sha256::digest(url.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object key of the persisted payload.
    pub fn storage_key(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a payload lives in the payload store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PayloadLocation {
    pub namespace: String,
    pub key: String,
}

impl PayloadLocation {
    pub fn new(namespace: impl Into<String>, identity: &RequestIdentity) -> Self {
        Self {
            namespace: namespace.into(),
            key: identity.storage_key(),
        }
    }
}

impl fmt::Display for PayloadLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

/// Reference-only hand-off between stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMessage {
    pub location: PayloadLocation,
    pub identity: RequestIdentity,
}

/// The queues that connect the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueRef {
    /// Captures that arrived without HTML.
    Fetch,
    /// Captures ready for conversion and publishing.
    Process,
}

impl QueueRef {
    pub fn name(self) -> &'static str {
        match self {
            QueueRef::Fetch => "webclip-fetch",
            QueueRef::Process => "webclip-process",
        }
    }
}

impl fmt::Display for QueueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the capture boundary should acknowledge an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryHint {
    /// `fetch`: an empty 200.
    Empty,
    /// `form-blank` / `window-open`: a page that closes its own window.
    ClosePage,
    /// `form-self`: send the browser back to the captured page.
    Redirect(String),
}

impl DeliveryHint {
    pub fn for_request(request: &CaptureRequest) -> Self {
        match request.invoke {
            InvokeKind::Fetch => DeliveryHint::Empty,
            InvokeKind::FormBlank | InvokeKind::WindowOpen => DeliveryHint::ClosePage,
            InvokeKind::FormSelf => DeliveryHint::Redirect(request.url.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(url: &str) -> CaptureForm {
        CaptureForm {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    #[test]
    fn identity_is_stable_sha256() {
        let a = RequestIdentity::from_url("https://example.com/");
        let b = RequestIdentity::from_url("https://example.com/");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(
            RequestIdentity::from_url("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(a.storage_key().ends_with(".json"));
    }

    #[test]
    fn different_urls_have_different_identities() {
        assert_ne!(
            RequestIdentity::from_url("https://example.com/a"),
            RequestIdentity::from_url("https://example.com/b")
        );
    }

    #[test]
    fn form_defaults() {
        let req = CaptureRequest::from_form(form("https://example.com/post")).unwrap();
        assert_eq!(req.mode, CaptureMode::Document);
        assert_eq!(req.invoke, InvokeKind::Fetch);
        assert_eq!(req.title, "https://example.com/post");
        assert!(!req.has_html());
    }

    #[test]
    fn missing_url_is_validation_error() {
        let err = CaptureRequest::from_form(CaptureForm::default()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn malformed_url_is_validation_error() {
        for bad in ["not a url", "/relative/path", "ftp://example.com/file", "mailto:a@b.c"] {
            let err = CaptureRequest::from_form(form(bad)).unwrap_err();
            assert!(err.is_validation(), "{bad} should be rejected");
        }
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut f = form("https://example.com/");
        f.mode = Some("everything".into());
        assert!(CaptureRequest::from_form(f).unwrap_err().is_validation());
    }

    #[test]
    fn invoke_kinds_parse() {
        assert_eq!("form-blank".parse::<InvokeKind>().unwrap(), InvokeKind::FormBlank);
        assert_eq!("form-self".parse::<InvokeKind>().unwrap(), InvokeKind::FormSelf);
        assert_eq!("window-open".parse::<InvokeKind>().unwrap(), InvokeKind::WindowOpen);
    }

    #[test]
    fn blank_html_counts_as_absent() {
        let req = CaptureRequest::new("https://example.com/", "t").with_html("   \n");
        assert!(!req.has_html());
        let req = req.with_html("<p>x</p>");
        assert!(req.has_html());
    }

    #[test]
    fn payload_json_shape() {
        let req = CaptureRequest::new("https://example.com/", "Example")
            .with_mode(CaptureMode::Selection)
            .with_invoke(InvokeKind::WindowOpen);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["mode"], "selection");
        assert_eq!(json["invoke"], "window-open");
        assert!(json.get("html").is_none());
    }

    #[test]
    fn delivery_hints() {
        let req = CaptureRequest::new("https://example.com/", "t");
        assert_eq!(DeliveryHint::for_request(&req), DeliveryHint::Empty);
        let req = req.with_invoke(InvokeKind::FormSelf);
        assert_eq!(
            DeliveryHint::for_request(&req),
            DeliveryHint::Redirect("https://example.com/".into())
        );
        let req = req.with_invoke(InvokeKind::FormBlank);
        assert_eq!(DeliveryHint::for_request(&req), DeliveryHint::ClosePage);
    }
}
