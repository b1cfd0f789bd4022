//! HTTP capture boundary.
//!
//! The bookmarklet reaches us in whichever way the page it runs on allows:
//! a `fetch` POST (JSON or form), a form submission into a new tab or the
//! same tab, or a `window.open` GET with the fields in the query string.
//! Every shape lands on [`IngressRouter::admit`]; only the acknowledgement
//! differs.
//!
//! | Invoke | Response |
//! |---|---|
//! | `fetch` | empty `200` |
//! | `form-blank`, `window-open` | HTML page that closes its own window |
//! | `form-self` | `303` back to the captured URL |
//!
//! Responses carry permissive CORS headers since captures originate on
//! arbitrary sites.

use crate::capture::{CaptureForm, CaptureRequest, DeliveryHint};
use crate::error::WebclipError;
use crate::pipeline::IngressRouter;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Largest accepted request body. Full-page HTML can be large.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Page returned to `form-blank` and `window-open` captures.
pub const CLOSE_PAGE: &str = "<!doctype html><html><head><meta charset=\"utf-8\">\
<title>Saved</title></head><body><p>Saved.</p>\
<script>window.close()</script></body></html>";

/// Build the capture router.
pub fn router(ingress: IngressRouter) -> Router {
    Router::new()
        .route("/", get(capture_query).post(capture_body))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ingress)
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// A [`WebclipError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(WebclipError);

impl From<WebclipError> for ApiError {
    fn from(e: WebclipError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            error!("capture failed: {}", self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn bad_body(e: impl std::fmt::Display) -> ApiError {
    ApiError(WebclipError::validation("body", e.to_string()))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn capture_query(
    State(ingress): State<IngressRouter>,
    Query(form): Query<CaptureForm>,
) -> Result<Response, ApiError> {
    admit(&ingress, form).await
}

async fn capture_body(
    State(ingress): State<IngressRouter>,
    request: Request,
) -> Result<Response, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let form = if content_type.starts_with("application/json") {
        let Json(form) = Json::<CaptureForm>::from_request(request, &())
            .await
            .map_err(bad_body)?;
        form
    } else if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(bad_body)?;
        read_multipart(multipart).await?
    } else {
        let Form(form) = Form::<CaptureForm>::from_request(request, &())
            .await
            .map_err(bad_body)?;
        form
    };

    admit(&ingress, form).await
}

async fn read_multipart(mut multipart: Multipart) -> Result<CaptureForm, ApiError> {
    let mut form = CaptureForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_body)? {
        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await.map_err(bad_body)?;
        match name.as_str() {
            "url" => form.url = Some(value),
            "title" => form.title = Some(value),
            "html" => form.html = Some(value),
            "mode" => form.mode = Some(value),
            "invoke" => form.invoke = Some(value),
            _ => {}
        }
    }
    Ok(form)
}

async fn admit(ingress: &IngressRouter, form: CaptureForm) -> Result<Response, ApiError> {
    let request = CaptureRequest::from_form(form)?;
    let admission = ingress.admit(request).await?;
    Ok(acknowledge(admission.hint))
}

fn acknowledge(hint: DeliveryHint) -> Response {
    match hint {
        DeliveryHint::Empty => StatusCode::OK.into_response(),
        DeliveryHint::ClosePage => Html(CLOSE_PAGE).into_response(),
        DeliveryHint::Redirect(url) => Redirect::to(&url).into_response(),
    }
}
