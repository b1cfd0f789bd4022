//! Ingress: admit a capture request into the pipeline.

use crate::capture::{
    CaptureRequest, DeliveryHint, PayloadLocation, PipelineMessage, QueueRef, RequestIdentity,
};
use crate::error::WebclipError;
use crate::store::{MessageQueue, PayloadStore, SendOutcome};
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub identity: RequestIdentity,
    /// How the capture boundary should answer the browser.
    pub hint: DeliveryHint,
    /// The stage the request was routed to.
    pub queue: QueueRef,
    pub outcome: SendOutcome,
}

/// Validates, persists and routes capture requests.
///
/// Exactly one payload write and one enqueue per admitted request. The
/// message carries only the payload location, so queue size limits never
/// apply to page content.
#[derive(Clone)]
pub struct IngressRouter {
    payloads: Arc<dyn PayloadStore>,
    queue: Arc<dyn MessageQueue>,
    namespace: String,
}

impl IngressRouter {
    pub fn new(
        payloads: Arc<dyn PayloadStore>,
        queue: Arc<dyn MessageQueue>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            payloads,
            queue,
            namespace: namespace.into(),
        }
    }

    pub async fn admit(&self, request: CaptureRequest) -> Result<Admission, WebclipError> {
        request.validate()?;

        let identity = request.identity();
        let location = PayloadLocation::new(self.namespace.as_str(), &identity);
        self.payloads.put(&location, &request).await?;

        let (queue, outcome) = self.route(&request, location, &identity).await?;

        info!(
            url = %request.url,
            %identity,
            %queue,
            deduplicated = outcome == SendOutcome::Deduplicated,
            "capture admitted"
        );

        Ok(Admission {
            hint: DeliveryHint::for_request(&request),
            identity,
            queue,
            outcome,
        })
    }

    /// Re-enqueue every payload that was written but never settled.
    ///
    /// Run at startup: queued messages do not survive a restart, payloads
    /// do. Returns the number of payloads sent. A payload that cannot be
    /// read is skipped with a warning.
    pub async fn recover(&self) -> Result<usize, WebclipError> {
        let mut sent = 0;
        for location in self.payloads.unsettled(&self.namespace).await? {
            let request = match self.payloads.get(&location).await {
                Ok(request) => request,
                Err(e) => {
                    warn!(%location, "skipping unreadable payload: {e}");
                    continue;
                }
            };
            let identity = request.identity();
            if location != PayloadLocation::new(self.namespace.as_str(), &identity) {
                warn!(%location, url = %request.url, "payload key does not match its URL; skipping");
                continue;
            }
            let (queue, outcome) = self.route(&request, location, &identity).await?;
            if outcome == SendOutcome::Enqueued {
                sent += 1;
            }
            info!(url = %request.url, %identity, %queue, "unsettled capture re-enqueued");
        }
        if sent > 0 {
            info!(sent, namespace = %self.namespace, "recovered unsettled captures");
        }
        Ok(sent)
    }

    /// Send the payload reference to the stage that handles it next.
    async fn route(
        &self,
        request: &CaptureRequest,
        location: PayloadLocation,
        identity: &RequestIdentity,
    ) -> Result<(QueueRef, SendOutcome), WebclipError> {
        let queue = if request.has_html() {
            QueueRef::Process
        } else {
            QueueRef::Fetch
        };
        let message = PipelineMessage {
            location,
            identity: identity.clone(),
        };
        let key = identity.as_str();
        let outcome = self.queue.send(queue, key, key, &message).await?;
        Ok((queue, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::InvokeKind;
    use crate::store::{MemoryPayloadStore, MemoryQueue};

    fn router() -> (IngressRouter, Arc<MemoryPayloadStore>, Arc<MemoryQueue>) {
        let payloads = Arc::new(MemoryPayloadStore::new());
        let queue = Arc::new(MemoryQueue::default());
        (
            IngressRouter::new(payloads.clone(), queue.clone(), "captures"),
            payloads,
            queue,
        )
    }

    #[tokio::test]
    async fn html_goes_to_processing() {
        let (router, payloads, queue) = router();
        let req = CaptureRequest::new("https://ex.com/a", "A").with_html("<p>a</p>");
        let admission = router.admit(req).await.unwrap();
        assert_eq!(admission.queue, QueueRef::Process);
        assert_eq!(admission.hint, DeliveryHint::Empty);
        assert_eq!(payloads.put_count(), 1);
        assert_eq!(queue.pending_len(QueueRef::Process), 1);
        assert_eq!(queue.pending_len(QueueRef::Fetch), 0);
    }

    #[tokio::test]
    async fn missing_html_goes_to_fetch() {
        let (router, _, queue) = router();
        let req = CaptureRequest::new("https://ex.com/a", "A").with_invoke(InvokeKind::FormSelf);
        let admission = router.admit(req).await.unwrap();
        assert_eq!(admission.queue, QueueRef::Fetch);
        assert_eq!(
            admission.hint,
            DeliveryHint::Redirect("https://ex.com/a".into())
        );
        assert_eq!(queue.pending_len(QueueRef::Fetch), 1);
    }

    #[tokio::test]
    async fn message_references_payload() {
        let (router, payloads, queue) = router();
        let req = CaptureRequest::new("https://ex.com/a", "A").with_html("<p>a</p>");
        router.admit(req.clone()).await.unwrap();
        let delivery = queue.receive(QueueRef::Process).await.unwrap().unwrap();
        assert_eq!(delivery.group_key, req.identity().as_str());
        assert_eq!(payloads.get(&delivery.message.location).await.unwrap(), req);
    }

    #[tokio::test]
    async fn invalid_request_rejected_before_writes() {
        let (router, payloads, queue) = router();
        let err = router
            .admit(CaptureRequest::new("/relative", "x"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(payloads.put_count(), 0);
        assert!(queue.is_idle(QueueRef::Fetch));
    }

    #[tokio::test]
    async fn recover_resends_only_unsettled_payloads() {
        let (router, payloads, _) = router();
        let done = CaptureRequest::new("https://ex.com/done", "D").with_html("<p>d</p>");
        let html = CaptureRequest::new("https://ex.com/a", "A").with_html("<p>a</p>");
        let bare = CaptureRequest::new("https://ex.com/b", "B");
        for req in [&done, &html, &bare] {
            router.admit(req.clone()).await.unwrap();
        }
        let done_location = PayloadLocation::new("captures", &done.identity());
        payloads.mark_settled(&done_location, &done).await.unwrap();

        // A restarted process starts with empty queues.
        let queue = Arc::new(MemoryQueue::default());
        let restarted = IngressRouter::new(payloads.clone(), queue.clone(), "captures");
        assert_eq!(restarted.recover().await.unwrap(), 2);
        assert_eq!(queue.pending_len(QueueRef::Process), 1);
        assert_eq!(queue.pending_len(QueueRef::Fetch), 1);

        let delivery = queue.receive(QueueRef::Process).await.unwrap().unwrap();
        assert_eq!(delivery.message.identity, html.identity());
        assert_eq!(payloads.put_count(), 3);
    }

    #[tokio::test]
    async fn repeat_admission_deduplicated() {
        let (router, payloads, _) = router();
        let req = CaptureRequest::new("https://ex.com/a", "A").with_html("<p>a</p>");
        router.admit(req.clone()).await.unwrap();
        let second = router.admit(req).await.unwrap();
        assert_eq!(second.outcome, SendOutcome::Deduplicated);
        assert_eq!(payloads.put_count(), 2);
    }
}
