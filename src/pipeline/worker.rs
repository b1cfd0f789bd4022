//! Queue consumer: the host loop that drives a stage.
//!
//! A [`Worker`] pulls messages from one queue and hands each to a
//! [`StageHandler`] on its own task, with at most `concurrency` tasks in
//! flight. Success acks the message; an error (or a panic in the handler)
//! nacks it, so the queue decides between redelivery and dead-lettering.
//!
//! Per-identity ordering is the queue's job: it never hands out two
//! messages of the same group at once, so the worker can run unrelated
//! identities in parallel without coordinating.

use super::{FetchStage, ProcessingStage};
use crate::capture::{PipelineMessage, QueueRef};
use crate::error::WebclipError;
use crate::store::{Delivery, MessageQueue};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// A stage as seen by the worker.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(&self, message: &PipelineMessage) -> Result<(), WebclipError>;
}

#[async_trait]
impl StageHandler for FetchStage {
    async fn handle(&self, message: &PipelineMessage) -> Result<(), WebclipError> {
        self.run(message).await.map(|_| ())
    }
}

#[async_trait]
impl StageHandler for ProcessingStage {
    async fn handle(&self, message: &PipelineMessage) -> Result<(), WebclipError> {
        self.run(message).await.map(|_| ())
    }
}

type Settled = (Delivery, Result<(), WebclipError>);

pub struct Worker {
    queue_ref: QueueRef,
    queue: Arc<dyn MessageQueue>,
    handler: Arc<dyn StageHandler>,
    concurrency: usize,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        queue_ref: QueueRef,
        queue: Arc<dyn MessageQueue>,
        handler: Arc<dyn StageHandler>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue_ref,
            queue,
            handler,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Receive messages until the concurrency cap is reached or the queue
    /// has nothing deliverable.
    async fn fill(&self, tasks: &mut JoinSet<Settled>) -> Result<(), WebclipError> {
        while tasks.len() < self.concurrency {
            let Some(delivery) = self.queue.receive(self.queue_ref).await? else {
                break;
            };
            debug!(
                queue = %self.queue_ref,
                identity = %delivery.message.identity,
                attempt = delivery.receive_count,
                "message received"
            );
            let handler = Arc::clone(&self.handler);
            tasks.spawn(async move {
                let result = AssertUnwindSafe(handler.handle(&delivery.message))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(WebclipError::Internal("stage handler panicked".into()))
                    });
                (delivery, result)
            });
        }
        Ok(())
    }

    async fn settle(&self, joined: Result<Settled, JoinError>) -> Result<(), WebclipError> {
        let (delivery, result) =
            joined.map_err(|e| WebclipError::Internal(format!("worker task failed: {e}")))?;
        match result {
            Ok(()) => self.queue.ack(self.queue_ref, &delivery).await,
            Err(e) => {
                warn!(
                    queue = %self.queue_ref,
                    identity = %delivery.message.identity,
                    attempt = delivery.receive_count,
                    "stage failed: {e}"
                );
                self.queue.nack(self.queue_ref, &delivery).await
            }
        }
    }

    /// Handle every currently deliverable message, returning how many
    /// deliveries were settled. Messages waiting out a redelivery delay are
    /// left in the queue.
    pub async fn drain(&self) -> Result<usize, WebclipError> {
        let mut tasks = JoinSet::new();
        let mut handled = 0;
        loop {
            self.fill(&mut tasks).await?;
            let Some(joined) = tasks.join_next().await else {
                break;
            };
            self.settle(joined).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Consume the queue until `shutdown` flips to `true` (or its sender is
    /// dropped), then wait for in-flight messages to settle.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WebclipError> {
        info!(queue = %self.queue_ref, concurrency = self.concurrency, "worker started");
        let mut tasks = JoinSet::new();

        while !*shutdown.borrow() {
            if let Err(e) = self.fill(&mut tasks).await {
                error!(queue = %self.queue_ref, "receive failed: {e}");
            }
            tokio::select! {
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = self.settle(joined).await {
                        error!(queue = %self.queue_ref, "settle failed: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = self.settle(joined).await {
                error!(queue = %self.queue_ref, "settle failed: {e}");
            }
        }
        info!(queue = %self.queue_ref, "worker stopped");
        Ok(())
    }
}
