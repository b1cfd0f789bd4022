//! In-process FIFO queue with message groups and send deduplication.
//!
//! Mirrors the delivery contract of a hosted FIFO queue:
//!
//! - messages of one group are delivered in order, one at a time;
//! - a send whose dedup key was seen within the window is dropped;
//! - a failed message comes back after a delay, and is dead-lettered once
//!   it has been received `max_receive_count` times.
//!
//! Dead letters are kept for inspection up to `max_dead_letters` per queue;
//! past that the oldest is dropped.

use super::{Delivery, MessageQueue, SendOutcome};
use crate::capture::{PipelineMessage, QueueRef};
use crate::config::PipelineConfig;
use crate::error::WebclipError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Dead letters retained per queue by default.
pub const MAX_DEAD_LETTERS: usize = 1000;

/// Delivery parameters of a [`MemoryQueue`].
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub dedup_window: Duration,
    pub max_receive_count: u32,
    pub redelivery_delay: Duration,
    pub max_dead_letters: usize,
}

impl From<&PipelineConfig> for QueueSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            dedup_window: config.dedup_window(),
            max_receive_count: config.max_receive_count,
            redelivery_delay: config.redelivery_delay(),
            max_dead_letters: MAX_DEAD_LETTERS,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    message: PipelineMessage,
    group_key: String,
    receive_count: u32,
    visible_at: Instant,
    receipt: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Entry>,
    in_flight: HashMap<String, Entry>,
    dedup: HashMap<String, Instant>,
    dead_letters: VecDeque<PipelineMessage>,
}

/// [`MessageQueue`] held in memory, one independent queue per [`QueueRef`].
#[derive(Debug)]
pub struct MemoryQueue {
    settings: QueueSettings,
    next_receipt: AtomicU64,
    queues: Mutex<HashMap<QueueRef, QueueState>>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

impl MemoryQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            next_receipt: AtomicU64::new(1),
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn lock(
        &self,
        queue: QueueRef,
    ) -> Result<MutexGuard<'_, HashMap<QueueRef, QueueState>>, WebclipError> {
        self.queues.lock().map_err(|e| WebclipError::Queue {
            queue: queue.name().to_string(),
            detail: e.to_string(),
        })
    }

    fn inspect<T>(&self, queue: QueueRef, f: impl FnOnce(&QueueState) -> T) -> T
    where
        T: Default,
    {
        match self.queues.lock() {
            Ok(queues) => queues.get(&queue).map(f).unwrap_or_default(),
            Err(_) => T::default(),
        }
    }

    /// Messages waiting to be received (visible or not).
    pub fn pending_len(&self, queue: QueueRef) -> usize {
        self.inspect(queue, |q| q.pending.len())
    }

    /// Messages received and not yet settled.
    pub fn in_flight_len(&self, queue: QueueRef) -> usize {
        self.inspect(queue, |q| q.in_flight.len())
    }

    /// Messages that exhausted their receive count, oldest first.
    pub fn dead_letters(&self, queue: QueueRef) -> Vec<PipelineMessage> {
        self.inspect(queue, |q| q.dead_letters.iter().cloned().collect())
    }

    /// Nothing pending and nothing in flight.
    pub fn is_idle(&self, queue: QueueRef) -> bool {
        self.pending_len(queue) == 0 && self.in_flight_len(queue) == 0
    }
}

fn unknown_receipt(queue: QueueRef, delivery: &Delivery) -> WebclipError {
    WebclipError::Queue {
        queue: queue.name().to_string(),
        detail: format!(
            "no in-flight message for group '{}' with receipt {}",
            delivery.group_key, delivery.receipt
        ),
    }
}

/// Remove the in-flight entry matching `delivery`'s receipt.
fn take_in_flight(state: &mut QueueState, delivery: &Delivery) -> Option<Entry> {
    let held = state
        .in_flight
        .get(&delivery.group_key)
        .is_some_and(|entry| entry.receipt == delivery.receipt);
    if held {
        state.in_flight.remove(&delivery.group_key)
    } else {
        None
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(
        &self,
        queue: QueueRef,
        group_key: &str,
        dedup_key: &str,
        message: &PipelineMessage,
    ) -> Result<SendOutcome, WebclipError> {
        let now = Instant::now();
        let window = self.settings.dedup_window;
        let mut queues = self.lock(queue)?;
        let state = queues.entry(queue).or_default();

        if !window.is_zero() {
            state
                .dedup
                .retain(|_, seen| now.saturating_duration_since(*seen) < window);
            if state.dedup.contains_key(dedup_key) {
                debug!(%queue, dedup_key, "duplicate send dropped");
                return Ok(SendOutcome::Deduplicated);
            }
            state.dedup.insert(dedup_key.to_string(), now);
        }

        state.pending.push_back(Entry {
            message: message.clone(),
            group_key: group_key.to_string(),
            receive_count: 0,
            visible_at: now,
            receipt: 0,
        });
        debug!(%queue, group_key, "message enqueued");
        Ok(SendOutcome::Enqueued)
    }

    async fn receive(&self, queue: QueueRef) -> Result<Option<Delivery>, WebclipError> {
        let now = Instant::now();
        let mut queues = self.lock(queue)?;
        let Some(state) = queues.get_mut(&queue) else {
            return Ok(None);
        };

        // A group whose head is not yet visible blocks its later messages.
        let mut blocked: HashSet<&str> = HashSet::new();
        let mut chosen = None;
        for (idx, entry) in state.pending.iter().enumerate() {
            let group = entry.group_key.as_str();
            if state.in_flight.contains_key(group) || blocked.contains(group) {
                continue;
            }
            if entry.visible_at > now {
                blocked.insert(group);
                continue;
            }
            chosen = Some(idx);
            break;
        }

        let Some(idx) = chosen else {
            return Ok(None);
        };
        let Some(mut entry) = state.pending.remove(idx) else {
            return Ok(None);
        };
        entry.receive_count += 1;
        entry.receipt = self.next_receipt.fetch_add(1, Ordering::Relaxed);

        let delivery = Delivery {
            message: entry.message.clone(),
            group_key: entry.group_key.clone(),
            receive_count: entry.receive_count,
            receipt: entry.receipt,
        };
        state.in_flight.insert(entry.group_key.clone(), entry);
        Ok(Some(delivery))
    }

    async fn ack(&self, queue: QueueRef, delivery: &Delivery) -> Result<(), WebclipError> {
        let mut queues = self.lock(queue)?;
        let state = queues.entry(queue).or_default();
        take_in_flight(state, delivery).ok_or_else(|| unknown_receipt(queue, delivery))?;
        Ok(())
    }

    async fn nack(&self, queue: QueueRef, delivery: &Delivery) -> Result<(), WebclipError> {
        let mut queues = self.lock(queue)?;
        let state = queues.entry(queue).or_default();
        let mut entry =
            take_in_flight(state, delivery).ok_or_else(|| unknown_receipt(queue, delivery))?;

        if entry.receive_count >= self.settings.max_receive_count {
            error!(
                %queue,
                identity = %entry.message.identity,
                receives = entry.receive_count,
                "message dead-lettered"
            );
            if state.dead_letters.len() >= self.settings.max_dead_letters {
                if let Some(dropped) = state.dead_letters.pop_front() {
                    warn!(%queue, identity = %dropped.identity, "oldest dead letter dropped");
                }
            }
            if self.settings.max_dead_letters > 0 {
                state.dead_letters.push_back(entry.message);
            }
            return Ok(());
        }

        warn!(
            %queue,
            identity = %entry.message.identity,
            receives = entry.receive_count,
            "message will be redelivered"
        );
        entry.visible_at = Instant::now() + self.settings.redelivery_delay;
        state.pending.push_front(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PayloadLocation, RequestIdentity};

    fn message(url: &str) -> PipelineMessage {
        let identity = RequestIdentity::from_url(url);
        PipelineMessage {
            location: PayloadLocation::new("captures", &identity),
            identity,
        }
    }

    fn settings(dedup_secs: u64, max_receive_count: u32) -> QueueSettings {
        QueueSettings {
            dedup_window: Duration::from_secs(dedup_secs),
            max_receive_count,
            redelivery_delay: Duration::ZERO,
            max_dead_letters: MAX_DEAD_LETTERS,
        }
    }

    async fn send(q: &MemoryQueue, group: &str, dedup: &str, url: &str) -> SendOutcome {
        q.send(QueueRef::Process, group, dedup, &message(url))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn dedup_within_window() {
        let q = MemoryQueue::new(settings(300, 3));
        assert_eq!(send(&q, "g", "k", "https://a/").await, SendOutcome::Enqueued);
        assert_eq!(send(&q, "g", "k", "https://a/").await, SendOutcome::Deduplicated);
        assert_eq!(send(&q, "g", "other", "https://a/").await, SendOutcome::Enqueued);
        assert_eq!(q.pending_len(QueueRef::Process), 2);
    }

    #[tokio::test]
    async fn zero_window_disables_dedup() {
        let q = MemoryQueue::new(settings(0, 3));
        assert_eq!(send(&q, "g", "k", "https://a/").await, SendOutcome::Enqueued);
        assert_eq!(send(&q, "g", "k", "https://a/").await, SendOutcome::Enqueued);
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let q = MemoryQueue::new(settings(300, 3));
        q.send(QueueRef::Fetch, "g", "k", &message("https://a/"))
            .await
            .unwrap();
        assert_eq!(send(&q, "g", "k", "https://a/").await, SendOutcome::Enqueued);
        assert!(q.receive(QueueRef::Fetch).await.unwrap().is_some());
        assert!(q.receive(QueueRef::Process).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn one_in_flight_per_group() {
        let q = MemoryQueue::new(settings(0, 3));
        send(&q, "a", "1", "https://a/1").await;
        send(&q, "a", "2", "https://a/2").await;
        send(&q, "b", "3", "https://b/3").await;

        let first = q.receive(QueueRef::Process).await.unwrap().unwrap();
        assert_eq!(first.group_key, "a");
        let second = q.receive(QueueRef::Process).await.unwrap().unwrap();
        assert_eq!(second.group_key, "b", "group a is busy");
        assert!(q.receive(QueueRef::Process).await.unwrap().is_none());

        q.ack(QueueRef::Process, &first).await.unwrap();
        let third = q.receive(QueueRef::Process).await.unwrap().unwrap();
        assert_eq!(third.message, message("https://a/2"));
    }

    #[tokio::test]
    async fn nack_redelivers_in_order() {
        let q = MemoryQueue::new(settings(0, 3));
        send(&q, "a", "1", "https://a/1").await;
        send(&q, "a", "2", "https://a/2").await;

        let d = q.receive(QueueRef::Process).await.unwrap().unwrap();
        q.nack(QueueRef::Process, &d).await.unwrap();
        let again = q.receive(QueueRef::Process).await.unwrap().unwrap();
        assert_eq!(again.message, message("https://a/1"));
        assert_eq!(again.receive_count, 2);
    }

    #[tokio::test]
    async fn redelivery_delay_hides_group() {
        let q = MemoryQueue::new(QueueSettings {
            redelivery_delay: Duration::from_secs(60),
            ..settings(0, 3)
        });
        send(&q, "a", "1", "https://a/1").await;
        send(&q, "a", "2", "https://a/2").await;
        send(&q, "b", "3", "https://b/3").await;

        let d = q.receive(QueueRef::Process).await.unwrap().unwrap();
        q.nack(QueueRef::Process, &d).await.unwrap();
        let next = q.receive(QueueRef::Process).await.unwrap().unwrap();
        assert_eq!(next.group_key, "b", "group a waits behind its delayed head");
        assert!(q.receive(QueueRef::Process).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dead_letter_after_max_receives() {
        let q = MemoryQueue::new(settings(0, 2));
        send(&q, "a", "1", "https://a/1").await;
        for _ in 0..2 {
            let d = q.receive(QueueRef::Process).await.unwrap().unwrap();
            q.nack(QueueRef::Process, &d).await.unwrap();
        }
        assert!(q.is_idle(QueueRef::Process));
        assert_eq!(q.dead_letters(QueueRef::Process), vec![message("https://a/1")]);
    }

    #[tokio::test]
    async fn dead_letters_keep_only_the_newest() {
        let q = MemoryQueue::new(QueueSettings {
            max_dead_letters: 2,
            ..settings(0, 1)
        });
        for n in 0..5 {
            let url = format!("https://a/{n}");
            send(&q, &format!("g{n}"), &n.to_string(), &url).await;
            let d = q.receive(QueueRef::Process).await.unwrap().unwrap();
            q.nack(QueueRef::Process, &d).await.unwrap();
        }
        assert_eq!(
            q.dead_letters(QueueRef::Process),
            vec![message("https://a/3"), message("https://a/4")]
        );
        assert!(q.is_idle(QueueRef::Process));
    }

    #[tokio::test]
    async fn stale_receipt_rejected() {
        let q = MemoryQueue::new(settings(0, 3));
        send(&q, "a", "1", "https://a/1").await;
        let d = q.receive(QueueRef::Process).await.unwrap().unwrap();
        q.ack(QueueRef::Process, &d).await.unwrap();
        assert!(q.ack(QueueRef::Process, &d).await.is_err());
    }
}
