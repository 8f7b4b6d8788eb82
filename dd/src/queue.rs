//! Work queue between the dispatcher, the executor and the worker pool
//!
//! One [`WorkItem`] asks for one participant's statement in one round.
//! Delivery is at-least-once: the executor tolerates duplicates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::domain::{Round, SessionParticipant};

/// A request for one participant to speak in one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub round_id: String,
    pub session_id: String,
    pub participant_id: String,
    pub round_number: u32,
    pub speaking_order: u32,
    /// 0 on first delivery
    pub attempt: u32,
}

impl WorkItem {
    /// First-attempt item for a seat in a round
    pub fn for_seat(round: &Round, seat: &SessionParticipant) -> Self {
        Self {
            round_id: round.id.clone(),
            session_id: round.session_id.clone(),
            participant_id: seat.participant_id.clone(),
            round_number: round.round_number,
            speaking_order: seat.speaking_order,
            attempt: 0,
        }
    }

    /// First-attempt item for the next seat of the same round
    pub fn next_seat(&self, seat: &SessionParticipant) -> Self {
        Self {
            round_id: self.round_id.clone(),
            session_id: self.session_id.clone(),
            participant_id: seat.participant_id.clone(),
            round_number: self.round_number,
            speaking_order: seat.speaking_order,
            attempt: 0,
        }
    }

    /// The same item with its attempt counter bumped
    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue closed")]
    Closed,
}

/// Queue contract the pipeline runs on
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError>;

    /// Enqueue after `delay` without blocking the caller
    async fn enqueue_after(&self, item: WorkItem, delay: Duration) -> Result<(), QueueError>;

    /// Next item; `None` once the queue is closed and drained
    async fn dequeue(&self) -> Option<WorkItem>;

    /// How many new chains can still be started without exceeding the
    /// queue's soft capacity
    fn remaining(&self) -> usize;
}

/// Counters for the CLI and tests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub delayed: u64,
    pub dequeued: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    delayed: AtomicU64,
    dequeued: AtomicU64,
}

/// In-process queue over an unbounded tokio mpsc channel
///
/// Any number of workers share the receiver behind a mutex. Workers are the
/// only readers and also push follow-on items, so `enqueue` must never wait
/// for room. `capacity` is a soft limit the dispatcher checks through
/// [`WorkQueue::remaining`] before starting new chains.
#[derive(Clone)]
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "ChannelQueue::new: called");
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            counters: Arc::new(Counters::default()),
            capacity: capacity.max(1),
        }
    }

    /// Items enqueued and not yet taken
    pub fn depth(&self) -> usize {
        let enqueued = self.counters.enqueued.load(Ordering::SeqCst);
        let dequeued = self.counters.dequeued.load(Ordering::SeqCst);
        enqueued.saturating_sub(dequeued) as usize
    }

    /// Take an item if one is ready, without waiting
    pub async fn try_dequeue(&self) -> Option<WorkItem> {
        let item = self.rx.lock().await.try_recv().ok();
        if item.is_some() {
            self.counters.dequeued.fetch_add(1, Ordering::SeqCst);
        }
        item
    }

    /// Stop accepting new items; workers drain what is queued and exit
    pub async fn close(&self) {
        debug!("ChannelQueue::close: called");
        self.rx.lock().await.close();
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::SeqCst),
            delayed: self.counters.delayed.load(Ordering::SeqCst),
            dequeued: self.counters.dequeued.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl WorkQueue for ChannelQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        debug!(
            round_id = %item.round_id,
            participant_id = %item.participant_id,
            attempt = item.attempt,
            "enqueue: called"
        );
        self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item).is_err() {
            self.counters.enqueued.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    async fn enqueue_after(&self, item: WorkItem, delay: Duration) -> Result<(), QueueError> {
        debug!(round_id = %item.round_id, participant_id = %item.participant_id, ?delay, "enqueue_after: called");
        if self.tx.is_closed() {
            return Err(QueueError::Closed);
        }
        self.counters.delayed.fetch_add(1, Ordering::SeqCst);
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let round_id = item.round_id.clone();
            if queue.enqueue(item).await.is_err() {
                warn!(%round_id, "enqueue_after: queue closed before delayed item landed");
            }
        });
        Ok(())
    }

    async fn dequeue(&self) -> Option<WorkItem> {
        let item = self.rx.lock().await.recv().await;
        if item.is_some() {
            self.counters.dequeued.fetch_add(1, Ordering::SeqCst);
        }
        item
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.depth())
    }
}
