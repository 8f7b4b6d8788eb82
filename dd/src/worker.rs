//! Worker pool
//!
//! Independent tasks pulling work items from the shared queue. Workers keep
//! no pipeline state of their own; everything goes through the state actor.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::{ExecutorError, RoundExecutor, StepReport};
use crate::queue::{WorkItem, WorkQueue};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers that run until shutdown or until the queue is
    /// closed and drained
    pub fn spawn(
        count: usize,
        queue: Arc<dyn WorkQueue>,
        executor: Arc<RoundExecutor>,
        max_deliveries: u32,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        debug!(count, max_deliveries, "WorkerPool::spawn: called");
        let handles = (0..count.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: queue.clone(),
                    executor: executor.clone(),
                    max_deliveries,
                };
                tokio::spawn(worker.run(shutdown.clone()))
            })
            .collect();
        info!(workers = count.max(1), "Worker pool started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}

struct Worker {
    id: usize,
    queue: Arc<dyn WorkQueue>,
    executor: Arc<RoundExecutor>,
    max_deliveries: u32,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = self.id, "Worker::run: called");
        loop {
            tokio::select! {
                item = self.queue.dequeue() => match item {
                    Some(item) => self.process(item).await,
                    None => {
                        debug!(worker = self.id, "run: queue closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(worker = self.id, "run: shutdown signal received");
                        break;
                    }
                }
            }
        }
        debug!(worker = self.id, "Worker::run: exiting");
    }

    async fn process(&self, item: WorkItem) {
        match self.executor.handle(&item).await {
            Ok(StepReport { outcome, chain }) => {
                debug!(worker = self.id, round_id = %item.round_id, ?outcome, ?chain, "process: done");
            }
            Err(e) => self.redeliver(item, e).await,
        }
    }

    /// Put a failed item back until it runs out of deliveries
    async fn redeliver(&self, item: WorkItem, err: ExecutorError) {
        if item.attempt + 1 >= self.max_deliveries {
            error!(
                worker = self.id,
                round_id = %item.round_id,
                participant_id = %item.participant_id,
                attempts = item.attempt + 1,
                error = %err,
                "Dropping work item after final delivery"
            );
            return;
        }
        warn!(
            worker = self.id,
            round_id = %item.round_id,
            attempt = item.attempt,
            error = %err,
            "Work item failed; redelivering"
        );
        if let Err(e) = self.queue.enqueue(item.retry()).await {
            error!(worker = self.id, error = %e, "Redelivery failed");
        }
    }
}
