//! Periodic jobs
//!
//! The scheduler and the dispatcher are both [`Job`]s: a single `run(now)`
//! cycle that a [`JobRunner`] repeats on a fixed interval until shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::Result;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Outcome of one job cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job: &'static str,
    /// Records created or moved this cycle
    pub changed: usize,
    pub summary: String,
}

impl JobReport {
    pub fn new(job: &'static str, changed: usize, summary: impl Into<String>) -> Self {
        Self {
            job,
            changed,
            summary: summary.into(),
        }
    }
}

/// One cycle of periodic work
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport>;
}

/// Drives a job on a fixed interval
pub struct JobRunner {
    job: Arc<dyn Job>,
    interval: Duration,
}

impl JobRunner {
    pub fn new(job: Arc<dyn Job>, interval: Duration) -> Self {
        debug!(job = job.name(), ?interval, "JobRunner::new: called");
        Self { job, interval }
    }

    /// Run the first cycle immediately, then once per interval, until the
    /// shutdown flag flips to `true` or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.job.name();
        debug!(job = name, "run: called");
        info!(job = name, interval = ?self.interval, "Job runner starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.job.run(Utc::now()).await {
                        Ok(report) => {
                            if report.changed > 0 {
                                info!(
                                    job = name,
                                    changed = report.changed,
                                    summary = %report.summary,
                                    "Job cycle complete"
                                );
                            } else {
                                debug!(job = name, summary = %report.summary, "run: idle cycle");
                            }
                        }
                        // A failed cycle is retried on the next tick
                        Err(e) => error!(job = name, error = %e, "Job cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(job = name, "run: shutdown signal received");
                        break;
                    }
                }
            }
        }

        info!(job = name, "Job runner stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
