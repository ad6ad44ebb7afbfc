//! Bounded worker pool for summary jobs.
//!
//! `N` workers pull from one bounded FIFO queue of capacity `Q`. Enqueueing
//! never waits: a full queue drops the job and reports it. Each job runs
//! under the executor's per-job timeout, so one slow model call cannot starve
//! the pool. Jobs may finish in any order; the last one to finish for a scope
//! owns the stored summary.
//!
//! Shutdown stops intake, lets running jobs finish within a grace period,
//! and abandons whatever is still queued.

use super::job::{JobExecutor, JobOutcome, SummaryJob};
use crate::config::SchedulerConfig;
use crate::{Combine, ContextError, TokenUsage};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result of a non-blocking enqueue.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Enqueued { job_id: u64 },
    /// [`ContextError::QueueFull`] or [`ContextError::SchedulerClosed`].
    /// Never propagated; the next trigger retries naturally.
    Dropped(ContextError),
    /// No job was created.
    Skipped(SkipReason),
}

impl EnqueueOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. })
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No events since the stored summary.
    NothingToSummarize,
    /// A job for the scope is already in flight and single-flight is on.
    InFlight,
    /// Summaries are disabled or no summarizer is configured.
    Disabled,
}

// ── Stats ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SchedulerStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    abandoned: AtomicU64,
    usage: Mutex<TokenUsage>,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Jobs accepted into the queue.
    pub enqueued: u64,
    /// Jobs refused because the queue was full.
    pub dropped: u64,
    pub succeeded: u64,
    /// Includes jobs whose store or model panicked.
    pub failed: u64,
    pub timed_out: u64,
    /// Queued jobs discarded at shutdown.
    pub abandoned: u64,
    /// Model usage summed over stored summaries.
    pub usage: TokenUsage,
}

impl SchedulerStats {
    fn record(&self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Succeeded(summary) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                if let Some(summary) = summary {
                    let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
                    *usage = usage.combine(summary.usage);
                }
            }
            JobOutcome::Failed(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            JobOutcome::TimedOut(_) => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            usage: *self.usage.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

// ── Scheduler ──────────────────────────────────────────────────────

pub struct SummaryScheduler {
    sender: Mutex<Option<mpsc::Sender<SummaryJob>>>,
    workers: Mutex<Option<JoinSet<()>>>,
    executor: Arc<JobExecutor>,
    stats: Arc<SchedulerStats>,
    closing: Arc<AtomicBool>,
    capacity: usize,
    grace: Duration,
}

impl SummaryScheduler {
    /// Spawn the worker pool on the current tokio runtime.
    pub fn start(config: &SchedulerConfig, executor: Arc<JobExecutor>) -> Self {
        let capacity = config.summary_queue_size.max(1);
        let worker_count = config.async_worker_count.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(AsyncMutex::new(rx));
        let stats = Arc::new(SchedulerStats::default());
        let closing = Arc::new(AtomicBool::new(false));

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&executor),
                Arc::clone(&stats),
                Arc::clone(&closing),
            ));
        }
        info!(
            "Summary scheduler started: {worker_count} workers, queue {capacity}, timeout {:?}",
            executor.timeout()
        );

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(Some(workers)),
            executor,
            stats,
            closing,
            capacity,
            grace: config.shutdown_grace(),
        }
    }

    /// Queue `job` without waiting. A full or closed queue drops it.
    pub fn enqueue(&self, job: SummaryJob) -> EnqueueOutcome {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = sender.as_ref().filter(|_| !self.closing.load(Ordering::SeqCst)) else {
            self.executor.release(job);
            return EnqueueOutcome::Dropped(ContextError::SchedulerClosed);
        };

        let job_id = job.id;
        match tx.try_send(job) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                debug!("Enqueued summary job {job_id}");
                EnqueueOutcome::Enqueued { job_id }
            }
            Err(TrySendError::Full(job)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                let err = ContextError::QueueFull {
                    key: job.scope.to_string(),
                };
                warn!("{err} (capacity {})", self.capacity);
                self.executor.release(job);
                EnqueueOutcome::Dropped(err)
            }
            Err(TrySendError::Closed(job)) => {
                self.executor.release(job);
                EnqueueOutcome::Dropped(ContextError::SchedulerClosed)
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Stop intake, wait up to the grace period for running jobs, then abort
    /// the rest. Idempotent.
    pub async fn shutdown(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender lets workers drain the queue and exit.
        drop(self.sender.lock().unwrap_or_else(|e| e.into_inner()).take());
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(mut workers) = workers else {
            return;
        };

        let drained = tokio::time::timeout(self.grace, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    error!("Summary worker crashed: {e}");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Summary workers still busy after {:?}; abandoning {} running jobs",
                self.grace,
                workers.len()
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
        let stats = self.stats.snapshot();
        info!(
            "Summary scheduler stopped: {} succeeded, {} failed, {} timed out, {} dropped, {} abandoned",
            stats.succeeded, stats.failed, stats.timed_out, stats.dropped, stats.abandoned
        );
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<SummaryJob>>>,
    executor: Arc<JobExecutor>,
    stats: Arc<SchedulerStats>,
    closing: Arc<AtomicBool>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else { break };

        if closing.load(Ordering::SeqCst) {
            stats.abandoned.fetch_add(1, Ordering::Relaxed);
            executor.release(job);
            continue;
        }

        let outcome = executor.run(job).await;
        stats.record(&outcome);
    }
    debug!("Summary worker {worker_id} stopped");
}
