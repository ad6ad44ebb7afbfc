//! Error taxonomy for context management.
//!
//! No error from this crate is meant to abort an agent turn: callers degrade
//! to raw or tailored history. Queue-full drops are never propagated; they
//! come back inside [`EnqueueOutcome::Dropped`](crate::summary::scheduler::EnqueueOutcome)
//! and the service only logs them.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    /// Invalid `[start, end)` passed to range token counting.
    #[error("invalid message range [{start}, {end}) for {len} messages")]
    Range { start: usize, end: usize, len: usize },

    /// The job queue was full; the job was dropped.
    #[error("summary queue full, dropped job for {key}")]
    QueueFull { key: String },

    /// The scheduler is shutting down and accepts no more jobs.
    #[error("summary scheduler is closed")]
    SchedulerClosed,

    /// A summary job exceeded its deadline and was cancelled.
    #[error("summary job timed out after {timeout:?}")]
    JobTimeout { timeout: Duration },

    /// The summarization model call failed.
    #[error("summary job failed: {0}")]
    JobExecution(String),

    /// Summarization was requested but no summarizer is configured.
    #[error("no summarizer configured")]
    SummarizerNotConfigured,

    /// The prompt template is missing a required placeholder.
    #[error("invalid prompt template: {0}")]
    InvalidTemplate(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The persistence collaborator rejected a load or store.
    #[error("summary store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ContextError>;
