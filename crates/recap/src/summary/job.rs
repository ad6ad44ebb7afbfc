//! Summary jobs and their execution.
//!
//! A [`SummaryJob`] names only the scope to summarize. The previously stored
//! summary and the events appended since it are read when the job runs, so
//! enqueueing never touches the store. [`JobExecutor`] runs a job the same
//! way whether it came from the worker pool or from a forced, synchronous
//! request, so both paths produce the same summary for the same input.
//!
//! ```text
//! Enqueued ──▶ Running ──┬──▶ Succeeded
//!                        ├──▶ Failed
//!                        └──▶ TimedOut
//! ```

use super::counters::TriggerCounters;
use super::model::Summarizer;
use super::prompt::PromptTemplate;
use super::store::{SessionSummary, SummaryStore};
use crate::session::{SessionLog, SummaryScope};
use crate::{ContextError, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Enqueued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// Terminal result of a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// `None` when there was nothing to summarize.
    Succeeded(Option<SessionSummary>),
    Failed(String),
    TimedOut(Duration),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            Self::Succeeded(_) => JobState::Succeeded,
            Self::Failed(_) => JobState::Failed,
            Self::TimedOut(_) => JobState::TimedOut,
        }
    }

    pub fn into_result(self) -> Result<Option<SessionSummary>> {
        match self {
            Self::Succeeded(summary) => Ok(summary),
            Self::Failed(e) => Err(ContextError::JobExecution(e)),
            Self::TimedOut(timeout) => Err(ContextError::JobTimeout { timeout }),
        }
    }
}

fn next_job_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// One unit of summarization work. Consumed exactly once.
#[derive(Debug)]
pub struct SummaryJob {
    /// Process-wide unique, increasing.
    pub id: u64,
    /// Session and filter key to summarize.
    pub scope: SummaryScope,
    pub enqueued_at: DateTime<Utc>,
    state: JobState,
    /// Set when the job was counted in the scope's in-flight total.
    tracked: bool,
    completion: Option<oneshot::Sender<JobOutcome>>,
}

impl SummaryJob {
    pub fn new(scope: SummaryScope) -> Self {
        Self {
            id: next_job_id(),
            scope,
            enqueued_at: Utc::now(),
            state: JobState::Enqueued,
            tracked: false,
            completion: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Receive the job's outcome once it reaches a terminal state. A job
    /// abandoned at shutdown drops the sender instead.
    pub fn subscribe(&mut self) -> oneshot::Receiver<JobOutcome> {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        rx
    }

    pub(crate) fn mark_tracked(&mut self) {
        self.tracked = true;
    }

    pub(crate) fn is_tracked(&self) -> bool {
        self.tracked
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// ── Executor ───────────────────────────────────────────────────────

/// Runs summary jobs: load the previous summary, collect new events, call
/// the model under a deadline, store, reset the scope's counters.
pub struct JobExecutor {
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn SummaryStore>,
    sessions: Arc<SessionLog>,
    counters: Arc<TriggerCounters>,
    template: PromptTemplate,
    timeout: Duration,
}

impl JobExecutor {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        store: Arc<dyn SummaryStore>,
        sessions: Arc<SessionLog>,
        counters: Arc<TriggerCounters>,
        template: PromptTemplate,
        timeout: Duration,
    ) -> Self {
        Self {
            summarizer,
            store,
            sessions,
            counters,
            template,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `job` to completion and deliver its outcome. A panic in the
    /// store or the model fails the job; counters are released either way.
    pub async fn run(&self, mut job: SummaryJob) -> JobOutcome {
        job.state = JobState::Running;
        debug!(
            "Summary job {} running for {} (queued {}ms)",
            job.id,
            job.scope,
            (Utc::now() - job.enqueued_at).num_milliseconds()
        );

        let outcome = match AssertUnwindSafe(self.execute(&job)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(&*panic);
                error!("Summary job {} for {} panicked: {message}", job.id, job.scope);
                JobOutcome::Failed(format!("summary job panicked: {message}"))
            }
        };
        self.finish(&mut job, &outcome);
        outcome
    }

    /// Discard a job that will never run. Counters are left alone so the
    /// next event can trigger again; subscribers see the sender dropped.
    pub fn release(&self, job: SummaryJob) {
        debug!("Summary job {} for {} released without running", job.id, job.scope);
        if job.tracked {
            self.counters.end_job(&job.scope);
        }
    }

    async fn execute(&self, job: &SummaryJob) -> JobOutcome {
        let scope = &job.scope;
        let deadline = Instant::now() + self.timeout;

        let previous = match timeout_at(deadline, self.store.load(&scope.session, &scope.filter_key)).await {
            Err(_) => return JobOutcome::TimedOut(self.timeout),
            Ok(Err(e)) => return JobOutcome::Failed(format!("loading previous summary: {e}")),
            Ok(Ok(previous)) => previous,
        };
        let events = self.sessions.events_after(
            &scope.session,
            &scope.filter_key,
            previous.as_ref().map(|s| s.covered_until),
        );
        let Some(boundary) = events.last().map(|e| e.id) else {
            return JobOutcome::Succeeded(None);
        };
        debug!("Summary job {} summarizing {} events for {scope}", job.id, events.len());

        let prompt = self
            .template
            .render(previous.as_ref().map(|s| s.text.as_str()), &events);
        let output = match timeout_at(deadline, self.summarizer.summarize(&prompt)).await {
            Err(_) => return JobOutcome::TimedOut(self.timeout),
            Ok(Err(e)) => return JobOutcome::Failed(e),
            Ok(Ok(output)) => output,
        };

        let text = output.text.trim();
        if text.is_empty() {
            return JobOutcome::Failed(format!("{} returned an empty summary", self.summarizer.name()));
        }

        let summary = SessionSummary {
            text: text.to_string(),
            covered_until: boundary,
            generated_at: Utc::now(),
            usage: output.usage,
        };
        if let Err(e) = self
            .store
            .store(&scope.session, &scope.filter_key, summary.clone())
            .await
        {
            return JobOutcome::Failed(e.to_string());
        }
        JobOutcome::Succeeded(Some(summary))
    }

    fn finish(&self, job: &mut SummaryJob, outcome: &JobOutcome) {
        job.state = outcome.state();
        match outcome {
            JobOutcome::Succeeded(Some(summary)) => info!(
                "Summary job {} stored summary for {} through event {} ({} tokens)",
                job.id,
                job.scope,
                summary.covered_until,
                summary.usage.total()
            ),
            JobOutcome::Succeeded(None) => debug!("Summary job {} had nothing to summarize", job.id),
            JobOutcome::Failed(e) => warn!("Summary job {} for {} failed: {e}", job.id, job.scope),
            JobOutcome::TimedOut(t) => {
                warn!("Summary job {} for {} timed out after {t:?}", job.id, job.scope)
            }
        }

        // Reset on every terminal state so a failing model does not re-trigger
        // on the very next event.
        self.counters.reset(&job.scope, Utc::now());
        if job.tracked {
            self.counters.end_job(&job.scope);
        }
        if let Some(tx) = job.completion.take() {
            let _ = tx.send(outcome.clone());
        }
    }
}
