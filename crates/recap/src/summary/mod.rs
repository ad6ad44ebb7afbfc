//! Trigger-driven, asynchronous session summaries.
//!
//! ```text
//! append_event ──▶ TriggerCounters ──▶ Checker ──(fires)──▶ SummaryScheduler
//!                                                              │ N workers
//!                                                              ▼
//!                              SummaryStore ◀── JobExecutor ◀── bounded queue
//!                                                  │
//!                                                  └──▶ Summarizer (model)
//! ```
//!
//! - [`trigger`]: O(1) predicates over per-branch counters.
//! - [`counters`]: sharded counter map shared by the request path and workers.
//! - [`job`]: one summarization unit and the executor shared by the forced
//!   and background paths.
//! - [`scheduler`]: the bounded worker pool.
//! - [`store`]: latest summary per (session, filter key).
//! - [`model`] / [`prompt`]: the model collaborator and what it is asked.

pub mod counters;
pub mod job;
pub mod model;
pub mod prompt;
pub mod scheduler;
pub mod store;
pub mod trigger;

pub use counters::TriggerCounters;
pub use job::{JobExecutor, JobOutcome, JobState, SummaryJob};
pub use model::{FnSummarizer, SummarizeFuture, Summarizer, SummaryOutput};
pub use prompt::PromptTemplate;
pub use scheduler::{EnqueueOutcome, SchedulerStats, SkipReason, StatsSnapshot, SummaryScheduler};
pub use store::{FileSummaryStore, InMemorySummaryStore, SessionSummary, SummaryStore};
pub use trigger::{
    AllChecker, AnyChecker, Checker, EventCountChecker, TimeChecker, TokenCountChecker, TriggerState,
};
