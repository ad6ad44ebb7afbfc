//! Configuration for [`SessionService`](crate::service::SessionService).
//!
//! One struct tree with documented defaults. Every section deserializes with
//! `#[serde(default)]`, so a config file only needs the fields it changes:
//!
//! ```
//! use recap::config::RecapConfig;
//!
//! let config = RecapConfig::from_json_str(r#"{
//!     "summary": { "enabled": true, "config": { "event_threshold": 5 } },
//!     "tailoring": { "strategy": "head_out", "max_tokens": 8000 }
//! }"#).unwrap();
//! assert_eq!(config.summary.config.event_threshold, 5);
//! assert_eq!(config.scheduler.async_worker_count, 3);
//! ```
//!
//! Summaries and tailoring are mutually exclusive growth controls. With
//! `summary.enabled` and a summarizer attached, requests are built from the
//! stored summary; otherwise the raw history is tailored.

use crate::context::TailoringStrategy;
use crate::summary::prompt::{CONVERSATION_PLACEHOLDER, DEFAULT_PROMPT_TEMPLATE, PromptTemplate};
use crate::summary::trigger::{
    AllChecker, AnyChecker, Checker, EventCountChecker, TimeChecker, TokenCountChecker,
};
use crate::{ContextError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ── Generic toggle ────────────────────────────────────────────────

/// `{ enabled, config }` wrapper. When `enabled` is `false` the module is
/// skipped regardless of the inner values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Toggle<T: Default> {
    /// Whether the wrapped module runs at all. Default: `true`.
    pub enabled: bool,
    /// Settings used while enabled.
    pub config: T,
}

impl<T: Default> Toggle<T> {
    /// A disabled instance with default inner config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }

    pub fn enabled(config: T) -> Self {
        Self {
            enabled: true,
            config,
        }
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            config: T::default(),
        }
    }
}

// ── Summary ───────────────────────────────────────────────────────

/// How enabled trigger checkers combine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Fire when any enabled threshold is crossed.
    #[default]
    Any,
    /// Fire only when every enabled threshold is crossed.
    All,
}

/// When summaries are generated and what the model is asked.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SummaryConfig {
    /// Word limit written into the prompt. 0 = unlimited. Default: 0.
    pub max_summary_words: usize,
    /// Must contain `{conversation_text}`; may contain `{max_summary_words}`.
    /// Default: [`DEFAULT_PROMPT_TEMPLATE`].
    pub prompt_template: String,
    /// Summarize after more than this many events. Default: 20.
    pub event_threshold: usize,
    /// Summarize after more than this many estimated tokens. 0 = disabled
    /// (default).
    pub token_threshold: usize,
    /// Summarize once a window spans more than this many seconds. 0 =
    /// disabled (default).
    pub time_threshold_secs: u64,
    /// How the thresholds above combine. Default: [`TriggerMode::Any`].
    pub trigger_mode: TriggerMode,
    /// Put the summary and the events after it into outgoing requests.
    /// Default: `true`.
    pub add_summary_to_prompt: bool,
    /// At most one job in flight per scope. Default: `false`, so the job
    /// that finishes last owns the stored summary.
    pub single_flight: bool,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_summary_words: 0,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            event_threshold: 20,
            token_threshold: 0,
            time_threshold_secs: 0,
            trigger_mode: TriggerMode::Any,
            add_summary_to_prompt: true,
            single_flight: false,
        }
    }
}

impl SummaryConfig {
    pub fn prompt(&self) -> Result<PromptTemplate> {
        PromptTemplate::new(self.prompt_template.clone(), self.max_summary_words)
    }

    pub fn time_threshold(&self) -> Duration {
        Duration::from_secs(self.time_threshold_secs)
    }

    /// Combine the enabled thresholds per `trigger_mode`. Disabled token
    /// and time thresholds are left out so they cannot veto an `All`.
    pub fn checker(&self) -> Box<dyn Checker> {
        let mut checkers: Vec<Box<dyn Checker>> =
            vec![Box::new(EventCountChecker::new(self.event_threshold))];
        if self.token_threshold > 0 {
            checkers.push(Box::new(TokenCountChecker::new(self.token_threshold)));
        }
        if self.time_threshold_secs > 0 {
            checkers.push(Box::new(TimeChecker::new(self.time_threshold())));
        }
        match self.trigger_mode {
            TriggerMode::Any => Box::new(AnyChecker::new(checkers)),
            TriggerMode::All => Box::new(AllChecker::new(checkers)),
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────────

/// Worker pool sizing and deadlines.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of summary workers. Must be at least 1. Default: 3.
    pub async_worker_count: usize,
    /// Capacity of the job queue. A job arriving at a full queue is
    /// dropped. Must be at least 1. Default: 100.
    pub summary_queue_size: usize,
    /// Deadline for loading the previous summary and calling the model.
    /// Must be at least 1. Default: 30.
    pub per_job_timeout_secs: u64,
    /// How long shutdown waits for running jobs. Default: 5.
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            async_worker_count: 3,
            summary_queue_size: 100,
            per_job_timeout_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn per_job_timeout(&self) -> Duration {
        Duration::from_secs(self.per_job_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ── Tailoring ─────────────────────────────────────────────────────

/// History tailoring used when requests are not built from summaries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TailoringConfig {
    /// Which messages go first. Default: [`TailoringStrategy::MiddleOut`].
    pub strategy: TailoringStrategy,
    /// Token budget for the tailored history. Default: 32000.
    pub max_tokens: usize,
    /// Only the last N messages are considered before tailoring. 0 = all
    /// (default).
    pub max_history_messages: usize,
}

impl Default for TailoringConfig {
    fn default() -> Self {
        Self {
            strategy: TailoringStrategy::MiddleOut,
            max_tokens: 32_000,
            max_history_messages: 0,
        }
    }
}

// ── Top level ─────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RecapConfig {
    /// Background summaries. Enabled by default; they also need a
    /// summarizer attached to the service.
    pub summary: Toggle<SummaryConfig>,
    /// Worker pool behind summaries.
    pub scheduler: SchedulerConfig,
    /// Fallback growth control when summaries are off.
    pub tailoring: TailoringConfig,
}

impl RecapConfig {
    /// Config with summaries off: history growth is bounded by tailoring only.
    pub fn tailoring_only(tailoring: TailoringConfig) -> Self {
        Self {
            summary: Toggle::disabled(),
            tailoring,
            ..Default::default()
        }
    }

    pub fn with_event_threshold(mut self, threshold: usize) -> Self {
        self.summary.config.event_threshold = threshold;
        self
    }

    pub fn with_workers(mut self, workers: usize, queue_size: usize) -> Self {
        self.scheduler.async_worker_count = workers;
        self.scheduler.summary_queue_size = queue_size;
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.scheduler.per_job_timeout_secs = secs;
        self
    }

    pub fn with_strategy(mut self, strategy: TailoringStrategy, max_tokens: usize) -> Self {
        self.tailoring.strategy = strategy;
        self.tailoring.max_tokens = max_tokens;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.summary.config.prompt_template.contains(CONVERSATION_PLACEHOLDER) {
            return Err(ContextError::InvalidTemplate(format!(
                "prompt_template must contain {CONVERSATION_PLACEHOLDER}"
            )));
        }
        if self.scheduler.async_worker_count == 0 {
            return Err(ContextError::InvalidConfig(
                "scheduler.async_worker_count must be at least 1".into(),
            ));
        }
        if self.scheduler.summary_queue_size == 0 {
            return Err(ContextError::InvalidConfig(
                "scheduler.summary_queue_size must be at least 1".into(),
            ));
        }
        if self.scheduler.per_job_timeout_secs == 0 {
            return Err(ContextError::InvalidConfig(
                "scheduler.per_job_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
