//! Convenience re-exports for common `recap` types.
//!
//! ```ignore
//! use recap::prelude::*;
//! ```
//!
//! Covers the service, its config, the message model and the collaborator
//! traits. Scheduler internals and individual checkers are left in their
//! modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    Combine, ContentPart, ContextError, Message, MessageRole, Result, TokenUsage, ToolCall,
};

// ── Sessions and service ────────────────────────────────────────────
pub use crate::config::{RecapConfig, SchedulerConfig, SummaryConfig, TailoringConfig, Toggle};
pub use crate::service::{SessionService, SessionServiceBuilder};
pub use crate::session::{Event, SessionKey, SessionLog, SummaryScope};

// ── Context management ──────────────────────────────────────────────
pub use crate::assembler::PromptAssembler;
pub use crate::context::{HeuristicTokenCounter, Tailor, TailoringStrategy, TokenCounter};

// ── Summaries ───────────────────────────────────────────────────────
pub use crate::summary::{
    Checker, EnqueueOutcome, FileSummaryStore, FnSummarizer, InMemorySummaryStore, SessionSummary,
    Summarizer, SummaryOutput, SummaryStore,
};
