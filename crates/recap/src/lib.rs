//! Conversation context management for LLM agents.
//!
//! `recap` keeps an unbounded, append-only conversation inside a fixed token
//! budget. It offers two mutually exclusive growth-control mechanisms,
//! selected by configuration:
//!
//! 1. **Tailoring**: synchronous, budget-constrained selection of a
//!    subsequence of the raw history for the outgoing request. See
//!    [`context::tailor`] for the three strategies (middle-out, head-out,
//!    tail-out) and [`context::tokens`] for token estimation.
//!
//! 2. **Session summaries**: trigger-driven, asynchronous compression of old
//!    conversation into a running summary. A bounded worker pool
//!    ([`summary::scheduler`]) calls the summarization model off the request
//!    path and replaces the stored [`SessionSummary`](summary::store::SessionSummary).
//!    The next request is built from the summary plus the events appended
//!    since it.
//!
//! # Getting started
//!
//! ```ignore
//! use recap::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> recap::Result<()> {
//!     let summarizer = FnSummarizer::new(|prompt: String| async move {
//!         let text = call_my_model(&prompt).await?;
//!         Ok(SummaryOutput::new(text))
//!     });
//!
//!     let service = SessionService::builder(RecapConfig::default())
//!         .with_summarizer(Arc::new(summarizer))
//!         .build()?;
//!
//!     let key = SessionKey::new("app", "user-1", "session-1");
//!     service.append_event(&key, Event::new("user", Message::user("hi")))?;
//!
//!     let request = service.build_request(&key, "", Some("You are helpful.")).await?;
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | [`TokenCounter`](context::TokenCounter), [`Tailor`](context::Tailor) and the three tailoring strategies |
//! | [`summary`] | trigger checkers, per-branch counters, summary jobs, worker-pool scheduler, summary store |
//! | [`session`] | session keys, events, filter-key scoping |
//! | [`service`] | [`SessionService`](service::SessionService): the inbound API used by a runner |
//! | [`assembler`] | [`PromptAssembler`](assembler::PromptAssembler): builds the model-facing message list |
//! | [`config`] | [`RecapConfig`](config::RecapConfig) and its sections |

pub mod assembler;
pub mod config;
pub mod context;
pub mod error;
pub mod prelude;
pub mod service;
pub mod session;
pub mod summary;

use serde::{Deserialize, Serialize};

pub use error::{ContextError, Result};

// ── Combine ────────────────────────────────────────────────────────

/// Merge two values of the same type into one.
///
/// Streamed payloads (message deltas, token usage reports) arrive in chunks
/// and are folded together with this trait. Implementations must be
/// associative so chunks can be combined in arrival order.
pub trait Combine: Sized {
    fn combine(self, other: Self) -> Self;
}

/// Fold an iterator of chunks with [`Combine`]. Returns `None` when empty.
pub fn combine_all<T: Combine>(chunks: impl IntoIterator<Item = T>) -> Option<T> {
    chunks.into_iter().reduce(Combine::combine)
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A structured piece of message content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
    File { name: String, mime_type: Option<String> },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// The text of a `Text` part; `None` for binary parts.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A tool call requested by the assistant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// A message in the conversation.
///
/// Messages are immutable once appended to a session; tailoring and prompt
/// assembly clone the ones they select.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: Option<String>) -> Self {
        Self {
            role,
            content,
            reasoning: None,
            parts: Vec::new(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, Some(content.into()))
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, Some(content.into()))
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::with_role(MessageRole::Assistant, None)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::with_role(MessageRole::Tool, Some(content.into()))
        }
    }

    /// Attach reasoning / extended thinking text.
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Append a structured content part.
    pub fn with_part(mut self, part: ContentPart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == MessageRole::Tool
    }

    /// All human-readable text carried by the message: content followed by
    /// text parts, joined by newlines.
    pub fn text(&self) -> String {
        let mut pieces: Vec<&str> = Vec::new();
        if let Some(ref content) = self.content
            && !content.is_empty()
        {
            pieces.push(content);
        }
        pieces.extend(self.parts.iter().filter_map(ContentPart::as_text));
        pieces.join("\n")
    }
}

fn concat_opt(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            a.push_str(&b);
            Some(a)
        }
        (a, b) => a.or(b),
    }
}

/// Streamed message deltas: text fields are concatenated, parts and tool
/// calls appended. Role and tool-call id come from the first chunk.
impl Combine for Message {
    fn combine(self, other: Self) -> Self {
        let tool_calls = match (self.tool_calls, other.tool_calls) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            (a, b) => a.or(b),
        };
        let mut parts = self.parts;
        parts.extend(other.parts);
        Self {
            role: self.role,
            content: concat_opt(self.content, other.content),
            reasoning: concat_opt(self.reasoning, other.reasoning),
            parts,
            tool_calls,
            tool_call_id: self.tool_call_id.or(other.tool_call_id),
        }
    }
}

// ── Token usage ────────────────────────────────────────────────────

/// Token usage reported by a model call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl Combine for TokenUsage {
    fn combine(self, other: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
        }
    }
}
