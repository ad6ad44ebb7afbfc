//! Token estimation for messages and message ranges.
//!
//! The default [`HeuristicTokenCounter`] is a pure function of text: about
//! four characters per token, counted in Unicode scalar values so that
//! non-ASCII text is not over-charged by its UTF-8 byte length. A
//! vendor-exact tokenizer can be substituted behind the same trait without
//! changing any caller (see `TiktokenCounter` behind the `tiktoken` feature).

use crate::{ContextError, Message, Result};

/// Default characters per token for the heuristic counter.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Estimates the token cost of messages.
pub trait TokenCounter: Send + Sync {
    /// Estimated tokens for a single message.
    fn count_tokens(&self, message: &Message) -> usize;

    /// Estimated tokens for `messages[start..end]`.
    ///
    /// Requires `start < end <= messages.len()`; anything else is a
    /// [`ContextError::Range`].
    fn count_tokens_range(&self, messages: &[Message], start: usize, end: usize) -> Result<usize> {
        if start >= end || end > messages.len() {
            return Err(ContextError::Range {
                start,
                end,
                len: messages.len(),
            });
        }
        Ok(messages[start..end]
            .iter()
            .map(|m| self.count_tokens(m))
            .sum())
    }
}

/// Character-ratio token estimate.
///
/// Sums the characters of the content, the reasoning text and every text
/// part. A message with no text at all costs 0; any text costs at least 1.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenCounter {
    chars_per_token: usize,
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl HeuristicTokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the characters-per-token ratio (clamped to at least 1).
    pub fn with_chars_per_token(mut self, ratio: usize) -> Self {
        self.chars_per_token = ratio.max(1);
        self
    }

    /// Number of characters counted for a message.
    pub fn char_count(message: &Message) -> usize {
        let content = message.content.as_deref().map_or(0, |c| c.chars().count());
        let reasoning = message.reasoning.as_deref().map_or(0, |r| r.chars().count());
        let parts: usize = message
            .parts
            .iter()
            .filter_map(|p| p.as_text())
            .map(|t| t.chars().count())
            .sum();
        content + reasoning + parts
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count_tokens(&self, message: &Message) -> usize {
        match Self::char_count(message) {
            0 => 0,
            chars => (chars / self.chars_per_token).max(1),
        }
    }
}

/// Exact BPE token counts using the `cl100k_base` encoding.
#[cfg(feature = "tiktoken")]
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenCounter {
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| ContextError::InvalidConfig(format!("cl100k_base init failed: {e}")))?;
        Ok(Self { bpe })
    }

    fn encode_len(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

#[cfg(feature = "tiktoken")]
impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, message: &Message) -> usize {
        let mut total = 0;
        if let Some(ref content) = message.content {
            total += self.encode_len(content);
        }
        if let Some(ref reasoning) = message.reasoning {
            total += self.encode_len(reasoning);
        }
        for text in message.parts.iter().filter_map(|p| p.as_text()) {
            total += self.encode_len(text);
        }
        total
    }
}
