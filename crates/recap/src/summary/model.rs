//! The summarization model collaborator.
//!
//! This crate never talks to a model vendor directly. Anything that can
//! turn a prompt into text implements [`Summarizer`]; [`FnSummarizer`] wraps
//! an async closure for the common case.

use crate::TokenUsage;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Summarizer::summarize`].
pub type SummarizeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<SummaryOutput, String>> + Send + 'a>>;

/// Text produced by one summarization call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SummaryOutput {
    /// Summary text. Blank output fails the job.
    pub text: String,
    /// Usage reported by the model, zero when unknown.
    pub usage: TokenUsage,
}

impl SummaryOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// A single text-completion call used for summarization.
///
/// Errors are plain strings: the executor wraps them into
/// [`ContextError::JobExecution`](crate::ContextError::JobExecution) and
/// logs them. Retries, if any, belong to the implementation.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, prompt: &str) -> SummarizeFuture<'_>;

    /// Name used in log lines.
    fn name(&self) -> &str {
        "summarizer"
    }
}

type ErasedSummarizeFn =
    Box<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<SummaryOutput, String>> + Send>> + Send + Sync>;

/// Closure-backed [`Summarizer`].
///
/// ```
/// use recap::summary::model::{FnSummarizer, Summarizer, SummaryOutput};
///
/// let summarizer = FnSummarizer::new(|prompt: String| async move {
///     Ok(SummaryOutput::new(format!("{} chars summarized", prompt.len())))
/// })
/// .with_name("echo");
/// assert_eq!(summarizer.name(), "echo");
/// ```
pub struct FnSummarizer {
    name: String,
    handler: ErasedSummarizeFn,
}

impl FnSummarizer {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SummaryOutput, String>> + Send + 'static,
    {
        let erased = move |prompt: String| -> Pin<Box<dyn Future<Output = Result<SummaryOutput, String>> + Send>> {
            Box::pin(handler(prompt))
        };
        Self {
            name: "fn-summarizer".into(),
            handler: Box::new(erased),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Summarizer for FnSummarizer {
    fn summarize(&self, prompt: &str) -> SummarizeFuture<'_> {
        (self.handler)(prompt.to_string())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for FnSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSummarizer").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fn_summarizer_passes_prompt_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let summarizer = FnSummarizer::new(move |prompt: String| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(SummaryOutput::new(prompt.to_uppercase()).with_usage(TokenUsage::new(10, 2)))
            }
        });

        let out = summarizer.summarize("hello").await.unwrap();
        assert_eq!(out.text, "HELLO");
        assert_eq!(out.usage.total(), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_returned() {
        let summarizer = FnSummarizer::new(|_: String| async { Err("model unavailable".to_string()) });
        let err = summarizer.summarize("x").await.unwrap_err();
        assert_eq!(err, "model unavailable");
        assert_eq!(summarizer.name(), "fn-summarizer");
    }
}
