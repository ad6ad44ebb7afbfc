//! Token estimation and budget-constrained tailoring.
//!
//! 1. **[`tokens`]**: [`TokenCounter`] estimates the cost of a message or a
//!    message range. [`HeuristicTokenCounter`] is the default; an exact
//!    tokenizer can be swapped in behind the same trait.
//!
//! 2. **[`tailor`]**: [`Tailor`] selects a subsequence of a conversation that
//!    fits a token budget while keeping the leading system messages and the
//!    last turn. Runs inline on the request path; never blocks on I/O.

pub mod tailor;
pub mod tokens;

pub use tailor::{PreservedSegments, Tailor, TailoringStrategy};
pub use tokens::{DEFAULT_CHARS_PER_TOKEN, HeuristicTokenCounter, TokenCounter};

#[cfg(feature = "tiktoken")]
pub use tokens::TiktokenCounter;
