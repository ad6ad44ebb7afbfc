//! Budget-constrained tailoring of a conversation for one outgoing request.
//!
//! Every strategy keeps two preserved segments:
//! - **Head**: the run of leading system messages.
//! - **Tail**: the last turn: from the last user message to the end when an
//!   assistant message exists, otherwise only the final message.
//!
//! and differs only in which *middle* messages it keeps between them:
//!
//! | Strategy | Drops first |
//! |----------|-------------|
//! | [`TailoringStrategy::HeadOut`] | the oldest middle messages |
//! | [`TailoringStrategy::TailOut`] | the most recent middle messages |
//! | [`TailoringStrategy::MiddleOut`] | the center of the middle, keeping both ends |
//!
//! A prefix-sum array over per-message token estimates makes every range cost
//! O(1), so each call is O(n) to build the sums plus O(log n) to search.
//!
//! The input is never modified. The budget is best effort: when the
//! preserved segments alone exceed it, the result is exactly head + tail.

use crate::context::tokens::{HeuristicTokenCounter, TokenCounter};
use crate::{Message, MessageRole};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Which middle messages to keep when the conversation exceeds the budget.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TailoringStrategy {
    /// Drop from the center of the middle first.
    #[default]
    MiddleOut,
    /// Drop the oldest middle messages first.
    HeadOut,
    /// Drop the newest middle messages (before the last turn) first.
    TailOut,
}

impl std::fmt::Display for TailoringStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TailoringStrategy::MiddleOut => write!(f, "middle-out"),
            TailoringStrategy::HeadOut => write!(f, "head-out"),
            TailoringStrategy::TailOut => write!(f, "tail-out"),
        }
    }
}

impl FromStr for TailoringStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "middle-out" => Ok(TailoringStrategy::MiddleOut),
            "head-out" => Ok(TailoringStrategy::HeadOut),
            "tail-out" => Ok(TailoringStrategy::TailOut),
            other => Err(format!(
                "unknown tailoring strategy '{other}' (expected middle-out, head-out or tail-out)"
            )),
        }
    }
}

impl TailoringStrategy {
    /// Choose the middle ranges to keep, given the prefix sums, the middle
    /// bounds `[head, tail_start)` and the tokens left after the preserved
    /// segments. Returns up to two ranges in ascending order.
    fn middle_ranges(
        self,
        prefix: &[usize],
        head: usize,
        tail_start: usize,
        remaining: usize,
    ) -> [Range<usize>; 2] {
        let cost = |r: &Range<usize>| prefix[r.end] - prefix[r.start];
        match self {
            TailoringStrategy::HeadOut => {
                // Smallest m with cost(m..tail_start) <= remaining. m == tail_start always fits.
                let m = first_true(head, tail_start, |m| cost(&(m..tail_start)) <= remaining);
                [m..tail_start, tail_start..tail_start]
            }
            TailoringStrategy::TailOut => {
                // Largest m with cost(head..m) <= remaining.
                let m = first_true(head, tail_start, |m| {
                    m == tail_start || cost(&(head..m + 1)) > remaining
                });
                [head..m, m..m]
            }
            TailoringStrategy::MiddleOut => {
                // k middle messages split between a head-ward and a tail-ward
                // window. Both windows grow monotonically in k, so the cost is
                // monotone and the largest fitting k can be bisected.
                let windows = |k: usize| {
                    let left = k.div_ceil(2);
                    let right = k / 2;
                    [head..head + left, tail_start - right..tail_start]
                };
                let fits = |k: usize| windows(k).iter().map(&cost).sum::<usize>() <= remaining;
                let middle_len = tail_start - head;
                let k = first_true(0, middle_len, |k| k == middle_len || !fits(k + 1));
                windows(k)
            }
        }
    }
}

/// Smallest `i` in `[lo, hi]` for which `pred(i)` holds. `pred` must be
/// monotone (false, then true) and `pred(hi)` must hold.
fn first_true(mut lo: usize, mut hi: usize, pred: impl Fn(usize) -> bool) -> usize {
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

/// Sizes of the head and tail segments every strategy must keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreservedSegments {
    /// Number of consecutive leading system messages.
    pub head: usize,
    /// Number of trailing messages forming the last turn.
    pub tail: usize,
}

impl PreservedSegments {
    /// Derive the preserved segments from a message list. Head and tail never
    /// overlap.
    pub fn of(messages: &[Message]) -> Self {
        let n = messages.len();
        let head = messages
            .iter()
            .take_while(|m| m.role == MessageRole::System)
            .count();
        if head == n {
            return Self { head, tail: 0 };
        }

        let has_assistant = messages[head..]
            .iter()
            .any(|m| m.role == MessageRole::Assistant);
        if !has_assistant {
            return Self { head, tail: 1 };
        }

        // Walk back to the last user message; a system message or the head
        // boundary ends the turn instead.
        let mut start = head;
        for i in (head..n).rev() {
            match messages[i].role {
                MessageRole::User => {
                    start = i;
                    break;
                }
                MessageRole::System => {
                    start = (i + 1).min(n - 1);
                    break;
                }
                _ => {}
            }
        }
        Self {
            head,
            tail: n - start,
        }
    }
}

/// Applies a [`TailoringStrategy`] with a [`TokenCounter`].
///
/// # Example
///
/// ```
/// use recap::context::{Tailor, TailoringStrategy};
/// use recap::Message;
///
/// let messages = vec![
///     Message::system("You are helpful."),
///     Message::user("first question"),
///     Message::assistant_text("first answer"),
///     Message::user("second question"),
/// ];
/// let tailored = Tailor::new(TailoringStrategy::HeadOut).tailor(&messages, 4);
/// assert_eq!(tailored.first(), messages.first());
/// assert_eq!(tailored.last(), messages.last());
/// ```
#[derive(Clone)]
pub struct Tailor {
    strategy: TailoringStrategy,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for Tailor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tailor")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl Tailor {
    /// Create a tailor using the [`HeuristicTokenCounter`].
    pub fn new(strategy: TailoringStrategy) -> Self {
        Self {
            strategy,
            counter: Arc::new(HeuristicTokenCounter::new()),
        }
    }

    /// Replace the token counter.
    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn strategy(&self) -> TailoringStrategy {
        self.strategy
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// `prefix[i]` = estimated tokens of `messages[..i]`.
    pub fn prefix_sums(&self, messages: &[Message]) -> Vec<usize> {
        let mut prefix = Vec::with_capacity(messages.len() + 1);
        prefix.push(0);
        let mut acc = 0;
        for msg in messages {
            acc += self.counter.count_tokens(msg);
            prefix.push(acc);
        }
        prefix
    }

    /// Total estimated tokens of a message list.
    pub fn estimate(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.counter.count_tokens(m)).sum()
    }

    /// Return a new message list that fits `budget` where possible.
    pub fn tailor(&self, messages: &[Message], budget: usize) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        let n = messages.len();
        let prefix = self.prefix_sums(messages);
        let PreservedSegments { head, tail } = PreservedSegments::of(messages);
        let tail_start = n - tail;
        let preserved = prefix[head] + (prefix[n] - prefix[tail_start]);

        let middle = if preserved > budget {
            debug!(
                "Tailoring ({}): preserved segments need {} tokens, budget {}; keeping head and tail only",
                self.strategy, preserved, budget
            );
            [head..head, tail_start..tail_start]
        } else {
            self.strategy
                .middle_ranges(&prefix, head, tail_start, budget - preserved)
        };

        let kept_middle: usize = middle.iter().map(|r| r.len()).sum();
        let mut out = Vec::with_capacity(head + kept_middle + tail);
        out.extend_from_slice(&messages[..head]);
        for range in &middle {
            out.extend_from_slice(&messages[range.clone()]);
        }
        out.extend_from_slice(&messages[tail_start..]);

        let dropped_tools = drop_orphaned_tool_results(&mut out, head);
        trace!(
            "Tailoring ({}): {} -> {} messages (head={}, tail={}, middle kept={}, orphaned tool results dropped={})",
            self.strategy,
            n,
            out.len(),
            head,
            tail,
            kept_middle,
            dropped_tools,
        );
        out
    }
}

/// Remove tool results sitting directly after the head: their triggering
/// assistant turn was trimmed away. Returns how many were removed.
fn drop_orphaned_tool_results(messages: &mut Vec<Message>, head: usize) -> usize {
    let orphaned = messages
        .iter()
        .skip(head)
        .take_while(|m| m.is_tool_result())
        .count();
    messages.drain(head..head + orphaned);
    orphaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    const ALL: [TailoringStrategy; 3] = [
        TailoringStrategy::MiddleOut,
        TailoringStrategy::HeadOut,
        TailoringStrategy::TailOut,
    ];

    /// A message costing exactly `tokens` under the heuristic counter.
    fn sized(role: MessageRole, tag: &str, tokens: usize) -> Message {
        let mut text = tag.to_string();
        while text.chars().count() < tokens * 4 {
            text.push('.');
        }
        match role {
            MessageRole::System => Message::system(text),
            MessageRole::User => Message::user(text),
            MessageRole::Assistant => Message::assistant_text(text),
            MessageRole::Tool => Message::tool_result("call", text),
        }
    }

    fn sys(tag: &str) -> Message {
        sized(MessageRole::System, tag, 10)
    }
    fn user(tag: &str) -> Message {
        sized(MessageRole::User, tag, 10)
    }
    fn assistant(tag: &str) -> Message {
        sized(MessageRole::Assistant, tag, 10)
    }
    fn tool_calls(tag: &str, ids: &[&str]) -> Message {
        let calls = ids.iter().map(|id| ToolCall::new(*id, "read", "{}")).collect();
        Message {
            content: sized(MessageRole::Assistant, tag, 10).content,
            ..Message::assistant_tool_calls(calls)
        }
    }

    fn tags(messages: &[Message]) -> Vec<String> {
        messages
            .iter()
            .map(|m| {
                m.content
                    .as_deref()
                    .unwrap_or("")
                    .trim_end_matches('.')
                    .to_string()
            })
            .collect()
    }

    /// sys, then `turns` user/assistant pairs, then a final user question.
    fn conversation(turns: usize) -> Vec<Message> {
        let mut messages = vec![sys("sys")];
        for i in 0..turns {
            messages.push(user(&format!("u{i}")));
            messages.push(assistant(&format!("a{i}")));
        }
        messages.push(user("last"));
        messages
    }

    fn is_subsequence(sub: &[Message], full: &[Message]) -> bool {
        let mut it = full.iter();
        sub.iter().all(|m| it.any(|f| f == m))
    }

    #[test]
    fn preserved_segments_pending_user_turn() {
        let messages = conversation(2);
        assert_eq!(
            PreservedSegments::of(&messages),
            PreservedSegments { head: 1, tail: 1 }
        );
    }

    #[test]
    fn preserved_segments_completed_turn() {
        let messages = vec![
            sys("s1"),
            sys("s2"),
            user("u1"),
            assistant("a1"),
            user("u2"),
            Message::assistant_tool_calls(vec![ToolCall::new("c1", "read", "{}")]),
            Message::tool_result("c1", "contents"),
            assistant("a2"),
        ];
        assert_eq!(
            PreservedSegments::of(&messages),
            PreservedSegments { head: 2, tail: 4 }
        );
    }

    #[test]
    fn preserved_segments_without_user_extends_to_head() {
        let messages = vec![sys("s"), assistant("a1"), assistant("a2")];
        assert_eq!(
            PreservedSegments::of(&messages),
            PreservedSegments { head: 1, tail: 2 }
        );
    }

    #[test]
    fn preserved_segments_stop_at_mid_conversation_system_message() {
        let messages = vec![sys("s"), user("u1"), sys("note"), assistant("a1")];
        assert_eq!(
            PreservedSegments::of(&messages),
            PreservedSegments { head: 1, tail: 1 }
        );
    }

    #[test]
    fn preserved_segments_all_system() {
        let messages = vec![sys("a"), sys("b")];
        assert_eq!(
            PreservedSegments::of(&messages),
            PreservedSegments { head: 2, tail: 0 }
        );
    }

    #[test]
    fn empty_input_returns_empty() {
        for strategy in ALL {
            assert!(Tailor::new(strategy).tailor(&[], 100).is_empty());
        }
    }

    #[test]
    fn budget_fitting_only_preserved_segments() {
        let messages = vec![
            sys("sys"),
            user("u1"),
            assistant("a1"),
            user("u2"),
            assistant("a2"),
            user("u3"),
        ];
        for strategy in ALL {
            let out = Tailor::new(strategy).tailor(&messages, 25);
            assert_eq!(tags(&out), vec!["sys", "u3"], "{strategy}");
        }
    }

    #[test]
    fn budget_below_preserved_returns_head_and_tail() {
        let messages = conversation(3);
        for strategy in ALL {
            assert_eq!(
                tags(&Tailor::new(strategy).tailor(&messages, 0)),
                vec!["sys", "last"],
                "{strategy}"
            );
            assert_eq!(
                tags(&Tailor::new(strategy).tailor(&messages, 5)),
                vec!["sys", "last"],
                "{strategy}"
            );
        }
    }

    #[test]
    fn head_out_drops_oldest_middle() {
        let messages = conversation(3); // sys u0 a0 u1 a1 u2 a2 last
        let out = Tailor::new(TailoringStrategy::HeadOut).tailor(&messages, 40);
        assert_eq!(tags(&out), vec!["sys", "u2", "a2", "last"]);
    }

    #[test]
    fn tail_out_drops_newest_middle() {
        let messages = conversation(3);
        let out = Tailor::new(TailoringStrategy::TailOut).tailor(&messages, 40);
        assert_eq!(tags(&out), vec!["sys", "u0", "a0", "last"]);
    }

    #[test]
    fn middle_out_keeps_both_ends() {
        let messages = conversation(3);
        let out = Tailor::new(TailoringStrategy::MiddleOut).tailor(&messages, 40);
        assert_eq!(tags(&out), vec!["sys", "u0", "a2", "last"]);

        // An odd number of middle slots favours the head-ward window.
        let out = Tailor::new(TailoringStrategy::MiddleOut).tailor(&messages, 50);
        assert_eq!(tags(&out), vec!["sys", "u0", "a0", "a2", "last"]);
    }

    #[test]
    fn output_is_ordered_subsequence_with_preserved_segments() {
        let messages = conversation(6);
        for strategy in ALL {
            for budget in [0, 15, 20, 37, 64, 99, 140, 1000] {
                let out = Tailor::new(strategy).tailor(&messages, budget);
                assert!(is_subsequence(&out, &messages), "{strategy} @ {budget}");
                assert_eq!(out.first(), messages.first(), "{strategy} @ {budget}");
                assert_eq!(out.last(), messages.last(), "{strategy} @ {budget}");
                let tailor = Tailor::new(strategy);
                if budget >= 20 {
                    assert!(tailor.estimate(&out) <= budget, "{strategy} @ {budget}");
                }
            }
        }
    }

    #[test]
    fn fitting_input_is_returned_unchanged_and_idempotent() {
        let messages = conversation(4);
        for strategy in ALL {
            let tailor = Tailor::new(strategy);
            assert_eq!(tailor.tailor(&messages, 10_000), messages);

            let once = tailor.tailor(&messages, 55);
            let twice = tailor.tailor(&once, 55);
            assert_eq!(once, twice, "{strategy}");
        }
    }

    #[test]
    fn orphaned_tool_result_after_head_is_dropped() {
        let messages = vec![
            sys("sys"),
            user("u1"),
            tool_calls("tc", &["c1"]),
            sized(MessageRole::Tool, "t1", 10),
            assistant("a1"),
            user("u2"),
            assistant("a2"),
        ];
        // Budget keeps sys + t1 + a1 + u2 + a2; the window starts at t1.
        let out = Tailor::new(TailoringStrategy::HeadOut).tailor(&messages, 50);
        assert_eq!(tags(&out), vec!["sys", "a1", "u2", "a2"]);
        assert!(out.iter().all(|m| !m.is_tool_result()));
    }

    #[test]
    fn consecutive_orphaned_tool_results_are_all_dropped() {
        let messages = vec![
            user("u1"),
            tool_calls("tc", &["c1", "c2"]),
            sized(MessageRole::Tool, "t1", 10),
            sized(MessageRole::Tool, "t2", 10),
            user("u2"),
            assistant("a2"),
        ];
        let out = Tailor::new(TailoringStrategy::HeadOut).tailor(&messages, 40);
        assert_eq!(tags(&out), vec!["u2", "a2"]);
    }

    #[test]
    fn degenerate_tail_of_tool_result_is_dropped() {
        let messages = vec![sys("sys"), sized(MessageRole::Tool, "t", 10)];
        for strategy in ALL {
            assert_eq!(tags(&Tailor::new(strategy).tailor(&messages, 0)), vec!["sys"]);
        }
    }

    #[test]
    fn strategy_parses_from_cli_spellings() {
        assert_eq!(
            "head_out".parse::<TailoringStrategy>().unwrap(),
            TailoringStrategy::HeadOut
        );
        assert_eq!(
            "Tail-Out".parse::<TailoringStrategy>().unwrap(),
            TailoringStrategy::TailOut
        );
        assert!("sideways".parse::<TailoringStrategy>().is_err());
        assert_eq!(TailoringStrategy::default().to_string(), "middle-out");
    }
}
