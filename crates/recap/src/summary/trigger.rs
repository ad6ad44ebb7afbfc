//! Summary triggers.
//!
//! A [`Checker`] is a predicate over a branch's [`TriggerState`]. Checkers
//! only compare counters; they never look at message content, so evaluation
//! is O(1) and safe to run inline on the event-append path.
//!
//! ```
//! use recap::summary::trigger::*;
//! use std::time::Duration;
//!
//! let checker = any(vec![
//!     Box::new(EventCountChecker::new(20)) as Box<dyn Checker>,
//!     Box::new(TimeChecker::new(Duration::from_secs(600))),
//! ]);
//! let state = TriggerState { events_since_summary: 21, ..Default::default() };
//! assert!(checker.should_summarize(&state));
//! ```

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Per-branch counters since the last summary attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerState {
    /// Events appended since the last summary attempt.
    pub events_since_summary: usize,
    /// Estimated tokens of those events.
    pub tokens_since_summary: usize,
    /// Start of the current window: the last summary attempt, or the first
    /// event after it.
    pub window_started_at: Option<DateTime<Utc>>,
    /// Timestamp of the newest counted event.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Jobs for this branch currently enqueued or running.
    pub in_flight: usize,
}

impl TriggerState {
    /// Time covered by the current window, zero when it has not started.
    pub fn elapsed(&self) -> Duration {
        match (self.window_started_at, self.last_event_at) {
            (Some(start), Some(last)) => (last - start).to_std().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }
}

/// Decides whether a branch should be summarized now.
pub trait Checker: Send + Sync {
    fn should_summarize(&self, state: &TriggerState) -> bool;
}

impl<F> Checker for F
where
    F: Fn(&TriggerState) -> bool + Send + Sync,
{
    fn should_summarize(&self, state: &TriggerState) -> bool {
        self(state)
    }
}

/// Fires when more than `threshold` events arrived since the last summary.
#[derive(Debug, Clone, Copy)]
pub struct EventCountChecker {
    pub threshold: usize,
}

impl EventCountChecker {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl Checker for EventCountChecker {
    fn should_summarize(&self, state: &TriggerState) -> bool {
        state.events_since_summary > self.threshold
    }
}

/// Fires when estimated tokens since the last summary exceed `threshold`.
/// A threshold of 0 disables it.
#[derive(Debug, Clone, Copy)]
pub struct TokenCountChecker {
    pub threshold: usize,
}

impl TokenCountChecker {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl Checker for TokenCountChecker {
    fn should_summarize(&self, state: &TriggerState) -> bool {
        self.threshold > 0 && state.tokens_since_summary > self.threshold
    }
}

/// Fires when the current window spans more than `interval`.
/// A zero interval disables it.
#[derive(Debug, Clone, Copy)]
pub struct TimeChecker {
    pub interval: Duration,
}

impl TimeChecker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Checker for TimeChecker {
    fn should_summarize(&self, state: &TriggerState) -> bool {
        !self.interval.is_zero() && state.elapsed() > self.interval
    }
}

/// OR over sub-checkers. Empty never fires.
pub struct AnyChecker {
    checkers: Vec<Box<dyn Checker>>,
}

impl AnyChecker {
    pub fn new(checkers: Vec<Box<dyn Checker>>) -> Self {
        Self { checkers }
    }
}

impl Checker for AnyChecker {
    fn should_summarize(&self, state: &TriggerState) -> bool {
        self.checkers.iter().any(|c| c.should_summarize(state))
    }
}

/// AND over sub-checkers. Empty never fires.
pub struct AllChecker {
    checkers: Vec<Box<dyn Checker>>,
}

impl AllChecker {
    pub fn new(checkers: Vec<Box<dyn Checker>>) -> Self {
        Self { checkers }
    }
}

impl Checker for AllChecker {
    fn should_summarize(&self, state: &TriggerState) -> bool {
        !self.checkers.is_empty() && self.checkers.iter().all(|c| c.should_summarize(state))
    }
}

pub fn any(checkers: Vec<Box<dyn Checker>>) -> AnyChecker {
    AnyChecker::new(checkers)
}

pub fn all(checkers: Vec<Box<dyn Checker>>) -> AllChecker {
    AllChecker::new(checkers)
}
