//! Sharded per-branch trigger counters.
//!
//! The request path increments counters on every appended event while
//! workers reset them when a job finishes. Scopes are spread over a fixed
//! number of independently locked shards so that unrelated sessions never
//! contend on one lock. Critical sections are a handful of integer updates
//! and never await.

use super::trigger::TriggerState;
use crate::session::{SessionKey, SummaryScope};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

const SHARD_COUNT: usize = 16;

type Shard = Mutex<HashMap<SummaryScope, TriggerState>>;

pub struct TriggerCounters {
    shards: Vec<Shard>,
}

impl Default for TriggerCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerCounters {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, scope: &SummaryScope) -> MutexGuard<'_, HashMap<SummaryScope, TriggerState>> {
        let mut hasher = DefaultHasher::new();
        scope.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        // Counters hold no invariants a panic could break mid-update.
        self.shards[idx].lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one appended event of `tokens` estimated tokens at `at` and
    /// return the updated state.
    pub fn record_event(&self, scope: &SummaryScope, tokens: usize, at: DateTime<Utc>) -> TriggerState {
        let mut shard = self.shard(scope);
        let state = shard.entry(scope.clone()).or_default();
        state.events_since_summary += 1;
        state.tokens_since_summary += tokens;
        if state.window_started_at.is_none() {
            state.window_started_at = Some(at);
        }
        state.last_event_at = Some(at);
        state.clone()
    }

    /// Start a new window at `now` after a summary attempt. Unknown scopes
    /// (never recorded, or forgotten) stay unknown.
    pub fn reset(&self, scope: &SummaryScope, now: DateTime<Utc>) {
        let mut shard = self.shard(scope);
        if let Some(state) = shard.get_mut(scope) {
            state.events_since_summary = 0;
            state.tokens_since_summary = 0;
            state.window_started_at = Some(now);
        }
    }

    /// Mark a job in flight. With `exclusive`, refuses when one already is.
    pub fn begin_job(&self, scope: &SummaryScope, exclusive: bool) -> bool {
        let mut shard = self.shard(scope);
        let state = shard.entry(scope.clone()).or_default();
        if exclusive && state.in_flight > 0 {
            return false;
        }
        state.in_flight += 1;
        true
    }

    pub fn end_job(&self, scope: &SummaryScope) {
        let mut shard = self.shard(scope);
        if let Some(state) = shard.get_mut(scope) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }

    /// Drop every scope of `session`. Returns how many were removed.
    pub fn forget_session(&self, session: &SessionKey) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.lock().unwrap_or_else(|e| e.into_inner());
                let before = shard.len();
                shard.retain(|scope, _| scope.session != *session);
                before - shard.len()
            })
            .sum()
    }

    /// Number of scopes tracked.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state for `scope`; default when nothing was recorded.
    pub fn snapshot(&self, scope: &SummaryScope) -> TriggerState {
        self.shard(scope).get(scope).cloned().unwrap_or_default()
    }
}
