//! Sessions, events, and filter-key scoping.
//!
//! A [`Session`] is an append-only event log scoped to a [`SessionKey`].
//! Each [`Event`] carries a branch identifier; a *filter key* selects the
//! events of one branch and its sub-branches (`"planner"` matches
//! `"planner"` and `"planner/search"`, not `"planner2"`). The empty filter
//! key selects the whole session.
//!
//! Event ids are assigned on append, start at 1, and increase in arrival
//! order; a summary records the id of the last event it covers.

use crate::{Message, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Identifies a conversation: (application, user, session).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// A summarization scope: one filter key within one session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SummaryScope {
    pub session: SessionKey,
    pub filter_key: String,
}

impl SummaryScope {
    pub fn new(session: SessionKey, filter_key: impl Into<String>) -> Self {
        Self {
            session,
            filter_key: filter_key.into(),
        }
    }

    /// The whole-session scope (empty filter key).
    pub fn session_wide(session: SessionKey) -> Self {
        Self::new(session, "")
    }
}

impl std::fmt::Display for SummaryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.filter_key.is_empty() {
            write!(f, "{}", self.session)
        } else {
            write!(f, "{}#{}", self.session, self.filter_key)
        }
    }
}

/// Whether an event on `branch` belongs to `filter_key`.
pub fn branch_matches(branch: &str, filter_key: &str) -> bool {
    filter_key.is_empty()
        || branch
            .strip_prefix(filter_key)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// One appended conversation event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    /// Assigned by the session on append; 0 until then.
    #[serde(default)]
    pub id: u64,
    /// Who produced the event: a user id or an agent name.
    pub author: String,
    /// Branch path such as `"planner/search"`. Empty for the root.
    #[serde(default)]
    pub branch: String,
    pub message: Message,
    pub timestamp: DateTime<Utc>,
    /// Usage reported by the model call that produced this event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Event {
    pub fn new(author: impl Into<String>, message: Message) -> Self {
        Self {
            id: 0,
            author: author.into(),
            branch: String::new(),
            message,
            timestamp: Utc::now(),
            usage: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn in_scope(&self, filter_key: &str) -> bool {
        branch_matches(&self.branch, filter_key)
    }
}

/// Append-only event log for one conversation.
#[derive(Debug, Clone)]
pub struct Session {
    key: SessionKey,
    events: Vec<Event>,
    last_event_id: u64,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            events: Vec::new(),
            last_event_id: 0,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append an event, assigning the next id. Returns the assigned id.
    pub fn append(&mut self, mut event: Event) -> u64 {
        self.last_event_id += 1;
        event.id = self.last_event_id;
        self.events.push(event);
        self.last_event_id
    }

    /// Events in `filter_key` with an id greater than `after` (all of them
    /// when `after` is `None`), in arrival order.
    pub fn events_after(&self, filter_key: &str, after: Option<u64>) -> Vec<Event> {
        let after = after.unwrap_or(0);
        // Ids are dense and ordered, so skip straight to the boundary.
        let start = self.events.partition_point(|e| e.id <= after);
        self.events[start..]
            .iter()
            .filter(|e| e.in_scope(filter_key))
            .cloned()
            .collect()
    }
}

// ── Session log ────────────────────────────────────────────────────

/// Event logs of every live session, shared by the service and the summary
/// workers. Workers read from it when a job runs, so a queued job carries
/// only its scope.
#[derive(Debug, Default)]
pub struct SessionLog {
    sessions: RwLock<HashMap<SessionKey, Session>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to `key`'s log, creating it on first use. Returns the assigned id.
    pub fn append(&self, key: &SessionKey, event: Event) -> u64 {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_insert_with(|| Session::new(key.clone()))
            .append(event)
    }

    /// Events of a session in arrival order.
    pub fn events(&self, key: &SessionKey) -> Vec<Event> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|s| s.events().to_vec())
            .unwrap_or_default()
    }

    /// See [`Session::events_after`]. Empty for an unknown session.
    pub fn events_after(&self, key: &SessionKey, filter_key: &str, after: Option<u64>) -> Vec<Event> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|s| s.events_after(filter_key, after))
            .unwrap_or_default()
    }

    /// Whether any event of `key` falls in `filter_key`. Scans from the
    /// newest event.
    pub fn has_events(&self, key: &SessionKey, filter_key: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .is_some_and(|s| s.events().iter().rev().any(|e| e.in_scope(filter_key)))
    }

    /// Drop a finished conversation's log.
    pub fn remove(&self, key: &SessionKey) -> Option<Session> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    /// Number of sessions held.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
