//! Session summary persistence.
//!
//! A [`SummaryStore`] maps (session, filter key) to the latest
//! [`SessionSummary`]. Writes replace the previous value; nothing is ever
//! appended. The only requirement on a backend is atomic get/set per key.
//!
//! ```text
//! {root}/
//!   {app}/{user}/{session}/
//!     _session.json        # filter key ""
//!     planner%2Fsearch.json
//! ```

use crate::session::SessionKey;
use crate::{ContextError, Result, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// The latest generated summary for one (session, filter key).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    /// Summary text as returned by the model, trimmed.
    pub text: String,
    /// Id of the last event the summary covers.
    pub covered_until: u64,
    /// When the job that produced it finished.
    pub generated_at: DateTime<Utc>,
    /// Model usage of the summarization call.
    #[serde(default)]
    pub usage: TokenUsage,
}

/// Boxed future returned by [`SummaryStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

pub trait SummaryStore: Send + Sync {
    /// The stored summary, or `None` when none exists yet.
    fn load<'a>(&'a self, key: &'a SessionKey, filter_key: &'a str) -> StoreFuture<'a, Option<SessionSummary>>;

    /// Replace the stored summary.
    fn store<'a>(&'a self, key: &'a SessionKey, filter_key: &'a str, summary: SessionSummary) -> StoreFuture<'a, ()>;
}

// ── In-memory ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemorySummaryStore {
    summaries: RwLock<HashMap<(SessionKey, String), SessionSummary>>,
}

impl InMemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.summaries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SummaryStore for InMemorySummaryStore {
    fn load<'a>(&'a self, key: &'a SessionKey, filter_key: &'a str) -> StoreFuture<'a, Option<SessionSummary>> {
        let found = self
            .summaries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(key.clone(), filter_key.to_string()))
            .cloned();
        Box::pin(async move { Ok(found) })
    }

    fn store<'a>(&'a self, key: &'a SessionKey, filter_key: &'a str, summary: SessionSummary) -> StoreFuture<'a, ()> {
        self.summaries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((key.clone(), filter_key.to_string()), summary);
        Box::pin(async { Ok(()) })
    }
}

// ── File-backed ────────────────────────────────────────────────────

/// One pretty-printed JSON file per (session, filter key).
///
/// Writes go to a uniquely named temp file in the same directory and are
/// renamed into place, so readers see either the old or the new summary.
#[derive(Debug, Clone)]
pub struct FileSummaryStore {
    root: PathBuf,
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FileSummaryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, key: &SessionKey) -> PathBuf {
        self.root
            .join(encode_component(&key.app_name))
            .join(encode_component(&key.user_id))
            .join(encode_component(&key.session_id))
    }

    /// Path of the summary file for `(key, filter_key)`.
    pub fn summary_path(&self, key: &SessionKey, filter_key: &str) -> PathBuf {
        let name = if filter_key.is_empty() {
            "_session".to_string()
        } else {
            encode_component(filter_key)
        };
        self.session_dir(key).join(format!("{name}.json"))
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_-]` so any key maps to a
/// single, collision-free path component.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

impl SummaryStore for FileSummaryStore {
    fn load<'a>(&'a self, key: &'a SessionKey, filter_key: &'a str) -> StoreFuture<'a, Option<SessionSummary>> {
        Box::pin(async move {
            let path = self.summary_path(key, filter_key);
            let json = match tokio::fs::read_to_string(&path).await {
                Ok(json) => json,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(ContextError::Store(format!(
                        "failed to read {}: {e}",
                        path.display()
                    )));
                }
            };
            let summary = serde_json::from_str(&json)?;
            Ok(Some(summary))
        })
    }

    fn store<'a>(&'a self, key: &'a SessionKey, filter_key: &'a str, summary: SessionSummary) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.summary_path(key, filter_key);
            let dir = self.session_dir(key);
            tokio::fs::create_dir_all(&dir).await?;

            let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
            let tmp = dir.join(format!(".summary-{n:x}.json.tmp"));
            let json = serde_json::to_string_pretty(&summary)?;
            tokio::fs::write(&tmp, json).await?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(ContextError::Store(format!(
                    "failed to replace {}: {e}",
                    path.display()
                )));
            }
            debug!("Stored summary for {key} [{filter_key}] at {}", path.display());
            Ok(())
        })
    }
}
