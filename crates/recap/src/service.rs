//! The inbound API used by a runner.
//!
//! [`SessionService`] owns the event logs, the per-branch trigger counters,
//! the summary store and (when a summarizer is attached) the worker pool.
//! Appending an event updates counters for the whole session and for the
//! event's branch, evaluates the trigger, and enqueues a job without waiting
//! when it fires. The append path stays in memory; summary store reads and
//! writes happen only inside jobs and request building. Nothing here fails
//! an agent turn because summarization failed: requests fall back to the raw
//! or tailored history.

use crate::assembler::PromptAssembler;
use crate::config::RecapConfig;
use crate::context::{HeuristicTokenCounter, Tailor, TokenCounter};
use crate::session::{Event, SessionKey, SessionLog, SummaryScope};
use crate::summary::job::{JobExecutor, SummaryJob};
use crate::summary::model::Summarizer;
use crate::summary::scheduler::{EnqueueOutcome, SkipReason, StatsSnapshot, SummaryScheduler};
use crate::summary::store::{InMemorySummaryStore, SessionSummary, SummaryStore};
use crate::summary::trigger::{Checker, TriggerState};
use crate::summary::TriggerCounters;
use crate::{ContextError, Message, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

// ── Builder ────────────────────────────────────────────────────────

pub struct SessionServiceBuilder {
    config: RecapConfig,
    summarizer: Option<Arc<dyn Summarizer>>,
    store: Option<Arc<dyn SummaryStore>>,
    token_counter: Option<Arc<dyn TokenCounter>>,
    checker: Option<Box<dyn Checker>>,
}

impl SessionServiceBuilder {
    /// Attach the model used for summaries. Without one, summaries are
    /// skipped and requests are tailored.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Defaults to [`InMemorySummaryStore`].
    pub fn with_store(mut self, store: Arc<dyn SummaryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to [`HeuristicTokenCounter`]. Used for both trigger token
    /// counts and tailoring.
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.token_counter = Some(counter);
        self
    }

    /// Replace the checker derived from the summary config.
    pub fn with_checker(mut self, checker: Box<dyn Checker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Validate the config and start the worker pool. Must be called inside
    /// a tokio runtime when a summarizer is attached.
    pub fn build(self) -> Result<SessionService> {
        let config = self.config;
        config.validate()?;
        let template = config.summary.config.prompt()?;

        let token_counter = self
            .token_counter
            .unwrap_or_else(|| Arc::new(HeuristicTokenCounter::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemorySummaryStore::new()));
        let checker = self
            .checker
            .unwrap_or_else(|| config.summary.config.checker());
        let counters = Arc::new(TriggerCounters::new());
        let sessions = Arc::new(SessionLog::new());

        let (executor, scheduler) = match self.summarizer {
            Some(summarizer) => {
                tokio::runtime::Handle::try_current().map_err(|_| {
                    ContextError::InvalidConfig(
                        "a summarizer requires a running tokio runtime".into(),
                    )
                })?;
                let executor = Arc::new(JobExecutor::new(
                    summarizer,
                    Arc::clone(&store),
                    Arc::clone(&sessions),
                    Arc::clone(&counters),
                    template,
                    config.scheduler.per_job_timeout(),
                ));
                let scheduler = SummaryScheduler::start(&config.scheduler, Arc::clone(&executor));
                (Some(executor), Some(scheduler))
            }
            None => (None, None),
        };

        let assembler = if config.summary.enabled && executor.is_some() {
            PromptAssembler::summary(config.summary.config.add_summary_to_prompt)
        } else {
            let tailor = Tailor::new(config.tailoring.strategy).with_counter(Arc::clone(&token_counter));
            PromptAssembler::tailoring(tailor, &config.tailoring)
        };

        Ok(SessionService {
            config,
            sessions,
            counters,
            checker,
            token_counter,
            store,
            executor,
            scheduler,
            assembler,
            warned_no_summarizer: AtomicBool::new(false),
        })
    }
}

// ── Service ────────────────────────────────────────────────────────

pub struct SessionService {
    config: RecapConfig,
    sessions: Arc<SessionLog>,
    counters: Arc<TriggerCounters>,
    checker: Box<dyn Checker>,
    token_counter: Arc<dyn TokenCounter>,
    store: Arc<dyn SummaryStore>,
    executor: Option<Arc<JobExecutor>>,
    scheduler: Option<SummaryScheduler>,
    assembler: PromptAssembler,
    warned_no_summarizer: AtomicBool,
}

impl SessionService {
    pub fn builder(config: RecapConfig) -> SessionServiceBuilder {
        SessionServiceBuilder {
            config,
            summarizer: None,
            store: None,
            token_counter: None,
            checker: None,
        }
    }

    pub fn config(&self) -> &RecapConfig {
        &self.config
    }

    /// Whether requests are built from summaries (as opposed to tailoring).
    pub fn summary_mode(&self) -> bool {
        self.assembler.uses_summary()
    }

    /// Append an event and evaluate the summary trigger for the whole
    /// session and for the event's branch. Returns the assigned event id.
    pub fn append_event(&self, key: &SessionKey, event: Event) -> Result<u64> {
        let tokens = self.token_counter.count_tokens(&event.message);
        let at = event.timestamp;
        let branch = event.branch.clone();

        let id = self.sessions.append(key, event);

        let mut scopes = vec![SummaryScope::session_wide(key.clone())];
        if !branch.is_empty() {
            scopes.push(SummaryScope::new(key.clone(), branch));
        }
        for scope in scopes {
            let state = self.counters.record_event(&scope, tokens, at);
            if self.config.summary.enabled && self.checker.should_summarize(&state) {
                debug!(
                    "Summary trigger fired for {scope}: {} events, {} tokens",
                    state.events_since_summary, state.tokens_since_summary
                );
                self.enqueue_scope(scope);
            }
        }
        Ok(id)
    }

    /// Events of a session in arrival order.
    pub fn events(&self, key: &SessionKey) -> Vec<Event> {
        self.sessions.events(key)
    }

    /// Forget a finished conversation: its event log and every trigger
    /// counter it owns. Stored summaries are kept. Returns whether the
    /// session was known.
    pub fn remove_session(&self, key: &SessionKey) -> bool {
        let removed = self.sessions.remove(key).is_some();
        let scopes = self.counters.forget_session(key);
        debug!("Removed session {key} ({scopes} trigger scopes)");
        removed || scopes > 0
    }

    pub fn trigger_state(&self, key: &SessionKey, filter_key: &str) -> TriggerState {
        self.counters
            .snapshot(&SummaryScope::new(key.clone(), filter_key))
    }

    /// Enqueue a summary job for `(key, filter_key)` without waiting.
    pub fn enqueue_summary_job(&self, key: &SessionKey, filter_key: &str) -> EnqueueOutcome {
        self.enqueue_scope(SummaryScope::new(key.clone(), filter_key))
    }

    fn enqueue_scope(&self, scope: SummaryScope) -> EnqueueOutcome {
        if !self.config.summary.enabled {
            return EnqueueOutcome::Skipped(SkipReason::Disabled);
        }
        let Some(scheduler) = &self.scheduler else {
            self.warn_no_summarizer();
            return EnqueueOutcome::Skipped(SkipReason::Disabled);
        };

        if !self.sessions.has_events(&scope.session, &scope.filter_key) {
            return EnqueueOutcome::Skipped(SkipReason::NothingToSummarize);
        }
        if !self
            .counters
            .begin_job(&scope, self.config.summary.config.single_flight)
        {
            debug!("Summary job already in flight for {scope}");
            return EnqueueOutcome::Skipped(SkipReason::InFlight);
        }
        let mut job = SummaryJob::new(scope);
        job.mark_tracked();
        scheduler.enqueue(job)
    }

    /// Request a summary. With `force`, run it now, bypassing the trigger,
    /// and return the stored result (`None` when there was nothing to
    /// summarize). Without `force`, enqueue a job if the trigger currently
    /// fires and return `None`.
    pub async fn create_session_summary(
        &self,
        key: &SessionKey,
        filter_key: &str,
        force: bool,
    ) -> Result<Option<SessionSummary>> {
        let Some(executor) = &self.executor else {
            self.warn_no_summarizer();
            return Err(ContextError::SummarizerNotConfigured);
        };
        let scope = SummaryScope::new(key.clone(), filter_key);

        if !force {
            if self.checker.should_summarize(&self.counters.snapshot(&scope)) {
                self.enqueue_scope(scope);
            }
            return Ok(None);
        }

        self.counters.begin_job(&scope, false);
        let mut job = SummaryJob::new(scope);
        job.mark_tracked();
        executor.run(job).await.into_result()
    }

    /// Text of the stored summary, `None` when there is none yet.
    pub async fn get_session_summary_text(&self, key: &SessionKey, filter_key: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .load(key, filter_key)
            .await?
            .map(|s| s.text))
    }

    /// Build the model-facing messages for the next request in
    /// `filter_key`'s scope.
    pub async fn build_request(
        &self,
        key: &SessionKey,
        filter_key: &str,
        system_prompt: Option<&str>,
    ) -> Result<Vec<Message>> {
        let summary = if self.assembler.includes_summary() {
            match self.store.load(key, filter_key).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!("Summary unavailable for {key} [{filter_key}], using raw history: {e}");
                    None
                }
            }
        } else {
            None
        };
        let boundary = summary.as_ref().map(|s| s.covered_until);
        let events = self.sessions.events_after(key, filter_key, boundary);
        Ok(self
            .assembler
            .assemble(system_prompt, summary.as_ref(), &events))
    }

    pub fn scheduler_stats(&self) -> Option<StatsSnapshot> {
        self.scheduler.as_ref().map(|s| s.stats())
    }

    /// Stop the worker pool, draining running jobs up to the grace period.
    pub async fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown().await;
        }
    }

    fn warn_no_summarizer(&self) {
        if !self.warned_no_summarizer.swap(true, Ordering::Relaxed) {
            warn!("Summary requested but no summarizer is configured; summaries are skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TailoringConfig;
    use crate::context::TailoringStrategy;
    use crate::summary::model::{FnSummarizer, SummaryOutput};
    use crate::summary::store::StoreFuture;
    use crate::MessageRole;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn key() -> SessionKey {
        SessionKey::new("app", "user", "s1")
    }

    fn counting_summarizer(calls: Arc<AtomicUsize>) -> Arc<dyn Summarizer> {
        Arc::new(FnSummarizer::new(move |prompt: String| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                let lines = prompt.matches("\n\n[").count();
                Ok(SummaryOutput::new(format!("summary #{n} of {lines} blocks")))
            }
        }))
    }

    async fn wait_for_summary(service: &SessionService, filter_key: &str) -> Option<String> {
        for _ in 0..100 {
            if let Some(text) = service.get_session_summary_text(&key(), filter_key).await.unwrap() {
                return Some(text);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn trigger_enqueues_and_request_uses_summary() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = SessionService::builder(RecapConfig::default().with_event_threshold(3))
            .with_summarizer(counting_summarizer(Arc::clone(&calls)))
            .build()
            .unwrap();
        assert!(service.summary_mode());

        for i in 0..4 {
            service
                .append_event(&key(), Event::new("user", Message::user(format!("msg {i}"))))
                .unwrap();
        }
        let text = wait_for_summary(&service, "").await.unwrap();
        assert!(text.starts_with("summary #1"));

        service
            .append_event(&key(), Event::new("user", Message::user("after")))
            .unwrap();
        let request = service.build_request(&key(), "", Some("sys")).await.unwrap();
        assert_eq!(request.len(), 3);
        assert_eq!(request[0].text(), "sys");
        assert!(request[1].text().contains("<context_summary>"));
        assert_eq!(request[2].text(), "after");
        assert_eq!(service.trigger_state(&key(), "").events_since_summary, 1);

        service.shutdown().await;
        assert_eq!(service.scheduler_stats().unwrap().succeeded, 1);
    }

    #[tokio::test]
    async fn branch_counters_are_separate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = SessionService::builder(RecapConfig::default().with_event_threshold(100))
            .with_summarizer(counting_summarizer(calls))
            .build()
            .unwrap();
        service
            .append_event(&key(), Event::new("a", Message::user("x")).with_branch("planner"))
            .unwrap();
        service
            .append_event(&key(), Event::new("b", Message::user("y")).with_branch("coder"))
            .unwrap();

        assert_eq!(service.trigger_state(&key(), "").events_since_summary, 2);
        assert_eq!(service.trigger_state(&key(), "planner").events_since_summary, 1);
        assert_eq!(service.trigger_state(&key(), "coder").events_since_summary, 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn forced_summary_is_scoped_to_filter_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = SessionService::builder(RecapConfig::default())
            .with_summarizer(counting_summarizer(Arc::clone(&calls)))
            .build()
            .unwrap();
        service
            .append_event(&key(), Event::new("a", Message::user("plan")).with_branch("planner"))
            .unwrap();
        service
            .append_event(&key(), Event::new("b", Message::user("code")).with_branch("coder"))
            .unwrap();

        let summary = service
            .create_session_summary(&key(), "planner", true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.covered_until, 1);
        assert_eq!(summary.text, "summary #1 of 1 blocks");
        assert!(service.get_session_summary_text(&key(), "coder").await.unwrap().is_none());

        // Nothing new since the summary: no model call.
        assert!(service
            .create_session_summary(&key(), "planner", true)
            .await
            .unwrap()
            .is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn without_summarizer_requests_are_tailored() {
        let config = RecapConfig::default()
            .with_event_threshold(0)
            .with_strategy(TailoringStrategy::TailOut, 12);
        let service = SessionService::builder(config).build().unwrap();
        assert!(!service.summary_mode());

        let long = "z".repeat(40);
        for i in 0..6 {
            let message = if i % 2 == 0 {
                Message::user(long.clone())
            } else {
                Message::assistant_text(long.clone())
            };
            service.append_event(&key(), Event::new("x", message)).unwrap();
        }

        let err = service.create_session_summary(&key(), "", true).await.unwrap_err();
        assert!(matches!(err, ContextError::SummarizerNotConfigured));
        assert!(matches!(
            service.enqueue_summary_job(&key(), ""),
            EnqueueOutcome::Skipped(SkipReason::Disabled)
        ));

        let request = service.build_request(&key(), "", Some("sys")).await.unwrap();
        assert_eq!(request.first().map(|m| m.role), Some(MessageRole::System));
        assert_eq!(request.last().map(|m| m.text()), Some(long));
        assert!(request.len() < 7);
    }

    #[tokio::test]
    async fn disabled_summaries_use_tailoring_even_with_summarizer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = RecapConfig::tailoring_only(TailoringConfig::default()).with_event_threshold(0);
        let service = SessionService::builder(config)
            .with_summarizer(counting_summarizer(Arc::clone(&calls)))
            .build()
            .unwrap();
        assert!(!service.summary_mode());
        service
            .append_event(&key(), Event::new("x", Message::user("hi")))
            .unwrap();
        service.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn single_flight_skips_second_job() {
        let slow: Arc<dyn Summarizer> = Arc::new(FnSummarizer::new(|_: String| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(SummaryOutput::new("slow"))
        }));
        let mut config = RecapConfig::default().with_event_threshold(100);
        config.summary.config.single_flight = true;
        let service = SessionService::builder(config)
            .with_summarizer(slow)
            .build()
            .unwrap();
        service
            .append_event(&key(), Event::new("x", Message::user("hi")))
            .unwrap();

        assert!(service.enqueue_summary_job(&key(), "").is_enqueued());
        assert!(matches!(
            service.enqueue_summary_job(&key(), ""),
            EnqueueOutcome::Skipped(SkipReason::InFlight)
        ));
        service.shutdown().await;
    }

    /// Store whose every call takes `delay`.
    struct SlowStore {
        inner: InMemorySummaryStore,
        delay: Duration,
    }

    impl SummaryStore for SlowStore {
        fn load<'a>(&'a self, key: &'a SessionKey, filter_key: &'a str) -> StoreFuture<'a, Option<SessionSummary>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.load(key, filter_key).await
            })
        }

        fn store<'a>(&'a self, key: &'a SessionKey, filter_key: &'a str, summary: SessionSummary) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.store(key, filter_key, summary).await
            })
        }
    }

    #[tokio::test]
    async fn append_does_not_wait_on_the_store() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(SlowStore {
            inner: InMemorySummaryStore::new(),
            delay: Duration::from_millis(500),
        });
        let service = SessionService::builder(RecapConfig::default().with_event_threshold(0))
            .with_summarizer(counting_summarizer(Arc::clone(&calls)))
            .with_store(store)
            .build()
            .unwrap();

        let started = std::time::Instant::now();
        for i in 0..3 {
            service
                .append_event(&key(), Event::new("user", Message::user(format!("msg {i}"))))
                .unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(100), "append waited on the store");

        let text = wait_for_summary(&service, "").await;
        assert!(text.is_some_and(|t| t.starts_with("summary #")));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn request_copies_only_events_after_the_summary() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = RecapConfig::default().with_event_threshold(100);
        let service = SessionService::builder(config.clone())
            .with_summarizer(counting_summarizer(Arc::clone(&calls)))
            .build()
            .unwrap();
        for text in ["one", "two", "three"] {
            service.append_event(&key(), Event::new("u", Message::user(text))).unwrap();
        }
        service.create_session_summary(&key(), "", true).await.unwrap();
        service.append_event(&key(), Event::new("u", Message::user("four"))).unwrap();

        let request = service.build_request(&key(), "", None).await.unwrap();
        let texts: Vec<String> = request.iter().map(|m| m.text()).collect();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("<context_summary>"));
        assert_eq!(texts[1], "four");
        service.shutdown().await;

        // With the summary kept out of the prompt every event is sent.
        config.summary.config.add_summary_to_prompt = false;
        let service = SessionService::builder(config)
            .with_summarizer(counting_summarizer(calls))
            .build()
            .unwrap();
        for text in ["one", "two"] {
            service.append_event(&key(), Event::new("u", Message::user(text))).unwrap();
        }
        service.create_session_summary(&key(), "", true).await.unwrap();
        let request = service.build_request(&key(), "", None).await.unwrap();
        assert_eq!(request.len(), 2);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn removed_session_is_forgotten() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = SessionService::builder(RecapConfig::default().with_event_threshold(100))
            .with_summarizer(counting_summarizer(calls))
            .build()
            .unwrap();
        service
            .append_event(&key(), Event::new("a", Message::user("x")).with_branch("planner"))
            .unwrap();
        service.create_session_summary(&key(), "", true).await.unwrap();

        assert!(service.remove_session(&key()));
        assert!(service.events(&key()).is_empty());
        assert_eq!(service.trigger_state(&key(), "planner"), TriggerState::default());
        assert!(matches!(
            service.enqueue_summary_job(&key(), ""),
            EnqueueOutcome::Skipped(SkipReason::NothingToSummarize)
        ));
        // Stored summaries outlive the in-memory log.
        assert!(service.get_session_summary_text(&key(), "").await.unwrap().is_some());
        assert!(!service.remove_session(&key()));

        // Ids restart for a session appended again under the same key.
        let id = service.append_event(&key(), Event::new("a", Message::user("y"))).unwrap();
        assert_eq!(id, 1);
        service.shutdown().await;
    }

    #[test]
    fn build_without_runtime_fails_only_with_summarizer() {
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(SessionService::builder(RecapConfig::default()).build().is_ok());
        let err = SessionService::builder(RecapConfig::default())
            .with_summarizer(counting_summarizer(calls))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ContextError::InvalidConfig(_)));
    }
}
