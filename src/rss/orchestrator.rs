//! One fetch cycle per feed: fetch, parse, reconcile, record health.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{FeedkeeperError, Result};
use crate::rss::fetcher::{FeedFetcher, FetchResult};
use crate::rss::health::FetchPolicy;
use crate::rss::parser::parse_feed;
use crate::rss::ports::{Clock, FeedStore, SystemClock};
use crate::rss::reconciler::{reconcile, ReconcileSummary};
use crate::rss::types::{Feed, FeedStatus};

/// Default delay before a failed job is retried.
pub const DEFAULT_RETRY_DEFER: Duration = Duration::from_secs(300);

/// Why a cycle ended without doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The feed is disabled.
    Disabled,
    /// Another cycle for the same feed is running in this process.
    InFlight,
    /// Another writer updated the feed first.
    Conflict,
}

/// Result of a completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReport {
    /// New content was reconciled.
    Updated(ReconcileSummary),
    /// The origin answered 304.
    NotModified,
    /// Nothing was done.
    Skipped(SkipReason),
}

/// How a cycle ended, as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(FetchReport),
    /// The failure was recorded on the feed; try again after `defer`.
    RetryableFailure { defer: Duration },
    /// Retrying cannot help.
    FatalFailure { reason: String },
}

/// Runs fetch cycles against injected collaborators.
pub struct FetchOrchestrator {
    store: Arc<dyn FeedStore>,
    fetcher: Arc<dyn FeedFetcher>,
    clock: Arc<dyn Clock>,
    policy: FetchPolicy,
    retry_defer: Duration,
    in_flight: Mutex<HashSet<i64>>,
}

impl FetchOrchestrator {
    /// Create an orchestrator with the wall clock and default policy.
    pub fn new(store: Arc<dyn FeedStore>, fetcher: Arc<dyn FeedFetcher>) -> Self {
        Self {
            store,
            fetcher,
            clock: Arc::new(SystemClock),
            policy: FetchPolicy::default(),
            retry_defer: DEFAULT_RETRY_DEFER,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Use a different clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different scheduling policy.
    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a different retry delay.
    pub fn with_retry_defer(mut self, retry_defer: Duration) -> Self {
        self.retry_defer = retry_defer;
        self
    }

    /// Take the retry delay from the dispatcher settings.
    pub fn with_dispatcher_config(self, config: &DispatcherConfig) -> Self {
        self.with_retry_defer(Duration::from_secs(config.retry_defer_secs))
    }

    /// The clock in use.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// IDs of the feeds due at `now`.
    pub async fn select_due_feeds(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        self.store.due_feed_ids(now).await
    }

    /// Run one cycle for `feed_id`.
    ///
    /// Errors never escape: they are written to the feed's health and mapped
    /// to an [`Outcome`].
    pub async fn run_fetch(&self, feed_id: i64) -> Outcome {
        let Some(_guard) = self.claim(feed_id) else {
            debug!("Feed {} already being fetched, skipping", feed_id);
            return Outcome::Success(FetchReport::Skipped(SkipReason::InFlight));
        };

        let feed = match self.store.get_feed(feed_id).await {
            Ok(Some(feed)) => feed,
            Ok(None) => {
                warn!("Feed {} not found, dropping fetch", feed_id);
                return Outcome::FatalFailure {
                    reason: format!("feed {feed_id} not found"),
                };
            }
            Err(e) => {
                error!("Failed to load feed {}: {}", feed_id, e);
                return self.failure_outcome(&e);
            }
        };

        if feed.status == FeedStatus::Disabled {
            debug!("Feed {} is disabled, skipping", feed_id);
            return Outcome::Success(FetchReport::Skipped(SkipReason::Disabled));
        }

        match self.cycle(&feed).await {
            Ok(report) => Outcome::Success(report),
            Err(FeedkeeperError::Conflict(msg)) => {
                info!("Dropping fetch of feed {}: {}", feed_id, msg);
                Outcome::Success(FetchReport::Skipped(SkipReason::Conflict))
            }
            Err(e) => self.record_failure(feed_id, e).await,
        }
    }

    async fn cycle(&self, feed: &Feed) -> Result<FetchReport> {
        let validators = feed.cache_validators();
        let fetched = self.fetcher.fetch(&feed.url, &validators).await?;
        let now = self.clock.now();

        match fetched {
            FetchResult::NotModified => {
                let mut updated = feed.clone();
                updated.record_poll(now, &self.policy);
                self.store.commit(&updated, &[]).await?;
                debug!("Feed {} not modified", feed.id);
                Ok(FetchReport::NotModified)
            }
            FetchResult::Content { body, validators } => {
                let parsed = parse_feed(&body, &feed.url)?;
                let summary = reconcile(
                    self.store.as_ref(),
                    feed,
                    parsed,
                    &validators,
                    now,
                    &self.policy,
                )
                .await?;
                if summary.new_entry_count > 0 {
                    info!(
                        "Feed {}: {} new entries",
                        feed.id, summary.new_entry_count
                    );
                }
                Ok(FetchReport::Updated(summary))
            }
        }
    }

    async fn record_failure(&self, feed_id: i64, cause: FeedkeeperError) -> Outcome {
        let message = cause.to_string();
        warn!("Failed to fetch feed {}: {}", feed_id, message);

        // Re-read so the failure is recorded on the current row.
        match self.store.get_feed(feed_id).await {
            Ok(Some(mut feed)) => {
                let was_active = feed.status == FeedStatus::Active;
                feed.record_failure(message.clone(), self.clock.now(), &self.policy);
                match self.store.commit(&feed, &[]).await {
                    Ok(_) => {
                        if was_active && feed.status == FeedStatus::Error {
                            warn!(
                                "Feed {} moved to error state after {} consecutive failures",
                                feed_id, feed.error_count
                            );
                        }
                    }
                    Err(FeedkeeperError::Conflict(msg)) => {
                        info!("Failure of feed {} superseded: {}", feed_id, msg);
                        return Outcome::Success(FetchReport::Skipped(SkipReason::Conflict));
                    }
                    Err(e) => error!("Failed to record failure of feed {}: {}", feed_id, e),
                }
            }
            Ok(None) => {
                return Outcome::FatalFailure {
                    reason: format!("feed {feed_id} not found"),
                };
            }
            Err(e) => error!("Failed to reload feed {}: {}", feed_id, e),
        }

        self.failure_outcome(&cause)
    }

    fn failure_outcome(&self, cause: &FeedkeeperError) -> Outcome {
        if cause.is_retryable() {
            Outcome::RetryableFailure {
                defer: self.retry_defer,
            }
        } else {
            Outcome::FatalFailure {
                reason: cause.to_string(),
            }
        }
    }

    fn claim(&self, feed_id: i64) -> Option<InFlightGuard<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if in_flight.insert(feed_id) {
            Some(InFlightGuard {
                set: &self.in_flight,
                feed_id,
            })
        } else {
            None
        }
    }
}

/// Releases the in-flight claim when the cycle ends, however it ends.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<i64>>,
    feed_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.feed_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::rss::ports::ManualClock;
    use crate::rss::repository::{EntryRepository, FeedRepository};
    use crate::rss::types::{CacheValidators, NewFeed};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::VecDeque;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example</title>
  <link>https://example.com/</link>
  <item><guid>1</guid><title>One</title><pubDate>Sat, 01 Feb 2025 10:00:00 GMT</pubDate></item>
  <item><guid>2</guid><title>Two</title></item>
</channel></rss>"#;

    /// Fetcher that replays scripted responses and records what it was sent.
    #[derive(Default)]
    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<FetchResult>>>,
        seen: Mutex<Vec<CacheValidators>>,
    }

    impl ScriptedFetcher {
        fn push(&self, response: Result<FetchResult>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn seen(&self) -> Vec<CacheValidators> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FeedFetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &str, validators: &CacheValidators) -> Result<FetchResult> {
            self.seen.lock().unwrap().push(validators.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FeedkeeperError::Transport("no response".to_string())))
        }
    }

    fn content(body: &str, etag: Option<&str>) -> Result<FetchResult> {
        Ok(FetchResult::Content {
            body: body.as_bytes().to_vec(),
            validators: CacheValidators {
                etag: etag.map(str::to_string),
                last_modified: None,
            },
        })
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap()
    }

    struct Harness {
        db: Database,
        fetcher: Arc<ScriptedFetcher>,
        clock: Arc<ManualClock>,
        orchestrator: FetchOrchestrator,
        feed_id: i64,
    }

    async fn harness() -> Harness {
        let db = Database::open_in_memory().await.unwrap();
        let feed = FeedRepository::new(db.pool())
            .create(&NewFeed::new("https://example.com/feed.xml"))
            .await
            .unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let clock = Arc::new(ManualClock::new(start()));
        let orchestrator = FetchOrchestrator::new(Arc::new(db.clone()), fetcher.clone())
            .with_clock(clock.clone());
        Harness {
            db,
            fetcher,
            clock,
            orchestrator,
            feed_id: feed.id,
        }
    }

    impl Harness {
        async fn feed(&self) -> Feed {
            FeedRepository::new(self.db.pool())
                .get_by_id(self.feed_id)
                .await
                .unwrap()
                .unwrap()
        }

        async fn entry_count(&self) -> i64 {
            EntryRepository::new(self.db.pool())
                .count_by_feed(self.feed_id)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_content_is_reconciled() {
        let h = harness().await;
        h.fetcher.push(content(RSS, Some("\"v1\"")));

        let outcome = h.orchestrator.run_fetch(h.feed_id).await;
        assert_eq!(
            outcome,
            Outcome::Success(FetchReport::Updated(ReconcileSummary {
                new_entry_count: 2,
                total_parsed_count: 2
            }))
        );

        let feed = h.feed().await;
        assert_eq!(feed.title.as_deref(), Some("Example"));
        assert_eq!(feed.etag.as_deref(), Some("\"v1\""));
        assert_eq!(feed.next_fetch_at, Some(start() + ChronoDuration::minutes(15)));
        assert_eq!(h.entry_count().await, 2);
    }

    #[tokio::test]
    async fn test_repeat_fetch_is_idempotent_and_sends_validators() {
        let h = harness().await;
        h.fetcher.push(content(RSS, Some("\"v1\"")));
        h.fetcher.push(content(RSS, Some("\"v1\"")));

        h.orchestrator.run_fetch(h.feed_id).await;
        let outcome = h.orchestrator.run_fetch(h.feed_id).await;

        assert_eq!(
            outcome,
            Outcome::Success(FetchReport::Updated(ReconcileSummary {
                new_entry_count: 0,
                total_parsed_count: 2
            }))
        );
        assert_eq!(h.entry_count().await, 2);

        let seen = h.fetcher.seen();
        assert!(seen[0].is_empty());
        assert_eq!(seen[1].etag.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn test_not_modified_only_moves_schedule() {
        let h = harness().await;
        let mut feed = h.feed().await;
        feed.error_count = 2;
        feed.fetch_error_message = Some("timeout".to_string());
        FeedRepository::new(h.db.pool()).commit(&feed, &[]).await.unwrap();
        h.fetcher.push(Ok(FetchResult::NotModified));

        let outcome = h.orchestrator.run_fetch(h.feed_id).await;
        assert_eq!(outcome, Outcome::Success(FetchReport::NotModified));

        let feed = h.feed().await;
        assert_eq!(feed.last_fetched_at, Some(start()));
        assert_eq!(feed.next_fetch_at, Some(start() + ChronoDuration::minutes(15)));
        assert_eq!(feed.error_count, 2);
        assert_eq!(feed.fetch_error_message.as_deref(), Some("timeout"));
        assert_eq!(h.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_failure_applies_backoff_and_is_retryable() {
        let h = harness().await;
        h.fetcher
            .push(Err(FeedkeeperError::HttpStatus { status: 503 }));

        let outcome = h.orchestrator.run_fetch(h.feed_id).await;
        assert_eq!(
            outcome,
            Outcome::RetryableFailure {
                defer: DEFAULT_RETRY_DEFER
            }
        );

        let feed = h.feed().await;
        assert_eq!(feed.error_count, 1);
        assert_eq!(feed.status, FeedStatus::Active);
        assert_eq!(
            feed.fetch_error_message.as_deref(),
            Some("HTTP error: status 503")
        );
        assert_eq!(feed.next_fetch_at, Some(start() + ChronoDuration::minutes(15)));
    }

    #[tokio::test]
    async fn test_tenth_failure_moves_to_error_and_success_recovers() {
        let h = harness().await;
        let mut expected = Vec::new();
        let mut delays = Vec::new();
        for _ in 0..10 {
            h.fetcher
                .push(Err(FeedkeeperError::Transport("connection refused".to_string())));
            h.orchestrator.run_fetch(h.feed_id).await;
            let feed = h.feed().await;
            delays.push((feed.next_fetch_at.unwrap() - h.clock.now()).num_minutes());
            expected.push(feed.status);
            h.clock.advance(ChronoDuration::minutes(1));
        }

        assert_eq!(delays, vec![15, 30, 60, 60, 60, 60, 60, 60, 60, 60]);
        assert!(expected[..9].iter().all(|s| *s == FeedStatus::Active));
        assert_eq!(expected[9], FeedStatus::Error);
        assert!(h
            .orchestrator
            .select_due_feeds(h.clock.now() + ChronoDuration::days(1))
            .await
            .unwrap()
            .is_empty());

        h.fetcher.push(content(RSS, None));
        h.orchestrator.run_fetch(h.feed_id).await;
        let feed = h.feed().await;
        assert_eq!(feed.status, FeedStatus::Active);
        assert_eq!(feed.error_count, 0);
    }

    #[tokio::test]
    async fn test_unparseable_body_counts_as_failure() {
        let h = harness().await;
        h.fetcher.push(content("<html><body>not a feed</body></html>", None));

        let outcome = h.orchestrator.run_fetch(h.feed_id).await;
        assert!(matches!(outcome, Outcome::RetryableFailure { .. }));
        let feed = h.feed().await;
        assert_eq!(feed.error_count, 1);
        assert!(feed.fetch_error_message.unwrap().starts_with("parse error"));
    }

    #[tokio::test]
    async fn test_rejected_url_is_fatal_but_recorded() {
        let h = harness().await;
        h.fetcher.push(Err(FeedkeeperError::Validation(
            "private IP address not allowed: 127.0.0.1".to_string(),
        )));

        let outcome = h.orchestrator.run_fetch(h.feed_id).await;
        assert!(matches!(outcome, Outcome::FatalFailure { .. }));
        assert_eq!(h.feed().await.error_count, 1);
    }

    #[tokio::test]
    async fn test_missing_feed_is_fatal() {
        let h = harness().await;
        let outcome = h.orchestrator.run_fetch(h.feed_id + 1000).await;
        assert!(matches!(outcome, Outcome::FatalFailure { .. }));
        assert!(h.fetcher.seen().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_feed_is_skipped_untouched() {
        let h = harness().await;
        let mut feed = h.feed().await;
        feed.status = FeedStatus::Disabled;
        FeedRepository::new(h.db.pool()).commit(&feed, &[]).await.unwrap();
        let before = h.feed().await;

        let outcome = h.orchestrator.run_fetch(h.feed_id).await;
        assert_eq!(
            outcome,
            Outcome::Success(FetchReport::Skipped(SkipReason::Disabled))
        );
        assert!(h.fetcher.seen().is_empty());
        assert_eq!(h.feed().await.version, before.version);
    }

    #[tokio::test]
    async fn test_in_flight_feed_is_skipped() {
        let h = harness().await;
        let guard = h.orchestrator.claim(h.feed_id);
        assert!(guard.is_some());

        let outcome = h.orchestrator.run_fetch(h.feed_id).await;
        assert_eq!(
            outcome,
            Outcome::Success(FetchReport::Skipped(SkipReason::InFlight))
        );
        assert!(h.fetcher.seen().is_empty());

        drop(guard);
        assert!(h.orchestrator.claim(h.feed_id).is_some());
    }

    /// Store wrapper that lets another writer bump the row mid-cycle.
    struct RacingStore {
        db: Database,
    }

    #[async_trait]
    impl FeedStore for RacingStore {
        async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
            self.db.get_feed(feed_id).await
        }

        async fn due_feed_ids(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
            self.db.due_feed_ids(now).await
        }

        async fn entry_exists(&self, feed_id: i64, guid: &str) -> Result<bool> {
            // The competing cycle commits between our read and our write.
            if let Some(feed) = self.db.get_feed(feed_id).await? {
                let _ = self.db.commit(&feed, &[]).await;
            }
            self.db.entry_exists(feed_id, guid).await
        }

        async fn commit(&self, feed: &Feed, entries: &[crate::rss::types::NewEntry]) -> Result<usize> {
            self.db.commit(feed, entries).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_writer_wins_and_cycle_is_dropped() {
        let db = Database::open_in_memory().await.unwrap();
        let feed = FeedRepository::new(db.pool())
            .create(&NewFeed::new("https://example.com/feed.xml"))
            .await
            .unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push(content(RSS, None));
        let orchestrator = FetchOrchestrator::new(
            Arc::new(RacingStore { db: db.clone() }),
            fetcher.clone(),
        );

        let outcome = orchestrator.run_fetch(feed.id).await;
        assert_eq!(
            outcome,
            Outcome::Success(FetchReport::Skipped(SkipReason::Conflict))
        );

        let stored = FeedRepository::new(db.pool()).get_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.error_count, 0);
        assert_eq!(stored.title, None);
        assert_eq!(
            EntryRepository::new(db.pool()).count_by_feed(feed.id).await.unwrap(),
            0
        );
    }
}
