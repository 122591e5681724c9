//! Collaborators injected into the fetch pipeline.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::rss::types::{Feed, NewEntry};

/// Persistence boundary of the pipeline.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Read a feed by ID.
    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>>;

    /// IDs of active feeds that are due at `now`, least recently scheduled first.
    async fn due_feed_ids(&self, now: DateTime<Utc>) -> Result<Vec<i64>>;

    /// Whether an entry with this guid is already stored for the feed.
    async fn entry_exists(&self, feed_id: i64, guid: &str) -> Result<bool>;

    /// Write the feed row and insert `entries` in one transaction.
    ///
    /// The write only applies if the stored `version` still equals
    /// `feed.version`; otherwise nothing is written and `Conflict` is returned.
    /// Returns the number of entries actually inserted.
    async fn commit(&self, feed: &Feed, entries: &[NewEntry]) -> Result<usize>;
}

/// Inbound dispatch of fetch jobs.
#[async_trait]
pub trait FetchQueue: Send + Sync {
    /// Schedule a fetch of `feed_id` as soon as a worker is free.
    async fn enqueue(&self, feed_id: i64) -> Result<()>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut current) = self.now.lock() {
            *current = now;
        }
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.now.lock() {
            *current += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
