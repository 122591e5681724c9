//! Feed service for feedkeeper.
//!
//! This module provides the operations the surrounding application calls:
//! subscribing to a URL, requesting refreshes, clearing or disabling a feed
//! and reading its entries.

use tracing::{debug, info};

use crate::db::Database;
use crate::rss::discovery::discover_feed;
use crate::rss::fetcher::{validate_url, FeedFetcher};
use crate::rss::ports::FetchQueue;
use crate::rss::repository::{EntryRepository, FeedRepository};
use crate::rss::types::{Entry, Feed, FeedStatus, NewFeed};
use crate::{FeedkeeperError, Result};

/// Maximum entries returned by one [`FeedService::list_entries`] call.
pub const MAX_PAGE_SIZE: i64 = 200;

/// Service for feed operations.
pub struct FeedService<'a> {
    db: &'a Database,
    fetcher: &'a dyn FeedFetcher,
    queue: &'a dyn FetchQueue,
}

impl<'a> FeedService<'a> {
    /// Create a new FeedService.
    pub fn new(db: &'a Database, fetcher: &'a dyn FeedFetcher, queue: &'a dyn FetchQueue) -> Self {
        Self { db, fetcher, queue }
    }

    /// Subscribe to `url` and schedule an immediate fetch.
    ///
    /// The URL may point at a feed or at a page advertising one. When
    /// discovery fails the URL is stored as given and the first fetch decides.
    /// Subscribing to a URL that already has a feed row returns that row.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an absolute http(s) URL.
    pub async fn subscribe(&self, url: &str, title: Option<&str>) -> Result<Feed> {
        let url = url.trim();
        if url.is_empty() {
            return Err(FeedkeeperError::Validation("feed URL is empty".to_string()));
        }
        validate_url(url, true)?;

        let mut new_feed = match discover_feed(self.fetcher, url).await {
            Ok(found) => {
                debug!("Discovered feed {} from {}", found.url, url);
                let mut new_feed = NewFeed::new(found.url);
                new_feed.title = found.title;
                new_feed.description = found.description;
                new_feed.site_url = found.site_url;
                new_feed.icon_url = found.icon_url;
                new_feed
            }
            Err(e) => {
                debug!("Discovery failed for {}: {}", url, e);
                NewFeed::new(url)
            }
        };
        if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
            new_feed = new_feed.with_title(title);
        }

        let (feed, created) = FeedRepository::new(self.db.pool())
            .get_or_create(&new_feed)
            .await?;
        if created {
            info!("Subscribed to new feed {} ({})", feed.id, feed.url);
        }

        self.queue.enqueue(feed.id).await?;
        Ok(feed)
    }

    /// Get a feed by ID.
    pub async fn get_feed(&self, feed_id: i64) -> Result<Feed> {
        FeedRepository::new(self.db.pool())
            .get_by_id(feed_id)
            .await?
            .ok_or_else(|| FeedkeeperError::NotFound(format!("feed {feed_id}")))
    }

    /// List all feeds.
    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        FeedRepository::new(self.db.pool()).list_all().await
    }

    /// Fetch a feed now, regardless of its schedule or error state.
    ///
    /// A successful fetch brings a feed in the error state back to active.
    pub async fn refresh(&self, feed_id: i64) -> Result<()> {
        let feed = self.get_feed(feed_id).await?;
        if feed.status == FeedStatus::Disabled {
            return Err(FeedkeeperError::Validation(format!(
                "feed {feed_id} is disabled"
            )));
        }
        self.queue.enqueue(feed.id).await
    }

    /// Queue every feed that is not disabled. Returns how many were queued.
    pub async fn refresh_all(&self) -> Result<usize> {
        let feeds = self.list_feeds().await?;
        let mut count = 0;
        for feed in feeds.iter().filter(|f| f.status != FeedStatus::Disabled) {
            self.queue.enqueue(feed.id).await?;
            count += 1;
        }
        info!("Queued {} feed(s) for refresh", count);
        Ok(count)
    }

    /// Clear the error state of a feed so the next sweep picks it up.
    ///
    /// This also re-enables a disabled feed.
    pub async fn reset_error(&self, feed_id: i64) -> Result<Feed> {
        let mut feed = self.get_feed(feed_id).await?;
        feed.reset_health();
        FeedRepository::new(self.db.pool()).commit(&feed, &[]).await?;
        info!("Reset error state of feed {}", feed_id);
        self.get_feed(feed_id).await
    }

    /// Stop polling a feed.
    pub async fn disable(&self, feed_id: i64) -> Result<Feed> {
        let mut feed = self.get_feed(feed_id).await?;
        feed.status = FeedStatus::Disabled;
        FeedRepository::new(self.db.pool()).commit(&feed, &[]).await?;
        info!("Disabled feed {}", feed_id);
        self.get_feed(feed_id).await
    }

    /// List entries of a feed, newest first.
    pub async fn list_entries(&self, feed_id: i64, limit: i64, offset: i64) -> Result<Vec<Entry>> {
        self.get_feed(feed_id).await?;
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = offset.max(0);
        EntryRepository::new(self.db.pool())
            .list_by_feed(feed_id, limit, offset)
            .await
    }
}
