//! Feed and entry repositories for feedkeeper.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::warn;

use super::ports::FeedStore;
use super::types::{Entry, Feed, FeedStatus, NewEntry, NewFeed};
use crate::datetime::{from_db, to_db};
use crate::db::{Database, DbPool};
use crate::{FeedkeeperError, Result};

const FEED_COLUMNS: &str = r#"
    id, url, title, description, site_url, language, icon_url, etag, last_modified,
    status, error_count, fetch_error_message, last_fetched_at, next_fetch_at,
    last_entry_at, version, created_at, updated_at
"#;

const ENTRY_COLUMNS: &str = r#"
    id, feed_id, guid, url, title, author, content, summary, published_at, created_at
"#;

/// Row type for feed from database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    url: String,
    title: Option<String>,
    description: Option<String>,
    site_url: Option<String>,
    language: Option<String>,
    icon_url: Option<String>,
    etag: Option<String>,
    last_modified: Option<String>,
    status: String,
    error_count: i32,
    fetch_error_message: Option<String>,
    last_fetched_at: Option<String>,
    next_fetch_at: Option<String>,
    last_entry_at: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        // An unreadable status must not put the feed back into rotation.
        let status = row.status.parse().unwrap_or_else(|e| {
            warn!("Feed {} treated as disabled: {}", row.id, e);
            FeedStatus::Disabled
        });
        Feed {
            id: row.id,
            url: row.url,
            title: row.title,
            description: row.description,
            site_url: row.site_url,
            language: row.language,
            icon_url: row.icon_url,
            etag: row.etag,
            last_modified: row.last_modified,
            status,
            error_count: row.error_count,
            fetch_error_message: row.fetch_error_message,
            last_fetched_at: row.last_fetched_at.and_then(|s| from_db(&s)),
            next_fetch_at: row.next_fetch_at.and_then(|s| from_db(&s)),
            last_entry_at: row.last_entry_at.and_then(|s| from_db(&s)),
            version: row.version,
            created_at: from_db(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: from_db(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Row type for entry from database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct EntryRow {
    id: i64,
    feed_id: i64,
    guid: String,
    url: Option<String>,
    title: Option<String>,
    author: Option<String>,
    content: Option<String>,
    summary: Option<String>,
    published_at: Option<String>,
    created_at: String,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: row.id,
            feed_id: row.feed_id,
            guid: row.guid,
            url: row.url,
            title: row.title,
            author: row.author,
            content: row.content,
            summary: row.summary,
            published_at: row.published_at.and_then(|s| from_db(&s)),
            created_at: from_db(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Repository for feed operations.
pub struct FeedRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new feed.
    pub async fn create(&self, feed: &NewFeed) -> Result<Feed> {
        let now = to_db(&Utc::now());
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feeds (url, title, description, site_url, icon_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.description)
        .bind(&feed.site_url)
        .bind(&feed.icon_url)
        .bind(&now)
        .bind(&now)
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedkeeperError::NotFound(format!("feed {id}")))
    }

    /// Return the feed for `feed.url`, creating it when missing.
    ///
    /// The boolean is `true` when this call created the row.
    pub async fn get_or_create(&self, feed: &NewFeed) -> Result<(Feed, bool)> {
        let now = to_db(&Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO feeds (url, title, description, site_url, icon_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.description)
        .bind(&feed.site_url)
        .bind(&feed.icon_url)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await
        .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        let stored = self
            .get_by_url(&feed.url)
            .await?
            .ok_or_else(|| FeedkeeperError::NotFound(format!("feed {}", feed.url)))?;
        Ok((stored, result.rows_affected() > 0))
    }

    /// Get a feed by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        Ok(row.map(Feed::from))
    }

    /// Get a feed by URL.
    pub async fn get_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        Ok(row.map(Feed::from))
    }

    /// List all feeds (ordered by registration order).
    pub async fn list_all(&self) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY id ASC"
        ))
        .fetch_all(self.pool)
        .await
        .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// IDs of active feeds due at `now`. Never-scheduled feeds come first.
    pub async fn list_due_ids(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM feeds
            WHERE status = 'active'
              AND (next_fetch_at IS NULL OR next_fetch_at <= ?)
            ORDER BY next_fetch_at ASC, id ASC
            "#,
        )
        .bind(to_db(&now))
        .fetch_all(self.pool)
        .await
        .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        Ok(ids)
    }

    /// Write the feed row and insert new entries in one transaction.
    ///
    /// See [`FeedStore::commit`].
    pub async fn commit(&self, feed: &Feed, entries: &[NewEntry]) -> Result<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        let updated = update_feed_row(&mut tx, feed).await?;
        if updated == 0 {
            // Dropping the transaction rolls it back.
            return Err(FeedkeeperError::Conflict(format!(
                "feed {} changed since version {}",
                feed.id, feed.version
            )));
        }

        let mut inserted = 0;
        for entry in entries {
            inserted += insert_entry(&mut tx, entry).await?;
        }

        tx.commit()
            .await
            .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        Ok(inserted)
    }
}

async fn update_feed_row(conn: &mut SqliteConnection, feed: &Feed) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE feeds SET
            title = ?, description = ?, site_url = ?, language = ?, icon_url = ?,
            etag = ?, last_modified = ?, status = ?, error_count = ?,
            fetch_error_message = ?, last_fetched_at = ?, next_fetch_at = ?,
            last_entry_at = ?, version = version + 1, updated_at = ?
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(&feed.title)
    .bind(&feed.description)
    .bind(&feed.site_url)
    .bind(&feed.language)
    .bind(&feed.icon_url)
    .bind(&feed.etag)
    .bind(&feed.last_modified)
    .bind(feed.status.as_str())
    .bind(feed.error_count)
    .bind(&feed.fetch_error_message)
    .bind(feed.last_fetched_at.as_ref().map(to_db))
    .bind(feed.next_fetch_at.as_ref().map(to_db))
    .bind(feed.last_entry_at.as_ref().map(to_db))
    .bind(to_db(&Utc::now()))
    .bind(feed.id)
    .bind(feed.version)
    .execute(&mut *conn)
    .await
    .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

    Ok(result.rows_affected())
}

async fn insert_entry(conn: &mut SqliteConnection, entry: &NewEntry) -> Result<usize> {
    let result = sqlx::query(
        r#"
        INSERT INTO entries (feed_id, guid, url, title, author, content, summary,
                             published_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(feed_id, guid) DO NOTHING
        "#,
    )
    .bind(entry.feed_id)
    .bind(&entry.guid)
    .bind(&entry.url)
    .bind(&entry.title)
    .bind(&entry.author)
    .bind(&entry.content)
    .bind(&entry.summary)
    .bind(entry.published_at.as_ref().map(to_db))
    .bind(to_db(&Utc::now()))
    .execute(&mut *conn)
    .await
    .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

    Ok(result.rows_affected() as usize)
}

/// Repository for entry operations.
pub struct EntryRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> EntryRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Check whether a guid is already stored for the feed.
    pub async fn exists(&self, feed_id: i64, guid: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM entries WHERE feed_id = ? AND guid = ?)",
        )
        .bind(feed_id)
        .bind(guid)
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        Ok(exists)
    }

    /// Get an entry by its deduplication key.
    pub async fn get_by_guid(&self, feed_id: i64, guid: &str) -> Result<Option<Entry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE feed_id = ? AND guid = ?"
        ))
        .bind(feed_id)
        .bind(guid)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        Ok(row.map(Entry::from))
    }

    /// List entries of a feed, newest first. Undated entries come last.
    pub async fn list_by_feed(&self, feed_id: i64, limit: i64, offset: i64) -> Result<Vec<Entry>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM entries
            WHERE feed_id = ?
            ORDER BY published_at IS NULL, published_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(feed_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await
        .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    /// Count entries of a feed.
    pub async fn count_by_feed(&self, feed_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(self.pool)
            .await
            .map_err(|e| FeedkeeperError::Database(e.to_string()))?;

        Ok(count)
    }
}

#[async_trait]
impl FeedStore for Database {
    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        FeedRepository::new(self.pool()).get_by_id(feed_id).await
    }

    async fn due_feed_ids(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        FeedRepository::new(self.pool()).list_due_ids(now).await
    }

    async fn entry_exists(&self, feed_id: i64, guid: &str) -> Result<bool> {
        EntryRepository::new(self.pool()).exists(feed_id, guid).await
    }

    async fn commit(&self, feed: &Feed, entries: &[NewEntry]) -> Result<usize> {
        FeedRepository::new(self.pool()).commit(feed, entries).await
    }
}
