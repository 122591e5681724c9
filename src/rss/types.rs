//! Feed and entry types for feedkeeper.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::rss::sanitize::strip_html;
use crate::FeedkeeperError;

/// Minutes between fetches of a healthy feed.
pub const DEFAULT_FETCH_INTERVAL_MINUTES: i64 = 15;

/// Consecutive failures before a feed moves to the error state.
pub const MAX_CONSECUTIVE_ERRORS: i32 = 10;

/// Default length of plain-text excerpts, in characters.
pub const DEFAULT_EXCERPT_LENGTH: usize = 200;

/// Health status of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedStatus {
    /// Polled on schedule.
    #[default]
    Active,
    /// Too many consecutive failures; only polled on demand.
    Error,
    /// Never polled.
    Disabled,
}

impl FeedStatus {
    /// Value stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Active => "active",
            FeedStatus::Error => "error",
            FeedStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for FeedStatus {
    type Err = FeedkeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(FeedStatus::Active),
            "error" => Ok(FeedStatus::Error),
            "disabled" => Ok(FeedStatus::Disabled),
            other => Err(FeedkeeperError::Validation(format!(
                "unknown feed status: {other}"
            ))),
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP cache validators remembered between fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    /// `ETag` response header.
    pub etag: Option<String>,
    /// `Last-Modified` response header.
    pub last_modified: Option<String>,
}

impl CacheValidators {
    /// Whether neither validator is present.
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A feed shared by every subscriber of its URL.
#[derive(Debug, Clone)]
pub struct Feed {
    /// Feed ID.
    pub id: i64,
    /// Feed URL.
    pub url: String,
    /// Feed title.
    pub title: Option<String>,
    /// Feed description.
    pub description: Option<String>,
    /// Site URL (the website the feed belongs to).
    pub site_url: Option<String>,
    /// Declared language.
    pub language: Option<String>,
    /// Icon or favicon URL.
    pub icon_url: Option<String>,
    /// Last `ETag` returned by the origin.
    pub etag: Option<String>,
    /// Last `Last-Modified` returned by the origin.
    pub last_modified: Option<String>,
    /// Health status.
    pub status: FeedStatus,
    /// Number of consecutive fetch failures.
    pub error_count: i32,
    /// Message of the last fetch failure.
    pub fetch_error_message: Option<String>,
    /// When the feed was last fetched, successfully or not.
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// When the feed is next due.
    pub next_fetch_at: Option<DateTime<Utc>>,
    /// Newest `published_at` among stored entries.
    pub last_entry_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped on every write.
    pub version: i64,
    /// When the feed was created.
    pub created_at: DateTime<Utc>,
    /// When the feed was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Feed {
    /// Validators to send with the next conditional request.
    pub fn cache_validators(&self) -> CacheValidators {
        CacheValidators {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }

    /// Remember validators from a fresh response.
    ///
    /// Absent validators leave the stored ones in place.
    pub fn store_validators(&mut self, validators: &CacheValidators) {
        if validators.etag.is_some() {
            self.etag = validators.etag.clone();
        }
        if validators.last_modified.is_some() {
            self.last_modified = validators.last_modified.clone();
        }
    }

    /// Copy display metadata from a parse, skipping empty values.
    pub fn apply_metadata(&mut self, parsed: &ParsedFeed) {
        replace_if_present(&mut self.title, &parsed.title);
        replace_if_present(&mut self.description, &parsed.description);
        replace_if_present(&mut self.site_url, &parsed.site_url);
        replace_if_present(&mut self.language, &parsed.language);
        replace_if_present(&mut self.icon_url, &parsed.icon_url);
    }

    /// Raise `last_entry_at` if `candidate` is newer.
    pub fn raise_watermark(&mut self, candidate: Option<DateTime<Utc>>) {
        if let Some(candidate) = candidate {
            if self.last_entry_at.map_or(true, |current| candidate > current) {
                self.last_entry_at = Some(candidate);
            }
        }
    }
}

fn replace_if_present(target: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value {
        if !value.trim().is_empty() {
            *target = Some(value.clone());
        }
    }
}

/// New feed for creation.
#[derive(Debug, Clone)]
pub struct NewFeed {
    /// Feed URL.
    pub url: String,
    /// Seed title.
    pub title: Option<String>,
    /// Seed description.
    pub description: Option<String>,
    /// Seed site URL.
    pub site_url: Option<String>,
    /// Seed icon URL.
    pub icon_url: Option<String>,
}

impl NewFeed {
    /// Create a new feed.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            site_url: None,
            icon_url: None,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

}

/// A stored entry (article).
#[derive(Debug, Clone)]
pub struct Entry {
    /// Entry ID.
    pub id: i64,
    /// Feed ID this entry belongs to.
    pub feed_id: i64,
    /// Deduplication key within the feed.
    pub guid: String,
    /// Link to the original article.
    pub url: Option<String>,
    /// Entry title.
    pub title: Option<String>,
    /// Author name.
    pub author: Option<String>,
    /// Full content, or the summary when the feed carries no content.
    pub content: Option<String>,
    /// Summary as published.
    pub summary: Option<String>,
    /// When the entry was published.
    pub published_at: Option<DateTime<Utc>>,
    /// When the entry was stored.
    pub created_at: DateTime<Utc>,
}

impl Entry {
    /// Plain-text excerpt of the content (or summary) for display.
    pub fn excerpt(&self, max_length: usize) -> Option<String> {
        strip_html(self.content.as_deref(), max_length)
            .or_else(|| strip_html(self.summary.as_deref(), max_length))
    }
}

/// New entry for creation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    /// Feed ID.
    pub feed_id: i64,
    /// Deduplication key.
    pub guid: String,
    /// Link to the original article.
    pub url: Option<String>,
    /// Entry title.
    pub title: Option<String>,
    /// Author name.
    pub author: Option<String>,
    /// Content.
    pub content: Option<String>,
    /// Summary.
    pub summary: Option<String>,
    /// When the entry was published.
    pub published_at: Option<DateTime<Utc>>,
}

impl NewEntry {
    /// Build an entry for `feed_id` from a parsed entry.
    pub fn from_parsed(feed_id: i64, parsed: ParsedEntry) -> Self {
        Self {
            feed_id,
            guid: parsed.guid,
            url: parsed.url,
            title: parsed.title,
            author: parsed.author,
            content: parsed.content,
            summary: parsed.summary,
            published_at: parsed.published_at,
        }
    }
}

/// Parsed feed data (from parser).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    /// Feed title.
    pub title: Option<String>,
    /// Feed description or subtitle.
    pub description: Option<String>,
    /// Site URL.
    pub site_url: Option<String>,
    /// Declared language.
    pub language: Option<String>,
    /// Explicit icon, or a favicon derived from the site URL.
    pub icon_url: Option<String>,
    /// Entries in document order.
    pub entries: Vec<ParsedEntry>,
}

/// Parsed entry data (from parser).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedEntry {
    /// Id element, else link, else empty.
    pub guid: String,
    /// Link to the original article.
    pub url: Option<String>,
    /// Entry title.
    pub title: Option<String>,
    /// Author name.
    pub author: Option<String>,
    /// First content block, else the summary.
    pub content: Option<String>,
    /// Summary.
    pub summary: Option<String>,
    /// Published date, else updated date.
    pub published_at: Option<DateTime<Utc>>,
}

/// Pick the deduplication key for an entry.
///
/// The id element wins; the link is the fallback; an entry with neither gets
/// the empty string, so at most one such entry is kept per feed.
pub fn resolve_guid(id: Option<&str>, link: Option<&str>) -> String {
    id.map(str::trim)
        .filter(|id| !id.is_empty())
        .or_else(|| link.map(str::trim).filter(|link| !link.is_empty()))
        .unwrap_or_default()
        .to_string()
}
