//! Database schema and migrations for feedkeeper.
//!
//! This module contains all database migrations that will be applied
//! sequentially when the database is first opened or upgraded.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Feeds shared across subscribers, one row per URL
    r#"
CREATE TABLE feeds (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    url                 TEXT NOT NULL UNIQUE,
    title               TEXT,
    description         TEXT,
    site_url            TEXT,
    language            TEXT,
    icon_url            TEXT,
    etag                TEXT,                -- opaque cache validator
    last_modified       TEXT,                -- opaque cache validator
    status              TEXT NOT NULL DEFAULT 'active',  -- 'active', 'error', 'disabled'
    error_count         INTEGER NOT NULL DEFAULT 0,
    fetch_error_message TEXT,
    last_fetched_at     TEXT,
    next_fetch_at       TEXT,
    last_entry_at       TEXT,
    version             INTEGER NOT NULL DEFAULT 0,      -- optimistic concurrency
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX idx_feeds_due ON feeds(status, next_fetch_at);
"#,
    // v2: Entries, deduplicated per feed by guid
    r#"
CREATE TABLE entries (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id      INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    guid         TEXT NOT NULL,
    url          TEXT,
    title        TEXT,
    author       TEXT,
    content      TEXT,
    summary      TEXT,
    published_at TEXT,
    created_at   TEXT NOT NULL,
    UNIQUE(feed_id, guid)
);

CREATE INDEX idx_entries_feed_published ON entries(feed_id, published_at);
"#,
];
