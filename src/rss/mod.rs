//! Feed ingestion pipeline for feedkeeper.
//!
//! This module fetches RSS/Atom feeds, parses them, stores new entries and
//! keeps per-feed health and schedule state.

pub mod discovery;
pub mod dispatcher;
pub mod fetcher;
pub mod health;
pub mod orchestrator;
pub mod parser;
pub mod ports;
pub mod reconciler;
pub mod repository;
pub mod sanitize;
pub mod scheduler;
pub mod service;
pub mod types;

pub use discovery::{discover_feed, find_feed_links, DiscoveredFeed};
pub use dispatcher::{start_dispatcher, DispatchQueue, Dispatcher};
pub use fetcher::{validate_url, FeedFetcher, FetchResult, HttpFetcher};
pub use health::FetchPolicy;
pub use orchestrator::{FetchOrchestrator, FetchReport, Outcome, SkipReason};
pub use parser::{derive_favicon, parse_feed};
pub use ports::{Clock, FeedStore, FetchQueue, ManualClock, SystemClock};
pub use reconciler::{reconcile, ReconcileSummary};
pub use repository::{EntryRepository, FeedRepository};
pub use sanitize::strip_html;
pub use scheduler::{start_scheduler, FeedScheduler, DEFAULT_SWEEP_INTERVAL_SECS};
pub use service::FeedService;
pub use types::{
    resolve_guid, CacheValidators, Entry, Feed, FeedStatus, NewEntry, NewFeed, ParsedEntry,
    ParsedFeed, DEFAULT_EXCERPT_LENGTH, DEFAULT_FETCH_INTERVAL_MINUTES, MAX_CONSECUTIVE_ERRORS,
};
