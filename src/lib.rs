//! feedkeeper - RSS/Atom feed ingestion pipeline
//!
//! Polls feed URLs with conditional requests, parses RSS 2.0, RSS 1.0 and
//! Atom documents, stores new entries and tracks per-feed health.

pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod logging;
pub mod rss;

pub use config::Config;
pub use db::Database;
pub use error::{FeedkeeperError, Result};
