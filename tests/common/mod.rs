//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use wiremock::MockServer;

use feedkeeper::config::FetcherConfig;
use feedkeeper::rss::{FeedRepository, HttpFetcher, NewFeed};
use feedkeeper::Database;

/// RSS document with two dated items.
pub const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>https://example.com/</link>
    <description>Test description</description>
    <item>
      <title>Item 1</title>
      <link>https://example.com/1</link>
      <guid>1</guid>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
      <description>&lt;p&gt;First&lt;/p&gt;</description>
    </item>
    <item>
      <title>Item 2</title>
      <link>https://example.com/2</link>
      <guid>2</guid>
      <pubDate>Mon, 21 Oct 2024 08:00:00 GMT</pubDate>
      <description>Second</description>
    </item>
  </channel>
</rss>"#;

/// Fetcher settings that allow talking to the local mock server.
pub fn local_fetcher_config() -> FetcherConfig {
    FetcherConfig {
        timeout_secs: 5,
        allow_private_hosts: true,
        ..FetcherConfig::default()
    }
}

/// HTTP fetcher pointed at loopback servers.
pub fn local_fetcher() -> HttpFetcher {
    HttpFetcher::new(&local_fetcher_config()).unwrap()
}

/// Open a file database inside `dir`.
pub async fn open_db(dir: &Path) -> Database {
    Database::open(dir.join("feedkeeper.db")).await.unwrap()
}

/// Register a feed for `path` on the mock server and return its ID.
pub async fn create_feed(db: &Database, server: &MockServer, path: &str) -> i64 {
    FeedRepository::new(db.pool())
        .create(&NewFeed::new(format!("{}{}", server.uri(), path)))
        .await
        .unwrap()
        .id
}

/// Poll `done` until it holds, failing the test after five seconds.
pub async fn wait_until<F, Fut>(mut done: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if done().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
