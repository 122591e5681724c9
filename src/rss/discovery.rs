//! Feed discovery from a user-supplied URL.

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::{FeedkeeperError, Result};
use crate::rss::fetcher::{FeedFetcher, FetchResult};
use crate::rss::parser::parse_feed;
use crate::rss::types::{CacheValidators, ParsedFeed};

const FEED_LINK_SELECTOR: &str = r#"link[rel~="alternate"][type="application/rss+xml"], link[rel~="alternate"][type="application/atom+xml"], link[rel~="alternate"][type="application/rdf+xml"]"#;

/// A feed located by [`discover_feed`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredFeed {
    /// URL of the feed document itself.
    pub url: String,
    /// Metadata read from the feed.
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
}

impl DiscoveredFeed {
    fn new(url: &str, parsed: ParsedFeed) -> Self {
        Self {
            url: url.to_string(),
            title: parsed.title,
            description: parsed.description,
            site_url: parsed.site_url,
            icon_url: parsed.icon_url,
        }
    }
}

/// Resolve `url` to a feed.
///
/// If the document at `url` is a feed it is returned as is. Otherwise the
/// document is treated as an HTML page and its advertised feeds are tried in
/// order.
pub async fn discover_feed(fetcher: &dyn FeedFetcher, url: &str) -> Result<DiscoveredFeed> {
    let body = fetch_body(fetcher, url).await?;
    let parse_error = match parse_feed(&body, url) {
        Ok(parsed) => return Ok(DiscoveredFeed::new(url, parsed)),
        Err(e) => e,
    };

    let html = String::from_utf8_lossy(&body);
    let candidates = find_feed_links(&html, url);
    if candidates.is_empty() {
        debug!("{} is neither a feed nor advertises one", url);
        return Err(parse_error);
    }

    for candidate in candidates {
        debug!("Trying advertised feed {}", candidate);
        let body = match fetch_body(fetcher, &candidate).await {
            Ok(body) => body,
            Err(e) => {
                debug!("Advertised feed {} failed: {}", candidate, e);
                continue;
            }
        };
        if let Ok(parsed) = parse_feed(&body, &candidate) {
            return Ok(DiscoveredFeed::new(&candidate, parsed));
        }
    }

    Err(FeedkeeperError::NotFound(format!("feed at {url}")))
}

async fn fetch_body(fetcher: &dyn FeedFetcher, url: &str) -> Result<Vec<u8>> {
    match fetcher.fetch(url, &CacheValidators::default()).await? {
        FetchResult::Content { body, .. } => Ok(body),
        // Only possible with validators, which discovery never sends.
        FetchResult::NotModified => Err(FeedkeeperError::HttpStatus { status: 304 }),
    }
}

/// Feed URLs advertised by an HTML page, absolute and in document order.
pub fn find_feed_links(html: &str, page_url: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(FEED_LINK_SELECTOR) else {
        return Vec::new();
    };
    let base = Url::parse(page_url).ok();
    let document = Html::parse_document(html);

    let mut links: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() {
            continue;
        }
        let resolved = match &base {
            Some(base) => base.join(href).map(String::from).ok(),
            None => Url::parse(href).map(String::from).ok(),
        };
        if let Some(resolved) = resolved {
            if !links.contains(&resolved) {
                links.push(resolved);
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    const PAGE: &str = r#"<!DOCTYPE html>
<html><head>
  <title>Blog</title>
  <link rel="stylesheet" href="/style.css">
  <link rel="alternate" type="application/rss+xml" title="RSS" href="/feed.xml">
  <link rel="alternate" type="application/atom+xml" href="https://blog.example.com/atom.xml">
  <link rel="alternate" type="text/html" hreflang="fr" href="/fr/">
  <link rel="alternate" type="application/rss+xml" href="/feed.xml">
</head><body><p>Hello</p></body></html>"#;

    const RSS: &str = r#"<rss version="2.0"><channel>
  <title>Blog feed</title>
  <link>https://blog.example.com/</link>
  <description>Posts</description>
  <item><guid>1</guid><title>First</title></item>
</channel></rss>"#;

    struct MapFetcher {
        bodies: HashMap<String, String>,
    }

    impl MapFetcher {
        fn new(bodies: &[(&str, &str)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.to_string()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl FeedFetcher for MapFetcher {
        async fn fetch(&self, url: &str, _validators: &CacheValidators) -> Result<FetchResult> {
            match self.bodies.get(url) {
                Some(body) => Ok(FetchResult::Content {
                    body: body.as_bytes().to_vec(),
                    validators: CacheValidators::default(),
                }),
                None => Err(FeedkeeperError::HttpStatus { status: 404 }),
            }
        }
    }

    #[test]
    fn test_find_feed_links() {
        let links = find_feed_links(PAGE, "https://blog.example.com/posts/");
        assert_eq!(
            links,
            vec![
                "https://blog.example.com/feed.xml".to_string(),
                "https://blog.example.com/atom.xml".to_string(),
            ]
        );
    }

    #[test]
    fn test_find_feed_links_none() {
        let html = "<html><head><title>x</title></head><body></body></html>";
        assert!(find_feed_links(html, "https://example.com/").is_empty());
    }

    #[tokio::test]
    async fn test_discover_direct_feed() {
        let fetcher = MapFetcher::new(&[("https://blog.example.com/feed.xml", RSS)]);
        let found = discover_feed(&fetcher, "https://blog.example.com/feed.xml")
            .await
            .unwrap();
        assert_eq!(found.url, "https://blog.example.com/feed.xml");
        assert_eq!(found.title.as_deref(), Some("Blog feed"));
        assert_eq!(found.description.as_deref(), Some("Posts"));
        assert_eq!(
            found.icon_url.as_deref(),
            Some("https://www.google.com/s2/favicons?domain=blog.example.com&sz=64")
        );
    }

    #[tokio::test]
    async fn test_discover_through_html_page() {
        let fetcher = MapFetcher::new(&[
            ("https://blog.example.com/", PAGE),
            ("https://blog.example.com/feed.xml", RSS),
        ]);
        let found = discover_feed(&fetcher, "https://blog.example.com/")
            .await
            .unwrap();
        assert_eq!(found.url, "https://blog.example.com/feed.xml");
        assert_eq!(found.site_url.as_deref(), Some("https://blog.example.com/"));
    }

    #[tokio::test]
    async fn test_discover_skips_broken_candidates() {
        // /feed.xml is missing, atom.xml works
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>Atom</title></feed>"#;
        let fetcher = MapFetcher::new(&[
            ("https://blog.example.com/", PAGE),
            ("https://blog.example.com/atom.xml", atom),
        ]);
        let found = discover_feed(&fetcher, "https://blog.example.com/")
            .await
            .unwrap();
        assert_eq!(found.url, "https://blog.example.com/atom.xml");
        assert_eq!(found.title.as_deref(), Some("Atom"));
    }

    #[tokio::test]
    async fn test_discover_plain_page_fails() {
        let fetcher = MapFetcher::new(&[("https://example.com/", "<html><body>hi</body></html>")]);
        let result = discover_feed(&fetcher, "https://example.com/").await;
        assert!(matches!(result, Err(FeedkeeperError::Parse(_))));
    }

    #[tokio::test]
    async fn test_discover_unreachable() {
        let fetcher = MapFetcher::new(&[]);
        let result = discover_feed(&fetcher, "https://example.com/").await;
        assert!(matches!(
            result,
            Err(FeedkeeperError::HttpStatus { status: 404 })
        ));
    }
}
