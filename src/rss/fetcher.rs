//! HTTP feed fetcher with conditional requests and security measures.
//!
//! This module performs conditional GET requests for feed documents with SSRF
//! protection and resource limits. It has no persistence side effects.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::FetcherConfig;
use crate::error::{FeedkeeperError, Result};
use crate::rss::types::CacheValidators;

/// Outcome of a fetch that reached the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// The origin answered 304; the stored copy is current.
    NotModified,
    /// A fresh document with the validators to store for next time.
    Content {
        body: Vec<u8>,
        validators: CacheValidators,
    },
}

/// Something that can retrieve a feed document.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch `url`, sending `validators` as conditional request headers.
    async fn fetch(&self, url: &str, validators: &CacheValidators) -> Result<FetchResult>;
}

/// Feed fetcher backed by reqwest.
pub struct HttpFetcher {
    client: Client,
    max_feed_size: u64,
    allow_private_hosts: bool,
}

impl HttpFetcher {
    /// Create a fetcher with the given settings.
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let max_redirects = config.max_redirects;
        let allow_private_hosts = config.allow_private_hosts;

        // A redirect must not smuggle the request onto an internal host.
        let redirect = Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                attempt.error("too many redirects")
            } else if let Err(e) = validate_url(attempt.url().as_str(), allow_private_hosts) {
                attempt.error(e.to_string())
            } else {
                attempt.follow()
            }
        });

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(redirect)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FeedkeeperError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
            allow_private_hosts,
        })
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, validators: &CacheValidators) -> Result<FetchResult> {
        validate_url(url, self.allow_private_hosts)?;

        let mut request = self.client.get(url);
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        debug!("Fetching {}", url);
        let mut response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("{} not modified", url);
            return Ok(FetchResult::NotModified);
        }
        if !status.is_success() {
            warn!("{} answered {}", url, status);
            return Err(FeedkeeperError::HttpStatus {
                status: status.as_u16(),
            });
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(FeedkeeperError::FeedTooLarge {
                    size: content_length,
                    max: self.max_feed_size,
                });
            }
        }

        let validators = response_validators(response.headers());

        // Read in chunks so a missing or lying Content-Length cannot exhaust memory.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            let size = (body.len() + chunk.len()) as u64;
            if size > self.max_feed_size {
                return Err(FeedkeeperError::FeedTooLarge {
                    size,
                    max: self.max_feed_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(FetchResult::Content { body, validators })
    }
}

fn transport_error(e: reqwest::Error) -> FeedkeeperError {
    if e.is_timeout() {
        FeedkeeperError::Transport(format!("request timed out: {}", e))
    } else if e.is_connect() {
        FeedkeeperError::Transport(format!("connection failed: {}", e))
    } else if e.is_redirect() {
        FeedkeeperError::Transport(format!("redirect rejected: {}", e))
    } else {
        FeedkeeperError::Transport(e.to_string())
    }
}

fn response_validators(headers: &HeaderMap) -> CacheValidators {
    let header = |name| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    CacheValidators {
        etag: header(ETAG),
        last_modified: header(LAST_MODIFIED),
    }
}

/// Validate a URL for SSRF protection.
///
/// This function checks that:
/// - The URL uses http or https scheme
/// - The host is not a private/loopback address (unless allowed)
/// - The host is not a reserved hostname (unless allowed)
pub fn validate_url(url: &str, allow_private_hosts: bool) -> Result<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| FeedkeeperError::Validation(format!("invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FeedkeeperError::Validation(format!(
                "unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| FeedkeeperError::Validation("URL has no host".to_string()))?;

    if allow_private_hosts {
        return Ok(());
    }

    match host {
        url::Host::Domain(domain) => {
            if is_forbidden_hostname(domain) {
                return Err(FeedkeeperError::Validation(format!(
                    "forbidden host: {}",
                    domain
                )));
            }
        }
        url::Host::Ipv4(ipv4) => {
            let ip = IpAddr::V4(ipv4);
            if is_private_ip(&ip) {
                return Err(FeedkeeperError::Validation(format!(
                    "private IP address not allowed: {}",
                    ip
                )));
            }
        }
        url::Host::Ipv6(ipv6) => {
            let ip = IpAddr::V6(ipv6);
            if is_private_ip(&ip) {
                return Err(FeedkeeperError::Validation(format!(
                    "private IP address not allowed: {}",
                    ip
                )));
            }
        }
    }

    Ok(())
}

/// Check if a hostname is forbidden.
fn is_forbidden_hostname(host: &str) -> bool {
    const FORBIDDEN_SUFFIXES: &[&str] = &[
        ".local",
        ".localhost",
        ".internal",
        ".intranet",
        ".corp",
        ".home",
        ".lan",
    ];

    let host = host.trim_end_matches('.').to_lowercase();
    host == "localhost"
        || FORBIDDEN_SUFFIXES
            .iter()
            .any(|suffix| host.ends_with(suffix))
}

/// Check if an IP address is private/reserved.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                || ipv4.is_documentation()
                // Carrier-grade NAT: 100.64.0.0/10
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        }
        IpAddr::V6(ipv6) => {
            if let Some(mapped) = ipv6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(mapped));
            }
            let first = ipv6.segments()[0];
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                // Unique local: fc00::/7
                || (first & 0xfe00) == 0xfc00
                // Link-local: fe80::/10
                || (first & 0xffc0) == 0xfe80
        }
    }
}
