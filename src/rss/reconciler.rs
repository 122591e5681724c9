//! Merge a parsed document into stored feed state.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;
use crate::rss::health::FetchPolicy;
use crate::rss::ports::FeedStore;
use crate::rss::types::{CacheValidators, Feed, NewEntry, ParsedFeed};

/// What a reconcile pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Entries inserted by this pass.
    pub new_entry_count: usize,
    /// Entries present in the document.
    pub total_parsed_count: usize,
}

/// Persist the new entries of `parsed` and the refreshed state of `feed`.
///
/// Entries whose guid is already stored (or repeated earlier in the same
/// document) are skipped. The feed row and the inserts are committed together
/// against `feed.version`, so a concurrent writer makes this return `Conflict`
/// with nothing written.
pub async fn reconcile(
    store: &dyn FeedStore,
    feed: &Feed,
    mut parsed: ParsedFeed,
    validators: &CacheValidators,
    now: DateTime<Utc>,
    policy: &FetchPolicy,
) -> Result<ReconcileSummary> {
    let parsed_entries = std::mem::take(&mut parsed.entries);
    let total_parsed_count = parsed_entries.len();

    let mut seen = HashSet::new();
    let mut new_entries = Vec::new();
    for entry in parsed_entries {
        if !seen.insert(entry.guid.clone()) {
            continue;
        }
        if store.entry_exists(feed.id, &entry.guid).await? {
            continue;
        }
        new_entries.push(NewEntry::from_parsed(feed.id, entry));
    }

    let mut updated = feed.clone();
    updated.apply_metadata(&parsed);
    updated.raise_watermark(new_entries.iter().filter_map(|e| e.published_at).max());
    updated.store_validators(validators);
    updated.record_success(now, policy);

    let new_entry_count = store.commit(&updated, &new_entries).await?;

    debug!(
        "Feed {}: {} new of {} parsed entries",
        feed.id, new_entry_count, total_parsed_count
    );

    Ok(ReconcileSummary {
        new_entry_count,
        total_parsed_count,
    })
}
