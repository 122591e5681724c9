//! Per-feed health tracking and retry backoff.

use chrono::{DateTime, Duration, Utc};

use crate::config::SchedulerConfig;
use crate::rss::types::{Feed, FeedStatus, DEFAULT_FETCH_INTERVAL_MINUTES, MAX_CONSECUTIVE_ERRORS};

/// Scheduling rules applied after each fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Minutes until the next fetch after a successful cycle.
    pub fetch_interval_minutes: i64,
    /// Backoff after the first failure, in minutes.
    pub backoff_base_minutes: i64,
    /// Upper bound on the backoff, in minutes.
    pub backoff_max_minutes: i64,
    /// Largest exponent applied to the base backoff.
    pub backoff_max_exponent: u32,
    /// Consecutive failures that move a feed to the error state.
    pub max_consecutive_errors: i32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            fetch_interval_minutes: DEFAULT_FETCH_INTERVAL_MINUTES,
            backoff_base_minutes: 15,
            backoff_max_minutes: 60,
            backoff_max_exponent: 5,
            max_consecutive_errors: MAX_CONSECUTIVE_ERRORS,
        }
    }
}

impl From<&SchedulerConfig> for FetchPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            fetch_interval_minutes: config.fetch_interval_minutes,
            backoff_base_minutes: config.backoff_base_minutes,
            backoff_max_minutes: config.backoff_max_minutes,
            backoff_max_exponent: config.backoff_max_exponent,
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }
}

impl FetchPolicy {
    /// Minutes to wait after the `error_count`-th consecutive failure.
    ///
    /// `min(max, base * 2^min(error_count - 1, max_exponent))`, so the default
    /// policy yields 15, 30, 60, 60, ...
    pub fn retry_minutes(&self, error_count: i32) -> i64 {
        let exponent = (error_count.max(1) - 1) as u32;
        let exponent = exponent.min(self.backoff_max_exponent);
        let factor = 2i64.saturating_pow(exponent);
        self.backoff_base_minutes
            .saturating_mul(factor)
            .min(self.backoff_max_minutes)
    }

    /// Time of the next fetch after a successful cycle.
    pub fn next_fetch_after_success(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(self.fetch_interval_minutes)
    }
}

impl Feed {
    /// Record a cycle where the origin answered with usable content.
    pub fn record_success(&mut self, now: DateTime<Utc>, policy: &FetchPolicy) {
        self.status = FeedStatus::Active;
        self.error_count = 0;
        self.fetch_error_message = None;
        self.record_poll(now, policy);
    }

    /// Record a poll without touching health.
    pub fn record_poll(&mut self, now: DateTime<Utc>, policy: &FetchPolicy) {
        self.last_fetched_at = Some(now);
        self.next_fetch_at = Some(policy.next_fetch_after_success(now));
    }

    /// Record a failed cycle and push the next fetch out by the backoff.
    ///
    /// A feed reaching the error threshold moves to the error state and drops
    /// out of scheduled polling.
    pub fn record_failure(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
        policy: &FetchPolicy,
    ) {
        self.error_count = self.error_count.saturating_add(1);
        self.fetch_error_message = Some(message.into());
        self.last_fetched_at = Some(now);
        self.next_fetch_at = Some(now + Duration::minutes(policy.retry_minutes(self.error_count)));

        if self.error_count >= policy.max_consecutive_errors && self.status == FeedStatus::Active {
            self.status = FeedStatus::Error;
        }
    }

    /// Clear the error state so the scheduler picks the feed up right away.
    pub fn reset_health(&mut self) {
        self.status = FeedStatus::Active;
        self.error_count = 0;
        self.fetch_error_message = None;
        self.next_fetch_at = None;
    }
}
