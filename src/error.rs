//! Error types for feedkeeper.

use thiserror::Error;

/// Common error type for feedkeeper.
#[derive(Error, Debug)]
pub enum FeedkeeperError {
    /// Database error.
    ///
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection error.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure, DNS failure, TLS failure or timeout while fetching.
    #[error("transport error: {0}")]
    Transport(String),

    /// The origin answered with a non-success status other than 304.
    #[error("HTTP error: status {status}")]
    HttpStatus { status: u16 },

    /// The document could not be parsed and yielded no entries.
    #[error("parse error: {0}")]
    Parse(String),

    /// The response body exceeded the configured size limit.
    #[error("feed too large: {size} bytes (max {max} bytes)")]
    FeedTooLarge { size: u64, max: u64 },

    /// Another writer changed the feed row while a fetch cycle was running.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The fetch dispatcher is no longer accepting jobs.
    #[error("dispatcher stopped")]
    Shutdown,
}

impl FeedkeeperError {
    /// Whether a fetch cycle failing with this error should be retried later.
    ///
    /// Transport, HTTP status and parse failures all share the same error
    /// budget on the feed row.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedkeeperError::Transport(_)
                | FeedkeeperError::HttpStatus { .. }
                | FeedkeeperError::Parse(_)
                | FeedkeeperError::FeedTooLarge { .. }
                | FeedkeeperError::Database(_)
                | FeedkeeperError::DatabaseConnection(_)
                | FeedkeeperError::Io(_)
        )
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for FeedkeeperError {
    fn from(e: sqlx::Error) -> Self {
        FeedkeeperError::Database(e.to_string())
    }
}

/// Result type alias for feedkeeper operations.
pub type Result<T> = std::result::Result<T, FeedkeeperError>;
