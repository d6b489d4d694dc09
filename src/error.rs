//! Error types for feedwatch.

use thiserror::Error;

/// Common error type for feedwatch.
#[derive(Error, Debug)]
pub enum FeedwatchError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant automatically.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network fetch failure (timeout, DNS, non-success status).
    #[error("fetch error: {0}")]
    Http(String),

    /// Content could not be interpreted (feed XML, HTML, JSON).
    #[error("parse error: {0}")]
    Parse(String),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// YouTube Data API error.
    #[error("YouTube API error: {0}")]
    YouTube(String),

    /// Fetch refused by the politeness gate.
    #[error("blocked: {0}")]
    Blocked(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for FeedwatchError {
    fn from(e: sqlx::Error) -> Self {
        FeedwatchError::Database(e.to_string())
    }
}

/// Check whether a sqlx error is a unique-constraint violation.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Result type alias for feedwatch operations.
pub type Result<T> = std::result::Result<T, FeedwatchError>;
