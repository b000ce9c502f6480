//! Error types for tasksync
//!
//! Failure classes:
//! - Store failures carry a retryable/terminal classification; the
//!   orchestrator retries retryable ones a bounded number of times
//! - Assistant parse failures are contained and never touch the cache
//! - Notification delivery failures are logged only, never surfaced

use thiserror::Error;

use crate::assist::Timeframe;

/// Failure classification for store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Network-level failure; the operation may succeed if retried.
    Unavailable,
    /// The call exceeded its application-level deadline.
    Timeout,
    /// The store rejected the request (validation, permission).
    Rejected,
    /// The referenced row does not exist.
    NotFound,
}

/// Error returned by [`StoreGateway`](crate::gateway::StoreGateway) operations.
#[derive(Error, Debug, Clone)]
#[error("store {kind:?}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Timeout, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Rejected, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    /// Whether the orchestrator may retry the failed call.
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::Unavailable | StoreErrorKind::Timeout
        )
    }
}

/// Main error type for tasksync operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Suggestion response not in expected format: {0}")]
    SuggestionParse(String),

    #[error("Grouping response is not valid JSON: {0}")]
    GroupingParse(String),

    #[error("Assist request failed: {0}")]
    Assist(String),

    #[error("A {0} summary request is already in flight")]
    SummaryInFlight(Timeframe),

    #[error("Session is closed")]
    SessionClosed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Error {
    /// Whether the underlying failure is worth retrying.
    pub fn retryable(&self) -> bool {
        match self {
            Error::Store(err) => err.retryable(),
            Error::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

/// Result type alias for tasksync operations
pub type Result<T> = std::result::Result<T, Error>;
