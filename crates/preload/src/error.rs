//! Preload Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Errors here are always about one page. A cancelled page is not an error;
//! it ends in [`PageState::Cancelled`](crate::PageState::Cancelled).

use derive_more::{Display, Error};

/// A preload error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for preload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The fetcher reported an error for this page. Never retried
    /// internally; enqueue the page again to retry.
    #[display("failed to fetch {_0}")]
    FetchFailed(#[error(not(source))] String),
    /// The fetch did not finish within the configured timeout.
    #[display("timed out fetching {_0}")]
    Timeout(#[error(not(source))] String),
    /// The image is larger than the whole cache.
    #[display("{_0} does not fit in the cache")]
    CapacityExceeded(#[error(not(source))] String),
    /// The image was fetched but could not be stored.
    #[display("could not cache {_0}")]
    Cache(#[error(not(source))] String),
    /// The limiter was closed while waiting for a permit.
    #[display("fetch limiter closed")]
    LimiterClosed,
    /// Concurrency must allow at least one fetch.
    #[display("fetch concurrency must be between 1 and {_0}")]
    InvalidConcurrency(#[error(not(source))] usize),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchFailed(_) | Self::Timeout(_) | Self::Cache(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::FetchFailed("https://a.test/1.jpg".to_string()).to_string(), "failed to fetch https://a.test/1.jpg");
        assert_eq!(ErrorKind::LimiterClosed.to_string(), "fetch limiter closed");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Timeout("https://a.test/1.jpg".to_string()).is_retryable());
        assert!(!ErrorKind::CapacityExceeded("https://a.test/1.jpg".to_string()).is_retryable());
        assert!(!ErrorKind::LimiterClosed.is_retryable());
    }
}
