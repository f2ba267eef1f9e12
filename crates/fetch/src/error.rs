//! Fetch Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// URL could not be parsed, or uses a scheme other than http(s).
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// The remote (or mock) has nothing at this URL.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Remote answered with a non-success status code.
    #[display("unexpected status {_0} for {_1}")]
    Status(#[error(not(source))] u16, String),
    /// Connection, DNS, TLS or body transfer failure.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The request did not complete in time.
    #[display("timed out fetching {_0}")]
    Timeout(#[error(not(source))] String),
    /// The fetcher itself could not be constructed.
    #[display("invalid fetcher configuration: {_0}")]
    Configuration(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            // Server-side trouble and rate limiting are worth another go.
            Self::Status(code, _) => *code >= 500 || *code == 429,
            Self::InvalidUrl(_) | Self::NotFound(_) | Self::Configuration(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Network("reset".to_string()), true)]
    #[case(ErrorKind::Timeout("https://a.test/1.jpg".to_string()), true)]
    #[case(ErrorKind::Status(503, "https://a.test/1.jpg".to_string()), true)]
    #[case(ErrorKind::Status(429, "https://a.test/1.jpg".to_string()), true)]
    #[case(ErrorKind::Status(403, "https://a.test/1.jpg".to_string()), false)]
    #[case(ErrorKind::NotFound("https://a.test/1.jpg".to_string()), false)]
    #[case(ErrorKind::InvalidUrl("nope".to_string()), false)]
    fn error_kind_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::Status(404, "https://a.test/x.png".to_string()).to_string(),
            "unexpected status 404 for https://a.test/x.png"
        );
        assert_eq!(ErrorKind::InvalidUrl("ftp://x".to_string()).to_string(), "invalid URL: ftp://x");
    }
}
