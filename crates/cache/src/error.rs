//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A single item costs more than the whole cache can hold. It was not
    /// admitted, and nothing else was evicted to make room for it.
    #[display("{url} needs {cost} but the cache only holds {capacity}")]
    CapacityExceeded {
        url: String,
        cost: u64,
        capacity: u64,
    },
    /// A cache cannot be built with room for nothing.
    #[display("cache capacity must be greater than zero")]
    InvalidCapacity,
    /// The blob store does not know this handle (never created, or already
    /// released).
    #[display("unknown blob handle: {_0}")]
    UnknownHandle(#[error(not(source))] String),
    /// The blob store failed to allocate or release a blob.
    #[display("blob store error")]
    Store,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store)
    }
}
