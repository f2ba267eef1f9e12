//! Fetcher trait and implementations.

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "http")]
pub use self::http::{HttpFetcher, HttpOptions};
#[cfg(feature = "mock")]
pub use self::mock::MockFetcher;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

/// Unified interface for retrieving page images.
///
/// Implementations return the complete response body. They do not retry,
/// cache, or limit concurrency; all of that is the caller's business.
///
/// # Examples
///
/// ```
/// use folio_fetch::{Fetcher, Url, error::Result};
///
/// async fn page_size(fetcher: &dyn Fetcher, url: &Url) -> Result<usize> {
///     let data = fetcher.fetch(url).await?;
///     Ok(data.len())
/// }
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Name of the fetcher, used for logging only.
    fn name(&self) -> &str;

    /// Fetch the body behind `url`.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) or
    /// [`Status`](crate::error::ErrorKind::Status) when the remote refuses,
    /// and [`Network`](crate::error::ErrorKind::Network) when it could not be
    /// reached at all.
    async fn fetch(&self, url: &Url) -> Result<Bytes>;
}
