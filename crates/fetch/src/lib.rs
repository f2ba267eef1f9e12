//! Network fetch primitive for page images.
//!
//! The preloader never talks to the network itself; it is handed a
//! [`FetcherHandle`] and asks it for the bytes behind a URL. This crate
//! defines that seam ([`Fetcher`]) plus the implementations that sit behind
//! it:
//!
//! - [`HttpFetcher`](fetcher::HttpFetcher) (feature `http`): reqwest client,
//!   optionally routed through an image proxy.
//! - [`MockFetcher`](fetcher::MockFetcher) (feature `mock`): canned pages for
//!   tests, with a hold gate to keep fetches in flight on demand.

pub mod error;
pub mod fetcher;
mod uri;

pub use crate::fetcher::Fetcher;
pub use crate::uri::validate as validate_url;
pub use url::Url;
use std::sync::Arc;

pub type FetcherHandle = Arc<dyn Fetcher + Send + Sync>;
