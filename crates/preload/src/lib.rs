//! Prefetching of page images ahead of the reader.
//!
//! A [`Preloader`] takes page URLs with a priority, fetches them through a
//! [`FetcherHandle`](folio_fetch::FetcherHandle) and keeps the results in a
//! shared [`BlobCache`](folio_cache::BlobCache). Each request is observed
//! through a [`PageTicket`].
//!
//! # Architecture
//! - [`PriorityQueue`] orders waiting requests: lowest priority value first,
//!   arrival order among equals.
//! - [`FetchLimiter`] bounds how many fetches run at once and hands out
//!   slots in the order they were asked for.
//! - The preloader's dispatcher joins the two: whenever a slot frees up, the
//!   most urgent waiting page gets it.
//! - [`preload_window`] keeps a reader's current page and the next few
//!   preloaded as they move through a chapter.

pub mod error;
mod limiter;
mod page;
mod preloader;
mod queue;
mod window;

pub use crate::limiter::{FetchLimiter, Permit};
pub use crate::page::{PageState, PageTicket};
pub use crate::preloader::{PreloadOptions, PreloadStats, Preloader};
pub use crate::queue::{PendingRequest, PriorityQueue};
pub use crate::window::preload_window;
