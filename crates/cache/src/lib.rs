//! In-memory cache of downloaded page images.
//!
//! This crate holds the images a reader has already fetched, so that turning
//! back a page (or forward onto a prefetched one) never hits the network.
//!
//! # Architecture
//! - **Blob handles** ([`BlobHandle`]) name downloaded bytes locally. They
//!   are allocated and released by a [`BlobStore`]; the bundled
//!   [`MemoryBlobStore`] keeps the bytes in a map.
//! - **The cache** ([`BlobCache`]) maps remote URLs to handles, bounded by a
//!   [`Capacity`] counted in entries or bytes, and evicts the least recently
//!   used entry first. Every handle that leaves the cache is released.
//!
//! The cache is a plain value: build one per reading session and share it
//! behind an [`Arc`](std::sync::Arc).

mod blob;
pub mod error;
mod lru;

pub use crate::blob::{BlobHandle, BlobStore, BlobStoreHandle, MemoryBlobStore};
pub use crate::lru::{BlobCache, CacheEntry, CacheStats, Capacity};
