//! In-memory fetcher for testing.

use crate::Fetcher;
use crate::error::{ErrorKind, Result};
use crate::uri::validate as validate_url;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use url::Url;

#[derive(Clone)]
enum Response {
    Page(Bytes),
    Fail(ErrorKind),
}

/// In-memory fetcher for testing.
///
/// Pages are stored in a `HashMap` behind a [`RwLock`], so all methods can
/// operate on `&self`. Every call to [`fetch`](Fetcher::fetch) is logged,
/// which lets tests count network round-trips and check dispatch order.
///
/// Calling [`hold`](Self::hold) parks every subsequent fetch until
/// [`release`](Self::release), keeping requests "in flight" for as long as a
/// test needs.
///
/// # Examples
///
/// ```
/// use folio_fetch::fetcher::MockFetcher;
/// use folio_fetch::{Fetcher, validate_url};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let fetcher = MockFetcher::with_pages([
///     ("https://cdn.example/ch1/001.jpg", &b"jpeg bytes"[..]),
/// ]);
/// let url = validate_url("https://cdn.example/ch1/001.jpg").unwrap();
/// assert_eq!(fetcher.fetch(&url).await.unwrap().as_ref(), b"jpeg bytes");
/// assert_eq!(fetcher.calls().len(), 1);
/// # }
/// ```
pub struct MockFetcher {
    pages: RwLock<HashMap<Url, Response>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Url>>,
    gate: watch::Sender<bool>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockFetcher {
    /// Create a mock fetcher pre-populated with pages.
    ///
    /// Panics if any URL fails validation. If test setup is wrong, then test
    /// should not pass.
    pub fn with_pages(pages: impl IntoIterator<Item = (impl AsRef<str>, impl Into<Bytes>)>) -> Self {
        let mut map = HashMap::new();
        for (url, data) in pages {
            let Ok(validated) = validate_url(url.as_ref()) else {
                panic!("MockFetcher::with_pages: invalid URL {}", url.as_ref());
            };
            map.insert(validated, Response::Page(data.into()));
        }
        Self {
            pages: RwLock::new(map),
            delay: None,
            calls: Mutex::new(Vec::new()),
            gate: watch::Sender::new(true),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Make every fetch take at least `delay` (uses Tokio time, so it can be
    /// driven by a paused clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add (or replace) a page.
    pub async fn insert(&self, url: &Url, data: impl Into<Bytes>) {
        self.pages.write().await.insert(url.clone(), Response::Page(data.into()));
    }

    /// Make fetches of `url` fail with `kind`.
    pub async fn fail(&self, url: &Url, kind: ErrorKind) {
        self.pages.write().await.insert(url.clone(), Response::Fail(kind));
    }

    /// Park all fetches (current and future) until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Let parked fetches continue.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Every URL passed to [`fetch`](Fetcher::fetch), in call order.
    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of fetch calls made for `url`.
    pub fn calls_for(&self, url: &Url) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).iter().filter(|u| *u == url).count()
    }

    /// Fetches currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that were ever executing at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}
impl Default for MockFetcher {
    fn default() -> Self {
        let pages: [(&str, &[u8]); 0] = [];
        Self::with_pages(pages)
    }
}

/// Decrements the in-flight counter even if the fetch future is dropped.
struct InFlight<'a>(&'a AtomicUsize);
impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(url.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(current, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        _ = gate.wait_for(|open| *open).await;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.pages.read().await.get(url).cloned();
        match response {
            Some(Response::Page(data)) => Ok(data),
            Some(Response::Fail(kind)) => Err(exn::Exn::from(kind)),
            None => Err(exn::Exn::from(ErrorKind::NotFound(url.to_string()))),
        }
    }
}
