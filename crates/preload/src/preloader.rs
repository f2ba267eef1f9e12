//! The preloader: de-duplicated, prioritised, cancellable page fetches that
//! land in a [`BlobCache`].

use crate::error::{Error, ErrorKind, Result};
use crate::limiter::{FetchLimiter, Permit};
use crate::page::{PageState, PageTicket};
use crate::queue::{PendingRequest, PriorityQueue};
use bytes::Bytes;
use exn::ResultExt;
use futures::FutureExt;
use folio_cache::BlobCache;
use folio_cache::BlobHandle;
use folio_cache::error::ErrorKind as CacheErrorKind;
use folio_fetch::{FetcherHandle, Url};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

/// How a [`Preloader`] schedules its fetches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreloadOptions {
    /// Fetches allowed in flight at once.
    pub concurrency: usize,
    /// Give up on a single fetch after this long. `None` waits forever.
    pub fetch_timeout: Option<Duration>,
}
impl Default for PreloadOptions {
    fn default() -> Self {
        Self { concurrency: 4, fetch_timeout: Some(Duration::from_secs(30)) }
    }
}

/// Counters describing the preloader's work so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreloadStats {
    /// Pages waiting for a fetch slot.
    pub queued: usize,
    /// Pages being fetched right now.
    pub fetching: usize,
    pub fetched: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Requests answered by a fetch that was already queued or running.
    pub deduplicated: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Queued,
    Fetching,
}

struct Page {
    phase: Phase,
    /// Only meaningful while fetching; a queued page is cancelled by removing it.
    cancelled: bool,
    state: watch::Sender<PageState>,
}

#[derive(Default)]
struct Counters {
    fetched: u64,
    failed: u64,
    cancelled: u64,
    deduplicated: u64,
}

/// Per-URL bookkeeping. Only pages that are queued or fetching have a record.
#[derive(Default)]
struct Book {
    queue: PriorityQueue,
    pages: HashMap<Url, Page>,
    counters: Counters,
}

impl Book {
    /// Withdraw `url` from the queue, resolving it as cancelled.
    fn withdraw(&mut self, url: &Url) -> bool {
        if self.queue.remove(url).is_none() {
            return false;
        }
        if let Some(page) = self.pages.remove(url) {
            page.state.send_replace(PageState::Cancelled);
        }
        self.counters.cancelled += 1;
        tracing::debug!(url = %url, "Cancelled queued page");
        true
    }

    /// Withdraw every queued page, resolving it as cancelled.
    fn withdraw_all(&mut self) -> usize {
        let withdrawn = self.queue.clear();
        for request in &withdrawn {
            if let Some(page) = self.pages.remove(&request.url) {
                page.state.send_replace(PageState::Cancelled);
                self.counters.cancelled += 1;
            }
        }
        withdrawn.len()
    }
}

struct Shared {
    fetcher: FetcherHandle,
    cache: Arc<BlobCache>,
    limiter: FetchLimiter,
    fetch_timeout: Option<Duration>,
    // Always taken before the cache's own lock, never held across an await.
    book: Mutex<Book>,
    wakeup: Notify,
}

impl Shared {
    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, book: &mut Book, url: Url, priority: i64) -> PageTicket {
        if let Some(page) = book.pages.get_mut(&url) {
            book.counters.deduplicated += 1;
            match page.phase {
                Phase::Queued => {
                    if book.queue.priority_of(&url).is_some_and(|queued| priority < queued) {
                        tracing::debug!(url = %url, priority, "Promoting queued page");
                        book.queue.push(PendingRequest::new(url.clone(), priority));
                    }
                },
                Phase::Fetching => {
                    if page.cancelled {
                        tracing::debug!(url = %url, "Page requested again while fetching, keeping result");
                        page.cancelled = false;
                    }
                },
            }
            return PageTicket::new(url, page.state.subscribe());
        }

        if let Some(handle) = self.cache.get(&url) {
            return PageTicket::resolved(url, PageState::Cached(handle));
        }

        let (state, receiver) = watch::channel(PageState::Queued);
        book.pages.insert(url.clone(), Page { phase: Phase::Queued, cancelled: false, state });
        book.queue.push(PendingRequest::new(url.clone(), priority));
        tracing::debug!(url = %url, priority, queued = book.queue.len(), "Queued page");
        self.wakeup.notify_one();
        PageTicket::new(url, receiver)
    }

    /// Pop the most urgent request and mark it as fetching.
    fn start_next(&self) -> Option<Url> {
        let mut book = self.book();
        let request = book.queue.pop()?;
        let page = book.pages.get_mut(&request.url)?;
        page.phase = Phase::Fetching;
        page.state.send_replace(PageState::Fetching);
        tracing::debug!(
            url = %request.url,
            priority = request.priority,
            waited = ?request.enqueued_at.elapsed(),
            "Starting fetch"
        );
        Some(request.url)
    }

    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        let fetch = self.fetcher.fetch(url);
        let fetched = match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch).await.or_raise(|| ErrorKind::Timeout(url.to_string()))?,
            None => fetch.await,
        };
        fetched.or_raise(|| ErrorKind::FetchFailed(url.to_string()))
    }

    fn store(&self, url: &Url, data: Bytes) -> Result<BlobHandle> {
        self.cache.insert(url.clone(), data).map_err(|err| {
            let kind = match &*err {
                CacheErrorKind::CapacityExceeded { .. } => ErrorKind::CapacityExceeded(url.to_string()),
                _ => ErrorKind::Cache(url.to_string()),
            };
            err.raise(kind)
        })
    }

    /// Record the outcome of a fetch and publish the page's final state.
    fn finish(&self, url: &Url, fetched: Result<Bytes>) {
        let mut book = self.book();
        let Some(page) = book.pages.remove(url) else {
            return;
        };
        if page.cancelled {
            tracing::debug!(url = %url, "Discarding fetch for cancelled page");
            book.counters.cancelled += 1;
            page.state.send_replace(PageState::Cancelled);
            return;
        }
        match fetched.and_then(|data| self.store(url, data)) {
            Ok(handle) => {
                tracing::debug!(url = %url, handle = %handle, size = handle.size(), "Cached page");
                book.counters.fetched += 1;
                page.state.send_replace(PageState::Cached(handle));
            },
            Err(err) => {
                tracing::warn!(url = %url, error = ?err, "Failed to preload page");
                book.counters.failed += 1;
                page.state.send_replace(PageState::Failed(Arc::new(err)));
            },
        }
    }
}

/// Fetches page images ahead of the reader and keeps them in a
/// [`BlobCache`].
///
/// One dispatcher task hands requests to the fetcher, most urgent first
/// (lowest priority value; first come first served among equals), with at
/// most [`PreloadOptions::concurrency`] in flight. A URL that is already
/// queued or fetching is never fetched twice: later requests share the
/// outstanding one. Failures are reported through the page's
/// [`PageTicket`] and never retried; enqueue the page again to retry.
///
/// Dropping the preloader stops the dispatcher and cancels everything still
/// queued. Fetches already in flight run to completion.
pub struct Preloader {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl Preloader {
    /// Start a preloader filling `cache` through `fetcher`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime, as it spawns the
    /// dispatcher task.
    pub fn new(fetcher: FetcherHandle, cache: Arc<BlobCache>, options: PreloadOptions) -> Result<Self> {
        let limiter = FetchLimiter::new(options.concurrency)?;
        let shared = Arc::new(Shared {
            fetcher,
            cache,
            limiter,
            fetch_timeout: options.fetch_timeout,
            book: Mutex::new(Book::default()),
            wakeup: Notify::new(),
        });
        let shutdown = CancellationToken::new();
        tokio::spawn(dispatch(Arc::clone(&shared), shutdown.clone()));
        Ok(Self { shared, shutdown })
    }

    /// Request `urls`, the first with priority `base_priority` and each one
    /// after it a step less urgent. Returns one ticket per URL, in order.
    pub fn preload(&self, urls: impl IntoIterator<Item = Url>, base_priority: i64) -> Vec<PageTicket> {
        let mut book = self.shared.book();
        urls.into_iter()
            .enumerate()
            .map(|(position, url)| {
                let priority = base_priority.saturating_add(i64::try_from(position).unwrap_or(i64::MAX));
                self.shared.enqueue(&mut book, url, priority)
            })
            .collect()
    }

    /// Request a single page.
    pub fn enqueue(&self, url: Url, priority: i64) -> PageTicket {
        self.shared.enqueue(&mut self.shared.book(), url, priority)
    }

    /// The cached handle for `url`, if it has been preloaded and not evicted.
    pub fn get_cached(&self, url: &Url) -> Option<BlobHandle> {
        self.shared.cache.get(url)
    }

    /// Cancel the request for `url`.
    ///
    /// A queued page is withdrawn and never fetched. A page being fetched
    /// cannot be interrupted; its result is discarded when it arrives.
    /// Returns `false` if there was nothing to cancel.
    pub fn cancel(&self, url: &Url) -> bool {
        let mut book = self.shared.book();
        if book.withdraw(url) {
            return true;
        }
        match book.pages.get_mut(url) {
            Some(page) if !page.cancelled => {
                page.cancelled = true;
                tracing::debug!(url = %url, "Cancelled page in flight");
                true
            },
            _ => false,
        }
    }

    /// Cancel the request for `url` only if it has not started yet.
    pub fn cancel_queued(&self, url: &Url) -> bool {
        self.shared.book().withdraw(url)
    }

    /// Cancel every queued and in-flight request, then empty the cache.
    #[tracing::instrument(skip_all)]
    pub fn clear_all(&self) {
        let mut book = self.shared.book();
        let withdrawn = book.withdraw_all();
        let mut interrupted = 0;
        for page in book.pages.values_mut().filter(|page| !page.cancelled) {
            page.cancelled = true;
            interrupted += 1;
        }
        let released = self.shared.cache.clear();
        tracing::info!(withdrawn, interrupted, released, "Cleared preloader");
    }

    pub fn stats(&self) -> PreloadStats {
        let book = self.shared.book();
        PreloadStats {
            queued: book.queue.len(),
            fetching: book.pages.values().filter(|page| page.phase == Phase::Fetching).count(),
            fetched: book.counters.fetched,
            failed: book.counters.failed,
            cancelled: book.counters.cancelled,
            deduplicated: book.counters.deduplicated,
        }
    }

    pub fn cache(&self) -> &Arc<BlobCache> {
        &self.shared.cache
    }

    pub fn concurrency(&self) -> usize {
        self.shared.limiter.limit()
    }
}

impl Drop for Preloader {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.shared.limiter.close();
        let withdrawn = self.shared.book().withdraw_all();
        if withdrawn > 0 {
            tracing::debug!(withdrawn, "Preloader dropped with pages still queued");
        }
    }
}

async fn dispatch(shared: Arc<Shared>, shutdown: CancellationToken) {
    tracing::debug!(concurrency = shared.limiter.limit(), "Preload dispatcher started");
    loop {
        loop {
            let idle = shared.book().queue.is_empty();
            if !idle {
                break;
            }
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = shared.wakeup.notified() => {},
            }
        }
        let permit = tokio::select! {
            () = shutdown.cancelled() => return,
            permit = shared.limiter.acquire() => match permit {
                Ok(permit) => permit,
                Err(err) => {
                    tracing::debug!(error = ?err, "Preload dispatcher stopped");
                    return;
                },
            },
        };
        // The queue may have been emptied by a cancellation while waiting.
        let Some(url) = shared.start_next() else {
            continue;
        };
        tokio::spawn(fetch_page(Arc::clone(&shared), url, permit));
    }
}

#[tracing::instrument(skip_all, fields(url = %url, fetcher = shared.fetcher.name()))]
async fn fetch_page(shared: Arc<Shared>, url: Url, permit: Permit) {
    // A panicking fetcher must still settle the page, or its record would
    // swallow every later request for the URL.
    let fetched = match AssertUnwindSafe(shared.fetch(&url)).catch_unwind().await {
        Ok(fetched) => fetched,
        Err(_) => {
            tracing::error!(url = %url, "Fetcher panicked");
            Err(Error::from(ErrorKind::FetchFailed(url.to_string())))
        },
    };
    shared.limiter.release(permit);
    shared.finish(&url, fetched);
}
