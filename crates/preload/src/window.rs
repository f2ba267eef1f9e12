//! Reading-window helper over the preloader.

use crate::page::PageTicket;
use crate::preloader::Preloader;
use folio_fetch::Url;

/// Keep the pages around the reader's position preloaded.
///
/// Requests `pages[current..=current + lookahead]` with priority equal to
/// each page's distance from `current`, so the page on screen is the most
/// urgent. Queued requests for other pages of the same chapter are cancelled,
/// as the reader has moved away from them; pages already being fetched are
/// left to finish.
///
/// Returns an empty list if `current` is past the end of `pages`.
#[tracing::instrument(skip(preloader, pages), fields(pages = pages.len()))]
pub fn preload_window(preloader: &Preloader, pages: &[Url], current: usize, lookahead: usize) -> Vec<PageTicket> {
    if current >= pages.len() {
        return Vec::new();
    }
    let last = current.saturating_add(lookahead).min(pages.len() - 1);
    let window = &pages[current..=last];
    let stale = pages[..current].iter().chain(&pages[last + 1..]).filter(|url| !window.contains(*url));
    let cancelled = stale.filter(|url| preloader.cancel_queued(url)).count();
    if cancelled > 0 {
        tracing::debug!(cancelled, "Cancelled pages outside the reading window");
    }
    preloader.preload(window.iter().cloned(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageState;
    use crate::preloader::PreloadOptions;
    use bytes::Bytes;
    use folio_cache::{BlobCache, Capacity, MemoryBlobStore};
    use folio_fetch::FetcherHandle;
    use folio_fetch::fetcher::MockFetcher;
    use std::sync::Arc;

    fn chapter(count: usize) -> Vec<Url> {
        (0..count).map(|n| Url::parse(&format!("https://cdn.example/ch2/{n:03}.png")).unwrap()).collect()
    }

    fn setup(pages: &[Url], concurrency: usize) -> (Arc<MockFetcher>, Preloader) {
        let fetcher = Arc::new(MockFetcher::with_pages(pages.iter().map(|url| (url.to_string(), Bytes::from_static(b"png")))));
        let cache = Arc::new(BlobCache::new(Arc::new(MemoryBlobStore::default()), Capacity::Entries(16)).unwrap());
        let handle: FetcherHandle = fetcher.clone();
        let preloader = Preloader::new(handle, cache, PreloadOptions { concurrency, fetch_timeout: None }).unwrap();
        (fetcher, preloader)
    }

    #[tokio::test]
    async fn test_window_is_fetched_nearest_first() {
        let pages = chapter(10);
        let (fetcher, preloader) = setup(&pages, 1);
        let mut tickets = preload_window(&preloader, &pages, 4, 2);
        assert_eq!(tickets.iter().map(|t| t.url().clone()).collect::<Vec<_>>(), pages[4..=6]);
        for ticket in &mut tickets {
            assert!(ticket.wait().await.handle().is_some());
        }
        assert_eq!(fetcher.calls(), pages[4..=6]);
    }

    #[tokio::test]
    async fn test_window_is_clamped_to_chapter() {
        let pages = chapter(5);
        let (_fetcher, preloader) = setup(&pages, 2);
        assert_eq!(preload_window(&preloader, &pages, 3, 10).len(), 2);
        assert!(preload_window(&preloader, &pages, 5, 1).is_empty());
        assert!(preload_window(&preloader, &[], 0, 3).is_empty());
    }

    #[tokio::test]
    async fn test_moving_on_cancels_queued_pages() {
        let pages = chapter(8);
        let (fetcher, preloader) = setup(&pages, 1);
        fetcher.hold();
        let mut first = preload_window(&preloader, &pages, 0, 3);
        while fetcher.in_flight() < 1 {
            tokio::task::yield_now().await;
        }

        // The reader jumps ahead: page 0 is in flight, 1 to 3 are still queued.
        let mut second = preload_window(&preloader, &pages, 4, 1);
        fetcher.release();

        assert!(first[0].wait().await.handle().is_some());
        for ticket in &mut first[1..] {
            assert!(matches!(ticket.wait().await, PageState::Cancelled));
        }
        for ticket in &mut second {
            assert!(ticket.wait().await.handle().is_some());
        }
        assert_eq!(fetcher.calls(), [pages[0].clone(), pages[4].clone(), pages[5].clone()]);
    }
}
