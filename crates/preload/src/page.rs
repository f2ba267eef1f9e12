//! Per-page lifecycle as seen by callers.

use crate::error::Error;
use folio_cache::BlobHandle;
use folio_fetch::Url;
use std::sync::Arc;
use tokio::sync::watch;

/// Where a page is in its preload lifecycle.
///
/// `Queued` and `Fetching` are transient; the other three are terminal for
/// that request. A terminal page can be enqueued again, which starts a new
/// lifecycle.
#[derive(Clone, Debug)]
pub enum PageState {
    Queued,
    Fetching,
    Cached(BlobHandle),
    Failed(Arc<Error>),
    Cancelled,
}

impl PageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cached(_) | Self::Failed(_) | Self::Cancelled)
    }

    /// The local handle, once the page is cached.
    pub fn handle(&self) -> Option<&BlobHandle> {
        match self {
            Self::Cached(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Observes one page as it moves through the preloader.
///
/// Every caller asking for the same URL while it is in flight gets a ticket
/// on the same underlying request.
#[derive(Clone, Debug)]
pub struct PageTicket {
    url: Url,
    state: watch::Receiver<PageState>,
}

impl PageTicket {
    pub(crate) fn new(url: Url, state: watch::Receiver<PageState>) -> Self {
        Self { url, state }
    }

    /// A ticket whose outcome is already known.
    pub(crate) fn resolved(url: Url, state: PageState) -> Self {
        let (_, receiver) = watch::channel(state);
        Self::new(url, receiver)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Current state, without waiting.
    pub fn state(&self) -> PageState {
        self.state.borrow().clone()
    }

    /// Wait for the page to reach a terminal state.
    ///
    /// If the preloader goes away before the page settles, the page counts
    /// as cancelled.
    pub async fn wait(&mut self) -> PageState {
        let settled = self.state.wait_for(PageState::is_terminal).await.map(|state| state.clone());
        match settled {
            Ok(state) => state,
            Err(_) => {
                let last = self.state.borrow().clone();
                if last.is_terminal() { last } else { PageState::Cancelled }
            },
        }
    }
}
