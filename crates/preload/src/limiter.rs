//! Bound on concurrent fetches.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The right to run one fetch. Released when dropped, so every exit path of
/// the holder (success, error, timeout, cancellation, panic) gives it back.
#[derive(Debug)]
#[must_use = "a permit is released as soon as it is dropped"]
pub struct Permit(#[allow(dead_code)] OwnedSemaphorePermit);

/// Admits at most `limit` fetches at once.
///
/// Backed by Tokio's [`Semaphore`], which is fair: permits are granted in the
/// order [`acquire`](Self::acquire) was called, so no waiter starves.
#[derive(Clone, Debug)]
pub struct FetchLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl FetchLimiter {
    /// Create a limiter admitting `limit` concurrent fetches.
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 || limit > Semaphore::MAX_PERMITS {
            exn::bail!(ErrorKind::InvalidConcurrency(Semaphore::MAX_PERMITS));
        }
        Ok(Self { semaphore: Arc::new(Semaphore::new(limit)), limit })
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<Permit> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.or_raise(|| ErrorKind::LimiterClosed)?;
        Ok(Permit(permit))
    }

    /// Take a free slot if there is one, without waiting.
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok().map(Permit)
    }

    /// Give a slot back. Equivalent to dropping the permit.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Fail every pending and future [`acquire`](Self::acquire). Permits
    /// already handed out stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.limit - self.available()
    }
}
