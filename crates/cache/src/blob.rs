//! Local blob handles.
//!
//! A blob handle is an in-process name for image bytes that have already
//! been downloaded, distinct from the remote URL they came from. Handles are
//! allocated and released through a [`BlobStore`]; a handle that is never
//! released keeps its bytes alive for as long as the store lives.

use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Cheap-to-clone reference to a blob held by a [`BlobStore`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobHandle {
    id: Arc<str>,
    size: u64,
}
impl BlobHandle {
    pub fn new(id: impl Into<Arc<str>>, size: u64) -> Self {
        Self { id: id.into(), size }
    }

    /// Locally addressable identifier, e.g. `blob:folio/7`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Size of the referenced bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}
impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Allocator and releaser of local blob handles.
///
/// Both operations are synchronous: they must be cheap enough to run while
/// the cache holds its lock.
pub trait BlobStore: Send + Sync {
    /// Take ownership of `data` and return a handle that addresses it.
    fn create(&self, data: Bytes) -> Result<BlobHandle>;

    /// Give back the memory behind `handle`. The handle must not be used
    /// afterwards; releasing it twice is an
    /// [`UnknownHandle`](crate::error::ErrorKind::UnknownHandle) error.
    fn release(&self, handle: &BlobHandle) -> Result<()>;
}

pub type BlobStoreHandle = Arc<dyn BlobStore>;

/// Blob store that keeps everything in memory.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use folio_cache::{BlobStore, MemoryBlobStore};
///
/// let store = MemoryBlobStore::default();
/// let handle = store.create(Bytes::from_static(b"\x89PNG...")).unwrap();
/// assert_eq!(store.read(&handle).unwrap().len(), 7);
/// store.release(&handle).unwrap();
/// assert_eq!(store.live(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<Arc<str>, Bytes>>,
    next: AtomicU64,
}

impl MemoryBlobStore {
    /// Bytes behind a handle, if it has not been released.
    pub fn read(&self, handle: &BlobHandle) -> Option<Bytes> {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).get(handle.id()).cloned()
    }

    /// Number of handles created but not yet released.
    pub fn live(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Total bytes held by unreleased handles.
    pub fn live_bytes(&self) -> u64 {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).values().map(|b| b.len() as u64).sum()
    }
}

impl BlobStore for MemoryBlobStore {
    fn create(&self, data: Bytes) -> Result<BlobHandle> {
        let id: Arc<str> = format!("blob:folio/{}", self.next.fetch_add(1, Ordering::Relaxed)).into();
        let handle = BlobHandle::new(Arc::clone(&id), data.len() as u64);
        self.blobs.write().unwrap_or_else(PoisonError::into_inner).insert(id, data);
        Ok(handle)
    }

    fn release(&self, handle: &BlobHandle) -> Result<()> {
        match self.blobs.write().unwrap_or_else(PoisonError::into_inner).remove(handle.id()) {
            Some(_) => Ok(()),
            None => exn::bail!(ErrorKind::UnknownHandle(handle.id().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_assigns_unique_ids() {
        let store = MemoryBlobStore::default();
        let a = store.create(Bytes::from_static(b"aa")).unwrap();
        let b = store.create(Bytes::from_static(b"bbb")).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("blob:folio/"));
        assert_eq!((a.size(), b.size()), (2, 3));
        assert_eq!(store.live(), 2);
        assert_eq!(store.live_bytes(), 5);
    }

    #[test]
    fn test_release_frees_bytes() {
        let store = MemoryBlobStore::default();
        let handle = store.create(Bytes::from_static(b"page")).unwrap();
        assert_eq!(store.read(&handle), Some(Bytes::from_static(b"page")));
        store.release(&handle).unwrap();
        assert_eq!(store.read(&handle), None);
        assert_eq!(store.live_bytes(), 0);
    }

    #[test]
    fn test_double_release_is_an_error() {
        let store = MemoryBlobStore::default();
        let handle = store.create(Bytes::from_static(b"page")).unwrap();
        store.release(&handle).unwrap();
        let err = store.release(&handle).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownHandle(id) if id == handle.id()));
    }

    #[test]
    fn test_handle_display() {
        let handle = BlobHandle::new("blob:folio/42", 10);
        assert_eq!(handle.to_string(), "blob:folio/42");
    }
}
