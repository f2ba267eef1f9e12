//! Least-recently-used cache of blob handles keyed by remote URL.

use crate::blob::{BlobHandle, BlobStoreHandle};
use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use url::Url;

/// How much a [`BlobCache`] may hold, and in which unit.
///
/// With [`Entries`](Self::Entries) every image costs one, regardless of
/// size. With [`Bytes`](Self::Bytes) every image costs its size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capacity {
    Entries(usize),
    Bytes(u64),
}
impl Capacity {
    /// Total cost the cache may hold.
    pub fn limit(&self) -> u64 {
        match *self {
            // Infallible on every platform Rust supports (usize <= 64 bits).
            Self::Entries(n) => u64::try_from(n).unwrap_or(u64::MAX),
            Self::Bytes(n) => n,
        }
    }

    /// Cost of one item of `size` bytes.
    pub fn cost(&self, size: u64) -> u64 {
        match self {
            Self::Entries(_) => 1,
            Self::Bytes(_) => size,
        }
    }
}
impl Default for Capacity {
    fn default() -> Self {
        Self::Entries(64)
    }
}
impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entries(n) => write!(f, "{n} entries"),
            Self::Bytes(n) => write!(f, "{n} bytes"),
        }
    }
}

/// Snapshot of one cached image, as returned by [`BlobCache::entries`].
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub url: Url,
    pub handle: BlobHandle,
    pub size: u64,
    pub last_accessed: Instant,
}

/// Counters reported by [`BlobCache::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    /// Cost currently held, in the capacity's unit.
    pub used: u64,
    pub capacity: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}
impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

struct Slot {
    handle: BlobHandle,
    size: u64,
    cost: u64,
    tick: u64,
    last_accessed: Instant,
}

#[derive(Default)]
struct LruState {
    slots: HashMap<Url, Slot>,
    /// Recency order: lowest tick is the least recently used. Ticks are
    /// unique and only ever grow, which also makes insertion order the
    /// tie-break.
    recency: BTreeMap<u64, Url>,
    tick: u64,
    used: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}
impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn insert(&mut self, url: Url, handle: BlobHandle, size: u64, cost: u64) {
        let tick = self.next_tick();
        self.recency.insert(tick, url.clone());
        self.used += cost;
        self.slots.insert(url, Slot { handle, size, cost, tick, last_accessed: Instant::now() });
    }

    fn touch(&mut self, url: &Url) -> Option<&Slot> {
        let tick = self.next_tick();
        let slot = self.slots.get_mut(url)?;
        self.recency.remove(&slot.tick);
        self.recency.insert(tick, url.clone());
        slot.tick = tick;
        slot.last_accessed = Instant::now();
        Some(&*slot)
    }

    fn remove(&mut self, url: &Url) -> Option<Slot> {
        let slot = self.slots.remove(url)?;
        self.recency.remove(&slot.tick);
        self.used -= slot.cost;
        Some(slot)
    }

    fn pop_oldest(&mut self) -> Option<(Url, Slot)> {
        let (_, url) = self.recency.pop_first()?;
        let slot = self.slots.remove(&url)?;
        self.used -= slot.cost;
        Some((url, slot))
    }
}

/// Bounded cache mapping remote image URLs to local blob handles.
///
/// All mutations go through one mutex, so the capacity bound holds after
/// every call returns. Handles leaving the cache (evicted, replaced, cleared,
/// or still present when the cache is dropped) are released through the
/// [`BlobStore`](crate::BlobStore) the cache was built with; release failures
/// are logged and otherwise ignored.
///
/// Items costing more than the whole capacity are rejected with
/// [`CapacityExceeded`](ErrorKind::CapacityExceeded) and leave the cache
/// untouched.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use folio_cache::{BlobCache, Capacity, MemoryBlobStore};
/// use url::Url;
///
/// let cache = BlobCache::new(Arc::new(MemoryBlobStore::default()), Capacity::Entries(2)).unwrap();
/// let page = |n: u32| Url::parse(&format!("https://cdn.example/ch1/{n:03}.jpg")).unwrap();
///
/// cache.insert(page(1), Bytes::from_static(b"one")).unwrap();
/// cache.insert(page(2), Bytes::from_static(b"two")).unwrap();
/// assert!(cache.get(&page(1)).is_some()); // page 2 is now the oldest
/// cache.insert(page(3), Bytes::from_static(b"three")).unwrap();
///
/// assert!(cache.get(&page(2)).is_none());
/// assert_eq!(cache.len(), 2);
/// ```
pub struct BlobCache {
    store: BlobStoreHandle,
    capacity: Capacity,
    state: Mutex<LruState>,
}

impl BlobCache {
    /// Create an empty cache. Fails with
    /// [`InvalidCapacity`](ErrorKind::InvalidCapacity) for a zero capacity.
    pub fn new(store: BlobStoreHandle, capacity: Capacity) -> Result<Self> {
        if capacity.limit() == 0 {
            exn::bail!(ErrorKind::InvalidCapacity);
        }
        Ok(Self { store, capacity, state: Mutex::new(LruState::default()) })
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// The store handles are allocated from and released to.
    pub fn store(&self) -> &BlobStoreHandle {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, LruState> {
        // Every mutation leaves the state consistent before it can panic, so
        // a poisoned lock is still safe to use.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `url`, marking it as the most recently used on a hit.
    pub fn get(&self, url: &Url) -> Option<BlobHandle> {
        let mut state = self.lock();
        match state.touch(url).map(|slot| slot.handle.clone()) {
            Some(handle) => {
                state.hits += 1;
                Some(handle)
            },
            None => {
                state.misses += 1;
                None
            },
        }
    }

    /// Whether `url` is cached, without affecting recency or counters.
    pub fn contains(&self, url: &Url) -> bool {
        self.lock().slots.contains_key(url)
    }

    /// Would an item of `size` bytes fit in an empty cache?
    pub fn admits(&self, size: u64) -> bool {
        self.capacity.cost(size) <= self.capacity.limit()
    }

    /// Insert or replace the entry for `url`, then evict least recently used
    /// entries until the cache is within capacity.
    ///
    /// The cache takes ownership of `handle`: if it is rejected, it is
    /// released before the error is returned.
    pub fn put(&self, url: Url, handle: BlobHandle, size: u64) -> Result<()> {
        let cost = self.capacity.cost(size);
        let limit = self.capacity.limit();
        if cost > limit {
            tracing::warn!(url = %url, size, capacity = %self.capacity, "Rejecting image larger than the whole cache");
            self.release(&handle);
            exn::bail!(ErrorKind::CapacityExceeded { url: url.to_string(), cost, capacity: limit });
        }

        let released = {
            let mut state = self.lock();
            let mut released = Vec::new();
            if let Some(previous) = state.remove(&url)
                && previous.handle != handle
            {
                released.push(previous.handle);
            }
            state.insert(url, handle, size, cost);
            // The entry just inserted has the newest tick and fits on its
            // own, so it is never the one evicted here.
            while state.used > limit {
                let Some((evicted, slot)) = state.pop_oldest() else {
                    break;
                };
                state.evictions += 1;
                tracing::debug!(url = %evicted, handle = %slot.handle, size = slot.size, "Evicted least recently used image");
                released.push(slot.handle);
            }
            released
        };
        for handle in &released {
            self.release(handle);
        }
        Ok(())
    }

    /// Allocate a blob for `data` and [`put`](Self::put) it under `url`.
    ///
    /// Oversized data is rejected before anything is allocated.
    pub fn insert(&self, url: Url, data: Bytes) -> Result<BlobHandle> {
        let size = data.len() as u64;
        if !self.admits(size) {
            exn::bail!(ErrorKind::CapacityExceeded {
                url: url.to_string(),
                cost: self.capacity.cost(size),
                capacity: self.capacity.limit(),
            });
        }
        let handle = self.store.create(data)?;
        self.put(url, handle.clone(), size)?;
        Ok(handle)
    }

    /// Evict and release everything. Returns the number of entries dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<BlobHandle> = {
            let mut state = self.lock();
            state.recency.clear();
            state.used = 0;
            state.slots.drain().map(|(_, slot)| slot.handle).collect()
        };
        for handle in &drained {
            self.release(handle);
        }
        if !drained.is_empty() {
            tracing::debug!(released = drained.len(), "Cleared image cache");
        }
        drained.len()
    }

    /// Cached entries, least recently used first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let state = self.lock();
        state
            .recency
            .values()
            .filter_map(|url| {
                state.slots.get(url).map(|slot| CacheEntry {
                    url: url.clone(),
                    handle: slot.handle.clone(),
                    size: slot.size,
                    last_accessed: slot.last_accessed,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.slots.len(),
            used: state.used,
            capacity: self.capacity.limit(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    fn release(&self, handle: &BlobHandle) {
        if let Err(err) = self.store.release(handle) {
            tracing::warn!(handle = %handle, error = %err, "Failed to release blob handle");
        }
    }
}

impl Drop for BlobCache {
    fn drop(&mut self) {
        self.clear();
    }
}
