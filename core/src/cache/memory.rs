//! In-memory LRU cache of decoded bitmaps bounded by a byte budget.

use std::fmt;
use std::sync::Arc;

use hashlink::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::bitmap::Bitmap;
use crate::types::{CacheBudget, ImageKey};

/// Resident bitmap plus the cost charged against the budget when it was inserted.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub bitmap: Arc<Bitmap>,
    cost: usize,
}

impl CacheEntry {
    pub fn new(bitmap: Arc<Bitmap>) -> Self {
        let cost = bitmap.allocation_byte_count();
        Self { bitmap, cost }
    }

    pub fn cost(&self) -> usize {
        self.cost
    }
}

/// Why an entry left the cache through the eviction hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    /// Pushed out by budget pressure.
    Capacity,
    /// Overwritten by a different bitmap under the same key.
    Replaced,
    /// Removed by [`MemoryCache::clear`].
    Cleared,
}

/// Bitmap handed to the eviction hook. The hook takes over release responsibility.
#[derive(Debug)]
pub struct Eviction {
    pub key: ImageKey,
    pub bitmap: Arc<Bitmap>,
    pub cause: EvictionCause,
}

pub type EvictionHook = Box<dyn Fn(Eviction) + Send + Sync>;

/// Called with every bitmap about to become resident, under the cache lock.
pub type InsertHook = Box<dyn Fn(&Arc<Bitmap>) + Send + Sync>;

#[derive(Debug)]
struct CacheState {
    entries: LruCache<ImageKey, CacheEntry>,
    bytes_used: usize,
}

/// LRU keyed by [`ImageKey`] that evicts based on byte budget.
///
/// Every mutation, including the evictions a `put` triggers and the hook calls they make,
/// happens under one lock.
pub struct MemoryCache {
    state: Mutex<CacheState>,
    budget: CacheBudget,
    on_evict: EvictionHook,
    on_insert: InsertHook,
}

impl MemoryCache {
    /// Construct a cache that drops evicted bitmaps without further handling.
    pub fn new(budget: CacheBudget) -> Self {
        Self::with_hook(budget, Box::new(|_| {}))
    }

    /// Construct a cache that passes every evicted bitmap to `on_evict`.
    pub fn with_hook(budget: CacheBudget, on_evict: EvictionHook) -> Self {
        Self {
            state: Mutex::new(CacheState { entries: LruCache::new_unbounded(), bytes_used: 0 }),
            budget,
            on_evict,
            on_insert: Box::new(|_| {}),
        }
    }

    pub fn with_insert_hook(mut self, on_insert: InsertHook) -> Self {
        self.on_insert = on_insert;
        self
    }

    pub fn budget(&self) -> CacheBudget {
        self.budget
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Total memory consumption tracked by the cache.
    pub fn bytes_used(&self) -> usize {
        self.state.lock().bytes_used
    }

    pub fn contains(&self, key: &ImageKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Retrieve an entry, refreshing its recency ordering if present.
    pub fn get(&self, key: &ImageKey) -> Option<Arc<Bitmap>> {
        let mut state = self.state.lock();
        state.entries.get(key).map(|entry| Arc::clone(&entry.bitmap))
    }

    /// Insert or replace an entry, then evict least recently used entries until the budget
    /// holds. The new entry itself is never evicted, so an oversized bitmap stays alone.
    pub fn put(&self, key: ImageKey, bitmap: Arc<Bitmap>) {
        let incoming = Arc::clone(&bitmap);
        let entry = CacheEntry::new(bitmap);
        let cost = entry.cost();

        let mut state = self.state.lock();
        (self.on_insert)(&incoming);
        if let Some(previous) = state.entries.insert(key.clone(), entry) {
            state.bytes_used = state.bytes_used.saturating_sub(previous.cost());
            if !Arc::ptr_eq(&incoming, &previous.bitmap) {
                let cause = EvictionCause::Replaced;
                let eviction = Eviction { key: key.clone(), bitmap: previous.bitmap, cause };
                self.hand_off(&state, eviction);
            }
        }
        state.bytes_used += cost;
        self.evict_if_needed(&mut state);
    }

    /// Remove an entry without invoking the hook; the caller takes the bitmap.
    pub fn remove(&self, key: &ImageKey) -> Option<Arc<Bitmap>> {
        let mut state = self.state.lock();
        let removed = state.entries.remove(key)?;
        state.bytes_used = state.bytes_used.saturating_sub(removed.cost());
        Some(removed.bitmap)
    }

    /// Evict every entry through the hook, least recently used first.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        while let Some((key, entry)) = state.entries.remove_lru() {
            state.bytes_used = state.bytes_used.saturating_sub(entry.cost());
            let cause = EvictionCause::Cleared;
            self.hand_off(&state, Eviction { key, bitmap: entry.bitmap, cause });
        }
        state.bytes_used = 0;
    }

    fn evict_if_needed(&self, state: &mut CacheState) {
        while state.bytes_used > self.budget.bytes_max && state.entries.len() > 1 {
            let Some((key, oldest)) = state.entries.remove_lru() else {
                break;
            };
            state.bytes_used = state.bytes_used.saturating_sub(oldest.cost());
            debug!(
                target: "cache::memory",
                key = key.as_str(),
                bytes = oldest.cost(),
                used = state.bytes_used,
                "evicted"
            );
            let cause = EvictionCause::Capacity;
            self.hand_off(state, Eviction { key, bitmap: oldest.bitmap, cause });
        }
    }

    /// Pass `eviction` to the hook unless the same bitmap is still resident under another key.
    fn hand_off(&self, state: &CacheState, eviction: Eviction) {
        let still_resident =
            state.entries.iter().any(|(_, entry)| Arc::ptr_eq(&entry.bitmap, &eviction.bitmap));
        if still_resident {
            debug!(
                target: "cache::memory",
                key = eviction.key.as_str(),
                "evicted bitmap still resident under another key"
            );
            return;
        }
        (self.on_evict)(eviction);
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryCache")
            .field("budget", &self.budget)
            .field("entries", &state.entries.len())
            .field("bytes_used", &state.bytes_used)
            .finish_non_exhaustive()
    }
}
