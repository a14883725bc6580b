//! Bitmap cache coordination: the bounded memory tier, the reuse pool fed by its evictions,
//! the reclamation monitor, and the optional disk tier.

pub mod disk;
pub mod memory;
pub mod monitor;
pub mod pool;

use std::sync::{Arc, mpsc};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bitmap::Bitmap;
use crate::codec::{DecodeError, ImageDecoder, RasterDecoder};
use crate::config::CacheConfig;
use crate::pipeline::plan_decode;
use crate::stats::{CacheStats, StatsSnapshot};
use crate::types::{CacheBudget, ImageDimensions, ImageKey};

pub use disk::DiskCache;
pub use memory::{CacheEntry, Eviction, EvictionCause, EvictionHook, InsertHook, MemoryCache};
pub use monitor::{ReclaimEvent, ReclaimTicket, ReclamationMonitor};
pub use pool::{ReuseCandidate, ReusePool, ReuseRequest, can_reuse};

pub type Result<T> = crate::Result<T>;

/// Target box and alpha requirement for [`BitmapCache::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    pub max: ImageDimensions,
    pub has_alpha: bool,
}

impl LoadRequest {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self { max: ImageDimensions::new(max_width, max_height), has_alpha: false }
    }

    pub fn with_alpha(mut self, has_alpha: bool) -> Self {
        self.has_alpha = has_alpha;
        self
    }
}

/// Entry point used by the application.
///
/// Resident bitmaps live in a byte-bounded LRU. Evicted mutable bitmaps are handed to a
/// weakly held reuse pool so later decodes can write into their storage; immutable ones are
/// recycled on the spot. A background monitor releases storage of pooled bitmaps once their
/// last owner drops them.
#[derive(Debug)]
pub struct BitmapCache {
    memory: MemoryCache,
    pool: Arc<ReusePool>,
    monitor: Mutex<Option<ReclamationMonitor>>,
    decoder: Box<dyn ImageDecoder>,
    disk: Option<DiskCache>,
    stats: Arc<CacheStats>,
}

impl BitmapCache {
    /// Build the cache with the bundled [`RasterDecoder`] and start the monitor thread.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let decoder = RasterDecoder::new(config.reuse_contract);
        Self::with_decoder(config, decoder)
    }

    pub fn with_decoder(config: CacheConfig, decoder: impl ImageDecoder + 'static) -> Result<Self> {
        let stats = Arc::new(CacheStats::new());
        let (notifier, events) = mpsc::channel();
        let pool = Arc::new(ReusePool::new(config.reuse_contract, notifier.clone()));
        let monitor = ReclamationMonitor::start(
            config.monitor_thread_name.clone(),
            events,
            notifier,
            Arc::clone(&stats),
        )?;

        let disk = config.disk_dir.clone().map(DiskCache::new).transpose()?;
        let memory = MemoryCache::with_hook(
            config.budget,
            eviction_hook(Arc::clone(&pool), Arc::clone(&stats)),
        )
        .with_insert_hook(insert_hook(Arc::clone(&pool)));

        info!(
            target: "cache",
            bytes_max = config.budget.bytes_max,
            contract = ?config.reuse_contract,
            disk = disk.is_some(),
            "bitmap cache initialised"
        );
        stats.update_usage(0, config.budget.bytes_max, 0);

        Ok(Self {
            memory,
            pool,
            monitor: Mutex::new(Some(monitor)),
            decoder: Box::new(decoder),
            disk,
            stats,
        })
    }

    pub fn budget(&self) -> CacheBudget {
        self.memory.budget()
    }

    pub fn get(&self, key: &ImageKey) -> Option<Arc<Bitmap>> {
        let hit = self.memory.get(key);
        self.stats.record_lookup(hit.is_some());
        hit
    }

    /// Insert `bitmap`, evicting least recently used entries until the budget holds.
    ///
    /// A bitmap sitting in the reuse pool is withdrawn from it first.
    pub fn put(&self, key: ImageKey, bitmap: Arc<Bitmap>) {
        self.memory.put(key, bitmap);
        self.refresh_usage();
    }

    /// Drop `key` from both tiers. The removed bitmap goes back to the caller untouched.
    pub fn remove(&self, key: &ImageKey) -> Option<Arc<Bitmap>> {
        let removed = self.memory.remove(key);
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.remove(key) {
                warn!(target: "cache", key = key.as_str(), "failed to remove disk entry: {err:#}");
            }
        }
        self.refresh_usage();
        removed
    }

    /// Claim a pooled bitmap able to host a decode of `width` x `height` at `sample_size`.
    pub fn try_reuse(&self, width: u32, height: u32, sample_size: u32) -> Option<Arc<Bitmap>> {
        let claimed = self.pool.try_reuse(width, height, sample_size);
        self.stats.record_reuse(claimed.is_some());
        self.refresh_usage();
        claimed
    }

    /// Evict every resident entry through the regular eviction path.
    pub fn clear(&self) {
        self.memory.clear();
        self.refresh_usage();
        debug!(target: "cache", "memory tier cleared");
    }

    /// Stop the reclamation monitor. Later calls do nothing.
    ///
    /// The cache stays usable afterwards; pooled bitmaps then release their storage inline.
    pub fn shutdown(&self) {
        let Some(mut monitor) = self.monitor.lock().take() else {
            return;
        };
        monitor.stop();
        info!(target: "cache", "bitmap cache shut down");
    }

    pub fn is_running(&self) -> bool {
        self.monitor.lock().as_ref().is_some_and(ReclamationMonitor::is_running)
    }

    /// Return the bitmap for `key`, consulting memory, then disk, then decoding `source`.
    ///
    /// Decodes are planned against `request` and offered a pooled bitmap when one fits. Fresh
    /// decodes are written back to the disk tier.
    pub fn load(&self, key: &ImageKey, source: &[u8], request: LoadRequest) -> Result<Arc<Bitmap>> {
        if let Some(bitmap) = self.get(key) {
            return Ok(bitmap);
        }

        if let Some(bytes) = self.read_disk(key) {
            match self.decode_with_reuse(&bytes, request) {
                Ok(bitmap) => {
                    debug!(target: "cache", key = key.as_str(), "served from disk tier");
                    self.put(key.clone(), Arc::clone(&bitmap));
                    return Ok(bitmap);
                }
                Err(err) => {
                    warn!(target: "cache", key = key.as_str(), "discarding disk entry: {err}");
                    if let Some(Err(err)) = self.disk.as_ref().map(|disk| disk.remove(key)) {
                        let key = key.as_str();
                        warn!(target: "cache", key, "failed to drop disk entry: {err:#}");
                    }
                }
            }
        }

        let bitmap = self.decode_with_reuse(source, request)?;
        self.put(key.clone(), Arc::clone(&bitmap));
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.write_bitmap(key, &bitmap) {
                warn!(target: "cache", key = key.as_str(), "failed to persist bitmap: {err:#}");
            }
        }
        Ok(bitmap)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn bytes_used(&self) -> usize {
        self.memory.bytes_used()
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Pool entries, including dead ones not yet pruned.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    fn read_disk(&self, key: &ImageKey) -> Option<Vec<u8>> {
        let disk = self.disk.as_ref()?;
        match disk.read(key) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target: "cache", key = key.as_str(), "disk tier read failed: {err:#}");
                None
            }
        }
    }

    /// Decode `data`, offering a pooled bitmap. A target the decoder did not use, or one
    /// offered to a failed decode, goes back to the pool.
    fn decode_with_reuse(
        &self,
        data: &[u8],
        request: LoadRequest,
    ) -> std::result::Result<Arc<Bitmap>, DecodeError> {
        let started = Instant::now();
        let bounds = self.decoder.probe_bounds(data)?;
        let plan = plan_decode(bounds, request.max, request.has_alpha);
        let target = self.try_reuse(bounds.width, bounds.height, plan.sample_size);

        let outcome = self.decoder.decode(data, &plan.options, target.as_ref());
        self.stats.record_decode(started.elapsed());

        match outcome {
            Ok(decoded) => {
                if let Some(target) = target.filter(|_| !decoded.reused) {
                    self.stats.record_reuse_rejected();
                    self.pool.register(&target);
                }
                Ok(decoded.bitmap)
            }
            Err(err) => {
                if let Some(target) = target {
                    self.pool.register(&target);
                }
                Err(err)
            }
        }
    }

    fn refresh_usage(&self) {
        self.stats.update_usage(
            self.memory.bytes_used(),
            self.memory.budget().bytes_max,
            self.pool.len(),
        );
    }
}

impl Drop for BitmapCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Route evicted bitmaps: mutable ones to the pool, everything else recycled immediately.
fn eviction_hook(pool: Arc<ReusePool>, stats: Arc<CacheStats>) -> EvictionHook {
    Box::new(move |eviction: Eviction| {
        let Eviction { key, bitmap, cause } = eviction;
        let pooled = pool.contract().is_enabled() && bitmap.is_mutable() && !bitmap.is_recycled();
        if pooled {
            pool.register(&bitmap);
        } else {
            bitmap.recycle();
        }
        stats.record_eviction(pooled);
        debug!(target: "cache", key = key.as_str(), ?cause, pooled, "eviction handed off");
    })
}

/// A bitmap becoming resident again must not stay claimable from the pool.
fn insert_hook(pool: Arc<ReusePool>) -> InsertHook {
    Box::new(move |bitmap: &Arc<Bitmap>| {
        if pool.withdraw(bitmap) {
            debug!(target: "cache", id = bitmap.id().as_u64(), "resident again, left the pool");
        }
    })
}
