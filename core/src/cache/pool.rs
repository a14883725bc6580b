//! Pool of evicted bitmaps whose storage may host a future decode.
//!
//! The pool never keeps a bitmap alive: it stores a [`Weak`] handle plus the lookup criteria
//! captured at registration. Entries whose bitmap died are pruned on every scan.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};

use hashlink::LinkedHashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::bitmap::{Bitmap, BitmapId};
use crate::types::{ImageDimensions, PixelFormat, ReuseContract};

use super::monitor::ReclaimEvent;

/// Lookup criteria of a stored bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReuseCandidate {
    pub dimensions: ImageDimensions,
    pub format: PixelFormat,
    pub allocation_bytes: usize,
}

impl ReuseCandidate {
    pub fn of(bitmap: &Bitmap) -> Self {
        Self {
            dimensions: bitmap.dimensions(),
            format: bitmap.format(),
            allocation_bytes: bitmap.allocation_byte_count(),
        }
    }
}

/// Dimensions of the source image about to be decoded and its sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReuseRequest {
    pub width: u32,
    pub height: u32,
    pub sample_size: u32,
}

impl ReuseRequest {
    pub fn new(width: u32, height: u32, sample_size: u32) -> Self {
        Self { width, height, sample_size }
    }
}

/// Bytes per pixel the capacity rule accepts for a stored format.
///
/// Only the two decoder output formats are recognised; anything else is never reused.
fn reuse_bytes_per_pixel(format: PixelFormat) -> Option<usize> {
    match format {
        PixelFormat::Argb8888 => Some(4),
        PixelFormat::Rgb565 => Some(2),
        PixelFormat::Alpha8 => None,
    }
}

/// Whether `candidate` can host a decode of `request` under `contract`.
pub fn can_reuse(
    contract: ReuseContract,
    candidate: &ReuseCandidate,
    request: &ReuseRequest,
) -> bool {
    match contract {
        ReuseContract::Unsupported => false,
        ReuseContract::Strict => {
            candidate.dimensions.width == request.width
                && candidate.dimensions.height == request.height
                && request.sample_size == 1
        }
        ReuseContract::Capacity => {
            let Some(bpp) = reuse_bytes_per_pixel(candidate.format) else {
                return false;
            };
            let sample = request.sample_size.max(1);
            let width = (request.width / sample) as usize;
            let height = (request.height / sample) as usize;
            width
                .checked_mul(height)
                .and_then(|pixels| pixels.checked_mul(bpp))
                .is_some_and(|required| required <= candidate.allocation_bytes)
        }
    }
}

#[derive(Debug)]
struct PoolEntry {
    handle: Weak<Bitmap>,
    candidate: ReuseCandidate,
}

impl PoolEntry {
    /// Strong handle when the bitmap is still alive and holds storage.
    fn live(&self) -> Option<Arc<Bitmap>> {
        self.handle.upgrade().filter(|bitmap| !bitmap.is_recycled())
    }
}

/// Thread-safe set of weakly held reusable bitmaps.
#[derive(Debug)]
pub struct ReusePool {
    contract: ReuseContract,
    entries: Mutex<LinkedHashMap<BitmapId, PoolEntry>>,
    notifier: Sender<ReclaimEvent>,
}

impl ReusePool {
    /// Create a pool whose registered bitmaps report their death through `notifier`.
    pub fn new(contract: ReuseContract, notifier: Sender<ReclaimEvent>) -> Self {
        Self { contract, entries: Mutex::new(LinkedHashMap::new()), notifier }
    }

    pub fn contract(&self) -> ReuseContract {
        self.contract
    }

    /// Number of entries, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Track `bitmap` without extending its lifetime. Re-registering is a no-op.
    pub fn register(&self, bitmap: &Arc<Bitmap>) {
        let mut entries = self.entries.lock();
        if entries.contains_key(&bitmap.id()) {
            return;
        }
        bitmap.arm_reclaim(self.notifier.clone());
        let candidate = ReuseCandidate::of(bitmap);
        trace!(
            target: "cache::pool",
            id = bitmap.id().as_u64(),
            width = candidate.dimensions.width,
            height = candidate.dimensions.height,
            bytes = candidate.allocation_bytes,
            "registered for reuse"
        );
        entries.insert(bitmap.id(), PoolEntry { handle: Arc::downgrade(bitmap), candidate });
    }

    /// Claim a live bitmap able to host the requested decode.
    ///
    /// Dead entries met during the scan are removed whether or not a match is found.
    pub fn try_reuse(&self, width: u32, height: u32, sample_size: u32) -> Option<Arc<Bitmap>> {
        if !self.contract.is_enabled() {
            return None;
        }

        let request = ReuseRequest::new(width, height, sample_size);
        let contract = self.contract;
        let mut claimed: Option<Arc<Bitmap>> = None;
        let mut pruned = 0usize;

        self.entries.lock().retain(|_, entry| {
            let Some(bitmap) = entry.live() else {
                pruned += 1;
                return false;
            };
            if claimed.is_none() && can_reuse(contract, &entry.candidate, &request) {
                claimed = Some(bitmap);
                return false;
            }
            true
        });

        if pruned > 0 {
            debug!(target: "cache::pool", pruned, "pruned dead reuse entries");
        }
        if let Some(bitmap) = &claimed {
            bitmap.disarm_reclaim();
            debug!(
                target: "cache::pool",
                id = bitmap.id().as_u64(),
                width,
                height,
                sample_size,
                "reuse hit"
            );
        }
        claimed
    }

    /// Drop entries whose bitmap died. Returns the number removed.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.live().is_some());
        before - entries.len()
    }

    /// Take `bitmap` back out of the pool without handing it to anyone.
    ///
    /// Used when a pooled bitmap becomes resident again. Returns whether it was pooled.
    pub fn withdraw(&self, bitmap: &Bitmap) -> bool {
        let withdrawn = self.entries.lock().remove(&bitmap.id()).is_some();
        if withdrawn {
            bitmap.disarm_reclaim();
            trace!(target: "cache::pool", id = bitmap.id().as_u64(), "withdrawn");
        }
        withdrawn
    }
}
