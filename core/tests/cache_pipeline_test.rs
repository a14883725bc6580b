use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bitmap_cache_core::cache::{BitmapCache, MemoryCache};
use bitmap_cache_core::types::{CacheBudget, ImageDimensions, ImageKey, PixelFormat};
use bitmap_cache_core::{Bitmap, BitmapId, CacheConfig, ReuseContract, compute_downsample};

fn bitmap(width: u32, height: u32, mutable: bool) -> Arc<Bitmap> {
    Arc::new(Bitmap::new(ImageDimensions::new(width, height), PixelFormat::Argb8888, mutable))
}

fn cache(bytes_max: usize) -> BitmapCache {
    let config = CacheConfig::default()
        .with_budget(CacheBudget::new(bytes_max))
        .with_contract(ReuseContract::Capacity);
    BitmapCache::new(config).expect("cache")
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn touched_entry_survives_next_eviction() {
    // Each entry costs 10x10x4 = 400 bytes; three fit, the fourth forces one eviction.
    let cache = cache(1_200);
    let (a, b, c, d) =
        (ImageKey::new("a"), ImageKey::new("b"), ImageKey::new("c"), ImageKey::new("d"));

    cache.put(a.clone(), bitmap(10, 10, true));
    cache.put(b.clone(), bitmap(10, 10, true));
    cache.put(c.clone(), bitmap(10, 10, true));
    assert!(cache.get(&a).is_some());

    cache.put(d.clone(), bitmap(10, 10, true));

    assert!(cache.get(&a).is_some(), "recently touched entry should be retained");
    assert!(cache.get(&b).is_none(), "least recently used entry should be evicted");
    assert!(cache.get(&c).is_some());
    assert!(cache.get(&d).is_some());
    assert_eq!(cache.bytes_used(), 1_200);
}

#[test]
fn resident_bytes_never_exceed_budget() {
    let budget = 5_000;
    let memory = MemoryCache::new(CacheBudget::new(budget));
    let sides = [7u32, 13, 3, 21, 9, 17, 2, 30, 11, 5];

    for (index, side) in sides.iter().copied().cycle().take(60).enumerate() {
        memory.put(ImageKey::new(format!("entry::{index}")), bitmap(side, side, true));
        let single = (side * side * 4) as usize;
        if single > budget {
            assert_eq!(memory.len(), 1);
            assert_eq!(memory.bytes_used(), single);
        } else {
            assert!(memory.bytes_used() <= budget, "over budget after {index}");
        }
    }
}

#[test]
fn oversized_entry_stays_alone() {
    let cache = cache(100);
    cache.put(ImageKey::new("small"), bitmap(2, 2, true));
    cache.put(ImageKey::new("huge"), bitmap(50, 50, true));

    assert_eq!(cache.len(), 1);
    assert!(cache.get(&ImageKey::new("huge")).is_some());
    assert_eq!(cache.bytes_used(), 50 * 50 * 4);
}

#[test]
fn evicted_mutable_bitmap_becomes_reusable() {
    let cache = cache(40_000);
    let displayed = bitmap(100, 100, true);
    cache.put(ImageKey::new("first"), Arc::clone(&displayed));
    cache.put(ImageKey::new("second"), bitmap(100, 100, true));

    assert!(cache.get(&ImageKey::new("first")).is_none());
    assert_eq!(cache.pool_len(), 1);

    let reused = cache.try_reuse(100, 100, 1).expect("pooled bitmap");
    assert!(Arc::ptr_eq(&reused, &displayed));
    assert!(cache.try_reuse(100, 100, 1).is_none(), "claimed bitmaps leave the pool");

    let snap = cache.stats();
    assert_eq!(snap.pooled, 1);
    assert_eq!(snap.reuse_hits, 1);
    assert_eq!(snap.reuse_misses, 1);
}

#[test]
fn evicted_immutable_bitmap_is_recycled_not_pooled() {
    let cache = cache(40_000);
    let displayed = bitmap(100, 100, false);
    cache.put(ImageKey::new("first"), Arc::clone(&displayed));
    cache.put(ImageKey::new("second"), bitmap(100, 100, true));

    assert!(displayed.is_recycled());
    assert_eq!(cache.pool_len(), 0);
    assert!(cache.try_reuse(100, 100, 1).is_none());
    assert!(cache.try_reuse(10, 10, 1).is_none());
    assert_eq!(cache.stats().released_on_evict, 1);
}

#[test]
fn pool_drops_bitmaps_once_their_owner_is_gone() {
    let cache = cache(40_000);
    let displayed = bitmap(100, 100, true);
    cache.put(ImageKey::new("first"), Arc::clone(&displayed));
    cache.put(ImageKey::new("second"), bitmap(100, 100, true));
    assert_eq!(cache.pool_len(), 1);

    drop(displayed);
    assert!(
        wait_for(|| cache.stats().reclaimed == 1),
        "monitor should release the storage of the dropped bitmap"
    );
    assert_eq!(cache.stats().reclaimed_bytes, 40_000);

    assert!(cache.try_reuse(100, 100, 1).is_none());
    assert_eq!(cache.pool_len(), 0, "scan should prune the dead entry");
}

#[test]
fn clear_hands_every_entry_to_the_pool() {
    let cache = cache(1 << 20);
    let held: Vec<_> = (0..3).map(|_| bitmap(16, 16, true)).collect();
    for (index, bitmap) in held.iter().enumerate() {
        cache.put(ImageKey::new(format!("k{index}")), Arc::clone(bitmap));
    }

    cache.clear();

    assert!(cache.is_empty());
    assert_eq!(cache.bytes_used(), 0);
    assert_eq!(cache.pool_len(), 3);
    assert!(cache.try_reuse(8, 8, 1).is_some());
}

#[test]
fn put_then_get_returns_same_bitmap() {
    let cache = cache(1 << 20);
    let original = bitmap(12, 8, true);
    cache.put(ImageKey::new("round::trip"), Arc::clone(&original));

    let fetched = cache.get(&ImageKey::new("round::trip")).expect("resident");
    assert!(Arc::ptr_eq(&fetched, &original));
}

#[test]
fn bitmaps_dropped_after_shutdown_still_release_storage() {
    let cache = cache(40_000);
    let displayed = bitmap(100, 100, true);
    cache.put(ImageKey::new("first"), Arc::clone(&displayed));
    cache.put(ImageKey::new("second"), bitmap(100, 100, true));

    cache.shutdown();
    cache.shutdown();
    drop(displayed);

    assert!(!cache.is_running());
    assert!(cache.try_reuse(100, 100, 1).is_none());
    assert_eq!(cache.pool_len(), 0);
}

#[test]
fn reinserted_bitmap_is_not_claimable_while_resident() {
    let cache = cache(40_000);
    let shown = bitmap(100, 100, true);
    cache.put(ImageKey::new("a"), Arc::clone(&shown));
    cache.put(ImageKey::new("b"), bitmap(100, 100, true));
    assert_eq!(cache.pool_len(), 1);

    // Still on screen, so the caller caches it again.
    cache.put(ImageKey::new("a"), Arc::clone(&shown));

    assert!(cache.try_reuse(100, 100, 1).is_none());
    let resident = cache.get(&ImageKey::new("a")).expect("resident");
    assert!(Arc::ptr_eq(&resident, &shown));
}

#[test]
fn concurrent_traffic_keeps_budget_and_claims_exclusive() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 300;
    // Four 16x16 ARGB entries fit.
    let budget = 4 * 16 * 16 * 4;
    let cache = Arc::new(cache(budget));
    let keys: Vec<ImageKey> = (0..6).map(|index| ImageKey::new(format!("k{index}"))).collect();

    let claims: Vec<Vec<Arc<Bitmap>>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                let keys = &keys;
                scope.spawn(move || {
                    // Keeps evicted bitmaps alive so the pool has something to hand out.
                    let mut shown = Vec::new();
                    let mut claimed = Vec::new();
                    for round in 0..ROUNDS {
                        let key = &keys[(worker + round) % keys.len()];
                        match (worker * 7 + round) % 10 {
                            0..=3 => {
                                let fresh = bitmap(16, 16, true);
                                shown.push(Arc::clone(&fresh));
                                cache.put(key.clone(), fresh);
                            }
                            4..=6 => {
                                cache.get(key);
                            }
                            7 | 8 => claimed.extend(cache.try_reuse(16, 16, 1)),
                            _ => {
                                if round % 50 == 9 {
                                    cache.clear();
                                }
                            }
                        }
                        let used = cache.bytes_used();
                        assert!(used <= budget || cache.len() <= 1, "{used} bytes resident");
                    }
                    claimed
                })
            })
            .collect();
        workers.into_iter().map(|worker| worker.join().expect("worker panicked")).collect()
    });

    assert!(cache.bytes_used() <= budget || cache.len() == 1);

    let snap = cache.stats();
    assert_eq!(snap.evictions, snap.pooled + snap.released_on_evict);

    let mut seen: HashSet<BitmapId> = HashSet::new();
    for bitmap in claims.iter().flatten() {
        assert!(seen.insert(bitmap.id()), "bitmap {:?} claimed twice", bitmap.id());
    }

    // Whatever is left in the pool must not be resident.
    while let Some(pooled) = cache.try_reuse(1, 1, 1) {
        for key in &keys {
            let resident = cache.get(key);
            assert!(!resident.is_some_and(|resident| Arc::ptr_eq(&resident, &pooled)));
        }
        assert!(seen.insert(pooled.id()), "pooled bitmap was already claimed");
    }
}

#[test]
fn downsample_factor_examples() {
    assert_eq!(compute_downsample(1000, 500, 200, 200), 8);
    assert_eq!(compute_downsample(100, 100, 200, 200), 1);
}
