//! Runtime counters for the bitmap cache, the reuse pool, and the reclamation monitor.
//!
//! Every component records into one shared [`CacheStats`]; [`CacheStats::snapshot`] produces a
//! serialisable view for diagnostics.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::warn;

/// Decode latencies kept for the percentile estimates.
const LATENCY_SAMPLES: usize = 240;

/// Fixed-size ring of the most recent decode latencies, in milliseconds.
#[derive(Debug)]
struct LatencyWindow {
    ring: Vec<f32>,
    next: usize,
}

impl LatencyWindow {
    fn new() -> Self {
        Self { ring: Vec::with_capacity(LATENCY_SAMPLES), next: 0 }
    }

    fn record(&mut self, millis: f32) {
        if self.ring.len() < LATENCY_SAMPLES {
            self.ring.push(millis);
        } else {
            self.ring[self.next] = millis;
        }
        self.next = (self.next + 1) % LATENCY_SAMPLES;
    }

    /// Nearest-rank estimate; `0.0` before the first sample.
    fn quantile(&self, q: f32) -> f32 {
        if self.ring.is_empty() {
            return 0.0;
        }
        let mut scratch = self.ring.clone();
        let rank = (q.clamp(0.0, 1.0) * (scratch.len() - 1) as f32).round() as usize;
        let (_, value, _) = scratch.select_nth_unstable_by(rank, f32::total_cmp);
        *value
    }
}

#[derive(Debug)]
struct Counters {
    started: Instant,
    decode_latency: LatencyWindow,
    lookups: u64,
    hits: u64,
    evictions: u64,
    released_on_evict: u64,
    pooled: u64,
    reuse_hits: u64,
    reuse_misses: u64,
    reuse_rejected: u64,
    reclaimed: u64,
    reclaimed_bytes: u64,
    bytes_used: u64,
    bytes_capacity: u64,
    pool_entries: usize,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            decode_latency: LatencyWindow::new(),
            lookups: 0,
            hits: 0,
            evictions: 0,
            released_on_evict: 0,
            pooled: 0,
            reuse_hits: 0,
            reuse_misses: 0,
            reuse_rejected: 0,
            reclaimed: 0,
            reclaimed_bytes: 0,
            bytes_used: 0,
            bytes_capacity: 0,
            pool_entries: 0,
        }
    }
}

/// Thread-safe counter collection shared by the cache components.
#[derive(Debug, Default)]
pub struct CacheStats {
    counters: parking_lot::Mutex<Counters>,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record whether a memory-cache lookup produced a hit.
    pub fn record_lookup(&self, hit: bool) {
        let mut counters = self.counters.lock();
        counters.lookups = counters.lookups.saturating_add(1);
        if hit {
            counters.hits = counters.hits.saturating_add(1);
        }
    }

    /// Record an eviction and whether the bitmap went to the pool or was released.
    pub fn record_eviction(&self, pooled: bool) {
        let mut counters = self.counters.lock();
        counters.evictions = counters.evictions.saturating_add(1);
        if pooled {
            counters.pooled = counters.pooled.saturating_add(1);
        } else {
            counters.released_on_evict = counters.released_on_evict.saturating_add(1);
        }
    }

    pub fn record_reuse(&self, hit: bool) {
        let mut counters = self.counters.lock();
        if hit {
            counters.reuse_hits = counters.reuse_hits.saturating_add(1);
        } else {
            counters.reuse_misses = counters.reuse_misses.saturating_add(1);
        }
    }

    /// A claimed bitmap that the decoder refused to write into.
    pub fn record_reuse_rejected(&self) {
        let mut counters = self.counters.lock();
        counters.reuse_rejected = counters.reuse_rejected.saturating_add(1);
    }

    pub fn record_reclaimed(&self, bytes: usize) {
        let mut counters = self.counters.lock();
        counters.reclaimed = counters.reclaimed.saturating_add(1);
        counters.reclaimed_bytes = counters.reclaimed_bytes.saturating_add(bytes as u64);
    }

    pub fn record_decode(&self, duration: Duration) {
        let mut counters = self.counters.lock();
        counters.decode_latency.record(duration.as_secs_f32() * 1_000.0);
    }

    pub fn update_usage(&self, bytes_used: usize, bytes_capacity: usize, pool_entries: usize) {
        let mut counters = self.counters.lock();
        counters.bytes_used = bytes_used as u64;
        counters.bytes_capacity = bytes_capacity as u64;
        counters.pool_entries = pool_entries;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.counters.lock();

        let lookups = counters.lookups.max(1);
        let hit_ratio = counters.hits as f32 / lookups as f32;

        StatsSnapshot {
            timestamp_ms: unix_millis(),
            uptime_ms: counters.started.elapsed().as_millis() as u64,
            lookups: counters.lookups,
            hits: counters.hits,
            hit_ratio,
            evictions: counters.evictions,
            released_on_evict: counters.released_on_evict,
            pooled: counters.pooled,
            reuse_hits: counters.reuse_hits,
            reuse_misses: counters.reuse_misses,
            reuse_rejected: counters.reuse_rejected,
            reclaimed: counters.reclaimed,
            reclaimed_bytes: counters.reclaimed_bytes,
            decode_time_ms_p50: counters.decode_latency.quantile(0.50),
            decode_time_ms_p95: counters.decode_latency.quantile(0.95),
            bytes_used: counters.bytes_used,
            bytes_capacity: counters.bytes_capacity,
            pool_entries: counters.pool_entries,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or_else(
        |err| {
            warn!(target: "stats", "clock before unix epoch: {err}");
            0
        },
        |since| since.as_millis() as u64,
    )
}

/// Immutable view of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub timestamp_ms: u64,
    pub uptime_ms: u64,
    pub lookups: u64,
    pub hits: u64,
    pub hit_ratio: f32,
    pub evictions: u64,
    pub released_on_evict: u64,
    pub pooled: u64,
    pub reuse_hits: u64,
    pub reuse_misses: u64,
    pub reuse_rejected: u64,
    pub reclaimed: u64,
    pub reclaimed_bytes: u64,
    pub decode_time_ms_p50: f32,
    pub decode_time_ms_p95: f32,
    pub bytes_used: u64,
    pub bytes_capacity: u64,
    pub pool_entries: usize,
}
