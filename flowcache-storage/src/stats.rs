//! Cache statistics.
//!
//! Counters are lock-free atomics updated on the hot path; [`CacheStats`]
//! is a point-in-time copy for the control plane.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters shared by the facade and the write-back worker.
#[derive(Debug, Default)]
pub struct StatsCollector {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    decode_errors: AtomicU64,
    store_errors: AtomicU64,
    write_back_dropped: AtomicU64,
    write_back_failures: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        if count > 0 {
            self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_back_dropped(&self) {
        self.write_back_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_back_failure(&self) {
        self.write_back_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters, adding the memory tier's current occupancy.
    pub fn snapshot(&self, l1_entry_count: usize, l1_size_bytes: u64) -> CacheStats {
        let mut stats = CacheStats {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            hit_rate_percent: 0.0,
            l1_entry_count: l1_entry_count as u64,
            l1_size_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            write_back_dropped: self.write_back_dropped.load(Ordering::Relaxed),
            write_back_failures: self.write_back_failures.load(Ordering::Relaxed),
        };
        stats.hit_rate_percent = stats.hit_rate() * 100.0;
        stats
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Lookups answered by the memory tier.
    pub l1_hits: u64,
    /// Lookups answered by the persistent tier (and promoted).
    pub l2_hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// `hit_rate() * 100`.
    pub hit_rate_percent: f64,
    pub l1_entry_count: u64,
    pub l1_size_bytes: u64,
    /// Memory tier entries evicted to stay under the ceiling.
    pub evictions: u64,
    /// Persisted payloads that failed to decompress or parse.
    pub decode_errors: u64,
    /// Durable store failures and timeouts on the read and clear paths.
    pub store_errors: u64,
    /// Write-backs dropped because the queue was full.
    pub write_back_dropped: u64,
    /// Write-backs that failed to compress or upsert.
    pub write_back_failures: u64,
}

impl CacheStats {
    /// Hits across both tiers.
    pub fn hits(&self) -> u64 {
        self.l1_hits + self.l2_hits
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}
