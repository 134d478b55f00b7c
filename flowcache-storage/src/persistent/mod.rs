//! Persistent tier (L2).
//!
//! Durable store of compressed records addressed by `(flow_id, node_id)`.
//! Every record carries an absolute `expires_at`; stores report expired
//! records as absent and reap them via [`PersistentTier::purge_expired`],
//! which [`spawn_expiry_sweeper`] drives periodically.
//!
//! The store may be shared between processes. Writers for the same key race
//! with last-write-wins semantics; correctness rests on hash validity, not
//! on which writer won.

pub mod in_memory;
pub mod key;
pub mod lmdb;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcache_core::{CacheKey, CacheResult, FlowId, PersistedCacheRecord, StoreError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub use in_memory::InMemoryPersistentTier;
pub use lmdb::LmdbPersistentTier;

/// Durable store backing the memory tier.
///
/// Implementations must be safe for concurrent use. `upsert` must be atomic
/// per key: concurrent writers leave exactly one of their records, never a
/// duplicate or a mix of both.
#[async_trait]
pub trait PersistentTier: Send + Sync {
    /// Fetch the live record for a key. Expired records are absent.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<PersistedCacheRecord>>;

    /// Insert or replace the record for `record.key`.
    async fn upsert(&self, record: PersistedCacheRecord) -> CacheResult<()>;

    /// Remove every record of a flow. Returns the number removed.
    async fn delete_by_flow(&self, flow_id: &FlowId) -> CacheResult<u64>;

    /// Remove every record. Returns the number removed.
    async fn delete_all(&self) -> CacheResult<u64>;

    /// Remove records with `expires_at <= now`. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> CacheResult<u64>;
}

/// Run a store operation, failing with [`StoreError::Timeout`] if it does
/// not finish within `limit`.
pub async fn with_timeout<T, F>(operation: &'static str, limit: Duration, fut: F) -> CacheResult<T>
where
    F: Future<Output = CacheResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation,
            after: limit,
        }
        .into()),
    }
}

// ============================================================================
// EXPIRY SWEEPER
// ============================================================================

/// Counters maintained by the expiry sweeper.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    pub cycles: AtomicU64,
    pub records_purged: AtomicU64,
    pub errors: AtomicU64,
}

/// Snapshot of [`SweepMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepMetricsSnapshot {
    pub cycles: u64,
    pub records_purged: u64,
    pub errors: u64,
}

impl SweepMetrics {
    pub fn snapshot(&self) -> SweepMetricsSnapshot {
        SweepMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            records_purged: self.records_purged.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Run one sweep, recording the outcome.
pub async fn sweep_once(tier: &dyn PersistentTier, timeout: Duration, metrics: &SweepMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    match with_timeout("purge_expired", timeout, tier.purge_expired(Utc::now())).await {
        Ok(0) => tracing::trace!("expiry sweep found nothing to purge"),
        Ok(purged) => {
            metrics.records_purged.fetch_add(purged, Ordering::Relaxed);
            tracing::info!(purged, "purged expired cache records");
        }
        Err(e) => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "expiry sweep failed");
        }
    }
}

/// Periodically purge expired records until `shutdown_rx` flips to `true`
/// or its sender is dropped.
pub async fn expiry_sweeper_task(
    tier: Arc<dyn PersistentTier>,
    every: Duration,
    timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> SweepMetricsSnapshot {
    let metrics = SweepMetrics::default();

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = every.as_secs(), "expiry sweeper started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                sweep_once(tier.as_ref(), timeout, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        records_purged = snapshot.records_purged,
        errors = snapshot.errors,
        "expiry sweeper stopped"
    );
    snapshot
}

/// Spawn [`expiry_sweeper_task`] on the current Tokio runtime.
pub fn spawn_expiry_sweeper(
    tier: Arc<dyn PersistentTier>,
    every: Duration,
    timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<SweepMetricsSnapshot> {
    tokio::spawn(expiry_sweeper_task(tier, every, timeout, shutdown_rx))
}
