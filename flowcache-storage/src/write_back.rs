//! Background write-back into the persistent tier.
//!
//! `set` hands each entry to a bounded queue and returns. One worker task
//! drains the queue in order: compress, then a timed `upsert`. A full queue
//! drops the write; a failed write is logged and counted. Neither is ever
//! reported to the caller of `set`.
//!
//! # Fences
//!
//! Every queued write carries a sequence number. A clear raises a fence for
//! one flow (or for everything) at the current sequence; the worker skips
//! queued writes below the fence instead of persisting them. Clears
//! therefore never wait for a backlog to drain through a slow store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use flowcache_core::{
    codec, CacheConfig, CacheEntry, CacheError, CacheKey, CacheResult, FlowId, PersistedCacheRecord,
};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::persistent::{with_timeout, PersistentTier};
use crate::stats::StatsCollector;

enum Job {
    Persist {
        seq: u64,
        entry: CacheEntry,
        serialized: Vec<u8>,
    },
    Barrier(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy)]
struct WorkerSettings {
    compression_level: i32,
    ttl: Duration,
    timeout: Duration,
}

#[derive(Default)]
struct Fences {
    all: u64,
    flows: HashMap<FlowId, u64>,
}

#[derive(Default)]
struct Sequencing {
    next_seq: AtomicU64,
    /// Highest sequence the worker has taken off the queue, plus one.
    done_below: AtomicU64,
    fences: Mutex<Fences>,
}

impl Sequencing {
    fn fences(&self) -> MutexGuard<'_, Fences> {
        self.fences
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_fenced(&self, key: &CacheKey, seq: u64) -> bool {
        let fences = self.fences();
        seq < fences.all || fences.flows.get(&key.flow_id).is_some_and(|&fence| seq < fence)
    }
}

/// Handle to the write-back worker.
///
/// Dropping it closes the queue; the worker finishes what is already queued
/// and exits.
pub struct WriteBack {
    tx: mpsc::Sender<Job>,
    sequencing: Arc<Sequencing>,
    stats: Arc<StatsCollector>,
}

impl WriteBack {
    /// Spawn the worker on `runtime`.
    pub fn spawn(
        runtime: &Handle,
        tier: Arc<dyn PersistentTier>,
        config: &CacheConfig,
        stats: Arc<StatsCollector>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.write_back_capacity);
        let settings = WorkerSettings {
            compression_level: config.compression_level,
            ttl: config.persistent_ttl,
            timeout: config.store_timeout,
        };
        let sequencing = Arc::new(Sequencing::default());
        runtime.spawn(run_worker(rx, tier, settings, sequencing.clone(), stats.clone()));
        Self { tx, sequencing, stats }
    }

    /// Queue an entry for persistence without waiting.
    ///
    /// Returns `false` if the write was dropped.
    pub fn enqueue(&self, entry: CacheEntry, serialized: Vec<u8>) -> bool {
        let key = entry.key.clone();
        let seq = self.sequencing.next_seq.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(Job::Persist { seq, entry, serialized }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.record_write_back_dropped();
                tracing::warn!(
                    flow_id = %key.flow_id,
                    node_id = %key.node_id,
                    "write-back queue full, dropping durable write"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.record_write_back_dropped();
                tracing::warn!(
                    flow_id = %key.flow_id,
                    node_id = %key.node_id,
                    "write-back worker stopped, dropping durable write"
                );
                false
            }
        }
    }

    /// Discard every write of `flow_id` queued before this call.
    pub fn fence_flow(&self, flow_id: &FlowId) {
        let fence = self.sequencing.next_seq.load(Ordering::SeqCst);
        let done_below = self.sequencing.done_below.load(Ordering::SeqCst);
        let mut fences = self.sequencing.fences();
        // Fences the worker has already passed can no longer match anything.
        fences.flows.retain(|_, &mut f| f > done_below);
        if fence > fences.all {
            fences.flows.insert(flow_id.clone(), fence);
        }
    }

    /// Discard every write queued before this call.
    pub fn fence_all(&self) {
        let fence = self.sequencing.next_seq.load(Ordering::SeqCst);
        let mut fences = self.sequencing.fences();
        fences.all = fence;
        fences.flows.clear();
    }

    /// Wait until every write queued before this call has been attempted.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Barrier(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Job>,
    tier: Arc<dyn PersistentTier>,
    settings: WorkerSettings,
    sequencing: Arc<Sequencing>,
    stats: Arc<StatsCollector>,
) {
    tracing::debug!("write-back worker started");

    while let Some(job) = rx.recv().await {
        match job {
            Job::Persist { seq, entry, serialized } => {
                sequencing.done_below.fetch_max(seq + 1, Ordering::SeqCst);
                if sequencing.is_fenced(&entry.key, seq) {
                    tracing::trace!(
                        flow_id = %entry.key.flow_id,
                        node_id = %entry.key.node_id,
                        "skipping write queued before a clear"
                    );
                    continue;
                }
                let flow_id = entry.key.flow_id.clone();
                let node_id = entry.key.node_id.clone();
                if let Err(e) = persist(tier.as_ref(), entry, serialized, settings).await {
                    stats.record_write_back_failure();
                    tracing::warn!(
                        flow_id = %flow_id,
                        node_id = %node_id,
                        error = %e,
                        "durable write failed"
                    );
                }
            }
            Job::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    tracing::debug!("write-back worker stopped");
}

async fn persist(
    tier: &dyn PersistentTier,
    entry: CacheEntry,
    serialized: Vec<u8>,
    settings: WorkerSettings,
) -> CacheResult<()> {
    let level = settings.compression_level;
    let payload = tokio::task::spawn_blocking(move || codec::compress_with_level(&serialized, level))
        .await
        .map_err(|e| CacheError::unavailable(format!("compression task failed: {e}")))??;

    let record = PersistedCacheRecord::from_entry(&entry, payload, settings.ttl);
    with_timeout("upsert", settings.timeout, tier.upsert(record)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistent::InMemoryPersistentTier;
    use flowcache_core::{Provenance, UpstreamHashes};
    use serde_json::json;

    fn entry(node: &str, value: serde_json::Value) -> (CacheEntry, Vec<u8>) {
        let serialized = codec::encode_value(&value).expect("encode should succeed");
        let entry = CacheEntry::new(
            CacheKey::new("flow", node),
            Provenance::new("h1", UpstreamHashes::new()),
            Arc::new(value),
            serialized.len() as u64,
        );
        (entry, serialized)
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_writes() {
        let tier = Arc::new(InMemoryPersistentTier::new());
        let stats = Arc::new(StatsCollector::new());
        let write_back = WriteBack::spawn(&Handle::current(), tier.clone(), &CacheConfig::default(), stats);

        for i in 0..10 {
            let (entry, serialized) = entry(&format!("n{i}"), json!({"i": i}));
            assert!(write_back.enqueue(entry, serialized));
        }
        write_back.flush().await;

        assert_eq!(tier.len(), 10);
        let record = tier
            .peek(&CacheKey::new("flow", "n3"))
            .expect("record should be persisted");
        assert_eq!(
            codec::unpack(&record.payload).expect("unpack should succeed"),
            json!({"i": 3})
        );
    }

    #[tokio::test]
    async fn test_queue_order_is_write_order() {
        let tier = Arc::new(InMemoryPersistentTier::new());
        let stats = Arc::new(StatsCollector::new());
        let write_back = WriteBack::spawn(&Handle::current(), tier.clone(), &CacheConfig::default(), stats);

        for i in 0..5 {
            let (entry, serialized) = entry("same", json!(i));
            write_back.enqueue(entry, serialized);
        }
        write_back.flush().await;

        let record = tier
            .peek(&CacheKey::new("flow", "same"))
            .expect("record should be persisted");
        assert_eq!(codec::unpack(&record.payload).expect("unpack should succeed"), json!(4));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_and_counts() {
        let tier = Arc::new(InMemoryPersistentTier::new());
        let stats = Arc::new(StatsCollector::new());
        let config = CacheConfig::default().with_write_back_capacity(1);
        let write_back = WriteBack::spawn(&Handle::current(), tier.clone(), &config, stats.clone());

        // The worker cannot run until this task yields, so the second write
        // finds the single slot taken.
        let (first, first_bytes) = entry("a", json!(1));
        let (second, second_bytes) = entry("b", json!(2));
        assert!(write_back.enqueue(first, first_bytes));
        assert!(!write_back.enqueue(second, second_bytes));

        write_back.flush().await;
        assert_eq!(tier.len(), 1);
        assert_eq!(stats.snapshot(0, 0).write_back_dropped, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_flow_fence_skips_earlier_writes() {
        let tier = Arc::new(InMemoryPersistentTier::new());
        let stats = Arc::new(StatsCollector::new());
        let write_back = WriteBack::spawn(&Handle::current(), tier.clone(), &CacheConfig::default(), stats);

        for i in 0..3 {
            let (entry, serialized) = entry(&format!("n{i}"), json!(i));
            assert!(write_back.enqueue(entry, serialized));
        }
        let other = CacheEntry::new(
            CacheKey::new("other", "n0"),
            Provenance::new("h1", UpstreamHashes::new()),
            Arc::new(json!("kept")),
            6,
        );
        let other_bytes = codec::encode_value(&json!("kept")).expect("encode should succeed");
        assert!(write_back.enqueue(other, other_bytes));

        // Nothing has run yet; the fence catches all three queued writes.
        write_back.fence_flow(&FlowId::new("flow"));
        let (late, late_bytes) = entry("late", json!("after"));
        assert!(write_back.enqueue(late, late_bytes));
        write_back.flush().await;

        assert_eq!(tier.len(), 2);
        assert!(tier.peek(&CacheKey::new("flow", "n0")).is_none());
        assert!(tier.peek(&CacheKey::new("other", "n0")).is_some());
        assert!(tier.peek(&CacheKey::new("flow", "late")).is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_global_fence_skips_every_earlier_write() {
        let tier = Arc::new(InMemoryPersistentTier::new());
        let stats = Arc::new(StatsCollector::new());
        let write_back = WriteBack::spawn(&Handle::current(), tier.clone(), &CacheConfig::default(), stats.clone());

        for i in 0..4 {
            let (entry, serialized) = entry(&format!("n{i}"), json!(i));
            write_back.enqueue(entry, serialized);
        }
        write_back.fence_all();
        write_back.flush().await;

        assert!(tier.is_empty());
        assert_eq!(stats.snapshot(0, 0).write_back_failures, 0);
    }
}
