//! The cache facade.
//!
//! [`FlowCache`] is constructed once per process and shared (by reference or
//! `Arc`) with every executor that needs it. Lookups consult the memory tier,
//! then the persistent tier, promoting valid persistent hits into memory.
//! Writes land in memory synchronously and reach the persistent tier through
//! the [`WriteBack`] queue.
//!
//! # Failure model
//!
//! Nothing here returns an error after construction. Store failures,
//! timeouts and undecodable payloads are logged, counted in [`CacheStats`]
//! and surface as a miss (or a no-op for writes and clears).

use std::sync::Arc;
use std::time::Duration;

use flowcache_core::{
    codec, is_valid, CacheConfig, CacheEntry, CacheError, CacheKey, CacheResult, ConfigError,
    ErrorKind, FlowId, NodeId, Provenance, UpstreamHashes,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::memory::{InsertOutcome, MemoryTier};
use crate::persistent::{
    spawn_expiry_sweeper, with_timeout, LmdbPersistentTier, PersistentTier, SweepMetricsSnapshot,
};
use crate::stats::{CacheStats, StatsCollector};
use crate::write_back::WriteBack;

/// Entries removed by a clear operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearSummary {
    pub memory_removed: usize,
    /// Zero when there is no persistent tier or its deletion failed.
    pub persistent_removed: u64,
}

/// Two-tier, dependency-aware cache of node results.
pub struct FlowCache {
    memory: MemoryTier,
    persistent: Option<Arc<dyn PersistentTier>>,
    write_back: Option<WriteBack>,
    stats: Arc<StatsCollector>,
    store_timeout: Duration,
    sweep_interval: Duration,
}

impl FlowCache {
    /// Build a cache over an optional persistent tier.
    ///
    /// The tier is ignored when `config.persistent_enabled` is false. With a
    /// tier, this must be called from within a Tokio runtime, which hosts the
    /// write-back worker.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` for an invalid configuration or a missing
    /// runtime.
    pub fn new(config: CacheConfig, persistent: Option<Arc<dyn PersistentTier>>) -> CacheResult<Self> {
        config.validate()?;

        let stats = Arc::new(StatsCollector::new());
        let persistent = persistent.filter(|_| config.persistent_enabled);

        let write_back = match &persistent {
            Some(tier) => {
                let runtime = Handle::try_current().map_err(|e| ConfigError::InvalidValue {
                    field: "persistent_enabled".to_string(),
                    value: "true".to_string(),
                    reason: format!("write-back requires a Tokio runtime: {e}"),
                })?;
                Some(WriteBack::spawn(&runtime, tier.clone(), &config, stats.clone()))
            }
            None => None,
        };

        Ok(Self {
            memory: MemoryTier::new(config.memory_max_bytes, config.memory_ttl),
            persistent,
            write_back,
            stats,
            store_timeout: config.store_timeout,
            sweep_interval: config.sweep_interval,
        })
    }

    /// Build a cache with no persistent tier.
    pub fn memory_only(config: CacheConfig) -> CacheResult<Self> {
        Self::new(config.with_persistent(false), None)
    }

    /// Build a cache over the LMDB store at `config.lmdb_path`.
    pub fn with_lmdb(config: CacheConfig) -> CacheResult<Self> {
        if !config.persistent_enabled {
            return Self::memory_only(config);
        }
        let tier = LmdbPersistentTier::open(&config.lmdb_path, config.lmdb_map_size_mb)?;
        Self::new(config, Some(Arc::new(tier)))
    }

    /// Look up a result valid for the given hashes.
    ///
    /// Returns `None` when neither tier holds a valid, unexpired entry.
    pub async fn get(
        &self,
        flow_id: &FlowId,
        node_id: &NodeId,
        expected_hash: &str,
        expected_upstream_hashes: &UpstreamHashes,
    ) -> Option<Arc<Value>> {
        let key = CacheKey::new(flow_id.clone(), node_id.clone());

        if let Some(entry) = self.memory.get(&key) {
            if is_valid(&entry.provenance, expected_hash, expected_upstream_hashes) {
                self.stats.record_l1_hit();
                tracing::trace!(flow_id = %flow_id, node_id = %node_id, "memory tier hit");
                return Some(entry.value.clone());
            }
        }

        if let Some(value) = self
            .get_persistent(&key, expected_hash, expected_upstream_hashes)
            .await
        {
            self.stats.record_l2_hit();
            return Some(value);
        }

        self.stats.record_miss();
        tracing::trace!(flow_id = %flow_id, node_id = %node_id, "cache miss");
        None
    }

    async fn get_persistent(
        &self,
        key: &CacheKey,
        expected_hash: &str,
        expected_upstream_hashes: &UpstreamHashes,
    ) -> Option<Arc<Value>> {
        let tier = self.persistent.as_ref()?;

        let record = match with_timeout("get", self.store_timeout, tier.get(key)).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                self.record_failure("get", key.flow_id.as_str(), &e);
                return None;
            }
        };

        if !is_valid(&record.provenance, expected_hash, expected_upstream_hashes) {
            tracing::trace!(
                flow_id = %key.flow_id,
                node_id = %key.node_id,
                "persistent record is stale"
            );
            return None;
        }

        let value = match codec::unpack(&record.payload) {
            Ok(value) => value,
            Err(e) => {
                self.record_failure("decode", key.flow_id.as_str(), &e.into());
                return None;
            }
        };

        // The memory copy must not outlive the durable record.
        let remaining = (record.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let entry = record.into_entry(value);
        let value = entry.value.clone();
        let outcome = if remaining.is_zero() {
            InsertOutcome::Rejected { size_bytes: entry.size_bytes }
        } else {
            self.memory.promote(entry, remaining)
        };
        self.stats.record_evictions(outcome.evicted_count());
        tracing::debug!(
            flow_id = %key.flow_id,
            node_id = %key.node_id,
            promoted = outcome.is_stored(),
            "persistent tier hit"
        );
        Some(value)
    }

    /// Store a node result.
    ///
    /// Returns once the memory tier holds the entry. The durable write is
    /// queued and never reported back; see [`FlowCache::flush`].
    pub fn set(
        &self,
        flow_id: &FlowId,
        node_id: &NodeId,
        own_hash: impl Into<String>,
        upstream_hashes: UpstreamHashes,
        value: Value,
    ) {
        let serialized = match codec::encode_value(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(flow_id = %flow_id, node_id = %node_id, error = %e, "cannot encode node result");
                return;
            }
        };

        let entry = CacheEntry::new(
            CacheKey::new(flow_id.clone(), node_id.clone()),
            Provenance::new(own_hash, upstream_hashes),
            Arc::new(value),
            serialized.len() as u64,
        );

        self.stats.record_set();
        let outcome = self.memory.set(entry.clone());
        self.stats.record_evictions(outcome.evicted_count());

        if let Some(write_back) = &self.write_back {
            write_back.enqueue(entry, serialized);
        }
    }

    /// Remove every entry of a flow from both tiers.
    ///
    /// Write-backs of the flow still queued are discarded so none of them can
    /// restore a cleared entry. The call takes at most about two store
    /// timeouts, however long the queue is.
    pub async fn clear_flow_cache(&self, flow_id: &FlowId) -> ClearSummary {
        if let Some(write_back) = &self.write_back {
            write_back.fence_flow(flow_id);
        }
        self.settle_write_back().await;

        let memory_removed = self.memory.delete_matching(|key| key.belongs_to(flow_id));
        let persistent_removed = match &self.persistent {
            Some(tier) => {
                match with_timeout("delete_by_flow", self.store_timeout, tier.delete_by_flow(flow_id)).await {
                    Ok(removed) => removed,
                    Err(e) => {
                        self.record_failure("delete_by_flow", flow_id.as_str(), &e);
                        0
                    }
                }
            }
            None => 0,
        };

        tracing::info!(
            flow_id = %flow_id,
            memory_removed,
            persistent_removed,
            "cleared flow cache"
        );
        ClearSummary {
            memory_removed,
            persistent_removed,
        }
    }

    /// Empty both tiers.
    pub async fn clear_all(&self) -> ClearSummary {
        if let Some(write_back) = &self.write_back {
            write_back.fence_all();
        }
        self.settle_write_back().await;

        let memory_removed = self.memory.clear();
        let persistent_removed = match &self.persistent {
            Some(tier) => match with_timeout("delete_all", self.store_timeout, tier.delete_all()).await {
                Ok(removed) => removed,
                Err(e) => {
                    self.record_failure("delete_all", "*", &e);
                    0
                }
            },
            None => 0,
        };

        tracing::info!(memory_removed, persistent_removed, "cleared all cache entries");
        ClearSummary {
            memory_removed,
            persistent_removed,
        }
    }

    /// Current counters and memory tier occupancy.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.memory.len(), self.memory.size_bytes())
    }

    /// Wait for every write-back queued so far to be attempted.
    pub async fn flush(&self) {
        if let Some(write_back) = &self.write_back {
            write_back.flush().await;
        }
    }

    // Lets an in-flight durable write finish before a clear deletes from the
    // store, waiting no longer than one store timeout.
    async fn settle_write_back(&self) {
        let Some(write_back) = &self.write_back else {
            return;
        };
        if tokio::time::timeout(self.store_timeout, write_back.flush()).await.is_err() {
            tracing::warn!(
                timeout_ms = self.store_timeout.as_millis() as u64,
                "write-back still busy, clearing without waiting"
            );
        }
    }

    /// Start the periodic expiry sweep of the persistent tier.
    ///
    /// Returns `None` without a persistent tier. The sweeper stops when
    /// `shutdown_rx` turns `true`.
    pub fn start_expiry_sweeper(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<SweepMetricsSnapshot>> {
        let tier = self.persistent.clone()?;
        Some(spawn_expiry_sweeper(
            tier,
            self.sweep_interval,
            self.store_timeout,
            shutdown_rx,
        ))
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn has_persistent_tier(&self) -> bool {
        self.persistent.is_some()
    }

    fn record_failure(&self, operation: &'static str, flow_id: &str, error: &CacheError) {
        match error.kind() {
            ErrorKind::DecodeError => self.stats.record_decode_error(),
            ErrorKind::StoreUnavailable | ErrorKind::InvalidConfig => self.stats.record_store_error(),
        }
        tracing::warn!(operation, flow_id, error = %error, "persistent tier operation failed");
    }
}
