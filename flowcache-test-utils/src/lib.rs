//! FLOWCACHE Test Utilities
//!
//! Shared test infrastructure for the FLOWCACHE workspace:
//! - Proptest generators for ids, hash maps and JSON payloads
//! - Fixtures that build ready-to-use caches
//! - Fault-injecting persistent tiers
//! - Custom assertions for cache lookups

pub use flowcache_core::{
    CacheConfig, CacheError, CacheKey, CacheResult, FlowId, NodeId, PersistedCacheRecord,
    Provenance, UpstreamHashes,
};
pub use flowcache_storage::{FlowCache, InMemoryPersistentTier, PersistentTier};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// FAULT-INJECTING TIERS
// ============================================================================

/// Persistent tier whose every operation fails as unavailable.
#[derive(Debug, Default)]
pub struct FailingPersistentTier {
    calls: AtomicU64,
}

impl FailingPersistentTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations attempted against this tier.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn fail<T>(&self, operation: &str) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(CacheError::unavailable(format!("{operation}: connection refused")))
    }
}

#[async_trait]
impl PersistentTier for FailingPersistentTier {
    async fn get(&self, _key: &CacheKey) -> CacheResult<Option<PersistedCacheRecord>> {
        self.fail("get")
    }

    async fn upsert(&self, _record: PersistedCacheRecord) -> CacheResult<()> {
        self.fail("upsert")
    }

    async fn delete_by_flow(&self, _flow_id: &FlowId) -> CacheResult<u64> {
        self.fail("delete_by_flow")
    }

    async fn delete_all(&self) -> CacheResult<u64> {
        self.fail("delete_all")
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> CacheResult<u64> {
        self.fail("purge_expired")
    }
}

/// Delays every operation of an inner tier.
pub struct SlowPersistentTier {
    inner: Arc<dyn PersistentTier>,
    delay: Duration,
}

impl SlowPersistentTier {
    pub fn new(inner: Arc<dyn PersistentTier>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl PersistentTier for SlowPersistentTier {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<PersistedCacheRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn upsert(&self, record: PersistedCacheRecord) -> CacheResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(record).await
    }

    async fn delete_by_flow(&self, flow_id: &FlowId) -> CacheResult<u64> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete_by_flow(flow_id).await
    }

    async fn delete_all(&self) -> CacheResult<u64> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete_all().await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CacheResult<u64> {
        tokio::time::sleep(self.delay).await;
        self.inner.purge_expired(now).await
    }
}

/// Stores records faithfully but garbles every payload it returns.
pub struct CorruptingPersistentTier {
    inner: Arc<dyn PersistentTier>,
}

impl CorruptingPersistentTier {
    pub fn new(inner: Arc<dyn PersistentTier>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PersistentTier for CorruptingPersistentTier {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<PersistedCacheRecord>> {
        let record = self.inner.get(key).await?;
        Ok(record.map(|mut record| {
            record.payload = b"not a zstd frame".to_vec();
            record
        }))
    }

    async fn upsert(&self, record: PersistedCacheRecord) -> CacheResult<()> {
        self.inner.upsert(record).await
    }

    async fn delete_by_flow(&self, flow_id: &FlowId) -> CacheResult<u64> {
        self.inner.delete_by_flow(flow_id).await
    }

    async fn delete_all(&self) -> CacheResult<u64> {
        self.inner.delete_all().await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CacheResult<u64> {
        self.inner.purge_expired(now).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    pub fn arb_flow_id() -> impl Strategy<Value = FlowId> {
        "[a-z0-9-]{1,24}".prop_map(FlowId::new)
    }

    pub fn arb_node_id() -> impl Strategy<Value = NodeId> {
        "[a-zA-Z0-9_/-]{1,24}".prop_map(NodeId::new)
    }

    /// Generate a hex digest-like hash.
    pub fn arb_hash() -> impl Strategy<Value = String> {
        "[0-9a-f]{8,64}"
    }

    /// Generate an upstream hash map of up to five entries.
    pub fn arb_upstream_hashes() -> impl Strategy<Value = UpstreamHashes> {
        prop::collection::btree_map(arb_node_id(), arb_hash(), 0..5)
    }

    pub fn arb_provenance() -> impl Strategy<Value = Provenance> {
        (arb_hash(), arb_upstream_hashes()).prop_map(|(hash, upstream)| Provenance::new(hash, upstream))
    }

    /// Generate an arbitrary JSON document. Numbers are integers so that
    /// values compare equal after a text round trip.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 \\-_.]{0,16}".prop_map(Value::String),
        ];

        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|fields| Value::Object(fields.into_iter().collect())),
            ]
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built caches and configurations.

    use super::*;

    /// Configuration with a 1 MiB memory tier and a short store timeout.
    pub fn test_config() -> CacheConfig {
        CacheConfig::default()
            .with_memory_max_bytes(1024 * 1024)
            .with_store_timeout(Duration::from_millis(250))
            .with_write_back_capacity(256)
    }

    pub fn memory_only_cache() -> FlowCache {
        FlowCache::memory_only(test_config()).expect("memory-only cache should build")
    }

    /// Cache over a fresh in-memory persistent tier. Requires a Tokio runtime.
    pub fn tiered_cache() -> (FlowCache, Arc<InMemoryPersistentTier>) {
        tiered_cache_with(test_config())
    }

    /// Like [`tiered_cache`] with an explicit configuration.
    pub fn tiered_cache_with(config: CacheConfig) -> (FlowCache, Arc<InMemoryPersistentTier>) {
        let tier = Arc::new(InMemoryPersistentTier::new());
        let cache = FlowCache::new(config, Some(tier.clone())).expect("tiered cache should build");
        (cache, tier)
    }

    /// Cache over an arbitrary tier. Requires a Tokio runtime.
    pub fn cache_over(tier: Arc<dyn PersistentTier>) -> FlowCache {
        FlowCache::new(test_config(), Some(tier)).expect("cache should build")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache lookups.

    use serde_json::Value;
    use std::sync::Arc;

    /// Assert that a lookup returned exactly `expected`.
    #[track_caller]
    pub fn assert_hit(result: &Option<Arc<Value>>, expected: &Value) {
        match result {
            Some(value) => assert_eq!(value.as_ref(), expected, "cache hit returned the wrong value"),
            None => panic!("Expected cache hit with {expected}, got miss"),
        }
    }

    /// Assert that a lookup missed.
    #[track_caller]
    pub fn assert_miss(result: &Option<Arc<Value>>) {
        if let Some(value) = result {
            panic!("Expected cache miss, got hit with {value}");
        }
    }
}
