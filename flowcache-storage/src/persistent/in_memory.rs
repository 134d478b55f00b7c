//! In-process persistent tier.
//!
//! Same contract as the LMDB store without the durability. Useful for tests
//! and for deployments that want compressed second-tier capacity in memory.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcache_core::{CacheError, CacheKey, CacheResult, FlowId, PersistedCacheRecord};

use super::PersistentTier;

#[derive(Debug, Default)]
pub struct InMemoryPersistentTier {
    records: RwLock<HashMap<CacheKey, PersistedCacheRecord>>,
}

fn poisoned() -> CacheError {
    CacheError::unavailable("persistent tier lock poisoned")
}

impl InMemoryPersistentTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired or not.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw record lookup that ignores expiry.
    pub fn peek(&self, key: &CacheKey) -> Option<PersistedCacheRecord> {
        self.records.read().ok()?.get(key).cloned()
    }
}

#[async_trait]
impl PersistentTier for InMemoryPersistentTier {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<PersistedCacheRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .get(key)
            .filter(|record| !record.is_expired(Utc::now()))
            .cloned())
    }

    async fn upsert(&self, record: PersistedCacheRecord) -> CacheResult<()> {
        self.records
            .write()
            .map_err(|_| poisoned())?
            .insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete_by_flow(&self, flow_id: &FlowId) -> CacheResult<u64> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let before = records.len();
        records.retain(|key, _| !key.belongs_to(flow_id));
        Ok((before - records.len()) as u64)
    }

    async fn delete_all(&self) -> CacheResult<u64> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CacheResult<u64> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcache_core::{CacheEntry, Provenance, UpstreamHashes};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn record(flow: &str, node: &str, hash: &str, ttl: Duration) -> PersistedCacheRecord {
        let entry = CacheEntry::new(
            CacheKey::new(flow, node),
            Provenance::new(hash, UpstreamHashes::new()),
            Arc::new(json!(null)),
            4,
        );
        PersistedCacheRecord::from_entry(&entry, hash.as_bytes().to_vec(), ttl)
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let tier = InMemoryPersistentTier::new();
        let hour = Duration::from_secs(3600);
        tier.upsert(record("f", "n", "h1", hour))
            .await
            .expect("upsert should succeed");
        tier.upsert(record("f", "n", "h2", hour))
            .await
            .expect("upsert should succeed");

        assert_eq!(tier.len(), 1);
        let found = tier
            .get(&CacheKey::new("f", "n"))
            .await
            .expect("get should succeed")
            .expect("record should exist");
        assert_eq!(found.provenance.own_hash, "h2");
    }

    #[tokio::test]
    async fn test_expired_record_is_absent_until_purged() {
        let tier = InMemoryPersistentTier::new();
        tier.upsert(record("f", "n", "h", Duration::from_millis(1)))
            .await
            .expect("upsert should succeed");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let key = CacheKey::new("f", "n");
        assert!(tier.get(&key).await.expect("get should succeed").is_none());
        assert!(tier.peek(&key).is_some());

        let purged = tier
            .purge_expired(Utc::now())
            .await
            .expect("purge should succeed");
        assert_eq!(purged, 1);
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_flow() {
        let tier = InMemoryPersistentTier::new();
        let hour = Duration::from_secs(3600);
        for (flow, node) in [("f1", "a"), ("f1", "b"), ("f2", "c")] {
            tier.upsert(record(flow, node, "h", hour))
                .await
                .expect("upsert should succeed");
        }

        let removed = tier
            .delete_by_flow(&FlowId::new("f1"))
            .await
            .expect("delete should succeed");
        assert_eq!(removed, 2);
        assert!(tier.peek(&CacheKey::new("f2", "c")).is_some());

        assert_eq!(tier.delete_all().await.expect("delete should succeed"), 1);
        assert!(tier.is_empty());
    }
}
