//! LMDB-backed persistent tier.
//!
//! Uses the heed crate (Rust bindings for LMDB). Records live in a single
//! named database keyed by the length-prefixed composite key from
//! [`super::key`], with bincode-encoded values.
//!
//! # Thread Safety
//!
//! LMDB serializes writers, so `upsert` is atomic per key and concurrent
//! writers resolve to last-write-wins. LMDB calls are synchronous; each
//! operation runs on Tokio's blocking pool so a caller-side timeout can
//! abandon a slow call without stalling the async executor.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcache_core::{
    CacheError, CacheKey, CacheResult, FlowId, PersistedCacheRecord, StoreError,
};
use heed::types::{Bytes, DecodeIgnore, SerdeBincode};
use heed::{BytesDecode, Database, Env, EnvOpenOptions};

use super::key::{encode_key, flow_prefix};
use super::PersistentTier;

const RECORDS_DB: &str = "node_results";

fn store_err(e: heed::Error) -> CacheError {
    match e {
        heed::Error::Decoding(e) => StoreError::Corrupt {
            reason: e.to_string(),
        }
        .into(),
        other => CacheError::unavailable(other.to_string()),
    }
}

#[derive(Clone)]
struct LmdbStore {
    env: Env,
    records: Database<Bytes, SerdeBincode<PersistedCacheRecord>>,
}

impl LmdbStore {
    fn get(&self, key: &CacheKey) -> CacheResult<Option<PersistedCacheRecord>> {
        let rtxn = self.env.read_txn().map_err(store_err)?;
        let record = self
            .records
            .get(&rtxn, &encode_key(key))
            .map_err(store_err)?;
        Ok(record.filter(|record| !record.is_expired(Utc::now())))
    }

    fn upsert(&self, record: &PersistedCacheRecord) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(store_err)?;
        self.records
            .put(&mut wtxn, &encode_key(&record.key), record)
            .map_err(store_err)?;
        wtxn.commit().map_err(store_err)
    }

    fn delete_by_flow(&self, flow_id: &FlowId) -> CacheResult<u64> {
        let prefix = flow_prefix(flow_id);
        let mut wtxn = self.env.write_txn().map_err(store_err)?;

        let keys: Vec<Vec<u8>> = self
            .records
            .remap_data_type::<DecodeIgnore>()
            .prefix_iter(&wtxn, &prefix)
            .map_err(store_err)?
            .map(|item| item.map(|(key, ())| key.to_vec()))
            .collect::<Result<_, _>>()
            .map_err(store_err)?;

        let mut deleted = 0u64;
        for key in &keys {
            if self.records.delete(&mut wtxn, key).map_err(store_err)? {
                deleted += 1;
            }
        }

        wtxn.commit().map_err(store_err)?;
        Ok(deleted)
    }

    fn delete_all(&self) -> CacheResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(store_err)?;
        let count = self.records.len(&wtxn).map_err(store_err)?;
        self.records.clear(&mut wtxn).map_err(store_err)?;
        wtxn.commit().map_err(store_err)?;
        Ok(count)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> CacheResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(store_err)?;

        let mut doomed = Vec::new();
        let raw = self.records.remap_data_type::<Bytes>();
        for item in raw.iter(&wtxn).map_err(store_err)? {
            let (key, bytes) = item.map_err(store_err)?;
            let expired = match SerdeBincode::<PersistedCacheRecord>::bytes_decode(bytes) {
                Ok(record) => record.is_expired(now),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable cache record");
                    true
                }
            };
            if expired {
                doomed.push(key.to_vec());
            }
        }

        let mut purged = 0u64;
        for key in &doomed {
            if self.records.delete(&mut wtxn, key).map_err(store_err)? {
                purged += 1;
            }
        }

        wtxn.commit().map_err(store_err)?;
        Ok(purged)
    }

    fn len(&self) -> CacheResult<u64> {
        let rtxn = self.env.read_txn().map_err(store_err)?;
        self.records.len(&rtxn).map_err(store_err)
    }
}

/// LMDB-backed persistent tier.
///
/// # Example
///
/// ```ignore
/// let tier = LmdbPersistentTier::open("/var/lib/flowcache", 1024)?;
/// tier.upsert(record).await?;
/// let found = tier.get(&CacheKey::new("flow-1", "node-a")).await?;
/// ```
pub struct LmdbPersistentTier {
    store: LmdbStore,
}

impl LmdbPersistentTier {
    /// Open (or create) an LMDB environment at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the directory cannot be created
    /// or the environment or database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> CacheResult<Self> {
        std::fs::create_dir_all(&path)
            .map_err(|e| CacheError::unavailable(format!("cannot create {}: {e}", path.as_ref().display())))?;

        // SAFETY: the environment is opened once per path by this process;
        // LMDB's own locking covers other processes.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(store_err)?;

        let mut wtxn = env.write_txn().map_err(store_err)?;
        let records = env
            .create_database(&mut wtxn, Some(RECORDS_DB))
            .map_err(store_err)?;
        wtxn.commit().map_err(store_err)?;

        Ok(Self {
            store: LmdbStore { env, records },
        })
    }

    async fn blocking<T, F>(&self, op: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&LmdbStore) -> CacheResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| CacheError::unavailable(format!("lmdb task failed: {e}")))?
    }

    /// Number of stored records, including expired ones not yet purged.
    pub async fn record_count(&self) -> CacheResult<u64> {
        self.blocking(|store| store.len()).await
    }
}

#[async_trait]
impl PersistentTier for LmdbPersistentTier {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<PersistedCacheRecord>> {
        let key = key.clone();
        self.blocking(move |store| store.get(&key)).await
    }

    async fn upsert(&self, record: PersistedCacheRecord) -> CacheResult<()> {
        self.blocking(move |store| store.upsert(&record)).await
    }

    async fn delete_by_flow(&self, flow_id: &FlowId) -> CacheResult<u64> {
        let flow_id = flow_id.clone();
        self.blocking(move |store| store.delete_by_flow(&flow_id)).await
    }

    async fn delete_all(&self) -> CacheResult<u64> {
        self.blocking(|store| store.delete_all()).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CacheResult<u64> {
        self.blocking(move |store| store.purge_expired(now)).await
    }
}
