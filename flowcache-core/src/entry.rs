//! Cache entry types for both tiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::identity::{CacheKey, UpstreamHashes};

/// Where a cached result came from: the node's own configuration hash and
/// the hashes of its upstream nodes at write time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub own_hash: String,
    pub upstream_hashes: UpstreamHashes,
}

impl Provenance {
    pub fn new(own_hash: impl Into<String>, upstream_hashes: UpstreamHashes) -> Self {
        Self {
            own_hash: own_hash.into(),
            upstream_hashes,
        }
    }
}

/// Decoded entry held by the memory tier.
///
/// The value is shared, so handing it to callers never copies the payload.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub provenance: Provenance,
    pub value: Arc<serde_json::Value>,
    /// Length of the serialized value, used for eviction accounting.
    pub size_bytes: u64,
    pub written_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        provenance: Provenance,
        value: Arc<serde_json::Value>,
        size_bytes: u64,
    ) -> Self {
        Self {
            key,
            provenance,
            value,
            size_bytes,
            written_at: Utc::now(),
        }
    }
}

/// Durable form of an entry: the value is replaced by its compressed bytes
/// and the record carries an absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCacheRecord {
    pub key: CacheKey,
    pub provenance: Provenance,
    pub payload: Vec<u8>,
    /// Length of the serialized value before compression.
    pub size_bytes: u64,
    pub written_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PersistedCacheRecord {
    /// Build a record for `entry` whose compressed payload is `payload`.
    ///
    /// `expires_at` is `written_at + ttl`, independent of validity.
    pub fn from_entry(entry: &CacheEntry, payload: Vec<u8>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = entry
            .written_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key: entry.key.clone(),
            provenance: entry.provenance.clone(),
            payload,
            size_bytes: entry.size_bytes,
            written_at: entry.written_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Rebuild the decoded entry once the payload has been decompressed.
    pub fn into_entry(self, value: serde_json::Value) -> CacheEntry {
        CacheEntry {
            key: self.key,
            provenance: self.provenance,
            value: Arc::new(value),
            size_bytes: self.size_bytes,
            written_at: self.written_at,
        }
    }
}
