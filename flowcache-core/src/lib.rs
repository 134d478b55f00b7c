//! FLOWCACHE Core - Types, Validity and Codec
//!
//! Pure building blocks of the node result cache. Nothing here performs I/O
//! or spawns tasks; the tiers and the facade live in `flowcache-storage`.
//!
//! - [`CacheKey`]: `(flow_id, node_id)` slot identity
//! - [`CacheEntry`] / [`PersistedCacheRecord`]: decoded and durable entry forms
//! - [`is_valid`]: the one validity rule both tiers share
//! - [`codec`]: JSON encoding and zstd compression of payloads
//! - [`CacheConfig`]: tier sizing, TTLs and timeouts

pub mod codec;
pub mod config;
pub mod constants;
pub mod entry;
pub mod error;
pub mod hashing;
pub mod identity;
pub mod validity;

pub use config::CacheConfig;
pub use entry::{CacheEntry, PersistedCacheRecord, Provenance};
pub use error::{CacheError, CacheResult, CodecError, ConfigError, ErrorKind, StoreError};
pub use hashing::node_hash;
pub use identity::{upstream_hashes, CacheKey, FlowId, NodeId, UpstreamHashes};
pub use validity::is_valid;
