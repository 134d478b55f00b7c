//! FLOWCACHE Storage - Cache Tiers and Facade
//!
//! The runtime half of the node result cache:
//! - [`MemoryTier`]: size-bounded LRU of decoded entries (L1)
//! - [`PersistentTier`]: durable, compressed, TTL-bounded store (L2), backed
//!   by LMDB or an in-process map
//! - [`WriteBack`]: bounded queue that persists entries off the caller's path
//! - [`FlowCache`]: the facade executors talk to

pub mod facade;
pub mod memory;
pub mod persistent;
pub mod stats;
pub mod write_back;

pub use facade::{ClearSummary, FlowCache};
pub use memory::{InsertOutcome, MemoryTier};
pub use persistent::{
    spawn_expiry_sweeper, sweep_once, InMemoryPersistentTier, LmdbPersistentTier, PersistentTier,
    SweepMetrics, SweepMetricsSnapshot,
};
pub use stats::{CacheStats, StatsCollector};
pub use write_back::WriteBack;

// Re-export core types so executors depend on one crate.
pub use flowcache_core::{
    node_hash, upstream_hashes, CacheConfig, CacheError, CacheKey, CacheResult, FlowId, NodeId,
    UpstreamHashes,
};
