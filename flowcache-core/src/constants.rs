//! Default values for cache configuration.

/// Ceiling on the aggregate serialized size held in the memory tier (500 MiB).
pub const DEFAULT_MEMORY_MAX_BYTES: u64 = 500 * 1024 * 1024;

/// Soft time-to-live of a memory tier entry, in seconds (1 hour).
pub const DEFAULT_MEMORY_TTL_SECS: u64 = 60 * 60;

/// Absolute time-to-live of a persisted record, in seconds (24 hours).
pub const DEFAULT_PERSISTENT_TTL_SECS: u64 = 24 * 60 * 60;

/// Upper bound on a single durable-store operation, in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;

/// zstd level used for persisted payloads.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Number of write-backs that may wait for the durable store.
pub const DEFAULT_WRITE_BACK_CAPACITY: usize = 1024;

/// How often expired persisted records are reaped, in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

/// Default LMDB environment directory.
pub const DEFAULT_LMDB_PATH: &str = "./flowcache-data";

/// Default LMDB map size in megabytes.
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 1024;

/// Valid zstd compression levels.
pub const COMPRESSION_LEVEL_RANGE: std::ops::RangeInclusive<i32> = 1..=22;
