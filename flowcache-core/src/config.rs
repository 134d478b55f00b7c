//! Cache configuration.
//!
//! Configuration is loaded from environment variables with defaults suited
//! to a single-process deployment.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    COMPRESSION_LEVEL_RANGE, DEFAULT_COMPRESSION_LEVEL, DEFAULT_LMDB_MAP_SIZE_MB,
    DEFAULT_LMDB_PATH, DEFAULT_MEMORY_MAX_BYTES, DEFAULT_MEMORY_TTL_SECS,
    DEFAULT_PERSISTENT_TTL_SECS, DEFAULT_STORE_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_WRITE_BACK_CAPACITY,
};
use crate::error::{CacheResult, ConfigError};

/// Configuration for both cache tiers and the write-back path.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    // ========================================================================
    // Memory tier
    // ========================================================================
    /// Ceiling on the aggregate serialized size of memory tier entries.
    pub memory_max_bytes: u64,

    /// Entries older than this are treated as absent on lookup.
    pub memory_ttl: Duration,

    // ========================================================================
    // Persistent tier
    // ========================================================================
    /// Whether a durable store backs the memory tier.
    pub persistent_enabled: bool,

    /// Absolute lifetime of a persisted record.
    pub persistent_ttl: Duration,

    /// Bound on every durable-store operation.
    pub store_timeout: Duration,

    /// zstd level for persisted payloads.
    pub compression_level: i32,

    /// Maximum number of queued write-backs before new ones are dropped.
    pub write_back_capacity: usize,

    /// How often expired persisted records are reaped.
    pub sweep_interval: Duration,

    /// Directory of the LMDB environment.
    pub lmdb_path: PathBuf,

    /// LMDB map size in megabytes.
    pub lmdb_map_size_mb: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_bytes: DEFAULT_MEMORY_MAX_BYTES,
            memory_ttl: Duration::from_secs(DEFAULT_MEMORY_TTL_SECS),
            persistent_enabled: true,
            persistent_ttl: Duration::from_secs(DEFAULT_PERSISTENT_TTL_SECS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            write_back_capacity: DEFAULT_WRITE_BACK_CAPACITY,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            lmdb_path: PathBuf::from(DEFAULT_LMDB_PATH),
            lmdb_map_size_mb: DEFAULT_LMDB_MAP_SIZE_MB,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FLOWCACHE_MEMORY_MAX_BYTES`: Memory tier ceiling (default: 524288000)
    /// - `FLOWCACHE_MEMORY_TTL_SECS`: Memory tier soft TTL (default: 3600)
    /// - `FLOWCACHE_PERSISTENT_ENABLED`: "true" or "false" (default: true)
    /// - `FLOWCACHE_PERSISTENT_TTL_SECS`: Persisted record TTL (default: 86400)
    /// - `FLOWCACHE_STORE_TIMEOUT_MS`: Durable store timeout (default: 2000)
    /// - `FLOWCACHE_COMPRESSION_LEVEL`: zstd level (default: 3)
    /// - `FLOWCACHE_WRITE_BACK_CAPACITY`: Write-back queue size (default: 1024)
    /// - `FLOWCACHE_SWEEP_INTERVAL_SECS`: Expiry sweep interval (default: 300)
    /// - `FLOWCACHE_LMDB_PATH`: LMDB directory (default: ./flowcache-data)
    /// - `FLOWCACHE_LMDB_MAP_SIZE_MB`: LMDB map size (default: 1024)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            memory_max_bytes: env_parse("FLOWCACHE_MEMORY_MAX_BYTES")
                .unwrap_or(defaults.memory_max_bytes),
            memory_ttl: env_parse("FLOWCACHE_MEMORY_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.memory_ttl),
            persistent_enabled: std::env::var("FLOWCACHE_PERSISTENT_ENABLED")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.persistent_enabled),
            persistent_ttl: env_parse("FLOWCACHE_PERSISTENT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.persistent_ttl),
            store_timeout: env_parse("FLOWCACHE_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            compression_level: env_parse("FLOWCACHE_COMPRESSION_LEVEL")
                .unwrap_or(defaults.compression_level),
            write_back_capacity: env_parse("FLOWCACHE_WRITE_BACK_CAPACITY")
                .unwrap_or(defaults.write_back_capacity),
            sweep_interval: env_parse("FLOWCACHE_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            lmdb_path: std::env::var("FLOWCACHE_LMDB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.lmdb_path),
            lmdb_map_size_mb: env_parse("FLOWCACHE_LMDB_MAP_SIZE_MB")
                .unwrap_or(defaults.lmdb_map_size_mb),
        }
    }

    /// Set the memory tier ceiling.
    pub fn with_memory_max_bytes(mut self, max: u64) -> Self {
        self.memory_max_bytes = max;
        self
    }

    /// Set the memory tier soft TTL.
    pub fn with_memory_ttl(mut self, ttl: Duration) -> Self {
        self.memory_ttl = ttl;
        self
    }

    /// Enable or disable the persistent tier.
    pub fn with_persistent(mut self, enabled: bool) -> Self {
        self.persistent_enabled = enabled;
        self
    }

    /// Set the persisted record TTL.
    pub fn with_persistent_ttl(mut self, ttl: Duration) -> Self {
        self.persistent_ttl = ttl;
        self
    }

    /// Set the durable store timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the zstd compression level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the write-back queue capacity.
    pub fn with_write_back_capacity(mut self, capacity: usize) -> Self {
        self.write_back_capacity = capacity;
        self
    }

    /// Set the expiry sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the LMDB directory.
    pub fn with_lmdb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lmdb_path = path.into();
        self
    }

    /// Set the LMDB map size.
    pub fn with_lmdb_map_size_mb(mut self, size_mb: usize) -> Self {
        self.lmdb_map_size_mb = size_mb;
        self
    }

    /// Reject values that would make the cache unusable.
    pub fn validate(&self) -> CacheResult<()> {
        if self.memory_max_bytes == 0 {
            return Err(invalid("memory_max_bytes", self.memory_max_bytes, "must be positive"));
        }
        if self.memory_ttl.is_zero() {
            return Err(invalid("memory_ttl", format!("{:?}", self.memory_ttl), "must be positive"));
        }
        if self.persistent_ttl.is_zero() {
            return Err(invalid(
                "persistent_ttl",
                format!("{:?}", self.persistent_ttl),
                "must be positive",
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(invalid(
                "store_timeout",
                format!("{:?}", self.store_timeout),
                "must be positive",
            ));
        }
        if !COMPRESSION_LEVEL_RANGE.contains(&self.compression_level) {
            return Err(invalid(
                "compression_level",
                self.compression_level,
                "must be within 1..=22",
            ));
        }
        if self.write_back_capacity == 0 {
            return Err(invalid("write_back_capacity", 0, "must be positive"));
        }
        if self.sweep_interval.is_zero() {
            return Err(invalid(
                "sweep_interval",
                format!("{:?}", self.sweep_interval),
                "must be positive",
            ));
        }
        if self.lmdb_map_size_mb == 0 {
            return Err(invalid("lmdb_map_size_mb", 0, "must be positive"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> crate::error::CacheError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.memory_max_bytes, 500 * 1024 * 1024);
        assert_eq!(config.memory_ttl, Duration::from_secs(3600));
        assert_eq!(config.persistent_ttl, Duration::from_secs(86400));
        assert!(config.persistent_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_memory_max_bytes(1024)
            .with_memory_ttl(Duration::from_secs(5))
            .with_persistent(false)
            .with_persistent_ttl(Duration::from_secs(60))
            .with_store_timeout(Duration::from_millis(10))
            .with_compression_level(9)
            .with_write_back_capacity(4)
            .with_sweep_interval(Duration::from_secs(1))
            .with_lmdb_path("/tmp/fc")
            .with_lmdb_map_size_mb(16);

        assert_eq!(config.memory_max_bytes, 1024);
        assert_eq!(config.memory_ttl, Duration::from_secs(5));
        assert!(!config.persistent_enabled);
        assert_eq!(config.persistent_ttl, Duration::from_secs(60));
        assert_eq!(config.store_timeout, Duration::from_millis(10));
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.write_back_capacity, 4);
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.lmdb_path, PathBuf::from("/tmp/fc"));
        assert_eq!(config.lmdb_map_size_mb, 16);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(CacheConfig::new().with_memory_max_bytes(0).validate().is_err());
        assert!(CacheConfig::new().with_memory_ttl(Duration::ZERO).validate().is_err());
        assert!(CacheConfig::new().with_store_timeout(Duration::ZERO).validate().is_err());
        assert!(CacheConfig::new().with_compression_level(0).validate().is_err());
        assert!(CacheConfig::new().with_compression_level(23).validate().is_err());
        assert!(CacheConfig::new().with_write_back_capacity(0).validate().is_err());
        assert!(CacheConfig::new().with_lmdb_map_size_mb(0).validate().is_err());
    }

    #[test]
    fn test_from_env_overrides_and_fallbacks() {
        let _max = EnvVarGuard::set("FLOWCACHE_MEMORY_MAX_BYTES", Some("2048"));
        let _ttl = EnvVarGuard::set("FLOWCACHE_PERSISTENT_TTL_SECS", Some("not-a-number"));
        let _enabled = EnvVarGuard::set("FLOWCACHE_PERSISTENT_ENABLED", Some("FALSE"));

        let config = CacheConfig::from_env();
        assert_eq!(config.memory_max_bytes, 2048);
        assert_eq!(config.persistent_ttl, Duration::from_secs(86400));
        assert!(!config.persistent_enabled);
    }
}
