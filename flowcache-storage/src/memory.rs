//! In-process memory tier (L1).
//!
//! A size-accounted LRU of decoded entries. All state sits behind one mutex
//! so eviction accounting can never drift from the entry map.
//!
//! # Eviction
//!
//! `set` evicts least-recently-used entries, oldest first, until the new
//! entry fits under the byte ceiling. Entries past their deadline (the soft
//! TTL, or less for entries promoted from the persistent tier) are reported
//! as absent and dropped on the lookup that notices them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use flowcache_core::{CacheEntry, CacheKey};

/// Result of inserting an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The entry was stored; the listed keys were evicted to make room.
    Stored { evicted: Vec<CacheKey> },
    /// The entry alone is larger than the ceiling and was not stored.
    Rejected { size_bytes: u64 },
    /// A live entry written later already holds the key; nothing changed.
    Superseded,
}

impl InsertOutcome {
    pub fn evicted_count(&self) -> usize {
        match self {
            InsertOutcome::Stored { evicted } => evicted.len(),
            InsertOutcome::Rejected { .. } | InsertOutcome::Superseded => 0,
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, InsertOutcome::Stored { .. })
    }
}

struct Slot {
    entry: Arc<CacheEntry>,
    /// Position in the recency index.
    tick: u64,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct MemoryTierInner {
    slots: HashMap<CacheKey, Slot>,
    /// Recency index: lowest tick is least recently used.
    recency: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    size_bytes: u64,
}

impl MemoryTierInner {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn touch(&mut self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let tick = self.bump();
        let slot = self.slots.get_mut(key)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, key.clone());
        Some(Arc::clone(&slot.entry))
    }

    fn insert(&mut self, entry: CacheEntry, expires_at: Instant) {
        let tick = self.bump();
        let key = entry.key.clone();
        self.size_bytes += entry.size_bytes;
        self.recency.insert(tick, key.clone());
        self.slots.insert(
            key,
            Slot {
                entry: Arc::new(entry),
                tick,
                expires_at,
            },
        );
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.recency.remove(&slot.tick);
        self.size_bytes = self.size_bytes.saturating_sub(slot.entry.size_bytes);
        Some(slot)
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.recency.pop_first()?;
        if let Some(slot) = self.slots.remove(&key) {
            self.size_bytes = self.size_bytes.saturating_sub(slot.entry.size_bytes);
        }
        Some(key)
    }
}

/// Bounded, recency-ordered store of decoded entries.
pub struct MemoryTier {
    inner: Mutex<MemoryTierInner>,
    max_bytes: u64,
    ttl: Duration,
}

impl MemoryTier {
    /// Create a tier holding at most `max_bytes` of serialized values, with
    /// entries expiring at most `ttl` after insertion.
    pub fn new(max_bytes: u64, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(MemoryTierInner::default()),
            max_bytes,
            ttl,
        }
    }

    // Mutations never panic midway, so a poisoned guard still holds
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, MemoryTierInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up an entry and mark it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let mut inner = self.lock();

        let expired = !inner.slots.get(key)?.is_live(Instant::now());
        if expired {
            inner.remove(key);
            tracing::trace!(key = %key, "memory entry expired");
            return None;
        }

        inner.touch(key)
    }

    /// Whether a live entry exists, without affecting recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock()
            .slots
            .get(key)
            .is_some_and(|slot| slot.is_live(Instant::now()))
    }

    /// Insert or replace an entry, evicting LRU entries as needed.
    pub fn set(&self, entry: CacheEntry) -> InsertOutcome {
        let mut inner = self.lock();
        self.store(&mut inner, entry, self.ttl)
    }

    /// Insert an entry read back from the persistent tier.
    ///
    /// It lives for the soft TTL or `remaining`, whichever is shorter, and
    /// never replaces a live entry written after it.
    pub fn promote(&self, entry: CacheEntry, remaining: Duration) -> InsertOutcome {
        let mut inner = self.lock();
        let now = Instant::now();
        let newer_present = inner
            .slots
            .get(&entry.key)
            .is_some_and(|slot| slot.is_live(now) && slot.entry.written_at > entry.written_at);
        if newer_present {
            tracing::trace!(key = %entry.key, "memory tier already holds a newer entry");
            return InsertOutcome::Superseded;
        }
        self.store(&mut inner, entry, self.ttl.min(remaining))
    }

    fn store(&self, inner: &mut MemoryTierInner, entry: CacheEntry, lifetime: Duration) -> InsertOutcome {
        // The previous entry for this key is superseded either way.
        inner.remove(&entry.key);

        if entry.size_bytes > self.max_bytes {
            tracing::warn!(
                key = %entry.key,
                size_bytes = entry.size_bytes,
                max_bytes = self.max_bytes,
                "entry larger than memory ceiling, not cached in memory"
            );
            return InsertOutcome::Rejected {
                size_bytes: entry.size_bytes,
            };
        }

        let mut evicted = Vec::new();
        while inner.size_bytes + entry.size_bytes > self.max_bytes {
            match inner.evict_oldest() {
                Some(key) => {
                    tracing::debug!(key = %key, "evicted least recently used entry");
                    evicted.push(key);
                }
                None => break,
            }
        }

        inner.insert(entry, Instant::now() + lifetime);
        InsertOutcome::Stored { evicted }
    }

    /// Remove one entry. Returns whether it was present.
    pub fn delete(&self, key: &CacheKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Remove every entry whose key matches. Returns the number removed.
    pub fn delete_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheKey) -> bool,
    {
        let mut inner = self.lock();
        let doomed: Vec<CacheKey> = inner
            .slots
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    /// Remove everything. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.slots.len();
        inner.slots.clear();
        inner.recency.clear();
        inner.size_bytes = 0;
        removed
    }

    /// Number of entries currently held (including not-yet-noticed expired ones).
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate serialized size of all held entries.
    pub fn size_bytes(&self) -> u64 {
        self.lock().size_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}
