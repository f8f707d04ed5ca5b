//! TTL flag store
//!
//! Thread-safe cache of flag states with separate fresh and stale read
//! paths. An expired entry is never removed by a read; it stays reachable
//! through [`FlagStore::get_stale`] until it is overwritten, deleted or
//! evicted. Eviction is FIFO by insertion time, so churning readers cannot
//! extend the life of stale entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use flagkit_domain::FlagState;
use parking_lot::RwLock;

use flagkit_common::resilience::{Clock, SystemClock};

/// Effectively non-expiring TTL used for bootstrap-seeded entries.
pub const BOOTSTRAP_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Default maximum number of entries.
pub const DEFAULT_MAX_SIZE: usize = 1000;

#[derive(Debug)]
struct CacheEntry {
    flag: FlagState,
    fetched_at: Instant,
    expires_at: Instant,
    last_accessed_ms: AtomicI64,
}

/// Store statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub size: usize,
    pub valid_count: usize,
    pub stale_count: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Thread-safe TTL cache of flag states.
///
/// Readers proceed in parallel under the shared lock; `set`/`remove`/`clear`
/// take the exclusive lock, so a `get` never observes a half-constructed
/// entry and a full-set replace is atomic from the reader's perspective.
pub struct FlagStore<C: Clock = SystemClock> {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    clock: C,
}

impl FlagStore<SystemClock> {
    pub fn new(max_size: usize) -> Self {
        Self::with_clock(max_size, SystemClock)
    }
}

impl Default for FlagStore<SystemClock> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

impl<C: Clock> FlagStore<C> {
    /// Create a store with a custom clock (useful for testing).
    pub fn with_clock(max_size: usize, clock: C) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size: max_size.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            clock,
        }
    }

    /// Fresh read: the flag if present and not expired.
    ///
    /// Records a hit on success; a miss on absence or expiry. Expired
    /// entries are left in place for the stale path.
    pub fn get(&self, key: &str) -> Option<FlagState> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if self.clock.now() < entry.expires_at => {
                entry.last_accessed_ms.store(self.clock.epoch_millis(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.flag.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stale read: the flag if present, regardless of expiry. Does not touch
    /// the hit/miss counters.
    pub fn get_stale(&self, key: &str) -> Option<FlagState> {
        self.entries.read().get(key).map(|entry| entry.flag.clone())
    }

    /// Insert or overwrite one flag with the given TTL.
    pub fn set(&self, flag: FlagState, ttl: Duration) {
        let mut entries = self.entries.write();
        self.insert_locked(&mut entries, flag, ttl);
    }

    /// Insert a batch under one exclusive lock.
    pub fn set_many(&self, flags: Vec<FlagState>, ttl: Duration) {
        let mut entries = self.entries.write();
        for flag in flags {
            self.insert_locked(&mut entries, flag, ttl);
        }
    }

    /// Replace the full set atomically: readers see either the old set or
    /// the new one, never a mix.
    pub fn replace_all(&self, flags: Vec<FlagState>, ttl: Duration) {
        let mut entries = self.entries.write();
        entries.clear();
        for flag in flags {
            self.insert_locked(&mut entries, flag, ttl);
        }
    }

    /// Present, possibly stale.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Present and expired.
    pub fn is_stale(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .is_some_and(|entry| self.clock.now() >= entry.expires_at)
    }

    /// Remove one entry. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Every stored flag, including stale ones.
    pub fn all(&self) -> Vec<FlagState> {
        self.entries.read().values().map(|entry| entry.flag.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Statistics snapshot. `hits` counts only fresh-read successes.
    pub fn stats(&self) -> StoreStats {
        let entries = self.entries.read();
        let now = self.clock.now();
        let stale_count = entries.values().filter(|entry| now >= entry.expires_at).count();
        StoreStats {
            size: entries.len(),
            valid_count: entries.len() - stale_count,
            stale_count,
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn insert_locked(
        &self,
        entries: &mut HashMap<String, CacheEntry>,
        flag: FlagState,
        ttl: Duration,
    ) {
        // Evict the oldest insertion when a novel key would push past the
        // cap. Overwrites never evict.
        if entries.len() >= self.max_size && !entries.contains_key(&flag.key) {
            let oldest =
                entries.iter().min_by_key(|(_, entry)| entry.fetched_at).map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }

        let fetched_at = self.clock.now();
        let expires_at = fetched_at.checked_add(ttl).unwrap_or(fetched_at + BOOTSTRAP_TTL);
        entries.insert(
            flag.key.clone(),
            CacheEntry {
                flag,
                fetched_at,
                expires_at,
                last_accessed_ms: AtomicI64::new(self.clock.epoch_millis()),
            },
        );
    }
}
