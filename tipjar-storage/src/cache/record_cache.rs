//! TTL-bounded in-memory account cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tipjar_core::{AccountRecord, CacheConfig, IdentityKey};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    record: AccountRecord,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that returned a fresh entry.
    pub hits: u64,
    /// Number of reads that found nothing usable, expired entries included.
    pub misses: u64,
    /// Number of expired entries dropped by a read.
    pub expirations: u64,
    /// Number of entries written by `set`, `put` or `set_if_newer`.
    pub writes: u64,
    /// Number of `set_if_newer` calls refused because a fresh entry was at
    /// least as new.
    pub stale_writes: u64,
    /// Number of entries currently held, expired ones included.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Concurrent account cache keyed by identity key.
///
/// Every operation is best-effort and infallible. Readers get clones; entries
/// are only ever replaced wholesale.
#[derive(Debug)]
pub struct CachedRecordStore {
    entries: DashMap<IdentityKey, CacheEntry>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    writes: AtomicU64,
    stale_writes: AtomicU64,
}

impl CachedRecordStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            stale_writes: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.entry_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fetch a fresh entry. An expired entry is removed and reported absent.
    pub fn get(&self, key: &IdentityKey) -> Option<AccountRecord> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.record.clone());
            }
            Some(_) => true,
            None => false,
        };

        // The read guard is gone by now; a concurrent `set` may have replaced
        // the entry, so only remove it if it is still expired.
        if expired
            && self
                .entries
                .remove_if(key, |_, entry| entry.is_expired(now))
                .is_some()
        {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `record` under `key`, replacing any entry and resetting its expiry.
    pub fn set(&self, key: IdentityKey, record: AccountRecord, ttl: Duration) {
        let entry = CacheEntry {
            record,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key, entry);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Store `record` unless a fresh entry with an `updated_at` at least as
    /// recent is already held. Returns whether the entry was written.
    ///
    /// Used for records that may have been read before a newer write reached
    /// the cache.
    pub fn set_if_newer(&self, key: IdentityKey, record: AccountRecord, ttl: Duration) -> bool {
        let now = Instant::now();
        let entry = CacheEntry {
            record,
            expires_at: now + ttl,
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if !current.is_expired(now) && current.record.updated_at >= entry.record.updated_at
                {
                    self.stale_writes.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Store `record` under its own key with the default TTL.
    pub fn put(&self, record: AccountRecord) {
        self.set(record.identity_key.clone(), record, self.default_ttl);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
        }
    }
}

impl Default for CachedRecordStore {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
