//! Identity reconciliation.
//!
//! Resolving an external identity goes cache first, then the durable store.
//! Whatever is found is compared field by field with the observed profile; on
//! drift the cache is refreshed immediately and the durable write happens in
//! the background. A durable read never writes anything back on its own, so a
//! lookup with a partial identity cannot clobber a fuller stored record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tipjar_core::{
    changed_fields, AccountError, AccountRecord, AccountResult, ExternalIdentity, ProfileField,
};

use crate::cache::{CachePopulator, CachedRecordStore};
use crate::store::RecordStore;

/// A resolution that did not produce a usable record.
///
/// `record` is the best record available: the seed built from the observed
/// identity when nothing was stored, otherwise the reconciled record.
#[derive(Debug, Clone, thiserror::Error)]
#[error("account {} unresolved", .record.identity_key)]
pub struct Unresolved {
    pub record: AccountRecord,
    #[source]
    pub error: AccountError,
}

impl Unresolved {
    fn new(record: AccountRecord, error: AccountError) -> Self {
        Self { record, error }
    }

    pub fn into_parts(self) -> (AccountRecord, AccountError) {
        (self.record, self.error)
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    pub cache_hits: AtomicU64,
    pub durable_reads: AtomicU64,
    pub drift_detected: AtomicU64,
    pub write_backs: AtomicU64,
    pub write_back_failures: AtomicU64,
}

impl ReconcileMetrics {
    pub fn snapshot(&self) -> ReconcileSnapshot {
        ReconcileSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            durable_reads: self.durable_reads.load(Ordering::Relaxed),
            drift_detected: self.drift_detected.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            write_back_failures: self.write_back_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of reconciliation metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSnapshot {
    pub cache_hits: u64,
    pub durable_reads: u64,
    pub drift_detected: u64,
    pub write_backs: u64,
    pub write_back_failures: u64,
}

// ============================================================================
// RECONCILER
// ============================================================================

/// Resolves external identities to account records.
pub struct Reconciler<S> {
    store: Arc<S>,
    cache: Arc<CachedRecordStore>,
    populator: CachePopulator,
    metrics: Arc<ReconcileMetrics>,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            populator: self.populator.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: RecordStore + 'static> Reconciler<S> {
    pub fn new(store: Arc<S>, cache: Arc<CachedRecordStore>, populator: CachePopulator) -> Self {
        Self {
            store,
            cache,
            populator,
            metrics: Arc::new(ReconcileMetrics::default()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CachedRecordStore> {
        &self.cache
    }

    pub fn metrics(&self) -> ReconcileSnapshot {
        self.metrics.snapshot()
    }

    /// Resolve `identity` to its account record.
    ///
    /// A fresh cache entry is used without touching the durable store. On a
    /// miss the store is read by key. If the observed profile differs from
    /// the stored one, the returned record carries the observed profile, the
    /// cache is updated before returning and the durable write is spawned.
    ///
    /// Only a store read without drift goes through the population queue. A
    /// drifted record is written to the cache directly and never queued.
    ///
    /// # Errors
    ///
    /// - `RecordNotFound` when the identity has never been stored
    /// - `Store` when the durable read fails
    /// - `IncompleteRecord` when the record has no wallet; drift has still
    ///   been applied
    pub async fn resolve(&self, identity: &ExternalIdentity) -> Result<AccountRecord, Unresolved> {
        let key = identity.identity_key();

        let (mut record, from_store) = match self.cache.get(&key) {
            Some(record) => {
                self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(identity_key = %key, "Account served from cache");
                (record, false)
            }
            None => (self.read_stored(identity).await?, true),
        };

        let changed = changed_fields(&record.identity.profile, &identity.profile);
        if changed.is_empty() {
            if from_store {
                self.populator.enqueue(record.clone()).await;
            }
        } else {
            self.metrics.drift_detected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                identity_key = %key,
                user = %identity.display_str(),
                fields = %field_list(&changed),
                "Profile drift detected"
            );
            record.identity = identity.clone();
            // Cached directly: a queued copy of the stored record would race
            // this write.
            self.cache.put(record.clone());
            self.spawn_write_back(record.clone());
        }

        if !record.is_complete() {
            let error = AccountError::incomplete(key.as_str());
            return Err(Unresolved::new(record, error));
        }
        Ok(record)
    }

    /// Read the stored record for `identity` without modifying anything.
    ///
    /// A found record is queued for the cache; this may wait if the
    /// population queue is full.
    pub async fn load(&self, identity: &ExternalIdentity) -> Result<AccountRecord, Unresolved> {
        let record = self.read_stored(identity).await?;
        self.populator.enqueue(record.clone()).await;
        Ok(record)
    }

    async fn read_stored(&self, identity: &ExternalIdentity) -> Result<AccountRecord, Unresolved> {
        let key = identity.identity_key();
        self.metrics.durable_reads.fetch_add(1, Ordering::Relaxed);

        match self.store.find_by_key(&key).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => {
                tracing::debug!(user = %identity.display_str(), "No stored account");
                Err(Unresolved::new(
                    AccountRecord::seed(identity.clone()),
                    AccountError::not_found(key.as_str()),
                ))
            }
            Err(error) => {
                tracing::warn!(identity_key = %key, error = %error, "Durable account read failed");
                Err(Unresolved::new(AccountRecord::seed(identity.clone()), error))
            }
        }
    }

    /// Find a usable account by handle. A single leading `@` is ignored.
    ///
    /// Always reads the durable store; the cache is neither consulted nor
    /// filled.
    pub async fn lookup_by_handle(&self, handle: &str) -> AccountResult<AccountRecord> {
        let handle = handle.strip_prefix('@').unwrap_or(handle);
        self.metrics.durable_reads.fetch_add(1, Ordering::Relaxed);

        match self.store.find_by_handle(handle).await? {
            None => Err(AccountError::not_found(format!("@{}", handle))),
            Some(record) if !record.is_complete() => {
                Err(AccountError::incomplete(record.identity_key.as_str()))
            }
            Some(record) => Ok(record),
        }
    }

    /// Persist `record` now and refresh the cache with it.
    ///
    /// Returns the record as written, with `updated_at` stamped.
    pub async fn update_record(&self, mut record: AccountRecord) -> AccountResult<AccountRecord> {
        record.touch();
        self.store.save(&record).await?;
        self.cache.put(record.clone());
        tracing::debug!(identity_key = %record.identity_key, "Account record updated");
        Ok(record)
    }

    fn spawn_write_back(&self, mut record: AccountRecord) {
        let store = self.store.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            record.touch();
            match store.save(&record).await {
                Ok(()) => {
                    metrics.write_backs.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(identity_key = %record.identity_key, "Profile change persisted");
                }
                Err(error) => {
                    metrics.write_back_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        identity_key = %record.identity_key,
                        error = %error,
                        "Failed to persist profile change"
                    );
                }
            }
        });
    }
}

fn field_list(fields: &[ProfileField]) -> String {
    fields
        .iter()
        .map(|field| field.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;
    use std::time::Duration;
    use tipjar_core::{CacheConfig, IdentityKey, WalletRef};
    use tokio::sync::watch;

    struct Harness {
        reconciler: Reconciler<InMemoryRecordStore>,
        store: Arc<InMemoryRecordStore>,
        cache: Arc<CachedRecordStore>,
        populator: CachePopulator,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = Arc::new(CachedRecordStore::new(Duration::from_secs(10)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = CacheConfig::default().with_ttl(cache.default_ttl());
        let (populator, _handle) = CachePopulator::spawn(cache.clone(), &config, shutdown_rx);
        Harness {
            reconciler: Reconciler::new(store.clone(), cache.clone(), populator.clone()),
            store,
            cache,
            populator,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn alice() -> ExternalIdentity {
        ExternalIdentity::new(42)
            .with_username("alice")
            .with_name("Alice", None)
            .with_language("en")
    }

    fn stored_alice() -> AccountRecord {
        AccountRecord::seed(alice()).with_wallet(WalletRef::new("w1"))
    }

    async fn wait_until(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_unseen_identity_is_not_found() {
        let h = harness();

        let unresolved = h
            .reconciler
            .resolve(&alice())
            .await
            .expect_err("nothing stored");
        assert!(unresolved.error.is_not_found());
        assert_eq!(unresolved.record.identity, alice());
        assert!(unresolved.record.wallet.is_none());
        assert_eq!(h.store.call_counts().saves, 0);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_store_error() {
        let h = harness();
        h.store.set_fail_reads(true);

        let unresolved = h
            .reconciler
            .resolve(&alice())
            .await
            .expect_err("reads fail");
        assert!(unresolved.error.is_store());
        assert_eq!(unresolved.record.identity_key, IdentityKey::from(42));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store() {
        let h = harness();
        h.cache.put(stored_alice());

        let record = h.reconciler.resolve(&alice()).await.expect("cached");
        assert_eq!(record.wallet, Some(WalletRef::new("w1")));
        assert_eq!(h.store.call_counts().reads(), 0);
        assert_eq!(h.reconciler.metrics().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_miss_reads_store_and_populates_cache() {
        let h = harness();
        h.store.insert(stored_alice());

        let record = h.reconciler.resolve(&alice()).await.expect("stored");
        assert_eq!(record, stored_alice());
        assert_eq!(h.store.call_counts().key_reads, 1);
        assert_eq!(h.store.call_counts().saves, 0);

        wait_until(|| h.cache.get(&IdentityKey::from(42)).is_some()).await;
    }

    #[tokio::test]
    async fn test_drift_updates_cache_then_store() {
        let h = harness();
        h.store.insert(stored_alice());

        let renamed = alice().with_username("alice_new");
        let record = h.reconciler.resolve(&renamed).await.expect("stored");
        assert_eq!(record.handle(), Some("alice_new"));

        let cached = h
            .cache
            .get(&IdentityKey::from(42))
            .expect("cache refreshed synchronously");
        assert_eq!(cached.handle(), Some("alice_new"));

        wait_until(|| {
            h.store
                .get(&IdentityKey::from(42))
                .is_some_and(|r| r.handle() == Some("alice_new"))
        })
        .await;
        let persisted = h.store.get(&IdentityKey::from(42)).expect("persisted");
        assert!(persisted.updated_at.is_some());
        assert_eq!(persisted.wallet, Some(WalletRef::new("w1")));

        let metrics = h.reconciler.metrics();
        assert_eq!(metrics.drift_detected, 1);
    }

    #[tokio::test]
    async fn test_write_back_failure_keeps_cache_update() {
        let h = harness();
        h.store.insert(stored_alice());
        h.store.set_fail_writes(true);

        let renamed = alice().with_name("Alicia", None);
        let record = h.reconciler.resolve(&renamed).await.expect("stored");
        assert_eq!(record.identity.profile.first_name, "Alicia");

        wait_until(|| h.reconciler.metrics().write_back_failures == 1).await;
        let cached = h.cache.get(&IdentityKey::from(42)).expect("still cached");
        assert_eq!(cached.identity.profile.first_name, "Alicia");
        assert_eq!(
            h.store
                .get(&IdentityKey::from(42))
                .map(|r| r.identity.profile.first_name),
            Some("Alice".to_string())
        );
    }

    #[tokio::test]
    async fn test_record_without_wallet_is_incomplete() {
        let h = harness();
        h.store.insert(AccountRecord::seed(alice()));

        let unresolved = h
            .reconciler
            .resolve(&alice())
            .await
            .expect_err("no wallet");
        assert!(unresolved.error.is_incomplete());
        assert_eq!(unresolved.record.identity, alice());
    }

    #[tokio::test]
    async fn test_load_does_not_write() {
        let h = harness();
        h.store.insert(stored_alice());

        let shorthand = ExternalIdentity::new(42).with_username("alice");
        let record = h.reconciler.load(&shorthand).await.expect("stored");

        assert_eq!(record.identity.profile.first_name, "Alice");
        assert_eq!(h.store.call_counts().saves, 0);
    }

    #[tokio::test]
    async fn test_lookup_by_handle() {
        let h = harness();
        h.store.insert(stored_alice());

        let record = h
            .reconciler
            .lookup_by_handle("@ALICE")
            .await
            .expect("handle matches");
        assert_eq!(record.identity_key, IdentityKey::from(42));
        assert!(h.cache.is_empty());

        let err = h
            .reconciler
            .lookup_by_handle("bob")
            .await
            .expect_err("unknown handle");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_lookup_by_handle_rejects_incomplete() {
        let h = harness();
        h.store.insert(AccountRecord::seed(alice()));

        let err = h
            .reconciler
            .lookup_by_handle("alice")
            .await
            .expect_err("no wallet");
        assert!(err.is_incomplete());
    }

    #[tokio::test]
    async fn test_update_record_persists_and_caches() {
        let h = harness();

        let written = h
            .reconciler
            .update_record(stored_alice())
            .await
            .expect("save succeeds");
        assert!(written.updated_at.is_some());
        assert_eq!(h.store.get(&IdentityKey::from(42)), Some(written.clone()));
        assert_eq!(h.cache.get(&IdentityKey::from(42)), Some(written));
    }

    #[tokio::test]
    async fn test_update_after_incomplete_resolve_is_not_overwritten() {
        let h = harness();
        h.store.insert(AccountRecord::seed(alice()));

        // Queues the wallet-less record for the cache.
        let unresolved = h
            .reconciler
            .resolve(&alice())
            .await
            .expect_err("no wallet yet");
        assert!(unresolved.error.is_incomplete());

        h.reconciler
            .update_record(stored_alice())
            .await
            .expect("save succeeds");
        wait_until(|| {
            let m = h.populator.metrics();
            m.populated + m.superseded == 1
        })
        .await;

        let record = h.reconciler.resolve(&alice()).await.expect("wallet cached");
        assert_eq!(record.wallet, Some(WalletRef::new("w1")));
        assert_eq!(h.store.call_counts().key_reads, 1);
    }

    #[tokio::test]
    async fn test_update_record_propagates_store_error() {
        let h = harness();
        h.store.set_fail_writes(true);

        let err = h
            .reconciler
            .update_record(stored_alice())
            .await
            .expect_err("writes fail");
        assert!(err.is_store());
        assert!(h.cache.is_empty());
    }

    #[test]
    fn test_unresolved_display_and_source() {
        let unresolved = Unresolved::new(stored_alice(), AccountError::incomplete("42"));
        assert_eq!(unresolved.to_string(), "account 42 unresolved");
        let source = std::error::Error::source(&unresolved).expect("has source");
        assert!(source.to_string().contains("incomplete"));
    }
}
