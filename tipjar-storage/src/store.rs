//! Durable record store contract and an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tipjar_core::{AccountError, AccountRecord, AccountResult, IdentityKey};

/// Durable account record store.
///
/// Implementations must be safe for concurrent use. Reads never write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record by primary key. `Ok(None)` when no record exists.
    async fn find_by_key(&self, key: &IdentityKey) -> AccountResult<Option<AccountRecord>>;

    /// Fetch the first record whose handle matches, ignoring case.
    ///
    /// `handle` is passed without a leading `@`.
    async fn find_by_handle(&self, handle: &str) -> AccountResult<Option<AccountRecord>>;

    /// Insert or overwrite a record, keyed by its identity key.
    async fn save(&self, record: &AccountRecord) -> AccountResult<()>;
}

/// Case-folded form of a handle used for matching.
pub fn fold_handle(handle: &str) -> String {
    handle.to_lowercase()
}

/// Number of calls each store operation has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub key_reads: u64,
    pub handle_reads: u64,
    pub saves: u64,
}

impl StoreCallCounts {
    pub fn reads(&self) -> u64 {
        self.key_reads + self.handle_reads
    }
}

/// In-memory record store for development and testing.
///
/// Counts every call and can be told to fail reads or writes, or to delay
/// reads, so the reconciliation protocol can be observed from outside.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<IdentityKey, AccountRecord>>,
    key_reads: AtomicU64,
    handle_reads: AtomicU64,
    saves: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    read_latency_ms: AtomicU64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a record directly, without counting it as a save.
    pub fn insert(&self, record: AccountRecord) {
        if let Ok(mut records) = self.records.write() {
            records.insert(record.identity_key.clone(), record);
        }
    }

    /// Inspect a stored record without counting it as a read.
    pub fn get(&self, key: &IdentityKey) -> Option<AccountRecord> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn call_counts(&self) -> StoreCallCounts {
        StoreCallCounts {
            key_reads: self.key_reads.load(Ordering::SeqCst),
            handle_reads: self.handle_reads.load(Ordering::SeqCst),
            saves: self.saves.load(Ordering::SeqCst),
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every read by `latency` before it touches the map.
    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn before_read(&self) -> AccountResult<()> {
        let latency = self.read_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AccountError::store("in-memory store: reads disabled"));
        }
        Ok(())
    }
}

fn poisoned() -> AccountError {
    AccountError::store("in-memory store lock poisoned")
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_by_key(&self, key: &IdentityKey) -> AccountResult<Option<AccountRecord>> {
        self.key_reads.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(key).cloned())
    }

    async fn find_by_handle(&self, handle: &str) -> AccountResult<Option<AccountRecord>> {
        self.handle_reads.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        let wanted = fold_handle(handle);
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .values()
            .find(|record| record.handle().map(fold_handle).as_deref() == Some(wanted.as_str()))
            .cloned())
    }

    async fn save(&self, record: &AccountRecord) -> AccountResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AccountError::store("in-memory store: writes disabled"));
        }
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.identity_key.clone(), record.clone());
        Ok(())
    }
}
