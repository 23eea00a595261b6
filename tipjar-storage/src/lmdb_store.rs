//! LMDB-backed durable record store.
//!
//! Uses the heed crate (Rust bindings for LMDB). Two named databases live in
//! one environment:
//!
//! - `records`: identity key -> JSON-encoded `AccountRecord`
//! - `handles`: case-folded handle -> identity keys (`DUP_SORT`, one entry
//!   per record carrying the handle, sorted by key)
//!
//! Every `save` updates both in a single write transaction, so a handle
//! lookup never sees a record without its index entry or vice versa.

use std::path::Path;

use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, DatabaseFlags, Env, EnvOpenOptions, RoTxn, RwTxn};
use tipjar_core::{AccountError, AccountRecord, AccountResult, IdentityKey};

use crate::store::{fold_handle, RecordStore};

const RECORDS_DB: &str = "records";
const HANDLES_DB: &str = "handles";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: &'static str, reason: String },

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for AccountError {
    fn from(e: LmdbStoreError) -> Self {
        AccountError::store(e.to_string())
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// LMDB-backed account record store.
///
/// # Example
///
/// ```ignore
/// let store = LmdbRecordStore::open("data/accounts", 64)?;
/// store.save(&record).await?;
/// let found = store.find_by_handle("alice").await?;
/// ```
pub struct LmdbRecordStore {
    env: Env,
    records: Database<Str, Bytes>,
    handles: Database<Str, Str>,
}

impl LmdbRecordStore {
    /// Open (or create) the store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the environment in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this process and not
        // opened twice within it.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;

        let records: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(RECORDS_DB))
            .map_err(|e| LmdbStoreError::DbOpen {
                name: RECORDS_DB,
                reason: e.to_string(),
            })?;
        let handles: Database<Str, Str> = env
            .database_options()
            .types::<Str, Str>()
            .flags(DatabaseFlags::DUP_SORT)
            .name(HANDLES_DB)
            .create(&mut wtxn)
            .map_err(|e| LmdbStoreError::DbOpen {
                name: HANDLES_DB,
                reason: e.to_string(),
            })?;

        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            records,
            handles,
        })
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.records.len(&rtxn).map_err(txn_err)
    }

    pub fn is_empty(&self) -> Result<bool, LmdbStoreError> {
        Ok(self.len()? == 0)
    }

    fn read_record(
        &self,
        rtxn: &RoTxn<'_>,
        key: &str,
    ) -> Result<Option<AccountRecord>, LmdbStoreError> {
        match self.records.get(rtxn, key).map_err(txn_err)? {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LmdbStoreError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// First record, in key order, that carries `handle`.
    fn read_by_handle(&self, handle: &str) -> Result<Option<AccountRecord>, LmdbStoreError> {
        let wanted = fold_handle(handle);
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        let entries = self.handles.get_duplicates(&rtxn, &wanted).map_err(txn_err)?;
        let keys: Vec<String> = match entries {
            Some(entries) => entries
                .map(|entry| entry.map(|(_, key)| key.to_string()))
                .collect::<Result<_, _>>()
                .map_err(txn_err)?,
            None => return Ok(None),
        };

        for key in keys {
            if let Some(record) = self.read_record(&rtxn, &key)? {
                if record.handle().map(fold_handle).as_deref() == Some(wanted.as_str()) {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Drop this record's index entry for a handle it no longer carries.
    /// Entries of other records with the same handle stay.
    fn unlink_stale_handle(
        &self,
        wtxn: &mut RwTxn<'_>,
        key: &str,
        previous: Option<&AccountRecord>,
        current: &AccountRecord,
    ) -> Result<(), LmdbStoreError> {
        let Some(old_handle) = previous.and_then(|r| r.handle()).map(fold_handle) else {
            return Ok(());
        };
        if current.handle().map(fold_handle).as_deref() == Some(old_handle.as_str()) {
            return Ok(());
        }
        self.handles
            .delete_one_duplicate(wtxn, &old_handle, key)
            .map_err(txn_err)?;
        Ok(())
    }

    fn write_record(&self, record: &AccountRecord) -> Result<(), LmdbStoreError> {
        let key = record.identity_key.as_str();
        let value =
            serde_json::to_vec(record).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let previous: Option<AccountRecord> = match self.records.get(&wtxn, key).map_err(txn_err)? {
            Some(bytes) => match serde_json::from_slice(bytes) {
                Ok(previous) => Some(previous),
                Err(e) => {
                    tracing::warn!(
                        identity_key = key,
                        error = %e,
                        "Overwriting undecodable record; its old handle entry is left in place"
                    );
                    None
                }
            },
            None => None,
        };
        self.unlink_stale_handle(&mut wtxn, key, previous.as_ref(), record)?;

        self.records.put(&mut wtxn, key, &value).map_err(txn_err)?;
        if let Some(handle) = record.handle().filter(|h| !h.is_empty()) {
            self.handles
                .put(&mut wtxn, &fold_handle(handle), key)
                .map_err(txn_err)?;
        }

        wtxn.commit().map_err(txn_err)
    }
}

#[async_trait]
impl RecordStore for LmdbRecordStore {
    async fn find_by_key(&self, key: &IdentityKey) -> AccountResult<Option<AccountRecord>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.read_record(&rtxn, key.as_str())?)
    }

    async fn find_by_handle(&self, handle: &str) -> AccountResult<Option<AccountRecord>> {
        Ok(self.read_by_handle(handle)?)
    }

    async fn save(&self, record: &AccountRecord) -> AccountResult<()> {
        self.write_record(record)?;
        tracing::trace!(identity_key = %record.identity_key, "Account record written to LMDB");
        Ok(())
    }
}
