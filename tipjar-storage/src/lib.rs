//! TIPJAR Storage - Account Stores, Cache and Reconciliation
//!
//! Defines the durable record store contract, an in-memory and an LMDB
//! implementation of it, the TTL-bounded account cache with its population
//! queue, and the reconciliation pipeline that ties them together.

pub mod cache;
pub mod lmdb_store;
pub mod reconcile;
pub mod store;

pub use cache::{
    CachePopulator, CacheStats, CachedRecordStore, PopulateSink, PopulationMetrics,
    PopulationSnapshot,
};
pub use lmdb_store::{LmdbRecordStore, LmdbStoreError};
pub use reconcile::{ReconcileMetrics, ReconcileSnapshot, Reconciler, Unresolved};
pub use store::{InMemoryRecordStore, RecordStore, StoreCallCounts};
