//! Short-lived account cache and the queue that fills it.
//!
//! The cache holds each record for a fixed TTL. A stale entry is dropped by
//! the read that observes it, and the population task sweeps whatever is left
//! on a fixed interval. Records read from
//! the durable store reach the cache through a bounded single-consumer queue
//! ([`CachePopulator`]) so the read path never writes the cache itself.
//!
//! # Example
//!
//! ```ignore
//! let config = CacheConfig::default();
//! let cache = Arc::new(CachedRecordStore::from_config(&config));
//! let (populator, handle) = CachePopulator::spawn(cache.clone(), &config, shutdown_rx);
//!
//! populator.enqueue(record).await;
//! let hit = cache.get(&key);
//! ```

pub mod population;
pub mod record_cache;

pub use population::{CachePopulator, PopulateSink, PopulationMetrics, PopulationSnapshot};
pub use record_cache::{CacheStats, CachedRecordStore};
