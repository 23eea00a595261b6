//! Asynchronous cache population.
//!
//! A single background task drains a bounded queue of records into a
//! [`PopulateSink`]. Producers wait when the queue is full, which is the
//! intended backpressure: with the default capacity of one, a reader that
//! just hit the durable store waits until the previous record is cached.
//!
//! A queued record never replaces a fresh entry written from a newer record
//! in the meantime. The same task sweeps expired entries every
//! `purge_interval`.
//!
//! A panic while writing one record is caught, logged with a backtrace and
//! counted; the task moves on to the next record.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tipjar_core::{shutdown_requested, AccountRecord, CacheConfig};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::record_cache::CachedRecordStore;

/// Destination of populated records.
pub trait PopulateSink: Send + Sync + 'static {
    /// Write `record`. Returns `false` if the sink already held something
    /// newer and kept it.
    fn populate(&self, record: AccountRecord, ttl: Duration) -> bool;

    /// Drop expired entries, returning how many went.
    fn purge_expired(&self) -> usize {
        0
    }
}

impl PopulateSink for CachedRecordStore {
    fn populate(&self, record: AccountRecord, ttl: Duration) -> bool {
        self.set_if_newer(record.identity_key.clone(), record, ttl)
    }

    fn purge_expired(&self) -> usize {
        CachedRecordStore::purge_expired(self)
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the population task.
#[derive(Debug, Default)]
pub struct PopulationMetrics {
    /// Records written to the sink.
    pub populated: AtomicU64,
    /// Records dropped because the sink held a newer entry.
    pub superseded: AtomicU64,
    /// Records whose write panicked.
    pub failures: AtomicU64,
    /// Records refused because the task had stopped.
    pub rejected: AtomicU64,
    /// Expired entries removed by periodic sweeps.
    pub purged: AtomicU64,
}

impl PopulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PopulationSnapshot {
        PopulationSnapshot {
            populated: self.populated.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of population metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulationSnapshot {
    pub populated: u64,
    pub superseded: u64,
    pub failures: u64,
    pub rejected: u64,
    pub purged: u64,
}

// ============================================================================
// POPULATOR
// ============================================================================

/// Producer side of the population queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CachePopulator {
    tx: mpsc::Sender<AccountRecord>,
    metrics: Arc<PopulationMetrics>,
}

impl CachePopulator {
    /// Start the population task.
    ///
    /// The task stops when `shutdown_rx` turns `true` or every populator
    /// handle has been dropped, and returns its metrics.
    ///
    /// # Arguments
    ///
    /// * `sink` - Where records are written
    /// * `config` - Entry TTL, queue capacity (raised to at least one) and
    ///   sweep interval
    /// * `shutdown_rx` - Watch receiver for the shutdown signal
    pub fn spawn<S: PopulateSink>(
        sink: Arc<S>,
        config: &CacheConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<Arc<PopulationMetrics>>) {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let metrics = Arc::new(PopulationMetrics::new());

        tracing::info!(
            capacity,
            ttl_ms = config.entry_ttl.as_millis() as u64,
            purge_interval_secs = config.purge_interval.as_secs(),
            "Cache population task started"
        );

        let handle = tokio::spawn(population_task(
            sink,
            config.entry_ttl,
            config.purge_interval,
            rx,
            metrics.clone(),
            shutdown_rx,
        ));

        (Self { tx, metrics }, handle)
    }

    /// Queue a record for the cache, waiting while the queue is full.
    ///
    /// Returns `false` only when the population task is no longer running.
    pub async fn enqueue(&self, record: AccountRecord) -> bool {
        match self.tx.send(record).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(record)) => {
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    identity_key = %record.identity_key,
                    "Cache population task stopped; record not cached"
                );
                false
            }
        }
    }

    pub fn metrics(&self) -> PopulationSnapshot {
        self.metrics.snapshot()
    }
}

async fn population_task<S: PopulateSink>(
    sink: Arc<S>,
    ttl: Duration,
    purge_interval: Duration,
    mut rx: mpsc::Receiver<AccountRecord>,
    metrics: Arc<PopulationMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<PopulationMetrics> {
    let mut purge_timer = interval(purge_interval.max(Duration::from_millis(1)));
    purge_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_requested(&mut shutdown_rx) => {
                tracing::info!("Cache population task shutting down");
                break;
            }

            item = rx.recv() => match item {
                Some(record) => populate_one(sink.as_ref(), record, ttl, &metrics),
                None => {
                    tracing::info!("Cache population queue closed");
                    break;
                }
            },

            _ = purge_timer.tick() => {
                let purged = sink.purge_expired();
                if purged > 0 {
                    metrics.purged.fetch_add(purged as u64, Ordering::Relaxed);
                    tracing::debug!(purged, "Expired cache entries swept");
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        populated = snapshot.populated,
        superseded = snapshot.superseded,
        failures = snapshot.failures,
        rejected = snapshot.rejected,
        purged = snapshot.purged,
        "Cache population task completed"
    );

    metrics
}

fn populate_one<S: PopulateSink>(
    sink: &S,
    record: AccountRecord,
    ttl: Duration,
    metrics: &PopulationMetrics,
) {
    let identity_key = record.identity_key.clone();
    match catch_unwind(AssertUnwindSafe(|| sink.populate(record, ttl))) {
        Ok(true) => {
            metrics.populated.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(identity_key = %identity_key, "Record cached");
        }
        Ok(false) => {
            metrics.superseded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(identity_key = %identity_key, "Newer cache entry kept; queued record dropped");
        }
        Err(payload) => {
            metrics.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                identity_key = %identity_key,
                panic = %panic_message(payload.as_ref()),
                backtrace = %Backtrace::force_capture(),
                "Cache population panicked; continuing"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
