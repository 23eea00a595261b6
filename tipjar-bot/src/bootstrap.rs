//! Startup wiring.
//!
//! Builds the cache, population task, reconciler, permit registry and
//! dispatcher from configuration and hands them out as one [`TipBot`]. Every
//! startup problem is collected and reported together in a [`StartupError`]
//! instead of stopping at the first one.

use std::fmt;
use std::sync::Arc;

use tipjar_core::{CacheConfig, ConfigError, PermitConfig};
use tipjar_dispatch::{Dispatcher, MessagingGateway, PermitRegistry};
use tipjar_storage::{
    CachePopulator, CachedRecordStore, LmdbRecordStore, LmdbStoreError, PopulationMetrics,
    PopulationSnapshot, Reconciler, RecordStore,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::BotConfig;

// ============================================================================
// ERRORS
// ============================================================================

/// One reason the bot could not start.
#[derive(Debug, thiserror::Error)]
pub enum StartupIssue {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open account store at {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: LmdbStoreError,
    },

    #[error("Telemetry initialization failed: {0}")]
    Telemetry(String),
}

/// All problems found while starting up.
#[derive(Debug)]
pub struct StartupError {
    pub issues: Vec<StartupIssue>,
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "startup failed with {} issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  - {}", issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for StartupError {}

impl From<StartupIssue> for StartupError {
    fn from(issue: StartupIssue) -> Self {
        Self {
            issues: vec![issue],
        }
    }
}

// ============================================================================
// BOT
// ============================================================================

/// The running account and outbound components, sharing one shutdown flag.
pub struct TipBot<S, G> {
    accounts: Reconciler<S>,
    outbound: Dispatcher<G>,
    shutdown_tx: watch::Sender<bool>,
    population: JoinHandle<Arc<PopulationMetrics>>,
}

impl<S: RecordStore + 'static, G: MessagingGateway> TipBot<S, G> {
    /// Wire components around an already-open store. Must run inside a tokio
    /// runtime: the cache population task is spawned here.
    pub fn assemble(
        store: Arc<S>,
        gateway: Arc<G>,
        cache_config: &CacheConfig,
        permit_config: PermitConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let cache = Arc::new(CachedRecordStore::from_config(cache_config));
        let (populator, population) =
            CachePopulator::spawn(cache.clone(), cache_config, shutdown_rx.clone());
        let accounts = Reconciler::new(store, cache, populator);

        let permits = Arc::new(PermitRegistry::new(permit_config));
        let outbound = Dispatcher::new(gateway, permits, shutdown_rx);

        Self {
            accounts,
            outbound,
            shutdown_tx,
            population,
        }
    }

    pub fn accounts(&self) -> &Reconciler<S> {
        &self.accounts
    }

    pub fn outbound(&self) -> &Dispatcher<G> {
        &self.outbound
    }

    /// Signal shutdown, wait for the population task and return its final
    /// counters. Actions still waiting for a permit give up.
    pub async fn shutdown(self) -> PopulationSnapshot {
        let _ = self.shutdown_tx.send(true);

        let accounts = self.accounts.metrics();
        let outbound = self.outbound.metrics();
        tracing::info!(
            cache_hits = accounts.cache_hits,
            durable_reads = accounts.durable_reads,
            drift_detected = accounts.drift_detected,
            write_back_failures = accounts.write_back_failures,
            dispatched = outbound.succeeded,
            dispatch_failures = outbound.failed,
            "Shutting down"
        );

        match self.population.await {
            Ok(metrics) => metrics.snapshot(),
            Err(e) => {
                tracing::error!(error = %e, "Cache population task did not stop cleanly");
                PopulationSnapshot::default()
            }
        }
    }
}

/// Validate `config`, open the LMDB store and assemble the bot.
///
/// Configuration and store problems are all reported in one error.
pub fn bootstrap<G: MessagingGateway>(
    config: &BotConfig,
    gateway: Arc<G>,
) -> Result<TipBot<LmdbRecordStore, G>, StartupError> {
    let mut issues: Vec<StartupIssue> = config
        .validate()
        .into_iter()
        .map(StartupIssue::from)
        .collect();

    let store = match LmdbRecordStore::open(&config.database_path, config.database_max_size_mb) {
        Ok(store) => Some(store),
        Err(source) => {
            issues.push(StartupIssue::Store {
                path: config.database_path.display().to_string(),
                source,
            });
            None
        }
    };

    match store {
        Some(store) if issues.is_empty() => {
            tracing::info!(
                path = %config.database_path.display(),
                cache_ttl_secs = config.cache.entry_ttl.as_secs(),
                permit_interval_ms = config.permits.replenish_interval.as_millis() as u64,
                permit_burst = config.permits.burst,
                "Account store opened"
            );
            Ok(TipBot::assemble(
                Arc::new(store),
                gateway,
                &config.cache,
                config.permits.clone(),
            ))
        }
        _ => {
            for issue in &issues {
                tracing::error!(issue = %issue, "Startup problem");
            }
            Err(StartupError { issues })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_lists_every_issue() {
        let error = StartupError {
            issues: vec![
                StartupIssue::from(ConfigError::invalid("permits.burst", 0, "must be >= 1")),
                StartupIssue::Telemetry("already set".to_string()),
            ],
        };
        let text = error.to_string();
        assert!(text.starts_with("startup failed with 2 issue(s)"));
        assert!(text.contains("permits.burst"));
        assert!(text.contains("already set"));
    }

    #[test]
    fn test_single_issue_conversion() {
        let error: StartupError = StartupIssue::Telemetry("boom".to_string()).into();
        assert_eq!(error.issues.len(), 1);
    }
}
