//! Per-destination permit buckets.
//!
//! Each destination gets one GCRA bucket (governor) the first time it is
//! seen; the bucket is kept for the life of the registry. Admission polls the
//! bucket, sleeping a fixed backoff between attempts, until it is admitted,
//! the optional maximum wait runs out, or shutdown is requested.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use tipjar_core::{shutdown_requested, PermitConfig};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::gateway::Destination;

/// Type alias for the rate limiter we use.
type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Outcome of waiting for a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { attempts: u32, waited: Duration },
    /// The configured maximum wait elapsed first.
    TimedOut { attempts: u32, waited: Duration },
    /// Shutdown was requested while waiting.
    Cancelled { attempts: u32, waited: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Admitted { attempts, .. }
            | Self::TimedOut { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn waited(&self) -> Duration {
        match self {
            Self::Admitted { waited, .. }
            | Self::TimedOut { waited, .. }
            | Self::Cancelled { waited, .. } => *waited,
        }
    }
}

/// Registry of permit buckets keyed by destination.
pub struct PermitRegistry {
    config: PermitConfig,
    quota: Quota,
    buckets: DashMap<Destination, Arc<DirectRateLimiter>>,
}

impl PermitRegistry {
    pub fn new(config: PermitConfig) -> Self {
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(config.replenish_interval)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);

        Self {
            config,
            quota,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PermitConfig {
        &self.config
    }

    /// Get or create the bucket for `destination`.
    fn bucket(&self, destination: &Destination) -> Arc<DirectRateLimiter> {
        self.buckets
            .entry(destination.clone())
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
            .clone()
    }

    /// Take a permit if one is available right now.
    pub fn try_admit(&self, destination: &Destination) -> bool {
        self.bucket(destination).check().is_ok()
    }

    /// Wait for a permit for `destination`.
    ///
    /// Retries every `backoff` while the bucket is empty. Without a
    /// configured `max_wait` this only returns early on shutdown.
    pub async fn acquire(
        &self,
        destination: &Destination,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Admission {
        let bucket = self.bucket(destination);
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            if bucket.check().is_ok() {
                let waited = started.elapsed();
                if attempts > 1 {
                    tracing::debug!(
                        destination = %destination,
                        attempts,
                        waited_ms = waited.as_millis() as u64,
                        "Permit granted after waiting"
                    );
                }
                return Admission::Admitted { attempts, waited };
            }

            let waited = started.elapsed();
            let pause = match self.config.max_wait {
                Some(max_wait) if waited >= max_wait => {
                    return Admission::TimedOut { attempts, waited };
                }
                Some(max_wait) => self.config.backoff.min(max_wait - waited),
                None => self.config.backoff,
            };

            if attempts == 1 {
                tracing::trace!(destination = %destination, "Permit denied; backing off");
            }

            tokio::select! {
                _ = shutdown_requested(shutdown_rx) => {
                    return Admission::Cancelled { attempts, waited: started.elapsed() };
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Number of destinations seen so far.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
