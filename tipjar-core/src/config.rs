//! Configuration for the account cache and outbound permit buckets.
//!
//! Values are read once at startup from environment variables, with defaults
//! matching production behaviour. Nothing here is mutated after startup.

use crate::error::ConfigError;
use std::time::Duration;

/// Default lifetime of a cached account record.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 10;

/// Default capacity of the cache-population queue.
pub const DEFAULT_CACHE_QUEUE_CAPACITY: usize = 1;

/// Default interval between sweeps of expired cache entries.
pub const DEFAULT_CACHE_PURGE_INTERVAL_SECS: u64 = 60;

/// Default interval at which one permit is replenished per destination.
pub const DEFAULT_PERMIT_INTERVAL_MS: u64 = 1000;

/// Default number of permits a destination can spend at once.
pub const DEFAULT_PERMIT_BURST: u32 = 1;

/// Default pause between admission attempts.
pub const DEFAULT_PERMIT_BACKOFF_MS: u64 = 10;

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Configuration for the cached record store and its population queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied to every cache write.
    pub entry_ttl: Duration,
    /// Capacity of the population queue. A full queue blocks producers.
    pub queue_capacity: usize,
    /// How often the population task drops expired entries.
    pub purge_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            queue_capacity: DEFAULT_CACHE_QUEUE_CAPACITY,
            purge_interval: Duration::from_secs(DEFAULT_CACHE_PURGE_INTERVAL_SECS),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// - `TIPJAR_CACHE_TTL_SECS`: entry TTL in seconds (default: 10)
    /// - `TIPJAR_CACHE_QUEUE_CAPACITY`: population queue capacity (default: 1)
    /// - `TIPJAR_CACHE_PURGE_INTERVAL_SECS`: expired-entry sweep interval (default: 60)
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let entry_ttl = Duration::from_secs(
            parse_var(&lookup, "TIPJAR_CACHE_TTL_SECS").unwrap_or(DEFAULT_CACHE_TTL_SECS),
        );
        let queue_capacity = parse_var(&lookup, "TIPJAR_CACHE_QUEUE_CAPACITY")
            .unwrap_or(DEFAULT_CACHE_QUEUE_CAPACITY);
        let purge_interval = Duration::from_secs(
            parse_var(&lookup, "TIPJAR_CACHE_PURGE_INTERVAL_SECS")
                .unwrap_or(DEFAULT_CACHE_PURGE_INTERVAL_SECS),
        );

        Self {
            entry_ttl,
            queue_capacity,
            purge_interval,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.entry_ttl.is_zero() {
            errors.push(ConfigError::invalid(
                "cache.entry_ttl",
                format!("{:?}", self.entry_ttl),
                "must be > 0",
            ));
        }
        if self.queue_capacity == 0 {
            errors.push(ConfigError::invalid(
                "cache.queue_capacity",
                self.queue_capacity,
                "must be >= 1",
            ));
        }
        if self.purge_interval.is_zero() {
            errors.push(ConfigError::invalid(
                "cache.purge_interval",
                format!("{:?}", self.purge_interval),
                "must be > 0",
            ));
        }
        errors
    }
}

// ============================================================================
// PERMIT CONFIGURATION
// ============================================================================

/// Configuration for per-destination permit buckets.
///
/// Each destination may spend `burst` permits at once; one permit comes back
/// every `replenish_interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitConfig {
    pub replenish_interval: Duration,
    pub burst: u32,
    /// Pause between admission attempts while a bucket is empty.
    pub backoff: Duration,
    /// Give up waiting for admission after this long. `None` waits forever.
    pub max_wait: Option<Duration>,
}

impl Default for PermitConfig {
    fn default() -> Self {
        Self {
            replenish_interval: Duration::from_millis(DEFAULT_PERMIT_INTERVAL_MS),
            burst: DEFAULT_PERMIT_BURST,
            backoff: Duration::from_millis(DEFAULT_PERMIT_BACKOFF_MS),
            max_wait: None,
        }
    }
}

impl PermitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create PermitConfig from environment variables.
    ///
    /// - `TIPJAR_PERMIT_INTERVAL_MS`: replenish interval (default: 1000)
    /// - `TIPJAR_PERMIT_BURST`: burst size (default: 1)
    /// - `TIPJAR_PERMIT_BACKOFF_MS`: pause between attempts (default: 10)
    /// - `TIPJAR_PERMIT_MAX_WAIT_MS`: admission deadline (default: unset)
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let replenish_interval = Duration::from_millis(
            parse_var(&lookup, "TIPJAR_PERMIT_INTERVAL_MS").unwrap_or(DEFAULT_PERMIT_INTERVAL_MS),
        );
        let burst = parse_var(&lookup, "TIPJAR_PERMIT_BURST").unwrap_or(DEFAULT_PERMIT_BURST);
        let backoff = Duration::from_millis(
            parse_var(&lookup, "TIPJAR_PERMIT_BACKOFF_MS").unwrap_or(DEFAULT_PERMIT_BACKOFF_MS),
        );
        let max_wait = parse_var::<u64>(&lookup, "TIPJAR_PERMIT_MAX_WAIT_MS")
            .map(Duration::from_millis);

        Self {
            replenish_interval,
            burst,
            backoff,
            max_wait,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.replenish_interval = interval;
        self
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.replenish_interval.is_zero() {
            errors.push(ConfigError::invalid(
                "permits.replenish_interval",
                format!("{:?}", self.replenish_interval),
                "must be > 0",
            ));
        }
        if self.burst == 0 {
            errors.push(ConfigError::invalid("permits.burst", self.burst, "must be >= 1"));
        }
        if self.backoff.is_zero() {
            errors.push(ConfigError::invalid(
                "permits.backoff",
                format!("{:?}", self.backoff),
                "must be > 0",
            ));
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cache = CacheConfig::default();
        assert_eq!(cache.entry_ttl, Duration::from_secs(10));
        assert_eq!(cache.queue_capacity, 1);
        assert_eq!(cache.purge_interval, Duration::from_secs(60));

        let permits = PermitConfig::default();
        assert_eq!(permits.replenish_interval, Duration::from_secs(1));
        assert_eq!(permits.burst, 1);
        assert!(permits.max_wait.is_none());
        assert!(cache.validate().is_empty());
        assert!(permits.validate().is_empty());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let lookup = lookup_from(&[
            ("TIPJAR_CACHE_TTL_SECS", "30"),
            ("TIPJAR_CACHE_QUEUE_CAPACITY", "4"),
            ("TIPJAR_CACHE_PURGE_INTERVAL_SECS", "5"),
            ("TIPJAR_PERMIT_INTERVAL_MS", "250"),
            ("TIPJAR_PERMIT_BURST", "5"),
            ("TIPJAR_PERMIT_MAX_WAIT_MS", "2000"),
        ]);
        let cache = CacheConfig::from_lookup(&lookup);
        assert_eq!(cache.entry_ttl, Duration::from_secs(30));
        assert_eq!(cache.queue_capacity, 4);
        assert_eq!(cache.purge_interval, Duration::from_secs(5));

        let permits = PermitConfig::from_lookup(&lookup);
        assert_eq!(permits.replenish_interval, Duration::from_millis(250));
        assert_eq!(permits.burst, 5);
        assert_eq!(permits.backoff, Duration::from_millis(DEFAULT_PERMIT_BACKOFF_MS));
        assert_eq!(permits.max_wait, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_unparseable_values_fall_back_to_defaults() {
        let lookup = lookup_from(&[("TIPJAR_CACHE_TTL_SECS", "ten"), ("TIPJAR_PERMIT_BURST", "-1")]);
        assert_eq!(CacheConfig::from_lookup(&lookup), CacheConfig::default());
        assert_eq!(PermitConfig::from_lookup(&lookup).burst, DEFAULT_PERMIT_BURST);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let cache = CacheConfig::new()
            .with_ttl(Duration::ZERO)
            .with_queue_capacity(0)
            .with_purge_interval(Duration::ZERO);
        assert_eq!(cache.validate().len(), 3);

        let permits = PermitConfig::new()
            .with_interval(Duration::ZERO)
            .with_burst(0)
            .with_backoff(Duration::ZERO);
        let errors = permits.validate();
        assert_eq!(errors.len(), 3);
        assert!(errors[1].to_string().contains("permits.burst"));
    }
}
