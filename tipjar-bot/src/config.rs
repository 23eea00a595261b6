//! Process configuration.

use std::path::PathBuf;

use tipjar_core::{CacheConfig, ConfigError, PermitConfig};

pub const DEFAULT_DB_PATH: &str = "data/accounts";
pub const DEFAULT_DB_MAX_SIZE_MB: usize = 64;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// `pretty` (any case) selects human-readable output; anything else is JSON.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("pretty") {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Everything the bot reads from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    /// Directory holding the LMDB account store.
    pub database_path: PathBuf,
    pub database_max_size_mb: usize,
    pub cache: CacheConfig,
    pub permits: PermitConfig,
    pub log_format: LogFormat,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DB_PATH),
            database_max_size_mb: DEFAULT_DB_MAX_SIZE_MB,
            cache: CacheConfig::default(),
            permits: PermitConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from environment variables.
    ///
    /// - `TIPJAR_DB_PATH`: account store directory (default: `data/accounts`)
    /// - `TIPJAR_DB_MAX_SIZE_MB`: LMDB map size (default: 64)
    /// - `TIPJAR_LOG_FORMAT`: `json` or `pretty` (default: `json`)
    ///
    /// plus the variables read by [`CacheConfig::from_env`] and
    /// [`PermitConfig::from_env`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let database_path = lookup("TIPJAR_DB_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let database_max_size_mb = lookup("TIPJAR_DB_MAX_SIZE_MB")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_DB_MAX_SIZE_MB);

        let log_format = lookup("TIPJAR_LOG_FORMAT")
            .map(|s| LogFormat::parse(&s))
            .unwrap_or_default();

        Self {
            database_path,
            database_max_size_mb,
            cache: CacheConfig::from_lookup(&lookup),
            permits: PermitConfig::from_lookup(&lookup),
            log_format,
        }
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_permits(mut self, permits: PermitConfig) -> Self {
        self.permits = permits;
        self
    }

    /// Every problem with this configuration, in field order.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.database_max_size_mb == 0 {
            errors.push(ConfigError::invalid(
                "database.max_size_mb",
                self.database_max_size_mb,
                "must be >= 1",
            ));
        }
        errors.extend(self.cache.validate());
        errors.extend(self.permits.validate());
        errors
    }
}
