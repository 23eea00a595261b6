//! Tracing subscriber initialization.
//!
//! Logs go to stderr so stdout stays free for the console gateway.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::bootstrap::StartupIssue;
use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "tipjar=debug,info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> Result<(), StartupIssue> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|e| StartupIssue::Telemetry(e.to_string()))?;

    tracing::info!(format = ?format, "Telemetry initialized");
    Ok(())
}
