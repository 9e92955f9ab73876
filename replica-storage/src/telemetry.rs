//! Tracing subscriber setup for hosts that embed the replication cache.
//!
//! The cache itself only emits `tracing` events; installing a subscriber is
//! left to the host. [`init_tracing`] is a convenience for hosts and tests
//! without their own subscriber.

use replica_core::{CacheError, CacheResult, ConfigError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `REPLICA_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "replica_storage=info,info";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives, e.g. `replica_storage=debug,info`.
    pub filter: String,
    /// Emit JSON lines instead of human readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Read `REPLICA_LOG` and `REPLICA_LOG_JSON` ("true" or "1").
    pub fn from_env() -> Self {
        Self {
            filter: std::env::var("REPLICA_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
            json: std::env::var("REPLICA_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }

    fn env_filter(&self) -> CacheResult<EnvFilter> {
        EnvFilter::try_new(&self.filter).map_err(|e| {
            CacheError::Config(ConfigError::InvalidValue {
                field: "filter".to_string(),
                value: self.filter.clone(),
                reason: e.to_string(),
            })
        })
    }
}

/// Install a global fmt subscriber.
///
/// Returns false if a global subscriber was already installed, which makes
/// repeated calls harmless.
///
/// # Errors
///
/// Returns a configuration error if the filter directives do not parse.
pub fn init_tracing(config: &TelemetryConfig) -> CacheResult<bool> {
    let filter = config.env_filter()?;
    let json = config.json;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(filter = %config.filter, json, "Telemetry initialized");
    }
    Ok(installed)
}
