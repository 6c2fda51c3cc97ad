//! Tracing subscriber setup for the service binaries.

use crate::config::Config;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `LOG_LEVEL`. Development
/// logs are human-readable, production logs are JSON lines.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(config: &Config) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let production = config.mode.is_production();

    tracing_subscriber::registry()
        .with(filter)
        .with((!production).then(|| fmt::layer().with_target(false)))
        .with(production.then(|| fmt::layer().json().with_current_span(true)))
        .try_init()
}

/// Root span carrying the `service` field for every record of a process.
#[must_use]
pub fn service_span(config: &Config) -> tracing::Span {
    tracing::info_span!(
        "service",
        service = %config.logging.service_name,
        env = %config.mode,
    )
}
