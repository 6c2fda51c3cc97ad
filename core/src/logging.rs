//! Structured logging helpers.
//!
//! All components log through `tracing` with structured fields; subscriber
//! installation (format, level, sinks) belongs to each binary. These helpers
//! give the recurring records a single shape so log queries stay uniform
//! across services.

use crate::error::TypedError;

/// Log a classified error with its context and cause chain.
///
/// Server errors (5xx) are logged at `error`, client errors at `warn`.
pub fn log_error(message: &str, error: &TypedError) {
    let context = serde_json::to_string(error.context()).unwrap_or_default();
    if error.is_server_error() {
        tracing::error!(
            error.name = error.name(),
            error.message = %error.message(),
            status_code = error.status_code(),
            context = %context,
            causes = ?error.causes(),
            "{message}"
        );
    } else {
        tracing::warn!(
            error.name = error.name(),
            error.message = %error.message(),
            status_code = error.status_code(),
            context = %context,
            "{message}"
        );
    }
}

/// Log a broker lifecycle event (connect, subscribe, publish, commit, …).
pub fn log_broker_event(event: &str, topic: &str, key: Option<&str>) {
    tracing::info!(event, topic, key, "Kafka event");
}
