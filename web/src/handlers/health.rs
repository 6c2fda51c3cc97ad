//! Health check endpoints.
//!
//! These endpoints are used by load balancers and orchestrators to verify
//! service health.

use axum::{Json, extract::State, http::StatusCode};
use event_relay_runtime::relay::RelayMonitor;
use event_relay_runtime::{CircuitBreaker, HealthCheck, HealthReport};
use serde::Serialize;
use std::sync::Arc;

/// What a service exposes to its health endpoints.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
    service: String,
    relays: Vec<RelayMonitor>,
    breakers: Vec<CircuitBreaker>,
}

impl HealthState {
    /// Health state for `service` with nothing registered yet.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    /// Report a relay (its breaker is reported with it).
    #[must_use]
    pub fn with_relay(mut self, monitor: RelayMonitor) -> Self {
        self.relays.push(monitor);
        self
    }

    /// Report a breaker not owned by any relay.
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breakers.push(breaker);
        self
    }

    /// Service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current report over every registered component.
    #[must_use]
    pub fn report(&self) -> HealthReport {
        let relay_checks = self.relays.iter().flat_map(|monitor| {
            [
                monitor.health_check(),
                HealthCheck::from(&monitor.breaker().snapshot()),
            ]
        });
        let breaker_checks = self
            .breakers
            .iter()
            .map(|breaker| HealthCheck::from(&breaker.snapshot()));

        HealthReport::new(relay_checks.chain(breaker_checks).collect())
    }
}

/// Liveness body.
#[derive(Debug, Clone, Serialize)]
pub struct Liveness {
    /// Always `"ok"`
    pub status: &'static str,
    /// Service name
    pub service: String,
}

/// Liveness probe.
///
/// Returns 200 as long as the process serves HTTP; dependencies are not
/// checked.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Liveness>) {
    (
        StatusCode::OK,
        Json(Liveness {
            status: "ok",
            service: state.service.clone(),
        }),
    )
}

/// Readiness probe over relays and breakers.
///
/// - 200 OK: healthy or degraded (e.g. a breaker probing)
/// - 503 Service Unavailable: a relay is disconnected or a breaker is open
///
/// ```text
/// GET /health/ready
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness_check(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<HealthReport>) {
    let report = state.report();
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report))
}
