//! Component health checks.
//!
//! Relays and breakers report a [`HealthCheck`]; a service folds them into a
//! [`HealthReport`] whose status is the worst of its checks.

use crate::circuit_breaker::{CircuitBreakerSnapshot, State};
use serde::Serialize;

/// Health check status levels
///
/// Indicates the current health state of a component or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but recovering (e.g., breaker half-open)
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Optional metadata (e.g., state, failure counts)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

impl From<&CircuitBreakerSnapshot> for HealthCheck {
    fn from(snapshot: &CircuitBreakerSnapshot) -> Self {
        let component = format!("circuit-breaker:{}", snapshot.service_name);
        let check = match snapshot.state {
            State::Closed => Self::healthy(component),
            State::HalfOpen => Self::degraded(component, "probing for recovery"),
            State::Open => Self::unhealthy(
                component,
                format!("Circuit breaker for {} is OPEN", snapshot.service_name),
            ),
        };
        check
            .with_metadata("state", snapshot.state.to_string())
            .with_metadata("failureCount", snapshot.failure_count.to_string())
    }
}

/// Aggregated health report
///
/// Combines multiple health checks into an overall service status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// Timestamp when report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Check if overall service is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Whether the service can do useful work (healthy or degraded).
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        !self.status.is_unhealthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: State) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            service_name: "kafka-producer".into(),
            state,
            failure_count: 5,
            failure_threshold: 5,
            ms_since_last_failure: Some(10),
            reset_timeout_ms: 60_000,
        }
    }

    #[test]
    fn worst_status_wins() {
        let report = HealthReport::new(vec![
            HealthCheck::healthy("relay"),
            HealthCheck::degraded("breaker", "probing"),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.is_ready());

        let report = HealthReport::new(vec![
            HealthCheck::degraded("breaker", "probing"),
            HealthCheck::unhealthy("relay", "disconnected"),
        ]);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.is_ready());
    }

    #[test]
    fn empty_report_is_healthy() {
        assert!(HealthReport::new(Vec::new()).is_healthy());
    }

    #[test]
    fn breaker_state_maps_to_health() {
        assert_eq!(HealthCheck::from(&snapshot(State::Closed)).status, HealthStatus::Healthy);
        assert_eq!(HealthCheck::from(&snapshot(State::HalfOpen)).status, HealthStatus::Degraded);

        let open = HealthCheck::from(&snapshot(State::Open));
        assert_eq!(open.status, HealthStatus::Unhealthy);
        assert_eq!(open.component, "circuit-breaker:kafka-producer");
        assert!(open.metadata.contains(&("state".into(), "OPEN".into())));
    }
}
