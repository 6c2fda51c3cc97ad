//! Circuit breaker pattern for preventing cascading failures.
//!
//! A circuit breaker wraps one fallible async operation against one downstream
//! dependency (a broker connection, an external API) and "opens" when failures
//! reach a threshold, rejecting further calls without touching the dependency.
//!
//! # States
//!
//! - **Closed**: Normal operation. Calls pass through. Failures are counted.
//! - **Open**: Threshold reached. Calls fail immediately until the reset timeout
//!   has elapsed since the last failure.
//! - **HalfOpen**: After the timeout, exactly one probe call is let through.
//!   Success closes the circuit and clears the count; failure opens it again.
//!
//! ```text
//! Closed ──failures ≥ threshold──▶ Open ──reset timeout──▶ HalfOpen
//!   ▲                               ▲                        │
//!   └───────── probe succeeds ──────┼────────────────────────┤
//!                                   └──── probe fails ───────┘
//! ```
//!
//! State is guarded by a mutex that is never held across an `.await`, so two
//! concurrent failures cannot both miss the threshold and two callers cannot
//! both become the half-open probe.
//!
//! # Example
//!
//! ```rust
//! use event_relay_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(5)
//!     .reset_timeout(Duration::from_secs(60))
//!     .build();
//!
//! let breaker = CircuitBreaker::new("kafka-producer", config);
//!
//! match breaker.execute(|| async {
//!     // Your fallible operation
//!     Ok::<_, String>(42)
//! }).await {
//!     Ok(result) => println!("Success: {result}"),
//!     Err(e) => println!("Failed: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

use event_relay_core::error::TypedError;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::metrics::BreakerMetrics;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: usize,
    /// Time since the last failure before an open circuit lets a probe through
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_threshold: None,
            reset_timeout: None,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<usize>,
    reset_timeout: Option<Duration>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure threshold.
    ///
    /// Values below 1 are raised to 1.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set the reset timeout.
    ///
    /// How long after the last failure an open circuit admits a probe.
    #[must_use]
    pub const fn reset_timeout(mut self, duration: Duration) -> Self {
        self.reset_timeout = Some(duration);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        let defaults = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            failure_threshold: self
                .failure_threshold
                .unwrap_or(defaults.failure_threshold)
                .max(1),
            reset_timeout: self.reset_timeout.unwrap_or(defaults.reset_timeout),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, one probe tests whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not invoked
    #[error("Circuit breaker for {service} is OPEN")]
    Open {
        /// Name of the protected dependency
        service: String,
    },
    /// Operation failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether the breaker rejected the call without invoking it.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Breaker rejections are broker-class failures; operation errors keep their
/// own classification.
impl<E: Into<TypedError>> From<CircuitBreakerError<E>> for TypedError {
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::Open { service } => {
                Self::broker(format!("Circuit breaker for {service} is OPEN"))
                    .with_context("service", service)
            }
            CircuitBreakerError::Inner(inner) => inner.into(),
        }
    }
}

/// Internal state of the circuit breaker.
#[derive(Debug)]
struct CircuitBreakerState {
    state: State,
    failure_count: usize,
    last_failure_time: Option<Instant>,
    probe_in_flight: bool,
}

/// Point-in-time view of a breaker, for health endpoints and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    /// Name of the protected dependency
    pub service_name: String,
    /// Current state
    pub state: State,
    /// Failures counted so far
    pub failure_count: usize,
    /// Failures needed to open the circuit
    pub failure_threshold: usize,
    /// Milliseconds since the last recorded failure
    pub ms_since_last_failure: Option<u64>,
    /// Reset timeout in milliseconds
    pub reset_timeout_ms: u64,
}

/// Circuit breaker for one downstream dependency.
///
/// Cloning is cheap and clones share state, so one breaker can be handed to
/// every task that talks to the same dependency.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    service_name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
    // Metrics
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker protecting `service_name`.
    #[must_use]
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let service_name: String = service_name.into();
        Self {
            service_name: Arc::from(service_name),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: State::Closed,
                failure_count: 0,
                last_failure_time: None,
                probe_in_flight: false,
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Name of the protected dependency.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Get the current state of the circuit breaker.
    #[must_use]
    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Number of failures counted so far.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.lock().failure_count
    }

    /// Current state, counters and timing.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.lock();
        CircuitBreakerSnapshot {
            service_name: self.service_name.to_string(),
            state: state.state,
            failure_count: state.failure_count,
            failure_threshold: self.config.failure_threshold,
            ms_since_last_failure: state
                .last_failure_time
                .map(|t| t.elapsed().as_millis() as u64),
            reset_timeout_ms: self.config.reset_timeout.as_millis() as u64,
        }
    }

    /// Call an operation through the circuit breaker.
    ///
    /// The operation is not invoked at all while the circuit is open, or while
    /// another caller holds the half-open probe.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerError::Open` if the call was rejected.
    /// Returns `CircuitBreakerError::Inner` if the operation fails.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let Some(attempt) = self.try_acquire() else {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            BreakerMetrics::record_rejection(&self.service_name);
            tracing::warn!(
                service = %self.service_name,
                "Circuit breaker is OPEN, rejecting call"
            );
            return Err(CircuitBreakerError::Open {
                service: self.service_name.to_string(),
            });
        };

        match operation().await {
            Ok(result) => {
                attempt.succeeded();
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
            Err(err) => {
                attempt.failed();
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Decide whether a call may proceed, moving OPEN → HALF_OPEN when due.
    fn try_acquire(&self) -> Option<Attempt<'_>> {
        let mut state = self.lock();

        match state.state {
            State::Closed => Some(Attempt::new(self, false)),
            State::HalfOpen => {
                if state.probe_in_flight {
                    None
                } else {
                    state.probe_in_flight = true;
                    Some(Attempt::new(self, true))
                }
            }
            State::Open => {
                let due = state
                    .last_failure_time
                    .is_none_or(|last| last.elapsed() > self.config.reset_timeout);
                if due {
                    state.state = State::HalfOpen;
                    state.probe_in_flight = true;
                    self.log_transition(State::HalfOpen, state.failure_count);
                    Some(Attempt::new(self, true))
                } else {
                    None
                }
            }
        }
    }

    /// Handle successful operation.
    fn on_success(&self, probe: bool) {
        let mut state = self.lock();
        if probe {
            state.probe_in_flight = false;
        }

        if state.state == State::HalfOpen && probe {
            state.state = State::Closed;
            state.failure_count = 0;
            state.last_failure_time = None;
            self.log_transition(State::Closed, 0);
        }
    }

    /// Handle failed operation.
    fn on_failure(&self, probe: bool) {
        let mut state = self.lock();
        if probe {
            state.probe_in_flight = false;
        }
        state.failure_count += 1;

        match state.state {
            State::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    state.state = State::Open;
                    state.last_failure_time = Some(Instant::now());
                    self.log_transition(State::Open, state.failure_count);
                }
            }
            State::HalfOpen => {
                state.state = State::Open;
                state.last_failure_time = Some(Instant::now());
                self.log_transition(State::Open, state.failure_count);
            }
            State::Open => {
                // A call admitted before the circuit opened failed late; the
                // reset timeout still runs from the transition.
            }
        }
    }

    /// Release a probe whose future was dropped before completing.
    fn on_abandoned_probe(&self) {
        let mut state = self.lock();
        state.probe_in_flight = false;
        tracing::debug!(service = %self.service_name, "Half-open probe abandoned");
    }

    fn log_transition(&self, to: State, failure_count: usize) {
        BreakerMetrics::record_transition(&self.service_name, to);
        match to {
            State::Open => tracing::warn!(
                service = %self.service_name,
                state = %to,
                failures = failure_count,
                threshold = self.config.failure_threshold,
                "Circuit breaker for {} is {to}",
                self.service_name
            ),
            State::Closed | State::HalfOpen => tracing::info!(
                service = %self.service_name,
                state = %to,
                "Circuit breaker for {} is {to}",
                self.service_name
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get circuit breaker metrics.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Reset the circuit breaker to closed state.
    ///
    /// Useful for manual intervention.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.state = State::Closed;
        state.failure_count = 0;
        state.last_failure_time = None;
        state.probe_in_flight = false;
        tracing::info!(service = %self.service_name, "Circuit breaker manually reset to CLOSED");
    }
}

/// An admitted call. Reports its outcome back to the breaker exactly once.
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl<'a> Attempt<'a> {
    const fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            resolved: false,
        }
    }

    fn succeeded(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.probe);
    }

    fn failed(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if self.probe && !self.resolved {
            self.breaker.on_abandoned_probe();
        }
    }
}

/// Metrics for circuit breaker monitoring.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls attempted
    pub total_calls: u64,
    /// Total number of successful calls
    pub total_successes: u64,
    /// Total number of failed calls
    pub total_failures: u64,
    /// Total number of rejected calls (circuit open)
    pub total_rejections: u64,
}

impl CircuitBreakerMetrics {
    /// Calculate success rate (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 1.0;
        }
        self.total_successes as f64 / self.total_calls as f64
    }

    /// Calculate rejection rate (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_rejections as f64 / self.total_calls as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use event_relay_core::error::ErrorKind;
    use std::sync::atomic::AtomicUsize;

    fn breaker(threshold: usize, reset_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test-service",
            CircuitBreakerConfig::builder()
                .failure_threshold(threshold)
                .reset_timeout(reset_timeout)
                .build(),
        )
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker.execute(|| async { Err::<i32, _>("error") }).await;
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_on_success() {
        let breaker = CircuitBreaker::new("test-service", CircuitBreakerConfig::default());

        let result = breaker.execute(|| async { Ok::<_, String>(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_threshold() {
        let breaker = breaker(3, Duration::from_secs(60));

        for _ in 0..2 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), State::Closed);

        fail(&breaker).await;
        assert_eq!(breaker.state(), State::Open);
        assert_eq!(breaker.failure_count(), 3);
    }

    #[tokio::test]
    async fn test_failures_accumulate_across_successes_while_closed() {
        let breaker = breaker(3, Duration::from_secs(60));

        fail(&breaker).await;
        let _ = breaker.execute(|| async { Ok::<_, String>(()) }).await;
        fail(&breaker).await;
        let _ = breaker.execute(|| async { Ok::<_, String>(()) }).await;
        fail(&breaker).await;

        assert_eq!(breaker.state(), State::Open);
    }

    #[tokio::test]
    async fn test_circuit_breaker_rejects_without_invoking_when_open() {
        let breaker = breaker(2, Duration::from_secs(60));
        for _ in 0..2 {
            fail(&breaker).await;
        }

        let invoked = AtomicUsize::new(0);
        for _ in 0..5 {
            let result = breaker
                .execute(|| async {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(42)
                })
                .await;
            assert!(matches!(result, Err(CircuitBreakerError::Open { ref service }) if service == "test-service"));
        }

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.metrics().total_rejections, 5);
    }

    #[tokio::test]
    async fn test_circuit_breaker_probes_once_after_timeout_then_closes() {
        let breaker = breaker(2, Duration::from_millis(100));
        for _ in 0..2 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), State::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(7)
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_late_failure_does_not_extend_open_period() {
        let breaker = breaker(2, Duration::from_millis(100));

        let slow = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute(|| async {
                        tokio::time::sleep(Duration::from_millis(60)).await;
                        Err::<(), _>("late")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        for _ in 0..2 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), State::Open);

        assert!(slow.await.unwrap().is_err());
        assert_eq!(breaker.state(), State::Open);

        // 110 ms after opening, 50 ms after the late failure
        tokio::time::sleep(Duration::from_millis(50)).await;

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_circuit_breaker_reopens_on_half_open_failure() {
        let breaker = breaker(2, Duration::from_millis(100));
        for _ in 0..2 {
            fail(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;

        fail(&breaker).await;

        assert_eq!(breaker.state(), State::Open);
        assert_eq!(breaker.failure_count(), 3);

        // Fresh failure time: still rejecting right after the failed probe
        let result = breaker.execute(|| async { Ok::<_, String>(1) }).await;
        assert!(result.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn test_only_one_probe_in_half_open() {
        let breaker = Arc::new(breaker(1, Duration::from_millis(50)));
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let invoked = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..5 {
            let breaker = Arc::clone(&breaker);
            let invoked = Arc::clone(&invoked);
            handles.push(tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok::<_, String>(())
                    })
                    .await
            }));
        }

        let mut rejected = 0;
        for handle in handles {
            if handle.await.unwrap().is_err() {
                rejected += 1;
            }
        }

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(rejected, 4);
        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_probe_releases_slot() {
        let breaker = breaker(1, Duration::from_millis(20));
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let probe = breaker.execute(|| std::future::pending::<Result<(), String>>());
        assert!(tokio::time::timeout(Duration::from_millis(10), probe).await.is_err());
        assert_eq!(breaker.state(), State::HalfOpen);

        let result = breaker.execute(|| async { Ok::<_, String>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_all_counted() {
        let breaker = Arc::new(breaker(5, Duration::from_secs(60)));
        let mut handles = vec![];

        for _ in 0..10 {
            let breaker = Arc::clone(&breaker);
            handles.push(tokio::spawn(async move {
                let _ = breaker
                    .execute(|| async {
                        tokio::task::yield_now().await;
                        Err::<(), _>("boom")
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let metrics = breaker.metrics();
        assert_eq!(breaker.state(), State::Open);
        assert_eq!(metrics.total_failures + metrics.total_rejections, 10);
        assert_eq!(breaker.failure_count() as u64, metrics.total_failures);
        assert!(metrics.total_failures >= 5);
    }

    #[tokio::test]
    async fn test_circuit_breaker_metrics() {
        let breaker = CircuitBreaker::new("test-service", CircuitBreakerConfig::default());

        for _ in 0..3 {
            let _ = breaker.execute(|| async { Ok::<_, String>(42) }).await;
        }
        for _ in 0..2 {
            fail(&breaker).await;
        }

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 5);
        assert_eq!(metrics.total_successes, 3);
        assert_eq!(metrics.total_failures, 2);
        assert_eq!(metrics.success_rate(), 0.6);
        assert_eq!(metrics.rejection_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_circuit_breaker_reset() {
        let breaker = breaker(2, Duration::from_secs(60));
        for _ in 0..2 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), State::Open);

        breaker.reset();

        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_reports_counts() {
        let breaker = breaker(2, Duration::from_millis(1500));
        fail(&breaker).await;

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.service_name, "test-service");
        assert_eq!(snapshot.state, State::Closed);
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.failure_threshold, 2);
        assert_eq!(snapshot.reset_timeout_ms, 1500);
    }

    #[test]
    fn test_threshold_is_at_least_one() {
        let config = CircuitBreakerConfig::builder().failure_threshold(0).build();
        assert_eq!(config.failure_threshold, 1);
    }

    #[test]
    fn test_open_error_is_broker_error_with_service() {
        let err: TypedError = CircuitBreakerError::<TypedError>::Open {
            service: "kafka-producer".to_string(),
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::Broker);
        assert_eq!(err.message(), "Circuit breaker for kafka-producer is OPEN");
        assert_eq!(err.context()["service"], "kafka-producer");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(State::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(serde_json::to_string(&State::HalfOpen).unwrap(), "\"HALF_OPEN\"");
    }
}
