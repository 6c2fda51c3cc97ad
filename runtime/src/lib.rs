//! # Event Relay Runtime
//!
//! Resilience primitives and the consumer/producer loop for the pipeline
//! services.
//!
//! ## Core Components
//!
//! - **[`CircuitBreaker`]**: guards one downstream dependency (one per broker
//!   connection or external API)
//! - **[`SlidingWindowRateLimiter`]**: per-client admission control for
//!   request boundaries
//! - **[`EventRelay`]**: subscribe, handle, publish through the breaker, commit
//! - **[`Supervisor`]**: owns a service's tasks and coordinates shutdown
//!
//! Breakers and limiters are plain values owned by the composition root and
//! shared by `Arc` or clone; nothing here is global.
//!
//! ## Example
//!
//! ```ignore
//! use event_relay_runtime::{CircuitBreaker, CircuitBreakerConfig, EventRelay, Supervisor};
//!
//! let breaker = CircuitBreaker::new("kafka-producer", CircuitBreakerConfig::default());
//! let mut supervisor = Supervisor::new(Duration::from_secs(10));
//!
//! let relay = EventRelay::builder()
//!     .name("email-service")
//!     .topics(vec!["order-successful".to_string()])
//!     .options(SubscribeOptions::earliest("email-service"))
//!     .event_bus(bus)
//!     .handler(handler)
//!     .breaker(breaker)
//!     .shutdown(supervisor.shutdown_receiver())
//!     .build()?;
//!
//! supervisor.spawn_relay(relay);
//! supervisor.run(shutdown_signal()).await?;
//! ```

/// Circuit breaker pattern for preventing cascading failures
pub mod circuit_breaker;

/// Sliding-window rate limiting
pub mod rate_limiter;

/// Event handler trait
pub mod handler;

/// Consume-transform-republish loop
pub mod relay;

/// Supervision and graceful shutdown
pub mod lifecycle;

/// Component health reporting
pub mod health;

/// Metric names and recorders
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use handler::EventHandler;
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use lifecycle::{Supervisor, SupervisorError, shutdown_signal};
pub use rate_limiter::{Admission, RateLimiterConfig, SlidingWindowRateLimiter};
pub use relay::{EventRelay, PoisonPolicy, RelayError, RelayMonitor, RelayState};
