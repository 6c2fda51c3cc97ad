//! # Event Relay Core
//!
//! Core types shared by every service in the event relay pipeline.
//!
//! Services in the pipeline (payment → order → email → analytics) never talk to
//! each other directly. Each one consumes a broker topic, performs a unit of
//! work per message and republishes a derived event:
//!
//! ```text
//! producer ──▶ topic ──▶ EventRelay ──▶ handler ──▶ CircuitBreaker ──▶ publish ──▶ topic ──▶ …
//! ```
//!
//! This crate holds the vocabulary those services share:
//!
//! - [`event`]: inbound [`EventEnvelope`](event::EventEnvelope) and outbound
//!   [`OutboundEvent`](event::OutboundEvent) records
//! - [`event_bus`]: the [`EventBus`](event_bus::EventBus) trait with explicit
//!   per-delivery acknowledgement (at-least-once)
//! - [`error`]: the [`TypedError`](error::TypedError) taxonomy rendered at every boundary
//! - [`logging`]: structured logging helpers on top of `tracing`
//! - [`environment`]: runtime mode and clock abstractions

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod error;
pub mod event;
pub mod event_bus;
pub mod logging;

pub use error::{ErrorKind, TypedError};

/// Environment module - runtime mode and injected time source.
///
/// Everything that differs between a developer laptop and production, or
/// between a test and a live process, is expressed here as a value or a trait
/// so it can be injected by the composition root.
pub mod environment {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Deployment mode of a process.
    ///
    /// Controls how much diagnostic detail leaves the process (error stacks and
    /// context are only rendered in development) and which log format is used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RuntimeMode {
        /// Local development and tests
        #[default]
        Development,
        /// Production deployment
        Production,
    }

    impl RuntimeMode {
        /// Whether this is production mode.
        #[must_use]
        pub const fn is_production(self) -> bool {
            matches!(self, Self::Production)
        }

        /// Lowercase name as used in configuration.
        #[must_use]
        pub const fn as_str(self) -> &'static str {
            match self {
                Self::Development => "development",
                Self::Production => "production",
            }
        }
    }

    impl fmt::Display for RuntimeMode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Error returned when parsing an unknown runtime mode.
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("Unknown runtime mode: {0}")]
    pub struct UnknownRuntimeMode(pub String);

    impl FromStr for RuntimeMode {
        type Err = UnknownRuntimeMode;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "development" | "dev" | "test" => Ok(Self::Development),
                "production" | "prod" => Ok(Self::Production),
                other => Err(UnknownRuntimeMode(other.to_string())),
            }
        }
    }
}
