//! # Event Relay Services
//!
//! The four services of the pipeline:
//!
//! ```text
//! POST /payment-service ─▶ payment-successful ─▶ order-service ─▶ order-successful
//!     ─▶ email-service ─▶ email-successful
//!
//! analytic-service ◀─ all three topics
//! ```
//!
//! Business collaborators ([`payment::PaymentGateway`], [`order::OrderStore`],
//! [`email::EmailSender`]) are traits with stub implementations. Binaries
//! live in `src/bin/` and share the composition code in [`app`].

pub mod analytics;
pub mod app;
pub mod config;
pub mod email;
pub mod events;
pub mod order;
pub mod payment;
pub mod telemetry;

pub use config::{Config, ConfigError};
