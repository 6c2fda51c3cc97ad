//! HTTP request handlers shared by every service.

pub mod health;

pub use health::{HealthState, health_check, readiness_check};
