//! Axum integration for event relay services.
//!
//! Every synchronous boundary of a pipeline service is an axum router built
//! from the pieces in this crate:
//!
//! ```text
//! request ─▶ correlation id ─▶ error responder ─▶ catch panic ─▶ rate limit ─▶ handler
//!                                    │
//!                                    └─ logs + renders any AppError on the way out
//! ```
//!
//! # Example
//!
//! ```ignore
//! use event_relay_web::{ErrorResponder, HealthState, catch_panic_layer, health_routes};
//! use event_relay_web::middleware::{correlation_id_layer, rate_limit};
//!
//! let app = Router::new()
//!     .route("/payment-service", post(pay))
//!     .layer(from_fn_with_state(limiter, rate_limit))
//!     .merge(health_routes(HealthState::new("payment-service")))
//!     .layer(catch_panic_layer())
//!     .layer(ErrorResponder::new(mode).layer())
//!     .layer(correlation_id_layer());
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

use axum::{Router, routing::get};
use std::sync::Arc;

pub use error::{AppError, ErrorBody, ErrorResponder, ErrorResponse, catch_panic_layer};
pub use extractors::{ClientIp, CorrelationId, TrustedProxies};
pub use handlers::HealthState;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationIdExt, correlation_id_layer, rate_limit};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// `GET /health` and `GET /health/ready` for `state`.
pub fn health_routes<S>(state: HealthState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .with_state(Arc::new(state))
}
