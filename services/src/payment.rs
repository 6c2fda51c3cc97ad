//! Payment service: the HTTP entry point of the pipeline.
//!
//! `POST /payment-service` charges the cart through the [`PaymentGateway`]
//! and publishes `payment-successful` through the circuit breaker.
//!
//! Request:
//!
//! ```json
//! { "userId": "u1", "cart": [{ "id": 1, "name": "Book", "price": 12.5 }] }
//! ```
//!
//! Response (200):
//!
//! ```json
//! { "success": true, "message": "Payment successful", "userId": "u1" }
//! ```

use crate::config::Config;
use crate::events::{PaymentSucceeded, topics};
use async_trait::async_trait;
use axum::{
    Extension, Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method, header},
    middleware::from_fn_with_state,
    routing::post,
};
use event_relay_core::error::TypedError;
use event_relay_core::event::OutboundEvent;
use event_relay_core::event_bus::EventBus;
use event_relay_runtime::{CircuitBreaker, SlidingWindowRateLimiter};
use event_relay_web::{
    AppError, ErrorResponder, HealthState, TrustedProxies, WebResult, catch_panic_layer,
    correlation_id_layer, health_routes, rate_limit,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge `user_id` for `cart`.
    ///
    /// # Errors
    ///
    /// Returns an error if the charge is declined or the gateway fails.
    async fn charge(&self, user_id: &str, cart: &[Value]) -> Result<(), TypedError>;
}

/// Gateway that approves every charge.
#[derive(Debug, Default, Clone)]
pub struct StubPaymentGateway;

#[async_trait]
impl PaymentGateway for StubPaymentGateway {
    async fn charge(&self, user_id: &str, cart: &[Value]) -> Result<(), TypedError> {
        tracing::debug!(user_id, items = cart.len(), "Payment approved");
        Ok(())
    }
}

/// Shared state of the payment endpoint.
#[derive(Clone)]
pub struct PaymentState {
    /// Producer for `payment-successful`
    pub event_bus: Arc<dyn EventBus>,
    /// Breaker guarding the producer
    pub breaker: CircuitBreaker,
    /// Payment processor
    pub gateway: Arc<dyn PaymentGateway>,
}

/// Payment request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Paying user
    #[serde(default)]
    pub user_id: Option<String>,
    /// Items to charge
    #[serde(default)]
    pub cart: Option<Vec<Value>>,
}

/// Payment response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    /// Always `true`
    pub success: bool,
    /// Outcome message
    pub message: String,
    /// Paying user
    pub user_id: String,
}

/// `POST /payment-service`
///
/// # Errors
///
/// - `Validation` (400) for a malformed body, a missing user or an empty cart
/// - `Broker` (500) if `payment-successful` cannot be published
pub async fn pay(
    State(state): State<PaymentState>,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> WebResult<Json<PaymentResponse>> {
    let Json(request) = payload.map_err(|rejection| TypedError::validation(rejection.body_text()))?;
    let user_id = request
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| TypedError::invalid_field("userId is required", "userId"))?;
    let cart = request
        .cart
        .filter(|items| !items.is_empty())
        .ok_or_else(|| TypedError::invalid_field("Cart must contain at least one item", "cart"))?;

    state.gateway.charge(&user_id, &cart).await?;

    let event = OutboundEvent::json(
        topics::PAYMENT_SUCCESSFUL,
        Some(user_id.clone()),
        &PaymentSucceeded {
            user_id: user_id.clone(),
            cart: Value::Array(cart),
        },
    )?;
    let receipt = state
        .breaker
        .execute(|| state.event_bus.publish(&event))
        .await
        .map_err(|e| {
            AppError(
                TypedError::from(e)
                    .with_topic(topics::PAYMENT_SUCCESSFUL)
                    .with_key(user_id.clone()),
            )
        })?;

    tracing::info!(
        user_id = %user_id,
        partition = receipt.partition,
        offset = receipt.offset,
        "Payment successful"
    );

    Ok(Json(PaymentResponse {
        success: true,
        message: "Payment successful".to_string(),
        user_id,
    }))
}

/// CORS for the configured origins; invalid origins are skipped.
#[must_use]
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Full payment service router.
///
/// Layers, outermost first: correlation id, request tracing, CORS, error
/// responder, panic catching, then the per-client rate limit on the payment
/// route. Forwarding headers name the client only when the socket peer is in
/// `config.trusted_proxies`.
pub fn router(
    state: PaymentState,
    limiter: Arc<SlidingWindowRateLimiter>,
    health: HealthState,
    config: &Config,
) -> Router {
    let trusted = TrustedProxies::new(config.trusted_proxies.iter().copied());
    let payments = Router::new()
        .route("/payment-service", post(pay))
        .route_layer(from_fn_with_state(limiter, rate_limit))
        .layer(Extension(trusted))
        .with_state(state);

    Router::new()
        .merge(payments)
        .merge(health_routes(health))
        .layer(catch_panic_layer())
        .layer(ErrorResponder::new(config.mode).layer())
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
}
