//! Axum middleware for request tracking and admission control.
//!
//! - **Correlation ID tracking**: extract or generate a correlation id, store
//!   it in request extensions, echo it in the response
//! - **Rate limiting**: per-client sliding-window admission keyed by client IP
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware::from_fn_with_state};
//! use event_relay_web::middleware::{correlation_id_layer, rate_limit};
//!
//! let limiter = Arc::new(SlidingWindowRateLimiter::new(RateLimiterConfig::default()));
//! let app = Router::new()
//!     .route("/payment-service", post(pay))
//!     .layer(from_fn_with_state(limiter, rate_limit))
//!     .layer(responder.layer())
//!     .layer(correlation_id_layer());
//! ```

use crate::error::AppError;
use crate::extractors::ClientIp;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use event_relay_core::error::TypedError;
use event_relay_runtime::{Admission, SlidingWindowRateLimiter};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Create a layer that adds correlation ID tracking to all requests.
///
/// Requests without a valid UUID in `X-Correlation-ID` get a fresh one. The
/// handler runs inside an `http_request` span carrying the id.
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        req.extensions_mut().insert(correlation_id);

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %req.method(),
            uri = %req.uri(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            if let Ok(header_value) = HeaderValue::from_str(&correlation_id.to_string()) {
                response
                    .headers_mut()
                    .insert(CORRELATION_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

/// Access to the correlation id stored by [`CorrelationIdMiddleware`].
pub trait CorrelationIdExt {
    /// The correlation id, if the middleware is installed.
    fn try_correlation_id(&self) -> Option<Uuid>;
}

impl CorrelationIdExt for Request {
    fn try_correlation_id(&self) -> Option<Uuid> {
        self.extensions().get::<Uuid>().copied()
    }
}

/// Per-client rate limiting.
///
/// Clients are keyed by [`ClientIp`]: the socket address, or the forwarded
/// client when the peer is a [`TrustedProxies`](crate::TrustedProxies) member.
/// Use with [`axum::middleware::from_fn_with_state`]. Rejections become a
/// `RateLimit` error (429 with `retryAfter`) rendered by the error responder.
pub async fn rate_limit(
    State(limiter): State<Arc<SlidingWindowRateLimiter>>,
    ClientIp(ip): ClientIp,
    request: Request,
    next: Next,
) -> Response {
    let client = ip.to_string();
    match limiter.check(&client) {
        Admission::Admitted => next.run(request).await,
        Admission::Rejected { retry_after_secs } => AppError(
            TypedError::rate_limited(retry_after_secs)
                .with_context("clientIp", client)
                .with_context("path", request.uri().path()),
        )
        .into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ErrorResponder;
    use crate::extractors::TrustedProxies;
    use axum::extract::ConnectInfo;
    use axum::{Extension, Router, body::Body, middleware::from_fn_with_state, routing::get};
    use event_relay_core::environment::RuntimeMode;
    use event_relay_runtime::RateLimiterConfig;
    use std::net::{IpAddr, SocketAddr};
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn correlation_id_generated_if_missing() {
        let app = Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(correlation_id_layer());

        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        let correlation_id = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("Correlation ID header should be present");
        assert!(Uuid::parse_str(correlation_id.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn correlation_id_preserved_from_request() {
        let app = Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(correlation_id_layer());

        let request_uuid = Uuid::new_v4();
        let request = Request::builder()
            .uri("/test")
            .header(CORRELATION_ID_HEADER, request_uuid.to_string())
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let response_id = response.headers()[CORRELATION_ID_HEADER].to_str().unwrap();
        assert_eq!(response_id, request_uuid.to_string());
    }

    #[tokio::test]
    async fn invalid_correlation_id_is_replaced() {
        let app = Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(correlation_id_layer());

        let request = Request::builder()
            .uri("/test")
            .header(CORRELATION_ID_HEADER, "not-a-uuid")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let uuid_str = response.headers()[CORRELATION_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(uuid_str).is_ok());
    }

    fn limited_app(max_requests: usize) -> Router {
        limited_app_trusting(max_requests, TrustedProxies::default())
    }

    fn limited_app_trusting(max_requests: usize, trusted: TrustedProxies) -> Router {
        let limiter = Arc::new(SlidingWindowRateLimiter::new(RateLimiterConfig {
            max_requests,
            window: Duration::from_secs(60),
        }));
        Router::new()
            .route("/payment-service", get(|| async { "ok" }))
            .layer(from_fn_with_state(limiter, rate_limit))
            .layer(Extension(trusted))
            .layer(ErrorResponder::new(RuntimeMode::Production).layer())
            .layer(correlation_id_layer())
    }

    fn request_from(peer: &str) -> Request {
        let addr: SocketAddr = format!("{peer}:5555").parse().unwrap();
        let mut request = Request::builder()
            .uri("/payment-service")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    fn forwarded_request(peer: &str, forwarded_for: &str) -> Request {
        let mut request = request_from(peer);
        request
            .headers_mut()
            .insert("X-Forwarded-For", HeaderValue::from_str(forwarded_for).unwrap());
        request
    }

    #[tokio::test]
    async fn rate_limit_rejects_over_budget_clients_with_429() {
        let app = limited_app(2);

        for _ in 0..2 {
            let response = app.clone().oneshot(request_from("203.0.113.1")).await.unwrap();
            assert_eq!(response.status(), 200);
        }

        let response = app.clone().oneshot(request_from("203.0.113.1")).await.unwrap();
        assert_eq!(response.status(), 429);
        assert!(response.headers().contains_key(CORRELATION_ID_HEADER));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["statusCode"], 429);
        assert_eq!(json["error"]["retryAfter"], 60);
        assert_eq!(json["path"], "/payment-service");
    }

    #[tokio::test]
    async fn rate_limit_is_per_client() {
        let app = limited_app(1);

        let first = app.clone().oneshot(request_from("203.0.113.1")).await.unwrap();
        let other = app.clone().oneshot(request_from("198.51.100.7")).await.unwrap();
        let again = app.clone().oneshot(request_from("203.0.113.1")).await.unwrap();

        assert_eq!(first.status(), 200);
        assert_eq!(other.status(), 200);
        assert_eq!(again.status(), 429);
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_evade_limit() {
        let app = limited_app(100);

        let mut admitted = 0;
        for i in 0..150u32 {
            let spoofed = format!("198.18.{}.{}", i / 256, i % 256);
            let response = app
                .clone()
                .oneshot(forwarded_request("10.0.0.9", &spoofed))
                .await
                .unwrap();
            if response.status() == 200 {
                admitted += 1;
            } else {
                assert_eq!(response.status(), 429);
            }
        }

        assert_eq!(admitted, 100);
    }

    #[tokio::test]
    async fn trusted_proxy_limits_forwarded_clients_separately() {
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let app = limited_app_trusting(1, TrustedProxies::new([proxy]));

        let first = app
            .clone()
            .oneshot(forwarded_request("10.0.0.1", "203.0.113.1"))
            .await
            .unwrap();
        let other = app
            .clone()
            .oneshot(forwarded_request("10.0.0.1", "198.51.100.7"))
            .await
            .unwrap();
        let again = app
            .clone()
            .oneshot(forwarded_request("10.0.0.1", "203.0.113.1"))
            .await
            .unwrap();

        assert_eq!(first.status(), 200);
        assert_eq!(other.status(), 200);
        assert_eq!(again.status(), 429);
    }
}
