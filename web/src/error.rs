//! Error rendering for HTTP boundaries.
//!
//! Handlers return [`AppError`] (a thin wrapper around [`TypedError`]; `?`
//! converts). The error travels to the [`ErrorResponderLayer`] in the
//! response extensions; the layer logs it with the request metadata and then
//! renders the uniform body:
//!
//! ```json
//! {
//!   "success": false,
//!   "error": {
//!     "name": "RateLimitExceeded",
//!     "message": "Too many requests, please try again later",
//!     "statusCode": 429,
//!     "retryAfter": 60
//!   },
//!   "timestamp": "2025-01-01T00:00:00Z",
//!   "path": "/payment-service"
//! }
//! ```
//!
//! In development mode the body also carries `stack` and `details`.
//!
//! # Example
//!
//! ```ignore
//! use event_relay_web::{AppError, ErrorResponder, catch_panic_layer};
//!
//! async fn handler(Json(body): Json<Value>) -> Result<Json<Value>, AppError> {
//!     let user_id = body["userId"].as_str()
//!         .ok_or_else(|| TypedError::invalid_field("userId is required", "userId"))?;
//!     Ok(Json(json!({ "userId": user_id })))
//! }
//!
//! let app = Router::new()
//!     .route("/payment-service", post(handler))
//!     .layer(catch_panic_layer())
//!     .layer(ErrorResponder::new(RuntimeMode::Production).layer());
//! ```

use crate::middleware::CorrelationIdExt;
use axum::{
    Json,
    extract::Request,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use event_relay_core::environment::{Clock, RuntimeMode, SystemClock};
use event_relay_core::error::TypedError;
use event_relay_core::logging::log_error;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tower_http::catch_panic::CatchPanicLayer;

/// Handler error type.
///
/// Wraps a [`TypedError`] so it can implement axum's `IntoResponse`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppError(pub TypedError);

impl AppError {
    /// The classified error.
    #[must_use]
    pub const fn typed(&self) -> &TypedError {
        &self.0
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.0.name(), self.0.message())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<TypedError> for AppError {
    fn from(err: TypedError) -> Self {
        Self(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self(TypedError::from(err))
    }
}

/// Marker stored in response extensions for the responder layer.
#[derive(Debug, Clone)]
struct PendingError(TypedError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Bare production rendering for routers without the responder layer.
        let body = ErrorResponse::new(&self.0, RuntimeMode::Production, Utc::now(), "");
        let mut response = body.into_response();
        response.extensions_mut().insert(PendingError(self.0));
        response
    }
}

/// Uniform error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,
    /// The error itself
    pub error: ErrorBody,
    /// When the response was rendered
    pub timestamp: DateTime<Utc>,
    /// Request path
    pub path: String,
}

/// The `error` object of an [`ErrorResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Kind name, e.g. `ValidationError`
    pub name: String,
    /// Human-readable message
    pub message: String,
    /// HTTP status code
    pub status_code: u16,
    /// Cause chain (development only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Context such as field, topic, key, query (development only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, Value>>,
    /// Seconds until retry is allowed (rate limit only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    /// Build the body for `err`.
    #[must_use]
    pub fn new(err: &TypedError, mode: RuntimeMode, timestamp: DateTime<Utc>, path: &str) -> Self {
        let development = !mode.is_production();
        let details = (development && !err.context().is_empty()).then(|| err.context().clone());

        Self {
            success: false,
            error: ErrorBody {
                name: err.name().to_string(),
                message: err.message().to_string(),
                status_code: err.status_code(),
                stack: development.then(|| err.stack()),
                details,
                retry_after: err.retry_after(),
            },
            timestamp,
            path: path.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.error.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.error.retry_after;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Renders [`TypedError`]s for one runtime mode.
#[derive(Clone)]
pub struct ErrorResponder {
    mode: RuntimeMode,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ErrorResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorResponder")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl ErrorResponder {
    /// Responder using the system clock.
    #[must_use]
    pub fn new(mode: RuntimeMode) -> Self {
        Self::with_clock(mode, Arc::new(SystemClock))
    }

    /// Responder with an injected clock.
    #[must_use]
    pub fn with_clock(mode: RuntimeMode, clock: Arc<dyn Clock>) -> Self {
        Self { mode, clock }
    }

    /// Mode this responder renders for.
    #[must_use]
    pub const fn mode(&self) -> RuntimeMode {
        self.mode
    }

    /// Build the body for `err` at `path`.
    #[must_use]
    pub fn body(&self, err: &TypedError, path: &str) -> ErrorResponse {
        ErrorResponse::new(err, self.mode, self.clock.now(), path)
    }

    /// Render `err` as an HTTP response.
    #[must_use]
    pub fn render(&self, err: &TypedError, path: &str) -> Response {
        self.body(err, path).into_response()
    }

    /// Layer that logs and renders every [`AppError`] returned below it.
    #[must_use]
    pub fn layer(self) -> ErrorResponderLayer {
        ErrorResponderLayer {
            responder: Arc::new(self),
        }
    }
}

/// Layer installing [`ErrorResponderMiddleware`].
#[derive(Clone, Debug)]
pub struct ErrorResponderLayer {
    responder: Arc<ErrorResponder>,
}

impl<S> Layer<S> for ErrorResponderLayer {
    type Service = ErrorResponderMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ErrorResponderMiddleware {
            inner,
            responder: Arc::clone(&self.responder),
        }
    }
}

/// Middleware service that turns pending errors into rendered responses.
#[derive(Clone, Debug)]
pub struct ErrorResponderMiddleware<S> {
    inner: S,
    responder: Arc<ErrorResponder>,
}

impl<S> Service<Request> for ErrorResponderMiddleware<S>
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

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let correlation_id = req.try_correlation_id();
        let responder = Arc::clone(&self.responder);
        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.await?;
            let Some(PendingError(err)) = response.extensions_mut().remove::<PendingError>()
            else {
                return Ok(response);
            };

            let span = tracing::error_span!(
                "http_error",
                method = %method,
                uri = %uri,
                path = uri.path(),
                correlation_id = %correlation_id.map(|id| id.to_string()).unwrap_or_default(),
            );
            span.in_scope(|| log_error("Request failed", &err));

            let mut rendered = responder.render(&err, uri.path());
            // Keep headers set by inner layers, e.g. the correlation id.
            for (name, value) in response.headers() {
                if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
                    rendered.headers_mut().entry(name).or_insert(value.clone());
                }
            }
            Ok(rendered)
        })
    }
}

/// Map a caught panic to an internal error.
fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    AppError(TypedError::internal("Internal server error").with_context("panic", detail))
        .into_response()
}

/// Panic handler signature used by [`catch_panic_layer`].
pub type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response;

/// Layer catching handler panics and rendering them as `Internal` errors.
///
/// Install it inside (before) the [`ErrorResponderLayer`].
#[must_use]
pub fn catch_panic_layer() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(panic_response as PanicHandler)
}
