//! Typed error taxonomy.
//!
//! Every fault detected anywhere in a service is classified into one of a fixed
//! set of [`ErrorKind`]s at the point of detection. The resulting
//! [`TypedError`] carries a fixed field set (message, status code, context,
//! cause chain) instead of ad hoc fields, and is what boundary responders
//! render.
//!
//! | Kind          | Status | Used for                                   |
//! |---------------|--------|--------------------------------------------|
//! | `Validation`  | 400    | malformed input or payload                 |
//! | `NotFound`    | 404    | missing resource                           |
//! | `Broker`      | 500    | publish / connect / subscribe failure      |
//! | `Persistence` | 500    | storage failure (reserved)                 |
//! | `RateLimit`   | 429    | admission rejected by the rate limiter     |
//! | `Internal`    | 500    | anything uncategorized                     |
//!
//! # Example
//!
//! ```
//! use event_relay_core::error::{ErrorKind, TypedError};
//!
//! let err = TypedError::broker("Kafka broker not available")
//!     .with_topic("email-successful")
//!     .with_key("user-1");
//!
//! assert_eq!(err.kind(), ErrorKind::Broker);
//! assert_eq!(err.status_code(), 500);
//! assert_eq!(err.context()["topic"], "email-successful");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Discriminator for [`TypedError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input or payload
    Validation,
    /// Requested resource does not exist
    NotFound,
    /// Message broker failure (publish, connect, subscribe, breaker open)
    Broker,
    /// Storage failure (reserved for services that persist state)
    Persistence,
    /// Request rejected by the rate limiter
    RateLimit,
    /// Uncategorized fault
    Internal,
}

impl ErrorKind {
    /// Default HTTP status code for this kind.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::RateLimit => 429,
            Self::Broker | Self::Persistence | Self::Internal => 500,
        }
    }

    /// Name rendered in error responses.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::NotFound => "NotFoundError",
            Self::Broker => "BrokerError",
            Self::Persistence => "PersistenceError",
            Self::RateLimit => "RateLimitExceeded",
            Self::Internal => "InternalServerError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A classified failure.
///
/// Built once with the constructor for its kind plus `with_*` methods, then
/// passed around by value or reference. Nothing mutates it after it leaves the
/// point of detection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct TypedError {
    kind: ErrorKind,
    message: String,
    status_code: u16,
    context: BTreeMap<String, Value>,
    retry_after: Option<u64>,
    causes: Vec<String>,
}

impl TypedError {
    /// Create an error of the given kind with its default status code.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: kind.status_code(),
            context: BTreeMap::new(),
            retry_after: None,
            causes: Vec::new(),
        }
    }

    /// 400: malformed input or payload.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// 400: malformed input attributed to a specific field.
    #[must_use]
    pub fn invalid_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::validation(message).with_field(field)
    }

    /// 404: `"{resource} not found"`.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{resource} not found"))
    }

    /// 500: broker failure.
    #[must_use]
    pub fn broker(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Broker, message)
    }

    /// 500: persistence failure.
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence, message)
    }

    /// 429: rate limit exceeded, retry after the given number of seconds.
    #[must_use]
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        let mut err = Self::new(
            ErrorKind::RateLimit,
            "Too many requests, please try again later",
        );
        err.retry_after = Some(retry_after_secs);
        err
    }

    /// 500: uncategorized fault.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Wrap an unrecognized error as `Internal`, keeping its source chain.
    #[must_use]
    pub fn from_unknown(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::internal(err.to_string()).with_source_chain(err.source())
    }

    /// Attach a context value (rendered under `details` in development).
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach the offending input field.
    #[must_use]
    pub fn with_field(self, field: impl Into<String>) -> Self {
        self.with_context("field", field.into())
    }

    /// Attach the broker topic involved.
    #[must_use]
    pub fn with_topic(self, topic: impl Into<String>) -> Self {
        self.with_context("topic", topic.into())
    }

    /// Attach the message key involved.
    #[must_use]
    pub fn with_key(self, key: impl Into<String>) -> Self {
        self.with_context("key", key.into())
    }

    /// Attach the message key if there is one.
    #[must_use]
    pub fn with_optional_key(self, key: Option<&str>) -> Self {
        match key {
            Some(key) => self.with_key(key),
            None => self,
        }
    }

    /// Attach the failing query.
    #[must_use]
    pub fn with_query(self, query: impl Into<String>) -> Self {
        self.with_context("query", query.into())
    }

    /// Override the status code.
    #[must_use]
    pub const fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Record an underlying error and its whole source chain.
    #[must_use]
    pub fn with_cause(mut self, cause: &(dyn std::error::Error + 'static)) -> Self {
        self.causes.push(cause.to_string());
        self.with_source_chain(cause.source())
    }

    fn with_source_chain(mut self, mut source: Option<&(dyn std::error::Error + 'static)>) -> Self {
        while let Some(err) = source {
            self.causes.push(err.to_string());
            source = err.source();
        }
        self
    }

    /// Error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Rendered name of the kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Context values attached at the point of detection.
    #[must_use]
    pub const fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    /// Seconds to wait before retrying (rate-limit rejections only).
    #[must_use]
    pub const fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }

    /// Messages of the underlying errors, outermost first.
    #[must_use]
    pub fn causes(&self) -> &[String] {
        &self.causes
    }

    /// Diagnostic stack: the error line followed by its cause chain.
    #[must_use]
    pub fn stack(&self) -> String {
        let mut stack = format!("{}: {}", self.name(), self.message);
        for cause in &self.causes {
            stack.push_str("\n    caused by: ");
            stack.push_str(cause);
        }
        stack
    }

    /// Whether this is a server-side (5xx) failure.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        self.status_code >= 500
    }
}

impl From<serde_json::Error> for TypedError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("Invalid JSON: {err}"))
    }
}
