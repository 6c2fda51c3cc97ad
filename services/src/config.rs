//! Configuration management for the pipeline services.
//!
//! Loads configuration from environment variables (optionally seeded from a
//! `.env` file) with sensible defaults. `KAFKA_BROKERS` is required in
//! production.

use event_relay_core::environment::RuntimeMode;
use event_relay_core::event_bus::EventBusError;
use event_relay_kafka::KafkaEventBus;
use event_relay_runtime::{CircuitBreakerConfig, PoisonPolicy, RateLimiterConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required variables are unset
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    /// A variable holds a value that cannot be parsed
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Raw value
        value: String,
        /// Parse failure
        reason: String,
    },
}

/// A value that must never be printed.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// The secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

impl Serialize for Secret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[redacted]")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Deployment mode (`APP_ENV`, falling back to `NODE_ENV`)
    pub mode: RuntimeMode,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// HTTP ports per service
    pub ports: PortsConfig,
    /// Origins allowed by CORS on the payment endpoint
    pub allowed_origins: Vec<String>,
    /// Proxies whose `X-Forwarded-For` names the rate-limited client
    pub trusted_proxies: Vec<IpAddr>,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Secrets and external API keys
    pub security: SecurityConfig,
    /// Per-client rate limit at HTTP boundaries
    pub rate_limit: RateLimitSettings,
    /// Circuit breaker guarding publishes
    pub circuit_breaker: CircuitBreakerSettings,
    /// Relay behavior
    pub relay: RelaySettings,
}

/// Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Broker addresses
    pub brokers: Vec<String>,
    /// Client id reported to the brokers
    pub client_id: String,
}

/// HTTP ports per service
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortsConfig {
    /// Payment service (HTTP entry point)
    pub payment: u16,
    /// Order service
    pub order: u16,
    /// Email service
    pub email: u16,
    /// Analytic service
    pub analytic: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
    /// `service` field attached to every record
    pub service_name: String,
}

/// Secrets and external API keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Token signing secret
    pub jwt_secret: Secret,
    /// Payload encryption key
    pub encryption_key: Secret,
    /// Email provider API key
    pub email_api_key: Option<Secret>,
    /// Payment gateway API key
    pub payment_gateway_api_key: Option<Secret>,
}

/// Rate limit settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Requests per client per window
    pub max_requests: usize,
    /// Window length in milliseconds
    pub window_ms: u64,
}

/// Circuit breaker settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Failures before the circuit opens
    pub failure_threshold: usize,
    /// Milliseconds before an open circuit admits a probe
    pub reset_timeout_ms: u64,
}

/// Relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Dead-letter topic for undecodable messages; `none` logs and skips
    pub dead_letter_topic: Option<String>,
    /// Shutdown grace period in seconds
    pub shutdown_grace_secs: u64,
}

const DEFAULT_JWT_SECRET: &str = "default-secret-change-in-production";
const DEFAULT_ENCRYPTION_KEY: &str = "default-encryption-key-32-chars";

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Reads `.env` first if present; real environment variables win.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing in production
    /// or a value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Anything other than production runs as development.
        let mode = var("APP_ENV")
            .or_else(|| var("NODE_ENV"))
            .and_then(|v| v.parse::<RuntimeMode>().ok())
            .unwrap_or_default();

        if mode.is_production() && var("KAFKA_BROKERS").is_none() {
            return Err(ConfigError::MissingVariables(vec!["KAFKA_BROKERS".to_string()]));
        }

        let brokers = list(var("KAFKA_BROKERS"), "localhost:9092");
        let dead_letter_topic = match var("DEAD_LETTER_TOPIC") {
            Some(topic) if topic.eq_ignore_ascii_case("none") => None,
            Some(topic) => Some(topic),
            None => Some("dead-letter".to_string()),
        };

        let config = Self {
            mode,
            kafka: KafkaConfig {
                brokers,
                client_id: var("KAFKA_CLIENT_ID").unwrap_or_else(|| "microservice".to_string()),
            },
            ports: PortsConfig {
                payment: parse(&var, "PAYMENT_SERVICE_PORT", 8000)?,
                order: parse(&var, "ORDER_SERVICE_PORT", 8001)?,
                email: parse(&var, "EMAIL_SERVICE_PORT", 8002)?,
                analytic: parse(&var, "ANALYTIC_SERVICE_PORT", 8003)?,
            },
            allowed_origins: list(var("ALLOWED_ORIGINS"), "http://localhost:3000"),
            trusted_proxies: ip_list(var("TRUSTED_PROXIES"), "TRUSTED_PROXIES")?,
            logging: LoggingConfig {
                level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                service_name: var("SERVICE_NAME").unwrap_or_else(|| "microservice".to_string()),
            },
            security: SecurityConfig {
                jwt_secret: var("JWT_SECRET")
                    .unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string())
                    .into(),
                encryption_key: var("ENCRYPTION_KEY")
                    .unwrap_or_else(|| DEFAULT_ENCRYPTION_KEY.to_string())
                    .into(),
                email_api_key: var("EMAIL_SERVICE_API_KEY").map(Secret::from),
                payment_gateway_api_key: var("PAYMENT_GATEWAY_API_KEY").map(Secret::from),
            },
            rate_limit: RateLimitSettings {
                max_requests: parse(&var, "RATE_LIMIT_MAX_REQUESTS", 100)?,
                window_ms: parse(&var, "RATE_LIMIT_WINDOW_MS", 60_000)?,
            },
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: parse(&var, "CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
                reset_timeout_ms: parse(&var, "CIRCUIT_BREAKER_RESET_TIMEOUT_MS", 60_000)?,
            },
            relay: RelaySettings {
                dead_letter_topic,
                shutdown_grace_secs: parse(&var, "SHUTDOWN_GRACE_SECS", 10)?,
            },
        };

        Ok(config)
    }

    /// Configuration for a named service: sets the log `service` field and
    /// the Kafka client id unless they were configured explicitly.
    #[must_use]
    pub fn for_service(mut self, service: &str) -> Self {
        if self.logging.service_name == "microservice" {
            self.logging.service_name = service.to_string();
        }
        if self.kafka.client_id == "microservice" {
            self.kafka.client_id = service.to_string();
        }
        self
    }

    /// Whether built-in secret defaults are still in use.
    #[must_use]
    pub fn uses_default_secrets(&self) -> bool {
        self.security.jwt_secret.expose() == DEFAULT_JWT_SECRET
            || self.security.encryption_key.expose() == DEFAULT_ENCRYPTION_KEY
    }

    /// Circuit breaker configuration.
    #[must_use]
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .failure_threshold(self.circuit_breaker.failure_threshold)
            .reset_timeout(Duration::from_millis(self.circuit_breaker.reset_timeout_ms))
            .build()
    }

    /// Rate limiter configuration.
    #[must_use]
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            max_requests: self.rate_limit.max_requests,
            window: Duration::from_millis(self.rate_limit.window_ms),
        }
    }

    /// Policy for undecodable messages.
    #[must_use]
    pub fn poison_policy(&self) -> PoisonPolicy {
        self.relay
            .dead_letter_topic
            .clone()
            .map_or(PoisonPolicy::LogAndSkip, |topic| PoisonPolicy::DeadLetter { topic })
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.relay.shutdown_grace_secs)
    }

    /// Kafka event bus for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn kafka_bus(&self) -> Result<KafkaEventBus, EventBusError> {
        KafkaEventBus::builder()
            .brokers(&self.kafka.brokers)
            .client_id(&self.kafka.client_id)
            .build()
    }
}

fn list(value: Option<String>, default: &str) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or(default)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn ip_list(value: Option<String>, key: &str) -> Result<Vec<IpAddr>, ConfigError> {
    list(value, "")
        .into_iter()
        .map(|raw| {
            raw.parse::<IpAddr>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn parse<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_in_development() {
        let config = load(&[]).unwrap();

        assert_eq!(config.mode, RuntimeMode::Development);
        assert_eq!(config.kafka.brokers, vec!["localhost:9092"]);
        assert_eq!(config.kafka.client_id, "microservice");
        assert_eq!(config.ports.payment, 8000);
        assert_eq!(config.ports.analytic, 8003);
        assert_eq!(config.allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.circuit_breaker.reset_timeout_ms, 60_000);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
        assert!(config.uses_default_secrets());
        assert_eq!(
            config.poison_policy(),
            PoisonPolicy::DeadLetter {
                topic: "dead-letter".to_string()
            }
        );
    }

    #[test]
    fn production_requires_kafka_brokers() {
        let err = load(&[("NODE_ENV", "production")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required environment variables: KAFKA_BROKERS"
        );
    }

    #[test]
    fn production_with_brokers_loads() {
        let config = load(&[
            ("NODE_ENV", "production"),
            ("KAFKA_BROKERS", "kafka-1:19092, kafka-2:19093,,kafka-3:19094"),
        ])
        .unwrap();

        assert!(config.mode.is_production());
        assert_eq!(
            config.kafka.brokers,
            vec!["kafka-1:19092", "kafka-2:19093", "kafka-3:19094"]
        );
    }

    #[test]
    fn app_env_takes_precedence() {
        let config = load(&[("APP_ENV", "development"), ("NODE_ENV", "production")]).unwrap();
        assert_eq!(config.mode, RuntimeMode::Development);
    }

    #[test]
    fn unknown_mode_runs_as_development() {
        let config = load(&[("NODE_ENV", "staging")]).unwrap();
        assert_eq!(config.mode, RuntimeMode::Development);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = load(&[("PAYMENT_SERVICE_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PAYMENT_SERVICE_PORT"));
    }

    #[test]
    fn trusted_proxies_default_to_none() {
        assert!(load(&[]).unwrap().trusted_proxies.is_empty());

        let config = load(&[("TRUSTED_PROXIES", "10.0.0.1, ::1")]).unwrap();
        assert_eq!(
            config.trusted_proxies,
            vec!["10.0.0.1".parse::<IpAddr>().unwrap(), "::1".parse().unwrap()]
        );

        let err = load(&[("TRUSTED_PROXIES", "proxy.local")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TRUSTED_PROXIES"));
    }

    #[test]
    fn dead_letter_can_be_disabled() {
        let config = load(&[("DEAD_LETTER_TOPIC", "none")]).unwrap();
        assert_eq!(config.poison_policy(), PoisonPolicy::LogAndSkip);
    }

    #[test]
    fn service_name_fills_defaults_only() {
        let config = load(&[("KAFKA_CLIENT_ID", "shared-client")])
            .unwrap()
            .for_service("email-service");

        assert_eq!(config.logging.service_name, "email-service");
        assert_eq!(config.kafka.client_id, "shared-client");
    }

    #[test]
    fn secrets_are_redacted() {
        let config = load(&[("JWT_SECRET", "s3cr3t")]).unwrap();

        assert!(!format!("{config:?}").contains("s3cr3t"));
        assert!(!serde_json::to_string(&config).unwrap().contains("s3cr3t"));
        assert_eq!(config.security.jwt_secret.expose(), "s3cr3t");
    }
}
