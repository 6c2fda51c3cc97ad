//! Composition root shared by the service binaries.
//!
//! Each binary loads [`Config`], installs tracing and calls one of the `run_*`
//! functions here. They take the event bus, listener and shutdown signal as
//! arguments so tests can drive a whole service against the in-memory bus.

use crate::config::Config;
use crate::events::{groups, topics};
use crate::payment::{self, PaymentGateway, PaymentState};
use axum::Router;
use event_relay_core::error::TypedError;
use event_relay_core::event_bus::{EventBus, StartOffset, SubscribeOptions};
use event_relay_runtime::metrics::register_metrics;
use event_relay_runtime::{
    CircuitBreaker, EventHandler, EventRelay, SlidingWindowRateLimiter, Supervisor,
};
use event_relay_web::{ErrorResponder, HealthState, correlation_id_layer, health_routes};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

/// Static description of a relay service.
#[derive(Debug, Clone, Copy)]
pub struct RelaySpec {
    /// Relay and service name
    pub name: &'static str,
    /// Input topics
    pub topics: &'static [&'static str],
    /// Consumer group id
    pub group_id: &'static str,
    /// Where a new consumer group starts
    pub start: StartOffset,
}

impl RelaySpec {
    fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            group_id: self.group_id.to_string(),
            start: self.start,
        }
    }
}

/// `payment-successful` → order service.
pub const ORDER_RELAY: RelaySpec = RelaySpec {
    name: "order-service",
    topics: &[topics::PAYMENT_SUCCESSFUL],
    group_id: groups::ORDER_SERVICE,
    start: StartOffset::Earliest,
};

/// `order-successful` → email service.
pub const EMAIL_RELAY: RelaySpec = RelaySpec {
    name: "email-service",
    topics: &[topics::ORDER_SUCCESSFUL],
    group_id: groups::EMAIL_SERVICE,
    start: StartOffset::Earliest,
};

/// Every pipeline topic → analytic service.
pub const ANALYTIC_RELAY: RelaySpec = RelaySpec {
    name: "analytic-service",
    topics: &topics::ALL,
    group_id: groups::ANALYTIC_SERVICE,
    start: StartOffset::Earliest,
};

/// Bind the HTTP listener for `port` on all interfaces.
///
/// # Errors
///
/// Returns the bind error.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
}

/// Serve `router` until shutdown is broadcast.
///
/// # Errors
///
/// Returns an `Internal` error if the server fails.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), TypedError> {
    let address = listener.local_addr().ok();
    tracing::info!(address = ?address, "HTTP server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    })
    .await
    .map_err(|e| TypedError::internal("HTTP server failed").with_cause(&e))
}

fn health_router(health: HealthState, config: &Config) -> Router {
    health_routes(health)
        .layer(ErrorResponder::new(config.mode).layer())
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
}

fn warn_on_default_secrets(config: &Config) {
    if config.mode.is_production() && config.uses_default_secrets() {
        tracing::warn!("Default secrets in use; set JWT_SECRET and ENCRYPTION_KEY");
    }
}

/// Run a relay service until `signal` fires or a task fails.
///
/// # Errors
///
/// Returns an error if the relay cannot be built, the first supervised
/// failure (fatal subscribe error, server crash, panic), or the producer
/// flush error.
pub async fn run_relay_service<S>(
    config: &Config,
    spec: RelaySpec,
    listener: TcpListener,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    signal: S,
) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    register_metrics();
    warn_on_default_secrets(config);

    let mut supervisor = Supervisor::new(config.shutdown_grace());
    let breaker = CircuitBreaker::new(format!("{}-producer", spec.name), config.breaker_config());

    let relay = EventRelay::builder()
        .name(spec.name)
        .topics(spec.topics.iter().map(ToString::to_string).collect())
        .options(spec.subscribe_options())
        .event_bus(Arc::clone(&event_bus))
        .handler(handler)
        .breaker(breaker)
        .poison_policy(config.poison_policy())
        .shutdown(supervisor.shutdown_receiver())
        .build()?;

    let health = HealthState::new(spec.name).with_relay(relay.monitor());
    let http_shutdown = supervisor.shutdown_receiver();
    supervisor.spawn("http", serve(listener, health_router(health, config), http_shutdown));
    supervisor.spawn_relay(relay);

    tracing::info!(
        relay = spec.name,
        topics = ?spec.topics,
        group_id = spec.group_id,
        "Service started"
    );
    supervisor.run(signal).await?;
    event_bus.close().await?;
    Ok(())
}

/// Run the payment service until `signal` fires or a task fails.
///
/// # Errors
///
/// Returns the first supervised failure, or the producer flush error.
pub async fn run_payment_service<S>(
    config: &Config,
    listener: TcpListener,
    event_bus: Arc<dyn EventBus>,
    gateway: Arc<dyn PaymentGateway>,
    signal: S,
) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    register_metrics();
    warn_on_default_secrets(config);

    let mut supervisor = Supervisor::new(config.shutdown_grace());
    let breaker = CircuitBreaker::new("payment-service-producer", config.breaker_config());
    let limiter = Arc::new(SlidingWindowRateLimiter::new(config.rate_limiter_config()));

    let health = HealthState::new("payment-service").with_breaker(breaker.clone());
    let state = PaymentState {
        event_bus: Arc::clone(&event_bus),
        breaker,
        gateway,
    };
    let router = payment::router(state, Arc::clone(&limiter), health, config);

    let http_shutdown = supervisor.shutdown_receiver();
    supervisor.spawn("http", serve(listener, router, http_shutdown));

    let mut purge_shutdown = supervisor.shutdown_receiver();
    // `interval` rejects a zero period.
    let window = limiter.config().window.max(Duration::from_secs(1));
    supervisor.spawn("rate-limit-purge", async move {
        let mut interval = tokio::time::interval(window);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = limiter.purge_idle(Instant::now());
                    tracing::debug!(removed, "Purged idle rate limit windows");
                }
                _ = purge_shutdown.recv() => return Ok::<(), TypedError>(()),
            }
        }
    });

    tracing::info!("Service started");
    supervisor.run(signal).await?;
    event_bus.close().await?;
    Ok(())
}
