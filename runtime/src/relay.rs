//! Event relay: consume, transform, republish.
//!
//! An [`EventRelay`] subscribes a consumer group to its input topics and, for
//! each received message, runs an [`EventHandler`] and publishes the derived
//! events through a [`CircuitBreaker`] bound to the broker connection.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe (retry up to max_connect_attempts, then fail the relay)
//!     loop {
//!         shutdown?  -> stop
//!         next message:
//!             handle -> Validation error  -> poison policy, commit
//!                    -> other error       -> redeliver
//!                    -> events            -> publish each through breaker
//!                                              all ok  -> commit
//!                                              any err -> redeliver
//!     }
//!     stream ended -> wait retry_delay, resubscribe
//! }
//! ```
//!
//! The event bus is shared with other users and is never closed here.
//!
//! A message is committed only after its derived events are published, so a
//! crash or a breaker rejection leads to redelivery rather than loss. The price
//! is at-least-once delivery: a partially published batch is published again.
//!
//! Shutdown is observed between messages only; the in-flight message always
//! runs to completion.
//!
//! # Example
//!
//! ```rust,ignore
//! let relay = EventRelay::builder()
//!     .name("email-service")
//!     .topics(vec!["order-successful".to_string()])
//!     .options(SubscribeOptions::earliest("email-service"))
//!     .event_bus(bus)
//!     .handler(Arc::new(EmailHandler::new(sender)))
//!     .breaker(breaker)
//!     .shutdown(shutdown_rx)
//!     .build()?;
//!
//! let monitor = relay.monitor();
//! let handle = relay.spawn();
//! ```

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::handler::EventHandler;
use crate::health::HealthCheck;
use crate::metrics::{RelayMetrics, RelayOutcome};
use event_relay_core::error::{ErrorKind, TypedError};
use event_relay_core::event::{EventEnvelope, OutboundEvent};
use event_relay_core::event_bus::{
    Delivery, DeliveryStream, EventBus, EventBusError, PublishReceipt, SubscribeOptions,
};
use event_relay_core::logging::{log_broker_event, log_error};
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Header names attached to dead-lettered messages.
pub mod dead_letter_headers {
    /// Name of the error kind that made the message unprocessable
    pub const ERROR_KIND: &str = "x-error-kind";
    /// Error message
    pub const ERROR_MESSAGE: &str = "x-error-message";
    /// Topic the message was read from
    pub const SOURCE_TOPIC: &str = "x-source-topic";
    /// Partition the message was read from
    pub const SOURCE_PARTITION: &str = "x-source-partition";
    /// Offset the message was read from
    pub const SOURCE_OFFSET: &str = "x-source-offset";
    /// Relay that rejected the message
    pub const RELAY: &str = "x-relay";
}

/// Lifecycle state of a relay's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayState {
    /// Not connected (before start and after shutdown)
    Disconnected,
    /// Subscribing to the input topics
    Connecting,
    /// Subscription established, no message fetched yet
    Subscribed,
    /// Waiting for the next message
    Consuming,
    /// Handling one message
    Processing,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Subscribed => "SUBSCRIBED",
            Self::Consuming => "CONSUMING",
            Self::Processing => "PROCESSING",
        })
    }
}

/// What to do with a message whose payload the handler rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoisonPolicy {
    /// Publish the raw message with error headers to `topic`, then commit.
    /// If the dead-letter publish fails the message is redelivered.
    DeadLetter {
        /// Dead-letter topic
        topic: String,
    },
    /// Log and commit. Nothing else keeps a record of the message.
    LogAndSkip,
}

impl Default for PoisonPolicy {
    fn default() -> Self {
        Self::DeadLetter {
            topic: "dead-letter".to_string(),
        }
    }
}

/// Errors that stop a relay.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Could not subscribe within the allowed attempts
    #[error("Relay '{relay}' failed to subscribe after {attempts} attempts: {source}")]
    SubscribeExhausted {
        /// Relay name
        relay: String,
        /// Attempts made
        attempts: u32,
        /// Last subscribe failure
        #[source]
        source: EventBusError,
    },

    /// Builder is missing a required field
    #[error("Relay builder is missing required field '{0}'")]
    MissingField(&'static str),
}

impl From<RelayError> for TypedError {
    fn from(err: RelayError) -> Self {
        match &err {
            RelayError::SubscribeExhausted { source, relay, .. } => {
                Self::from(source.clone()).with_context("relay", relay.clone())
            }
            RelayError::MissingField(_) => Self::internal(err.to_string()),
        }
    }
}

/// Message counters for one relay.
#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    committed: AtomicU64,
    published: AtomicU64,
    dead_lettered: AtomicU64,
    skipped: AtomicU64,
    redelivered: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatsSnapshot {
    /// Messages received
    pub received: u64,
    /// Messages processed and committed
    pub committed: u64,
    /// Derived events published
    pub published: u64,
    /// Poison messages sent to the dead-letter topic
    pub dead_lettered: u64,
    /// Poison messages committed without a dead-letter record
    pub skipped: u64,
    /// Messages handed back for redelivery
    pub redelivered: u64,
}

impl RelayStats {
    /// Copy the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: RelayOutcome) {
        let counter = match outcome {
            RelayOutcome::Committed => &self.committed,
            RelayOutcome::Redelivered => &self.redelivered,
            RelayOutcome::DeadLettered => &self.dead_lettered,
            RelayOutcome::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Read-only view of a running relay, for health endpoints.
#[derive(Debug, Clone)]
pub struct RelayMonitor {
    name: String,
    state: watch::Receiver<RelayState>,
    stats: Arc<RelayStats>,
    breaker: CircuitBreaker,
}

impl RelayMonitor {
    /// Relay name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current subscription state.
    #[must_use]
    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state.clone()
    }

    /// Message counters.
    #[must_use]
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Breaker guarding this relay's publishes.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Health of the subscription.
    #[must_use]
    pub fn health_check(&self) -> HealthCheck {
        let component = format!("relay:{}", self.name);
        let state = self.state();
        let check = match state {
            RelayState::Subscribed | RelayState::Consuming | RelayState::Processing => {
                HealthCheck::healthy(component)
            }
            RelayState::Connecting => HealthCheck::degraded(component, "subscribing to topics"),
            RelayState::Disconnected => HealthCheck::unhealthy(component, "not subscribed"),
        };
        let stats = self.stats();
        check
            .with_metadata("state", state.to_string())
            .with_metadata("received", stats.received.to_string())
            .with_metadata("deadLettered", stats.dead_lettered.to_string())
    }
}

/// How one subscription ended.
enum StreamEnd {
    Shutdown,
    Ended,
}

/// Consumer/producer loop for one consumer group.
///
/// Built via [`EventRelay::builder`], then either awaited with
/// [`run`](Self::run) or moved into a task with [`spawn`](Self::spawn).
pub struct EventRelay {
    name: String,
    topics: Vec<String>,
    options: SubscribeOptions,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    breaker: CircuitBreaker,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
    max_connect_attempts: u32,
    poison_policy: PoisonPolicy,
    state: watch::Sender<RelayState>,
    stats: Arc<RelayStats>,
}

impl EventRelay {
    /// Create a builder for configuring a relay.
    #[must_use]
    pub fn builder() -> EventRelayBuilder {
        EventRelayBuilder::default()
    }

    /// Relay name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observer handle; stays valid after the relay is spawned.
    #[must_use]
    pub fn monitor(&self) -> RelayMonitor {
        RelayMonitor {
            name: self.name.clone(),
            state: self.state.subscribe(),
            stats: Arc::clone(&self.stats),
            breaker: self.breaker.clone(),
        }
    }

    /// Spawn the relay as a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<(), RelayError>> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown or a fatal subscribe failure.
    ///
    /// The bus is shared and stays open; its owner closes it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SubscribeExhausted`] when the consumer group could
    /// not be subscribed within `max_connect_attempts`.
    pub async fn run(mut self) -> Result<(), RelayError> {
        info!(
            relay = %self.name,
            topics = ?self.topics,
            group_id = %self.options.group_id,
            start = self.options.start.as_str(),
            "Event relay started"
        );

        let result = self.consume().await;

        self.set_state(RelayState::Disconnected);

        match &result {
            Ok(()) => info!(relay = %self.name, "Event relay stopped"),
            Err(e) => log_error("Event relay stopped", &TypedError::from(e.clone())),
        }
        result
    }

    async fn consume(&mut self) -> Result<(), RelayError> {
        let topics = self.topics.clone();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        let mut attempts = 0u32;

        loop {
            self.set_state(RelayState::Connecting);
            attempts += 1;

            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(relay = %self.name, "Event relay received shutdown signal");
                    return Ok(());
                }
                result = self.event_bus.subscribe(&topic_refs, &self.options) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    attempts = 0;
                    self.set_state(RelayState::Subscribed);
                    for topic in &topics {
                        log_broker_event("subscribed", topic, None);
                    }

                    match self.process_stream(&mut stream).await {
                        StreamEnd::Shutdown => return Ok(()),
                        StreamEnd::Ended => {
                            warn!(
                                relay = %self.name,
                                "Event stream ended, resubscribing in {:?}",
                                self.retry_delay
                            );
                        }
                    }
                }
                Err(e) => {
                    log_error(
                        "Failed to subscribe to broker",
                        &TypedError::from(e.clone()).with_context("attempt", attempts),
                    );
                    if attempts >= self.max_connect_attempts {
                        return Err(RelayError::SubscribeExhausted {
                            relay: self.name.clone(),
                            attempts,
                            source: e,
                        });
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.recv() => return Ok(()),
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> StreamEnd {
        loop {
            self.set_state(RelayState::Consuming);

            let next = tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    info!(relay = %self.name, "Event relay received shutdown signal during processing");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.set_state(RelayState::Processing);
                    self.process(delivery).await;
                }
                Some(Err(e)) => {
                    log_error("Error receiving message from broker", &TypedError::from(e));
                }
                None => return StreamEnd::Ended,
            }
        }
    }

    /// Handle one delivery and resolve it.
    async fn process(&self, delivery: Delivery) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        RelayMetrics::record_received(&self.name);

        let outcome = {
            let envelope = delivery.envelope();
            debug!(
                relay = %self.name,
                topic = %envelope.topic,
                partition = envelope.partition,
                offset = envelope.offset,
                key = envelope.key.as_deref(),
                "Processing message"
            );

            match self.handler.handle(envelope).await {
                Ok(events) => self.publish_all(envelope, &events).await,
                Err(err) if err.kind() == ErrorKind::Validation => {
                    log_error("Failed to decode message", &err);
                    self.apply_poison_policy(envelope, &err).await
                }
                Err(err) => {
                    log_error(
                        "Failed to process message",
                        &err.with_topic(envelope.topic.clone())
                            .with_optional_key(envelope.key.as_deref()),
                    );
                    RelayOutcome::Redelivered
                }
            }
        };

        self.stats.record(outcome);
        RelayMetrics::record_outcome(&self.name, outcome);
        match outcome {
            RelayOutcome::Redelivered => delivery.redeliver(),
            RelayOutcome::Committed | RelayOutcome::DeadLettered | RelayOutcome::Skipped => {
                delivery.commit();
            }
        }
    }

    async fn publish_all(&self, source: &EventEnvelope, events: &[OutboundEvent]) -> RelayOutcome {
        for event in events {
            match self.publish(event).await {
                Ok(receipt) => {
                    self.stats.published.fetch_add(1, Ordering::Relaxed);
                    RelayMetrics::record_published(&self.name, &event.topic);
                    debug!(
                        relay = %self.name,
                        topic = %event.topic,
                        partition = receipt.partition,
                        offset = receipt.offset,
                        "Published derived event"
                    );
                }
                Err(err) => {
                    log_error(
                        "Failed to publish derived event",
                        &err.with_context("source_topic", source.topic.clone())
                            .with_context("source_offset", source.offset),
                    );
                    return RelayOutcome::Redelivered;
                }
            }
        }
        RelayOutcome::Committed
    }

    async fn apply_poison_policy(&self, envelope: &EventEnvelope, err: &TypedError) -> RelayOutcome {
        match &self.poison_policy {
            PoisonPolicy::DeadLetter { topic } => {
                let dead = OutboundEvent::new(
                    topic.clone(),
                    envelope.key.clone(),
                    envelope.payload.clone(),
                )
                .with_header(dead_letter_headers::ERROR_KIND, err.name())
                .with_header(dead_letter_headers::ERROR_MESSAGE, err.message())
                .with_header(dead_letter_headers::SOURCE_TOPIC, envelope.topic.clone())
                .with_header(
                    dead_letter_headers::SOURCE_PARTITION,
                    envelope.partition.to_string(),
                )
                .with_header(dead_letter_headers::SOURCE_OFFSET, envelope.offset.to_string())
                .with_header(dead_letter_headers::RELAY, self.name.clone());

                match self.publish(&dead).await {
                    Ok(_) => {
                        warn!(
                            relay = %self.name,
                            topic = %envelope.topic,
                            offset = envelope.offset,
                            dead_letter_topic = %topic,
                            "Poison message dead-lettered"
                        );
                        RelayOutcome::DeadLettered
                    }
                    Err(publish_err) => {
                        log_error("Failed to dead-letter poison message", &publish_err);
                        RelayOutcome::Redelivered
                    }
                }
            }
            PoisonPolicy::LogAndSkip => {
                warn!(
                    relay = %self.name,
                    topic = %envelope.topic,
                    partition = envelope.partition,
                    offset = envelope.offset,
                    payload = %envelope.payload_text(),
                    "Dropping poison message"
                );
                RelayOutcome::Skipped
            }
        }
    }

    /// Publish one event through the breaker.
    async fn publish(&self, event: &OutboundEvent) -> Result<PublishReceipt, TypedError> {
        let result = self
            .breaker
            .execute(|| self.event_bus.publish(event))
            .await
            .map_err(|e| {
                TypedError::from(e)
                    .with_topic(event.topic.clone())
                    .with_optional_key(event.key.as_deref())
            });
        if result.is_ok() {
            log_broker_event("published", &event.topic, event.key.as_deref());
        }
        result
    }

    fn set_state(&self, state: RelayState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(relay = %self.name, from = %current, to = %state, "Relay state changed");
                *current = state;
                true
            }
        });
    }
}

/// Builder for configuring an [`EventRelay`].
#[derive(Default)]
pub struct EventRelayBuilder {
    name: Option<String>,
    topics: Option<Vec<String>>,
    options: Option<SubscribeOptions>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn EventHandler>>,
    breaker: Option<CircuitBreaker>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry_delay: Option<Duration>,
    max_connect_attempts: Option<u32>,
    poison_policy: Option<PoisonPolicy>,
}

impl EventRelayBuilder {
    /// Set relay name (used in logs, metrics and dead-letter headers).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set consumer group and start offset.
    #[must_use]
    pub fn options(mut self, options: SubscribeOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set event handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set the breaker guarding publishes (default: a fresh breaker named
    /// after the relay with default thresholds).
    #[must_use]
    pub fn breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set delay between subscribe attempts (default: 5 seconds).
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set consecutive subscribe failures tolerated before the relay fails
    /// (default: 5, minimum 1).
    #[must_use]
    pub const fn max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = Some(attempts);
        self
    }

    /// Set the poison-message policy (default: dead letter to `dead-letter`).
    #[must_use]
    pub fn poison_policy(mut self, policy: PoisonPolicy) -> Self {
        self.poison_policy = Some(policy);
        self
    }

    /// Build the relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MissingField`] if name, topics, options, event
    /// bus, handler or shutdown receiver is not set.
    pub fn build(self) -> Result<EventRelay, RelayError> {
        let name = self.name.ok_or(RelayError::MissingField("name"))?;
        let breaker = self.breaker.unwrap_or_else(|| {
            CircuitBreaker::new(format!("{name}-producer"), CircuitBreakerConfig::default())
        });
        let (state, _) = watch::channel(RelayState::Disconnected);

        Ok(EventRelay {
            topics: self.topics.ok_or(RelayError::MissingField("topics"))?,
            options: self.options.ok_or(RelayError::MissingField("options"))?,
            event_bus: self.event_bus.ok_or(RelayError::MissingField("event_bus"))?,
            handler: self.handler.ok_or(RelayError::MissingField("handler"))?,
            shutdown: self.shutdown.ok_or(RelayError::MissingField("shutdown"))?,
            retry_delay: self.retry_delay.unwrap_or_else(|| Duration::from_secs(5)),
            max_connect_attempts: self.max_connect_attempts.unwrap_or(5).max(1),
            poison_policy: self.poison_policy.unwrap_or_default(),
            breaker,
            state,
            stats: Arc::new(RelayStats::default()),
            name,
        })
    }
}
