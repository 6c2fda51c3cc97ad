//! Kafka event bus for event relay services.
//!
//! This crate provides [`KafkaEventBus`], an implementation of the [`EventBus`]
//! trait from `event-relay-core` on top of rdkafka. It works with any
//! Kafka-protocol broker (Apache Kafka, Redpanda, MSK, ...).
//!
//! # Architecture
//!
//! ```text
//!   relay ──publish──▶ FutureProducer ──▶ topic
//!
//!   topic ──▶ StreamConsumer ──▶ forwarding task ──Delivery──▶ relay
//!                  ▲                   │
//!                  └── commit / seek ◀─┘ (acknowledgement)
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - the forwarding task hands out one delivery at a time and waits for its
//!   acknowledgement, so messages within a partition are processed in order
//! - `commit` commits the message offset
//! - `redeliver` waits `redelivery_delay` and seeks the partition back to the
//!   message, so the broker delivers it again
//! - an abandoned delivery (dropped on shutdown) is never committed; the group
//!   resumes from the last committed offset
//!
//! # Error normalization
//!
//! Broker failures are reduced to stable messages before they leave this
//! crate: unreachable brokers become `"Kafka broker not available"`,
//! connection failures become `"Failed to connect to Kafka"`, anything else
//! keeps the client's message.
//!
//! # Example
//!
//! ```no_run
//! use event_relay_kafka::KafkaEventBus;
//! use event_relay_core::event::OutboundEvent;
//! use event_relay_core::event_bus::{EventBus, SubscribeOptions};
//! use futures::{Stream, StreamExt};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = KafkaEventBus::builder()
//!     .brokers(["localhost:9092"])
//!     .client_id("email-service")
//!     .build()?;
//!
//! let event = OutboundEvent::new("email-successful", None, br#"{"userId":"u1"}"#.to_vec());
//! bus.publish(&event).await?;
//!
//! let mut stream = bus
//!     .subscribe(&["order-successful"], &SubscribeOptions::earliest("email-service"))
//!     .await?;
//! while let Some(result) = stream.next().await {
//!     let delivery = result?;
//!     println!("Received: {}", delivery.envelope().payload_text());
//!     delivery.commit();
//! }
//! # Ok(())
//! # }
//! ```

use event_relay_core::event::{EventEnvelope, OutboundEvent};
use event_relay_core::event_bus::{
    Acknowledgement, BusFuture, Delivery, DeliveryStream, EventBus, EventBusError,
    PublishReceipt, SubscribeOptions,
};
use futures::{Stream, StreamExt};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Offset;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Message for brokers that cannot be reached.
pub const BROKER_NOT_AVAILABLE: &str = "Kafka broker not available";

/// Message for failed connection attempts.
pub const CONNECTION_FAILED: &str = "Failed to connect to Kafka";

/// Reduce an rdkafka error to a stable, broker-agnostic message.
#[must_use]
pub fn normalize_kafka_error(err: &KafkaError) -> String {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerNotAvailable,
        ) => BROKER_NOT_AVAILABLE.to_string(),
        Some(
            RDKafkaErrorCode::Resolve
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::MessageTimedOut,
        ) => CONNECTION_FAILED.to_string(),
        _ => err.to_string(),
    }
}

/// Kafka event bus implementation.
///
/// Owns one producer shared by all publishes. Every subscription creates its
/// own consumer bound to the requested consumer group, so one bus can serve
/// several relays.
///
/// # Example
///
/// ```no_run
/// use event_relay_kafka::KafkaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Basic configuration
/// let bus = KafkaEventBus::new("localhost:9092")?;
///
/// // Custom configuration
/// let bus = KafkaEventBus::builder()
///     .brokers(["kafka-1:9092", "kafka-2:9092"])
///     .client_id("order-service")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaEventBus {
    /// Kafka producer for publishing events
    producer: FutureProducer,
    /// Comma-separated broker addresses (for creating consumers)
    brokers: String,
    /// Client id reported to the brokers
    client_id: String,
    /// Producer send timeout
    timeout: Duration,
    /// Messages prefetched per partition by consumers
    buffer_size: usize,
    /// Wait before seeking back to a redelivered message
    redelivery_delay: Duration,
}

impl KafkaEventBus {
    /// Create a bus from a comma-separated broker list with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers.split(',')).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> KafkaEventBusBuilder {
        KafkaEventBusBuilder::default()
    }

    /// Comma-separated broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Client id reported to the brokers.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl std::fmt::Debug for KafkaEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEventBus")
            .field("brokers", &self.brokers)
            .field("client_id", &self.client_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`KafkaEventBus`].
#[derive(Default)]
pub struct KafkaEventBusBuilder {
    brokers: Vec<String>,
    client_id: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    redelivery_delay: Option<Duration>,
}

impl KafkaEventBusBuilder {
    /// Set the broker addresses.
    ///
    /// Blank entries are ignored and surrounding whitespace is trimmed.
    #[must_use]
    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.brokers = brokers
            .into_iter()
            .map(|b| b.as_ref().trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        self
    }

    /// Set the client id (default: `"microservice"`).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec.
    ///
    /// - `compression`: "none", "gzip", "snappy", "lz4", "zstd"
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how many messages consumers prefetch per partition.
    ///
    /// Default: 1000. Zero is raised to 1.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set the wait before a redelivered message is fetched again.
    ///
    /// Default: 1 second
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Build the [`KafkaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if no broker is configured
    /// or the producer cannot be created.
    pub fn build(self) -> Result<KafkaEventBus, EventBusError> {
        if self.brokers.is_empty() {
            return Err(EventBusError::ConnectionFailed(
                "Brokers not configured".to_string(),
            ));
        }
        let brokers = self.brokers.join(",");
        let client_id = self.client_id.unwrap_or_else(|| "microservice".to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("client.id", &client_id)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!(
                    "Failed to create producer: {}",
                    normalize_kafka_error(&e)
                ))
            })?;

        let buffer_size = self.buffer_size.unwrap_or(1000).max(1);
        tracing::info!(
            brokers = %brokers,
            client_id = %client_id,
            acks,
            compression,
            buffer_size,
            "KafkaEventBus created"
        );

        Ok(KafkaEventBus {
            producer,
            brokers,
            client_id,
            timeout,
            buffer_size,
            redelivery_delay: self.redelivery_delay.unwrap_or(Duration::from_secs(1)),
        })
    }
}

impl EventBus for KafkaEventBus {
    fn publish(&self, event: &OutboundEvent) -> BusFuture<'_, PublishReceipt> {
        let event = event.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let mut headers = OwnedHeaders::new_with_capacity(event.headers.len());
            for (name, value) in &event.headers {
                headers = headers.insert(Header {
                    key: name,
                    value: Some(value),
                });
            }

            let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(&event.topic)
                .payload(event.payload.as_slice())
                .headers(headers);
            if let Some(key) = event.key.as_deref() {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %event.topic,
                        partition,
                        offset,
                        key = event.key.as_deref(),
                        "Event published"
                    );
                    Ok(PublishReceipt { partition, offset })
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %event.topic,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(EventBusError::PublishFailed {
                        topic: event.topic,
                        reason: normalize_kafka_error(&kafka_error),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
        options: &SubscribeOptions,
    ) -> BusFuture<'_, DeliveryStream> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let options = options.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("client.id", &self.client_id)
                .set("group.id", &options.group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", options.start.as_str())
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .set("queued.min.messages", self.buffer_size.to_string())
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: normalize_kafka_error(&e),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: normalize_kafka_error(&e),
                })?;

            tracing::info!(
                topics = ?topics,
                group_id = %options.group_id,
                auto_offset_reset = options.start.as_str(),
                manual_commit = true,
                "Subscribed to topics"
            );

            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(
                forward_deliveries(consumer, tx, self.redelivery_delay).in_current_span(),
            );

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }

    fn close(&self) -> BusFuture<'_, ()> {
        let producer = self.producer.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| EventBusError::TransportError(format!("Flush task failed: {e}")))?
                .map_err(|e| EventBusError::TransportError(normalize_kafka_error(&e)))?;
            tracing::info!("Kafka producer flushed");
            Ok(())
        })
    }
}

/// Next item from `stream`, or `None` once the stream ends or the receiving
/// side of `tx` is dropped, whichever comes first.
async fn next_unless_closed<S, T>(stream: &mut S, tx: &mpsc::Sender<T>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    tokio::select! {
        () = tx.closed() => {
            tracing::debug!("Subscriber dropped, exiting consumer task");
            None
        }
        item = stream.next() => item,
    }
}

/// Own the consumer, hand out one delivery at a time and apply its
/// acknowledgement before fetching the next message.
async fn forward_deliveries(
    consumer: StreamConsumer,
    tx: mpsc::Sender<Result<Delivery, EventBusError>>,
    redelivery_delay: Duration,
) {
    let mut stream = consumer.stream();

    while let Some(msg_result) = next_unless_closed(&mut stream, &tx).await {
        let message = match msg_result {
            Ok(message) => message,
            Err(e) => {
                let err = EventBusError::TransportError(normalize_kafka_error(&e));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let envelope = EventEnvelope::new(
            message.topic(),
            message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        )
        .at(message.partition(), message.offset());
        tracing::trace!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "Received message"
        );

        let (delivery, ack) = Delivery::new(envelope);
        if tx.send(Ok(delivery)).await.is_err() {
            tracing::debug!("Subscriber dropped, exiting consumer task");
            break;
        }

        match ack.await {
            Ok(Acknowledgement::Commit) => {
                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Failed to commit offset (message may be redelivered)"
                    );
                }
            }
            Ok(Acknowledgement::Redeliver) => {
                tokio::time::sleep(redelivery_delay).await;
                if let Err(e) = consumer.seek(
                    message.topic(),
                    message.partition(),
                    Offset::Offset(message.offset()),
                    Timeout::After(Duration::from_secs(5)),
                ) {
                    tracing::warn!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Failed to seek back for redelivery"
                    );
                }
            }
            Err(_) => {
                tracing::debug!(
                    topic = message.topic(),
                    offset = message.offset(),
                    "Delivery abandoned, exiting consumer task without commit"
                );
                break;
            }
        }
    }

    tracing::debug!("Consumer task exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kafka_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaEventBus>();
        assert_sync::<KafkaEventBus>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let err = KafkaEventBus::builder().brokers([" ", ""]).build().unwrap_err();
        assert_eq!(
            err,
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        );
    }

    #[test]
    fn broker_errors_are_normalized() {
        let unavailable = KafkaError::MessageProduction(RDKafkaErrorCode::AllBrokersDown);
        assert_eq!(normalize_kafka_error(&unavailable), BROKER_NOT_AVAILABLE);

        let transport = KafkaError::Global(RDKafkaErrorCode::BrokerTransportFailure);
        assert_eq!(normalize_kafka_error(&transport), BROKER_NOT_AVAILABLE);

        let resolve = KafkaError::Global(RDKafkaErrorCode::Resolve);
        assert_eq!(normalize_kafka_error(&resolve), CONNECTION_FAILED);
    }

    #[test]
    fn other_errors_keep_client_message() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        assert_eq!(normalize_kafka_error(&err), err.to_string());
    }

    #[tokio::test]
    async fn idle_stream_stops_when_subscriber_drops() {
        let (tx, rx) = mpsc::channel::<()>(1);
        let mut idle = futures::stream::pending::<u32>();

        let waiting = tokio::spawn(async move { next_unless_closed(&mut idle, &tx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(rx);
        let next = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn items_pass_through_while_subscribed() {
        let (tx, _rx) = mpsc::channel::<()>(1);
        let mut stream = futures::stream::iter([7u32]);

        assert_eq!(next_unless_closed(&mut stream, &tx).await, Some(7));
        assert_eq!(next_unless_closed(&mut stream, &tx).await, None);
    }
}
