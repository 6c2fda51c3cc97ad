//! Event bus abstraction with explicit acknowledgement.
//!
//! An [`EventBus`] publishes [`OutboundEvent`]s and hands out subscriptions as a
//! [`DeliveryStream`]. Each [`Delivery`] must be resolved by its consumer:
//!
//! - [`Delivery::commit`]: processing finished, the offset may be committed
//! - [`Delivery::redeliver`]: processing failed, the message must come back
//! - dropping the delivery: abandoned (shutdown), nothing is committed
//!
//! Implementations hand out one delivery at a time per subscription and wait
//! for its resolution before fetching the next one, which keeps processing
//! strictly ordered within a partition.
//!
//! # Delivery Semantics
//!
//! **At-least-once**: an uncommitted message is delivered again after a
//! redelivery request, a crash or a consumer-group rebalance. Consumers must
//! tolerate duplicates.
//!
//! # Implementations
//!
//! - `KafkaEventBus` (`event-relay-kafka`) - for production
//! - `InMemoryEventBus` (`event-relay-testing`) - for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use event_relay_core::event_bus::{EventBus, SubscribeOptions};
//! use futures::StreamExt;
//!
//! let mut stream = bus
//!     .subscribe(&["order-successful"], &SubscribeOptions::earliest("email-service"))
//!     .await?;
//! while let Some(result) = stream.next().await {
//!     let delivery = result?;
//!     process(delivery.envelope()).await?;
//!     delivery.commit();
//! }
//! ```

use crate::error::TypedError;
use crate::event::{EventEnvelope, OutboundEvent};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while consuming
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The bus has been closed
    #[error("Event bus is closed")]
    Closed,
}

impl EventBusError {
    /// Topic involved in the failure, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::PublishFailed { topic, .. } => Some(topic),
            Self::SubscriptionFailed { topics, .. } => topics.first().map(String::as_str),
            _ => None,
        }
    }
}

impl From<EventBusError> for TypedError {
    fn from(err: EventBusError) -> Self {
        let message = match &err {
            EventBusError::ConnectionFailed(reason) | EventBusError::TransportError(reason) => {
                reason.clone()
            }
            EventBusError::PublishFailed { reason, .. }
            | EventBusError::SubscriptionFailed { reason, .. } => reason.clone(),
            EventBusError::Closed => err.to_string(),
        };
        let typed = Self::broker(message);
        match err.topic() {
            Some(topic) => typed.with_topic(topic),
            None => typed,
        }
    }
}

/// Where a consumer group without committed offsets starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOffset {
    /// Replay from the earliest retained offset
    Earliest,
    /// Only messages produced after subscribing
    #[default]
    Latest,
}

impl StartOffset {
    /// Broker configuration value (`auto.offset.reset`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

/// Options for a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Consumer group id; must stay stable across deploys
    pub group_id: String,
    /// Start position for groups without committed offsets
    pub start: StartOffset,
}

impl SubscribeOptions {
    /// Options for a group replaying from the earliest retained offset.
    #[must_use]
    pub fn earliest(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            start: StartOffset::Earliest,
        }
    }

    /// Options for a group reading only new messages.
    #[must_use]
    pub fn latest(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            start: StartOffset::Latest,
        }
    }
}

/// Resolution of a [`Delivery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Processing is durable, commit the offset
    Commit,
    /// Processing failed, deliver the message again
    Redeliver,
}

/// A received message awaiting acknowledgement.
///
/// Dropping a delivery without resolving it abandons the message: nothing is
/// committed and the broker redelivers it to the group later.
#[derive(Debug)]
pub struct Delivery {
    envelope: EventEnvelope,
    ack: Option<oneshot::Sender<Acknowledgement>>,
}

impl Delivery {
    /// Create a delivery and the receiver its bus waits on.
    #[must_use]
    pub fn new(envelope: EventEnvelope) -> (Self, oneshot::Receiver<Acknowledgement>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                envelope,
                ack: Some(tx),
            },
            rx,
        )
    }

    /// Create a delivery for a bus that does not track acknowledgements.
    #[must_use]
    pub const fn untracked(envelope: EventEnvelope) -> Self {
        Self {
            envelope,
            ack: None,
        }
    }

    /// The received message.
    #[must_use]
    pub const fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    /// Mark the message as durably processed.
    pub fn commit(mut self) {
        self.resolve(Acknowledgement::Commit);
    }

    /// Ask the bus to deliver the message again.
    pub fn redeliver(mut self) {
        self.resolve(Acknowledgement::Redeliver);
    }

    fn resolve(&mut self, ack: Acknowledgement) {
        if let Some(tx) = self.ack.take() {
            // The bus may have shut down already; nothing left to acknowledge to.
            let _ = tx.send(ack);
        }
    }
}

/// Broker position of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Partition the message landed in
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Boxed future returned by [`EventBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so relays can hold an `Arc<dyn EventBus>` chosen by the composition root.
pub trait EventBus: Send + Sync {
    /// Publish an event to its topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker rejects or times out.
    fn publish(&self, event: &OutboundEvent) -> BusFuture<'_, PublishReceipt>;

    /// Subscribe a consumer group to one or more topics.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the consumer cannot be
    /// created or the subscription is refused.
    fn subscribe(&self, topics: &[&str], options: &SubscribeOptions)
    -> BusFuture<'_, DeliveryStream>;

    /// Flush pending publishes and release broker connections.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::TransportError`] if pending messages could not
    /// be flushed.
    fn close(&self) -> BusFuture<'_, ()>;
}
