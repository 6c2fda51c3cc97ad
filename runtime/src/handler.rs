//! Per-message business logic plugged into an [`EventRelay`](crate::relay::EventRelay).

use async_trait::async_trait;
use event_relay_core::error::TypedError;
use event_relay_core::event::{EventEnvelope, OutboundEvent};
use std::sync::Arc;

/// Handler for one received message.
///
/// A handler decodes the envelope, performs the service's unit of work and
/// returns the derived events to publish (possibly none). It never publishes
/// itself; the relay publishes the returned events through its circuit breaker
/// and commits the message only when every publish succeeded.
///
/// # Errors
///
/// - `Validation`: the payload is unusable and redelivery will not help. The
///   relay applies its poison policy (dead letter or skip) and commits.
/// - anything else: transient failure. The relay leaves the message
///   uncommitted and asks for redelivery.
///
/// Redelivery means a handler may see the same message more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one message.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<Vec<OutboundEvent>, TypedError>;
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<Vec<OutboundEvent>, TypedError> {
        (**self).handle(envelope).await
    }
}
