//! Order service: turns payments into orders.

use crate::events::{OrderSucceeded, PaymentSucceeded, topics};
use async_trait::async_trait;
use event_relay_core::error::TypedError;
use event_relay_core::event::{EventEnvelope, OutboundEvent};
use event_relay_runtime::EventHandler;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Where orders are recorded.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Record an order for a successful payment and return its id.
    ///
    /// # Errors
    ///
    /// Returns a `Persistence` error if the order cannot be stored.
    async fn create_order(&self, payment: &PaymentSucceeded) -> Result<String, TypedError>;
}

/// Process-local order store.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<Vec<(String, PaymentSucceeded)>>,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders created so far, oldest first.
    #[must_use]
    pub fn orders(&self) -> Vec<(String, PaymentSucceeded)> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, payment: &PaymentSucceeded) -> Result<String, TypedError> {
        let order_id = Uuid::new_v4().to_string();
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((order_id.clone(), payment.clone()));
        Ok(order_id)
    }
}

/// `payment-successful` → `order-successful`.
pub struct OrderHandler {
    store: Arc<dyn OrderStore>,
}

impl OrderHandler {
    /// Handler recording orders in `store`.
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for OrderHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<Vec<OutboundEvent>, TypedError> {
        let payment: PaymentSucceeded = envelope.decode()?;
        if payment.user_id.trim().is_empty() {
            return Err(TypedError::invalid_field("userId must not be empty", "userId")
                .with_topic(envelope.topic.clone()));
        }

        let order_id = self.store.create_order(&payment).await?;
        tracing::info!(
            user_id = %payment.user_id,
            order_id = %order_id,
            "Order consumer: Order created for user id {}",
            payment.user_id
        );

        let event = OutboundEvent::json(
            topics::ORDER_SUCCESSFUL,
            Some(payment.user_id.clone()),
            &OrderSucceeded {
                user_id: payment.user_id,
                order_id: Some(order_id),
            },
        )?;
        Ok(vec![event])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use event_relay_core::error::ErrorKind;

    fn envelope(payload: &[u8]) -> EventEnvelope {
        EventEnvelope::new(topics::PAYMENT_SUCCESSFUL, None, payload.to_vec()).at(0, 0)
    }

    #[tokio::test]
    async fn payment_becomes_order() {
        let store = Arc::new(InMemoryOrderStore::new());
        let handler = OrderHandler::new(store.clone());

        let events = handler
            .handle(&envelope(br#"{"userId":"u1","cart":[{"id":1}]}"#))
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, topics::ORDER_SUCCESSFUL);
        let order: OrderSucceeded = serde_json::from_slice(&events[0].payload).unwrap();
        assert_eq!(order.user_id, "u1");

        let orders = store.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(order.order_id.as_deref(), Some(orders[0].0.as_str()));
    }

    #[tokio::test]
    async fn blank_user_is_a_validation_error() {
        let handler = OrderHandler::new(Arc::new(InMemoryOrderStore::new()));

        let err = handler.handle(&envelope(br#"{"userId":"  "}"#)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.context()["field"], "userId");
    }
}
