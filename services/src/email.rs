//! Email service: confirms orders to users.

use crate::events::{EmailSucceeded, OrderSucceeded, topics};
use async_trait::async_trait;
use event_relay_core::error::TypedError;
use event_relay_core::event::{EventEnvelope, OutboundEvent};
use event_relay_runtime::EventHandler;
use std::sync::Arc;

/// Email id reported by [`StubEmailSender`].
pub const STUB_EMAIL_ID: &str = "091584203985";

/// Outbound email provider.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send the order confirmation and return the provider's email id.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the message.
    async fn send_order_confirmation(&self, order: &OrderSucceeded) -> Result<String, TypedError>;
}

/// Sender that delivers nothing and reports a fixed email id.
#[derive(Debug, Default, Clone)]
pub struct StubEmailSender;

#[async_trait]
impl EmailSender for StubEmailSender {
    async fn send_order_confirmation(&self, _order: &OrderSucceeded) -> Result<String, TypedError> {
        Ok(STUB_EMAIL_ID.to_string())
    }
}

/// `order-successful` → `email-successful`.
pub struct EmailHandler {
    sender: Arc<dyn EmailSender>,
}

impl EmailHandler {
    /// Handler sending through `sender`.
    #[must_use]
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EventHandler for EmailHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<Vec<OutboundEvent>, TypedError> {
        let order: OrderSucceeded = envelope.decode()?;
        if order.user_id.trim().is_empty() {
            return Err(TypedError::invalid_field("userId must not be empty", "userId")
                .with_topic(envelope.topic.clone()));
        }

        let email_id = self.sender.send_order_confirmation(&order).await?;
        tracing::info!(
            user_id = %order.user_id,
            order_id = order.order_id.as_deref(),
            email_id = %email_id,
            "Email consumer: Email sent to user id {}",
            order.user_id
        );

        let event = OutboundEvent::json(
            topics::EMAIL_SUCCESSFUL,
            Some(order.user_id.clone()),
            &EmailSucceeded {
                user_id: order.user_id,
                email_id,
            },
        )?;
        Ok(vec![event])
    }
}
