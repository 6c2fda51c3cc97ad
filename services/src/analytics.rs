//! Analytic service: counts pipeline events per topic.
//!
//! Consumes every pipeline topic and publishes nothing. Totals live for the
//! lifetime of the process.

use crate::events::{PipelineEvent, topics};
use async_trait::async_trait;
use event_relay_core::error::TypedError;
use event_relay_core::event::{EventEnvelope, OutboundEvent};
use event_relay_runtime::EventHandler;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Per-topic event totals.
#[derive(Debug, Default)]
pub struct AnalyticsHandler {
    totals: Mutex<BTreeMap<String, u64>>,
}

impl AnalyticsHandler {
    /// Handler with all totals at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen per topic.
    #[must_use]
    pub fn totals(&self) -> BTreeMap<String, u64> {
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, topic: &str) -> u64 {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        let total = totals.entry(topic.to_string()).or_insert(0);
        *total += 1;
        *total
    }
}

#[async_trait]
impl EventHandler for AnalyticsHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<Vec<OutboundEvent>, TypedError> {
        let event: PipelineEvent = envelope.decode()?;
        let total = self.record(&envelope.topic);

        match envelope.topic.as_str() {
            topics::PAYMENT_SUCCESSFUL => tracing::info!(
                user_id = %event.user_id,
                total,
                "Analytic consumer: User {} paid, {total} payments so far",
                event.user_id
            ),
            topics::ORDER_SUCCESSFUL => tracing::info!(
                user_id = %event.user_id,
                order_id = event.order_id.as_deref(),
                total,
                "Analytic consumer: Order created for user {}, {total} orders so far",
                event.user_id
            ),
            topics::EMAIL_SUCCESSFUL => tracing::info!(
                user_id = %event.user_id,
                email_id = event.email_id.as_deref(),
                total,
                "Analytic consumer: Email sent to user {}, {total} emails so far",
                event.user_id
            ),
            other => tracing::info!(topic = other, total, "Analytic consumer: Event recorded"),
        }

        Ok(Vec::new())
    }
}
