//! Pipeline topics and payloads.
//!
//! Payloads are camelCase JSON. Unknown fields are ignored so producers can
//! add data without breaking consumers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic names.
pub mod topics {
    /// Published by the payment service after a successful charge
    pub const PAYMENT_SUCCESSFUL: &str = "payment-successful";
    /// Published by the order service after creating an order
    pub const ORDER_SUCCESSFUL: &str = "order-successful";
    /// Published by the email service after sending a confirmation
    pub const EMAIL_SUCCESSFUL: &str = "email-successful";

    /// Every pipeline topic, in flow order.
    pub const ALL: [&str; 3] = [PAYMENT_SUCCESSFUL, ORDER_SUCCESSFUL, EMAIL_SUCCESSFUL];
}

/// Consumer group ids.
pub mod groups {
    /// Order service group
    pub const ORDER_SERVICE: &str = "order-service";
    /// Email service group
    pub const EMAIL_SERVICE: &str = "email-service";
    /// Analytic service group
    pub const ANALYTIC_SERVICE: &str = "analytic-service";
}

/// `payment-successful` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSucceeded {
    /// Paying user
    pub user_id: String,
    /// Cart as submitted by the client
    #[serde(default)]
    pub cart: Value,
}

/// `order-successful` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSucceeded {
    /// Ordering user
    pub user_id: String,
    /// Created order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// `email-successful` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSucceeded {
    /// Notified user
    pub user_id: String,
    /// Provider id of the sent email
    pub email_id: String,
}

/// Fields the analytic service reads from any pipeline event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    /// User the event concerns
    pub user_id: String,
    /// Present on order events
    #[serde(default)]
    pub order_id: Option<String>,
    /// Present on email events
    #[serde(default)]
    pub email_id: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn order_payload_tolerates_unknown_fields() {
        let order: OrderSucceeded =
            serde_json::from_str(r#"{"userId":"u1","orderId":"o1","extra":true}"#).unwrap();
        assert_eq!(order.user_id, "u1");
        assert_eq!(order.order_id.as_deref(), Some("o1"));
    }

    #[test]
    fn email_payload_is_camel_case() {
        let json = serde_json::to_value(EmailSucceeded {
            user_id: "u1".into(),
            email_id: "091584203985".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "userId": "u1", "emailId": "091584203985" }));
    }
}
