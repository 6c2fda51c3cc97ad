//! Metric names and recorders for the relay pipeline.
//!
//! Everything goes through the `metrics` facade. Installing a recorder
//! (Prometheus, statsd, ...) is up to the process; without one every call here
//! is a no-op.
//!
//! Call [`register_metrics`] once at startup so exporters can publish help text.

use crate::circuit_breaker::State;
use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register all metric descriptions.
pub fn register_metrics() {
    // Circuit breaker
    describe_counter!(
        "circuit_breaker_transitions_total",
        "Circuit breaker state transitions, labelled by service and target state"
    );
    describe_counter!(
        "circuit_breaker_rejections_total",
        "Calls rejected without invoking the protected operation"
    );
    describe_gauge!(
        "circuit_breaker_state",
        "Current circuit breaker state (0 = closed, 1 = half-open, 2 = open)"
    );

    // Relay
    describe_counter!(
        "relay_messages_received_total",
        "Messages received by a relay"
    );
    describe_counter!(
        "relay_messages_committed_total",
        "Messages processed and committed"
    );
    describe_counter!(
        "relay_messages_redelivered_total",
        "Messages handed back to the broker for redelivery"
    );
    describe_counter!(
        "relay_messages_dead_lettered_total",
        "Poison messages routed to the dead-letter topic"
    );
    describe_counter!(
        "relay_messages_skipped_total",
        "Poison messages committed without reprocessing"
    );
    describe_counter!(
        "relay_events_published_total",
        "Derived events published by a relay"
    );

    // Rate limiter
    describe_counter!(
        "rate_limiter_rejections_total",
        "Requests rejected by the sliding-window rate limiter"
    );
}

/// Circuit breaker metrics recorder.
pub struct BreakerMetrics;

impl BreakerMetrics {
    /// Record a state transition.
    pub fn record_transition(service: &str, to: State) {
        counter!(
            "circuit_breaker_transitions_total",
            "service" => service.to_string(),
            "state" => to.to_string()
        )
        .increment(1);
        let level = match to {
            State::Closed => 0.0,
            State::HalfOpen => 1.0,
            State::Open => 2.0,
        };
        gauge!("circuit_breaker_state", "service" => service.to_string()).set(level);
    }

    /// Record a call rejected while the circuit is open.
    pub fn record_rejection(service: &str) {
        counter!("circuit_breaker_rejections_total", "service" => service.to_string())
            .increment(1);
    }
}

/// Outcome of one relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Processed and committed
    Committed,
    /// Handed back for redelivery
    Redelivered,
    /// Sent to the dead-letter topic
    DeadLettered,
    /// Poison message committed without processing
    Skipped,
}

/// Relay metrics recorder.
pub struct RelayMetrics;

impl RelayMetrics {
    /// Record a received message.
    pub fn record_received(relay: &str) {
        counter!("relay_messages_received_total", "relay" => relay.to_string()).increment(1);
    }

    /// Record how a message was resolved.
    pub fn record_outcome(relay: &str, outcome: RelayOutcome) {
        let name = match outcome {
            RelayOutcome::Committed => "relay_messages_committed_total",
            RelayOutcome::Redelivered => "relay_messages_redelivered_total",
            RelayOutcome::DeadLettered => "relay_messages_dead_lettered_total",
            RelayOutcome::Skipped => "relay_messages_skipped_total",
        };
        counter!(name, "relay" => relay.to_string()).increment(1);
    }

    /// Record a derived event published to `topic`.
    pub fn record_published(relay: &str, topic: &str) {
        counter!(
            "relay_events_published_total",
            "relay" => relay.to_string(),
            "topic" => topic.to_string()
        )
        .increment(1);
    }
}

/// Rate limiter metrics recorder.
pub struct RateLimitMetrics;

impl RateLimitMetrics {
    /// Record a rejected request.
    pub fn record_rejection() {
        counter!("rate_limiter_rejections_total").increment(1);
    }
}
