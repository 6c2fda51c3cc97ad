//! Integration tests for [`KafkaEventBus`] against a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Publish/subscribe round-trip with keys and headers
//! - Commit advances the consumer group
//! - Redeliver hands the same message out again
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take a while to start
//! Kafka:
//! ```bash
//! cargo test -p event-relay-kafka --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use event_relay_core::event::OutboundEvent;
use event_relay_core::event_bus::{EventBus, SubscribeOptions};
use event_relay_kafka::KafkaEventBus;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn build_bus(brokers: &str) -> KafkaEventBus {
    KafkaEventBus::builder()
        .brokers([brokers])
        .client_id("integration-test")
        .redelivery_delay(Duration::from_millis(100))
        .build()
        .expect("Failed to create event bus")
}

/// Publish until the broker accepts writes; this also auto-creates `topic`.
async fn ensure_topic_exists(bus: &KafkaEventBus, topic: &str) {
    let warmup = OutboundEvent::new(topic, None, b"warmup".to_vec());
    for attempt in 1..=60 {
        if bus.publish(&warmup).await.is_ok() {
            // Let topic metadata propagate.
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(attempt != 60, "Failed to create topic {topic}");
    }
}

async fn start_kafka() -> (testcontainers::ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

#[tokio::test]
#[ignore]
async fn publish_and_subscribe_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = build_bus(&brokers);
    ensure_topic_exists(&bus, "order-successful").await;

    let mut stream = bus
        .subscribe(&["order-successful"], &SubscribeOptions::earliest("email-service"))
        .await
        .expect("Failed to subscribe");

    let event = OutboundEvent::new(
        "order-successful",
        Some("o1".to_string()),
        br#"{"userId":"u1","orderId":"o1"}"#.to_vec(),
    )
    .with_header("x-relay", "order-service");
    let receipt = bus.publish(&event).await.expect("Failed to publish");
    assert!(receipt.offset >= 0);

    // Skip the warmup message.
    loop {
        let delivery = tokio::time::timeout(Duration::from_secs(30), stream.next())
            .await
            .expect("Timed out waiting for message")
            .expect("Stream ended")
            .expect("Delivery error");

        let envelope = delivery.envelope().clone();
        delivery.commit();
        if envelope.payload == b"warmup" {
            continue;
        }

        assert_eq!(envelope.topic, "order-successful");
        assert_eq!(envelope.key.as_deref(), Some("o1"));
        assert_eq!(envelope.offset, receipt.offset);
        assert_eq!(envelope.payload_text(), r#"{"userId":"u1","orderId":"o1"}"#);
        break;
    }

    bus.close().await.expect("Failed to flush producer");
}

#[tokio::test]
#[ignore]
async fn redeliver_then_commit() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = build_bus(&brokers);
    ensure_topic_exists(&bus, "payment-successful").await;

    let mut stream = bus
        .subscribe(
            &["payment-successful"],
            &SubscribeOptions::earliest("order-service"),
        )
        .await
        .expect("Failed to subscribe");

    // The first delivery is the warmup message.
    let first = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("Timed out")
        .expect("Stream ended")
        .expect("Delivery error");
    let offset = first.envelope().offset;
    first.redeliver();

    let again = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("Timed out waiting for redelivery")
        .expect("Stream ended")
        .expect("Delivery error");
    assert_eq!(again.envelope().offset, offset);
    again.commit();

    drop(stream);

    // A new subscription in the same group resumes after the committed offset.
    let marker = OutboundEvent::new("payment-successful", None, b"after".to_vec());
    bus.publish(&marker).await.expect("Failed to publish");

    tokio::time::sleep(Duration::from_secs(2)).await;
    let mut resumed = bus
        .subscribe(
            &["payment-successful"],
            &SubscribeOptions::earliest("order-service"),
        )
        .await
        .expect("Failed to resubscribe");
    let next = tokio::time::timeout(Duration::from_secs(30), resumed.next())
        .await
        .expect("Timed out")
        .expect("Stream ended")
        .expect("Delivery error");
    assert_eq!(next.envelope().payload, b"after");
    next.commit();
}
