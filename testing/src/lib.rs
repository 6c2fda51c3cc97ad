//! # Event Relay Testing
//!
//! Test doubles and helpers for event relay services.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: a broker stand-in with topics, consumer-group
//!   offsets, acknowledgement tracking and failure injection
//! - [`FixedClock`]: deterministic time
//! - helpers for tracing output, log capture and waiting on asynchronous
//!   conditions
//!
//! ## Example
//!
//! ```ignore
//! use event_relay_testing::InMemoryEventBus;
//!
//! #[tokio::test]
//! async fn relays_orders() {
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     bus.inject("order-successful", None, br#"{"userId":"u1","orderId":"o1"}"#);
//!
//!     // ... spawn a relay on `bus` ...
//!
//!     let published = bus.wait_for_published("email-successful", 1, Duration::from_secs(1)).await;
//!     assert_eq!(published.len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use event_relay_core::environment::Clock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use event_relay_core::event::{EventEnvelope, OutboundEvent};
    use event_relay_core::event_bus::{
        Acknowledgement, BusFuture, Delivery, DeliveryStream, EventBus, EventBusError,
        PublishReceipt, StartOffset, SubscribeOptions,
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use event_relay_testing::mocks::FixedClock;
    /// use event_relay_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }

    /// How a delivery handed out by [`InMemoryEventBus`] was resolved.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum AckKind {
        /// `Delivery::commit`
        Committed,
        /// `Delivery::redeliver`
        Redelivered,
        /// Delivery dropped unresolved
        Abandoned,
    }

    /// One recorded acknowledgement.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct AckRecord {
        /// Consumer group that received the message
        pub group_id: String,
        /// Topic of the message
        pub topic: String,
        /// Offset of the message
        pub offset: i64,
        /// Resolution
        pub kind: AckKind,
    }

    struct Subscriber {
        topics: Vec<String>,
        tx: mpsc::UnboundedSender<EventEnvelope>,
    }

    #[derive(Default)]
    struct Inner {
        /// Retained log per topic; offset = index
        log: HashMap<String, Vec<EventEnvelope>>,
        /// Events published through the `EventBus` trait
        published: Vec<OutboundEvent>,
        /// Next offset to read per (group, topic)
        committed: HashMap<(String, String), i64>,
        acks: Vec<AckRecord>,
        subscribers: Vec<Subscriber>,
        publish_attempts: usize,
        failing_publishes: usize,
        publish_unavailable: bool,
        failing_subscribes: usize,
        closed: bool,
    }

    /// In-memory broker for tests.
    ///
    /// Behaves like a single-partition broker per topic:
    ///
    /// - messages from [`inject`](Self::inject) and from `publish` are
    ///   appended to the topic log and fanned out to live subscriptions;
    /// - a subscription starts at the group's committed offset, or at the
    ///   earliest/latest offset when the group has none;
    /// - each subscription hands out one delivery at a time and waits for its
    ///   acknowledgement; `redeliver` hands the same message out again after
    ///   the redelivery delay.
    ///
    /// Failures can be injected for publish and subscribe.
    #[derive(Clone)]
    pub struct InMemoryEventBus {
        inner: Arc<Mutex<Inner>>,
        redelivery_delay: Duration,
    }

    impl Default for InMemoryEventBus {
        fn default() -> Self {
            Self::new()
        }
    }

    impl std::fmt::Debug for InMemoryEventBus {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let inner = self.lock();
            f.debug_struct("InMemoryEventBus")
                .field("topics", &inner.log.len())
                .field("published", &inner.published.len())
                .field("subscribers", &inner.subscribers.len())
                .finish_non_exhaustive()
        }
    }

    impl InMemoryEventBus {
        /// Create an empty bus with a 10 ms redelivery delay.
        #[must_use]
        pub fn new() -> Self {
            Self {
                inner: Arc::new(Mutex::new(Inner::default())),
                redelivery_delay: Duration::from_millis(10),
            }
        }

        /// Set the delay before a redelivered message is handed out again.
        #[must_use]
        pub const fn with_redelivery_delay(mut self, delay: Duration) -> Self {
            self.redelivery_delay = delay;
            self
        }

        /// Append a message to `topic` as an external producer would.
        ///
        /// Not recorded in [`published`](Self::published).
        pub fn inject(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> i64 {
            let mut inner = self.lock();
            Self::append(&mut inner, topic, key.map(str::to_string), payload.to_vec())
        }

        /// Events published through the bus, in order.
        #[must_use]
        pub fn published(&self) -> Vec<OutboundEvent> {
            self.lock().published.clone()
        }

        /// Events published to `topic`, in order.
        #[must_use]
        pub fn published_to(&self, topic: &str) -> Vec<OutboundEvent> {
            self.lock()
                .published
                .iter()
                .filter(|e| e.topic == topic)
                .cloned()
                .collect()
        }

        /// Recorded acknowledgements, in order.
        #[must_use]
        pub fn acks(&self) -> Vec<AckRecord> {
            self.lock().acks.clone()
        }

        /// Calls to `publish`, including failed ones.
        #[must_use]
        pub fn publish_attempts(&self) -> usize {
            self.lock().publish_attempts
        }

        /// Fail the next `n` publishes.
        pub fn fail_next_publishes(&self, n: usize) {
            self.lock().failing_publishes = n;
        }

        /// Make every publish fail until set back to `true`.
        pub fn set_publish_available(&self, available: bool) {
            self.lock().publish_unavailable = !available;
        }

        /// Fail the next `n` subscribes.
        pub fn fail_next_subscribes(&self, n: usize) {
            self.lock().failing_subscribes = n;
        }

        /// Whether `close` has been called.
        #[must_use]
        pub fn is_closed(&self) -> bool {
            self.lock().closed
        }

        /// Wait until at least `count` events were published to `topic`.
        ///
        /// Returns whatever was published when the timeout elapses.
        pub async fn wait_for_published(
            &self,
            topic: &str,
            count: usize,
            timeout: Duration,
        ) -> Vec<OutboundEvent> {
            let _ = tokio::time::timeout(timeout, async {
                while self.published_to(topic).len() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await;
            self.published_to(topic)
        }

        /// Wait until at least `count` acknowledgements were recorded.
        ///
        /// Returns whatever was recorded when the timeout elapses.
        pub async fn wait_for_acks(&self, count: usize, timeout: Duration) -> Vec<AckRecord> {
            let _ = tokio::time::timeout(timeout, async {
                while self.acks().len() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await;
            self.acks()
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn append(inner: &mut Inner, topic: &str, key: Option<String>, payload: Vec<u8>) -> i64 {
            let log = inner.log.entry(topic.to_string()).or_default();
            let offset = i64::try_from(log.len()).unwrap_or(i64::MAX);
            let envelope = EventEnvelope::new(topic, key, payload).at(0, offset);
            log.push(envelope.clone());

            inner.subscribers.retain(|s| !s.tx.is_closed());
            for subscriber in &inner.subscribers {
                if subscriber.topics.iter().any(|t| t == topic) {
                    let _ = subscriber.tx.send(envelope.clone());
                }
            }
            offset
        }

        fn record_ack(
            inner: &Arc<Mutex<Inner>>,
            group_id: &str,
            envelope: &EventEnvelope,
            kind: AckKind,
        ) {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            if kind == AckKind::Committed {
                inner
                    .committed
                    .insert((group_id.to_string(), envelope.topic.clone()), envelope.offset + 1);
            }
            inner.acks.push(AckRecord {
                group_id: group_id.to_string(),
                topic: envelope.topic.clone(),
                offset: envelope.offset,
                kind,
            });
        }
    }

    impl EventBus for InMemoryEventBus {
        fn publish(&self, event: &OutboundEvent) -> BusFuture<'_, PublishReceipt> {
            let event = event.clone();
            Box::pin(async move {
                let mut inner = self.lock();
                inner.publish_attempts += 1;

                if inner.closed {
                    return Err(EventBusError::Closed);
                }
                if inner.publish_unavailable || inner.failing_publishes > 0 {
                    inner.failing_publishes = inner.failing_publishes.saturating_sub(1);
                    return Err(EventBusError::PublishFailed {
                        topic: event.topic,
                        reason: "Kafka broker not available".to_string(),
                    });
                }

                let offset = Self::append(
                    &mut inner,
                    &event.topic,
                    event.key.clone(),
                    event.payload.clone(),
                );
                inner.published.push(event);
                Ok(PublishReceipt {
                    partition: 0,
                    offset,
                })
            })
        }

        fn subscribe(
            &self,
            topics: &[&str],
            options: &SubscribeOptions,
        ) -> BusFuture<'_, DeliveryStream> {
            let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
            let options = options.clone();
            let redelivery_delay = self.redelivery_delay;

            Box::pin(async move {
                let (tx, mut envelopes) = mpsc::unbounded_channel();
                {
                    let mut inner = self.lock();
                    if inner.closed {
                        return Err(EventBusError::Closed);
                    }
                    if inner.failing_subscribes > 0 {
                        inner.failing_subscribes -= 1;
                        return Err(EventBusError::SubscriptionFailed {
                            topics,
                            reason: "Failed to connect to Kafka".to_string(),
                        });
                    }

                    for topic in &topics {
                        let log = inner.log.get(topic).map(Vec::as_slice).unwrap_or_default();
                        let committed = inner
                            .committed
                            .get(&(options.group_id.clone(), topic.clone()))
                            .copied();
                        let start = match (committed, options.start) {
                            (Some(next), _) => usize::try_from(next).unwrap_or(0),
                            (None, StartOffset::Earliest) => 0,
                            (None, StartOffset::Latest) => log.len(),
                        };
                        for envelope in log.iter().skip(start) {
                            let _ = tx.send(envelope.clone());
                        }
                    }
                    inner.subscribers.push(Subscriber {
                        topics: topics.clone(),
                        tx,
                    });
                }

                // Forward one delivery at a time and wait for its resolution.
                let (delivery_tx, mut deliveries) = mpsc::channel::<Result<Delivery, EventBusError>>(1);
                let inner = Arc::clone(&self.inner);
                let group_id = options.group_id;
                tokio::spawn(async move {
                    while let Some(envelope) = envelopes.recv().await {
                        loop {
                            let (delivery, ack) = Delivery::new(envelope.clone());
                            if delivery_tx.send(Ok(delivery)).await.is_err() {
                                return;
                            }
                            match ack.await {
                                Ok(Acknowledgement::Commit) => {
                                    Self::record_ack(&inner, &group_id, &envelope, AckKind::Committed);
                                    break;
                                }
                                Ok(Acknowledgement::Redeliver) => {
                                    Self::record_ack(&inner, &group_id, &envelope, AckKind::Redelivered);
                                    tokio::time::sleep(redelivery_delay).await;
                                }
                                Err(_) => {
                                    Self::record_ack(&inner, &group_id, &envelope, AckKind::Abandoned);
                                    return;
                                }
                            }
                        }
                    }
                });

                let stream = async_stream::stream! {
                    while let Some(result) = deliveries.recv().await {
                        yield result;
                    }
                };

                Ok(Box::pin(stream) as DeliveryStream)
            })
        }

        fn close(&self) -> BusFuture<'_, ()> {
            Box::pin(async move {
                let mut inner = self.lock();
                inner.closed = true;
                inner.subscribers.clear();
                Ok(())
            })
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use std::future::Future;
    use std::io;
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;
    use tracing_subscriber::fmt::MakeWriter;

    /// Install a tracing subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Formatted log lines captured in memory.
    ///
    /// ```ignore
    /// let logs = LogCapture::new();
    /// let _guard = logs.set_default();
    /// handler.handle(&envelope).await?;
    /// assert_eq!(logs.count("Email sent to user id u1"), 1);
    /// ```
    #[derive(Debug, Clone, Default)]
    pub struct LogCapture {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl LogCapture {
        /// Empty capture.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Record this thread's events (debug and above) until the guard drops.
        ///
        /// Use with a current-thread runtime so awaited work stays captured.
        #[must_use = "capturing stops when the guard is dropped"]
        pub fn set_default(&self) -> tracing::subscriber::DefaultGuard {
            let subscriber = tracing_subscriber::fmt()
                .with_writer(self.clone())
                .with_max_level(tracing::Level::DEBUG)
                .with_ansi(false)
                .without_time()
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        /// Everything captured so far.
        #[must_use]
        pub fn contents(&self) -> String {
            let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            String::from_utf8_lossy(&buffer).into_owned()
        }

        /// Number of captured lines containing `needle`.
        #[must_use]
        pub fn count(&self, needle: &str) -> usize {
            self.contents().lines().filter(|line| line.contains(needle)).count()
        }
    }

    impl<'a> MakeWriter<'a> for LogCapture {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            CaptureWriter(Arc::clone(&self.buffer))
        }
    }

    /// Writer handed out by [`LogCapture`].
    #[derive(Debug)]
    pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Poll `condition` every 5 ms until it holds or `timeout` elapses.
    ///
    /// Returns whether the condition held.
    pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        tokio::time::timeout(timeout, async {
            while !condition().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

// Re-export commonly used items
pub use mocks::{AckKind, AckRecord, FixedClock, InMemoryEventBus, test_clock};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use event_relay_core::event::OutboundEvent;
    use event_relay_core::event_bus::{EventBus, SubscribeOptions};
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn earliest_replays_and_commit_advances_group_offset() {
        let bus = InMemoryEventBus::new();
        bus.inject("order-successful", None, b"one");
        bus.inject("order-successful", None, b"two");

        let mut stream = bus
            .subscribe(&["order-successful"], &SubscribeOptions::earliest("g"))
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.envelope().payload, b"one");
        first.commit();
        drop(stream);

        bus.wait_for_acks(1, Duration::from_secs(1)).await;

        let mut stream = bus
            .subscribe(&["order-successful"], &SubscribeOptions::earliest("g"))
            .await
            .unwrap();
        let next = stream.next().await.unwrap().unwrap();
        assert_eq!(next.envelope().payload, b"two");
        assert_eq!(next.envelope().offset, 1);
    }

    #[tokio::test]
    async fn latest_skips_backlog() {
        let bus = InMemoryEventBus::new();
        bus.inject("t", None, b"old");

        let mut stream = bus.subscribe(&["t"], &SubscribeOptions::latest("g")).await.unwrap();
        bus.inject("t", None, b"new");

        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.envelope().payload, b"new");
    }

    #[tokio::test]
    async fn redeliver_hands_out_same_message_again() {
        let bus = InMemoryEventBus::new().with_redelivery_delay(Duration::from_millis(1));
        bus.inject("t", Some("k"), b"x");

        let mut stream = bus.subscribe(&["t"], &SubscribeOptions::earliest("g")).await.unwrap();
        stream.next().await.unwrap().unwrap().redeliver();
        let again = stream.next().await.unwrap().unwrap();

        assert_eq!(again.envelope().offset, 0);
        assert_eq!(again.envelope().key.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn injected_publish_failures() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(1);

        let event = OutboundEvent::new("t", None, b"x".to_vec());
        assert!(bus.publish(&event).await.is_err());
        assert!(bus.publish(&event).await.is_ok());
        assert_eq!(bus.publish_attempts(), 2);
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn injected_subscribe_failures() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_subscribes(1);
        let options = SubscribeOptions::earliest("g");

        assert!(bus.subscribe(&["t"], &options).await.is_err());
        assert!(bus.subscribe(&["t"], &options).await.is_ok());
    }
}
