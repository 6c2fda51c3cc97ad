//! Order service: `payment-successful` → `order-successful`.

use event_relay_core::event_bus::EventBus;
use event_relay_runtime::shutdown_signal;
use event_relay_services::order::{InMemoryOrderStore, OrderHandler};
use event_relay_services::{Config, app, telemetry};
use std::sync::Arc;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?.for_service("order-service");
    telemetry::init(&config)?;

    async {
        tracing::info!(
            brokers = ?config.kafka.brokers,
            port = config.ports.order,
            "Configuration loaded"
        );
        let event_bus: Arc<dyn EventBus> = Arc::new(config.kafka_bus()?);
        let listener = app::bind(config.ports.order).await?;
        let handler = Arc::new(OrderHandler::new(Arc::new(InMemoryOrderStore::new())));

        app::run_relay_service(
            &config,
            app::ORDER_RELAY,
            listener,
            event_bus,
            handler,
            shutdown_signal(),
        )
        .await
    }
    .instrument(telemetry::service_span(&config))
    .await
}
