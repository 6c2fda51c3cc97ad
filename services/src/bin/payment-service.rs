//! Payment service: `POST /payment-service` publishes `payment-successful`.

use event_relay_core::event_bus::EventBus;
use event_relay_runtime::shutdown_signal;
use event_relay_services::payment::StubPaymentGateway;
use event_relay_services::{Config, app, telemetry};
use std::sync::Arc;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?.for_service("payment-service");
    telemetry::init(&config)?;

    async {
        tracing::info!(
            brokers = ?config.kafka.brokers,
            port = config.ports.payment,
            "Configuration loaded"
        );
        let event_bus: Arc<dyn EventBus> = Arc::new(config.kafka_bus()?);
        let listener = app::bind(config.ports.payment).await?;

        app::run_payment_service(
            &config,
            listener,
            event_bus,
            Arc::new(StubPaymentGateway),
            shutdown_signal(),
        )
        .await
    }
    .instrument(telemetry::service_span(&config))
    .await
}
