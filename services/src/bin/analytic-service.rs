//! Analytic service: counts events on every pipeline topic.

use event_relay_core::event_bus::EventBus;
use event_relay_runtime::shutdown_signal;
use event_relay_services::analytics::AnalyticsHandler;
use event_relay_services::{Config, app, telemetry};
use std::sync::Arc;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?.for_service("analytic-service");
    telemetry::init(&config)?;

    async {
        tracing::info!(
            brokers = ?config.kafka.brokers,
            port = config.ports.analytic,
            "Configuration loaded"
        );
        let event_bus: Arc<dyn EventBus> = Arc::new(config.kafka_bus()?);
        let listener = app::bind(config.ports.analytic).await?;

        app::run_relay_service(
            &config,
            app::ANALYTIC_RELAY,
            listener,
            event_bus,
            Arc::new(AnalyticsHandler::new()),
            shutdown_signal(),
        )
        .await
    }
    .instrument(telemetry::service_span(&config))
    .await
}
