//! Faregate - ticket validation and realtime notification service
//!
//! The systems core of the bus-ticketing platform: validates scanned ticket
//! codes exactly once under concurrent scans and fans outcomes out to every
//! connected dashboard and scanner device in real time.
//!
//! Module structure:
//! - `domain/` - Core business types (Identifier, Ticket, ValidationEvent)
//! - `io/` - External interfaces (HTTP/SSE, MQTT egress, audit log, metrics endpoint)
//! - `services/` - Business logic (ValidationEngine, Broadcaster, TicketStore)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use faregate::infra::{Config, Metrics};
use faregate::io::{create_egress_channel, start_api_server, ApiContext, MqttPublisher};
use faregate::io::audit::AuditLog;
use faregate::services::{Broadcaster, MemoryTicketStore, ValidationEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Faregate - ticket validation and realtime notification core
#[derive(Parser, Debug)]
#[command(name = "faregate", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("faregate starting");

    // Parse command line arguments using clap
    let args = Args::parse();

    // Load configuration from TOML file (needed for broker config)
    let config = Config::load_from_path(&args.config);

    // Start embedded MQTT broker with config
    faregate::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        api_port = %config.api_port(),
        country_code = %config.country_code(),
        queue_capacity = %config.queue_capacity(),
        heartbeat_interval_secs = %config.heartbeat_interval_secs(),
        client_timeout_secs = %config.client_timeout_secs(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let bus = Broadcaster::new(config.queue_capacity(), metrics.clone());

    // Start the heartbeat/liveness loop
    let heartbeat_shutdown = shutdown_rx.clone();
    tokio::spawn(bus.clone().run_heartbeat(
        Duration::from_secs(config.heartbeat_interval_secs()),
        Duration::from_secs(config.client_timeout_secs()),
        heartbeat_shutdown,
    ));

    // Ticket store, optionally preloaded with the trip's manifest
    let store = Arc::new(MemoryTicketStore::new());
    if let Some(seed_file) = config.store_seed_file() {
        if let Err(e) = store.load_seed_file(seed_file) {
            warn!(file = %seed_file, error = %e, "ticket_seed_load_failed");
        }
    }

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) =
            create_egress_channel(1000, config.site_id().to_string(), metrics.clone());

        // Start MQTT egress publisher
        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        // Start metrics egress publisher (separate from logging)
        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let bus_for_egress = bus.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                let summary = metrics_for_egress.report(
                    bus_for_egress.subscriber_count() as u64,
                    bus_for_egress.degraded_count() as u64,
                );
                metrics_egress.send_metrics(&summary);
            }
        });

        Some(egress_sender)
    } else {
        None
    };

    // Validation engine with its fan-out sinks
    let audit = AuditLog::new(config.audit_file());
    let engine = Arc::new(ValidationEngine::new(
        store,
        bus.clone(),
        egress_sender.clone(),
        Some(audit),
        metrics.clone(),
    ));

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_bus = bus.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = faregate::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_bus,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let bus_for_report = bus.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = metrics_clone.report(
                bus_for_report.subscriber_count() as u64,
                bus_for_report.degraded_count() as u64,
            );
            summary.log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run the HTTP API - serves scans and event streams until shutdown
    let ctx = Arc::new(ApiContext {
        engine,
        bus,
        dialing_plan: config.dialing_plan(),
        egress: egress_sender,
    });
    start_api_server(config.api_bind_address(), config.api_port(), ctx, shutdown_rx).await?;

    info!("faregate shutdown complete");
    Ok(())
}
