use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hydroponic_gateway::{
    api::{self, AppState},
    bus::mqtt::MqttBus,
    config::{Config, LogFormat},
    control::DeviceBridge,
    diagnostics::{DiagnosticSink, TracingSink},
    influx::InfluxClient,
    sensors::SensorService,
    startup_time::FileStartupTimeStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    init_tracing(&config);

    // Message bus and the bridge on top of it
    let bus = MqttBus::connect(&config.mqtt_settings());
    let sink: Arc<dyn DiagnosticSink> = Arc::new(TracingSink);
    let bridge =
        DeviceBridge::new(bus.clone(), sink.clone()).with_ack_timeout(config.mqtt_ack_timeout);
    bridge
        .install(&config.mqtt_error_topics)
        .context("can not subscribe to device topics")?;
    info!(
        broker = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        error_topics = ?config.mqtt_error_topics,
        ack_timeout = ?config.mqtt_ack_timeout,
        "Device bridge ready"
    );

    // Time-series store
    let influx = InfluxClient::new(&config.influx_settings())?;
    match influx.health().await {
        Ok(check) if check.status == "pass" => info!(url = %config.influx_url, "Time-series store healthy"),
        Ok(check) => warn!(
            url = %config.influx_url,
            status = %check.status,
            message = ?check.message,
            "Time-series store reports unhealthy"
        ),
        Err(e) => warn!(url = %config.influx_url, error = %e, "Time-series store health check failed"),
    }
    let reader = SensorService::new(influx, sink);

    let startup = FileStartupTimeStore::open(&config.startup_time_file)
        .await
        .context("can not open startup time store")?;

    let state = AppState {
        bridge,
        reader: Arc::new(reader),
        startup: Arc::new(startup),
        query_timeout: config.query_timeout,
    };

    // Start HTTP server
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("can not bind {}", config.listen))?;
    info!(addr = %config.listen, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bus.shutdown().await;
    info!("Gateway stopped");
    Ok(())
}

/// `RUST_LOG` wins over `LOG_LEVEL` when set.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let layer = match config.log_format {
        LogFormat::Console => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Can not install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Can not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
