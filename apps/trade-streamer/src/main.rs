//! Trade Streamer Binary
//!
//! Loads the trade dataset and serves it to WebSocket clients.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin trade-streamer
//! ```
//!
//! # Environment Variables
//!
//! - `STREAMER_HOST`: Bind interface (default: 127.0.0.1)
//! - `STREAMER_PORT`: WebSocket port (default: 8000)
//! - `STREAMER_DATASET_PATH`: Parquet file (default: trades_sample.parquet)
//! - `STREAMER_TIMESTAMP_COLUMN`: Ordering column (default: timestamp)
//! - `STREAMER_CHANNELS`: Comma-separated joinable channels (default: sample)
//! - `STREAMER_SEND_DELAY_MS`: Pause after each event (default: 0)
//! - `STREAMER_REJECT_GRACE_SECS`: Wait after an unknown channel (default: 10)
//! - `STREAMER_REPLAY_START`: beginning | tail (default: beginning)
//! - `STREAMER_EMIT_FIRST_GROUP`: Send the first timestamp group (default: false)
//! - `STREAMER_NOTICE_CAPACITY`: Per-session announcement queue (default: 64)
//! - `STREAMER_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: trade-streamer)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use trade_streamer::infrastructure::health::{HealthServer, HealthServerState};
use trade_streamer::infrastructure::telemetry;
use trade_streamer::{
    Broadcaster, ParquetSource, StreamCursor, StreamerConfig, WebSocketServer, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting trade streamer");

    let _metrics_handle = init_metrics()?;

    let config = StreamerConfig::from_env()?;
    log_config(&config);

    let source = ParquetSource::new(&config.dataset.path)
        .with_timestamp_column(config.dataset.timestamp_column.clone());
    let stream = match StreamCursor::load(&source) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, path = %config.dataset.path.display(), "Dataset load failed");
            return Err(e.into());
        }
    };

    let shutdown_token = CancellationToken::new();
    let broadcaster = Arc::new(Broadcaster::new(
        config.stream.clone(),
        stream,
        shutdown_token.clone(),
    ));

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&broadcaster),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let server = WebSocketServer::bind(&config.server.bind_addr(), Arc::clone(&broadcaster)).await?;
    let server_task = tokio::spawn(server.run());

    tracing::info!("Trade streamer ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Sessions still open at shutdown timeout"
        );
    }

    tracing::info!("Trade streamer stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamerConfig) {
    tracing::info!(
        addr = %config.server.bind_addr(),
        health_port = config.server.health_port,
        dataset = %config.dataset.path.display(),
        timestamp_column = %config.dataset.timestamp_column,
        channels = %config.stream.channels,
        "Configuration loaded"
    );
    tracing::debug!(
        send_delay_ms = config.stream.send_delay.as_millis(),
        rejection_grace_secs = config.stream.rejection_grace.as_secs(),
        replay_start = config.stream.replay_start.as_str(),
        emit_first_group = config.stream.emit_first_group,
        notice_capacity = config.stream.notice_capacity,
        "Streaming settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
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
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
