//! Trade Stream Client Binary
//!
//! Joins a channel on a running streamer and logs every message until the
//! stream ends.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin trade-stream-client -- [channel]
//! ```
//!
//! # Environment Variables
//!
//! - `STREAMER_HOST`: Server host (default: 127.0.0.1)
//! - `STREAMER_PORT`: Server port (default: 8000)
//! - `STREAMER_CHANNEL`: Channel to join when no argument is given (default: sample)
//! - `RUST_LOG`: Log level (default: info)

use trade_streamer::infrastructure::telemetry::{self, TelemetryConfig};
use trade_streamer::{Event, ServerMessage, StreamClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let _telemetry_guard = telemetry::init_with_config(TelemetryConfig {
        service_name: "trade-stream-client".to_string(),
        ..TelemetryConfig::from_env()
    })?;

    let host = std::env::var("STREAMER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("STREAMER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let channel = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STREAMER_CHANNEL").ok())
        .unwrap_or_else(|| "sample".to_string());

    let client = StreamClient::new(host, port, channel);
    tracing::info!(url = %client.url(), channel = client.channel(), "Connecting");
    let mut stream = client.connect().await?;

    let mut trades = 0_u64;
    while let Some(message) = stream.next_message().await? {
        match message {
            ServerMessage::Event(Event::Trade { timestamp, records }) => {
                trades += 1;
                tracing::info!(timestamp, records = records.len(), "Trade");
            }
            ServerMessage::Event(Event::Info { message, .. }) => {
                tracing::info!(%message, "Info");
            }
            ServerMessage::Event(Event::Error { message, .. }) => {
                tracing::info!(%message, trades, "Stream ended");
                break;
            }
            ServerMessage::Notice(notice) => {
                tracing::warn!(%notice, "Server notice");
            }
        }
    }

    if let Err(e) = stream.close().await {
        tracing::debug!(error = %e, "Close handshake incomplete");
    }
    Ok(())
}
