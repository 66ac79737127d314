#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Trade Streamer - Historical Trade Replay
//!
//! Loads a trade dataset once, orders it by timestamp, and replays it to
//! every WebSocket client that joins one of a fixed set of channels.
//! Records sharing a timestamp are delivered together as one event.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core replay logic and data types
//!   - `record`: Trade records and the sorted dataset
//!   - `event`: Info / Trade / Error events and their wire format
//!   - `cursor`: Grouped, strictly increasing replay per session
//!   - `subscription`: The configured channel set
//!
//! - **Application**: Port definitions
//!   - `ports`: Dataset sources and client connections
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `broadcast`: Channel handshake, streaming loop, announcements
//!   - `transport`: WebSocket server and in-memory connections
//!   - `dataset`: Parquet and in-memory sources
//!   - `client`: WebSocket client for the protocol
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!  Parquet ──► Dataset (sorted, shared) ──► StreamCursor
//!                                              │
//!                  ┌───────────────────────────┼───────────────────┐
//!                  ▼                           ▼                   ▼
//!            CursorState 1               CursorState 2       CursorState N
//!                  │                           │                   │
//!               Client 1                    Client 2            Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core replay types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cursor::{CursorState, StreamCursor};
pub use domain::event::{Event, EventKind, STREAM_EXHAUSTED};
pub use domain::record::{Dataset, RecordError, TradeRecord};
pub use domain::subscription::ChannelSet;

// Ports
pub use application::ports::{Connection, DatasetError, DatasetSource, TransportError};

// Broadcaster
pub use infrastructure::broadcast::{
    Broadcaster, BroadcasterSettings, ReplayStart, SessionError, SessionOutcome, SessionRegistry,
};

// Adapters
pub use infrastructure::client::{ClientError, ClientStream, ServerMessage, StreamClient};
pub use infrastructure::dataset::{InMemorySource, ParquetSource};
pub use infrastructure::transport::{MemoryConnection, WebSocketServer, WsConnection};

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamerConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
