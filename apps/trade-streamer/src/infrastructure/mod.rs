//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, and the broadcaster that drives them.

/// Session handshake, streaming loop, and announcement fan-out.
pub mod broadcast;

/// WebSocket client for the streamer protocol.
pub mod client;

/// Configuration loading.
pub mod config;

/// Dataset source adapters (Parquet, in-memory).
pub mod dataset;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Connection transports (WebSocket, in-memory).
pub mod transport;
