//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `DatasetSource`: loads the trade dataset once at startup
//!
//! ## Driver Ports (Inbound)
//!
//! - `Connection`: one bidirectional client connection (send, receive, close)

use async_trait::async_trait;

use crate::domain::record::{RecordError, TradeRecord};

// =============================================================================
// Dataset Source
// =============================================================================

/// Dataset loading failures. Any of these is fatal to startup.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// The source cannot be opened or decoded.
    #[error("dataset source {source_name} unavailable: {reason}")]
    Unavailable {
        /// Source description (path or adapter name).
        source_name: String,
        /// Underlying cause.
        reason: String,
    },

    /// A row has no usable timestamp.
    #[error("dataset row {row}: {error}")]
    InvalidRecord {
        /// Zero-based row index in source order.
        row: usize,
        /// What is wrong with the row.
        error: RecordError,
    },
}

impl DatasetError {
    /// Build an `Unavailable` error from any displayable cause.
    pub fn unavailable(source_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Read-only source of trade records.
#[cfg_attr(test, mockall::automock)]
pub trait DatasetSource: Send + Sync {
    /// Read every record. Order does not matter; the cursor sorts them.
    ///
    /// # Errors
    ///
    /// Returns `DatasetError` if the source is missing, corrupt, or holds
    /// a row without a usable timestamp.
    fn load(&self) -> Result<Vec<TradeRecord>, DatasetError>;

    /// Name of this source, for logs.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Connection Transport
// =============================================================================

/// Transport-level failures on one client connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer is gone.
    #[error("connection closed")]
    Closed,

    /// Send or receive failed.
    #[error("transport failure: {0}")]
    Failed(String),
}

/// One bidirectional, message-framed client connection.
///
/// `receive` must be cancel-safe: the broadcaster races it against timers
/// and drops it when another branch wins, and no message may be lost when
/// that happens.
#[async_trait]
pub trait Connection: Send {
    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next text message; `Ok(None)` once the peer closed.
    async fn receive(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the connection. Best effort; never fails.
    async fn close(&mut self);

    /// Peer description, for logs.
    fn peer(&self) -> String;
}
