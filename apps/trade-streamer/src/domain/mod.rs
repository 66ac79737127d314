//! Domain Layer - Core replay types and ordering logic.
//!
//! This layer contains the trade records, the wire event model and the
//! replay cursor. Nothing here performs I/O; datasets arrive through the
//! `DatasetSource` port and events leave through the `Connection` port.

/// Replay cursor over a timestamp-ordered dataset.
pub mod cursor;

/// Wire event model (Info, Trade, Error).
pub mod event;

/// Trade records and the immutable dataset.
pub mod record;

/// Channel-name gating.
pub mod subscription;
