//! Application Layer - Port definitions.
//!
//! The contracts through which the replay engine reaches its dataset and
//! its clients. Adapters live in the infrastructure layer.

/// Port interfaces for external systems (dataset source, client transport).
pub mod ports;
