//! Configuration Module
//!
//! Configuration loading for the streamer service.

mod settings;

pub use settings::{ConfigError, DatasetSettings, ServerSettings, StreamerConfig};
