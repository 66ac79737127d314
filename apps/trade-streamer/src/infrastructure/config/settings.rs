//! Streamer Configuration Settings
//!
//! Configuration types for the trade streamer, loaded from environment
//! variables. Unparsable numeric values fall back to their defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::record::DEFAULT_TIMESTAMP_COLUMN;
use crate::domain::subscription::ChannelSet;
use crate::infrastructure::broadcast::{BroadcasterSettings, ReplayStart};

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Interface the WebSocket server binds to.
    pub host: String,
    /// WebSocket port.
    pub port: u16,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            health_port: 8082,
        }
    }
}

impl ServerSettings {
    /// `host:port` for the WebSocket listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Dataset location settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSettings {
    /// Parquet file to replay.
    pub path: PathBuf,
    /// Column holding the ordering timestamp.
    pub timestamp_column: String,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("trades_sample.parquet"),
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
        }
    }
}

/// Complete streamer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamerConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// Dataset settings.
    pub dataset: DatasetSettings,
    /// Session streaming settings, handed to the broadcaster as-is.
    pub stream: BroadcasterSettings,
}

impl StreamerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable is empty where a value is
    /// required, or if no channel is configured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let server_defaults = ServerSettings::default();
        let dataset_defaults = DatasetSettings::default();
        let stream_defaults = BroadcasterSettings::default();

        let server = ServerSettings {
            host: env.non_empty("STREAMER_HOST", server_defaults.host)?,
            port: env.parse("STREAMER_PORT", server_defaults.port),
            health_port: env.parse("STREAMER_HEALTH_PORT", server_defaults.health_port),
        };

        let dataset = DatasetSettings {
            path: env
                .non_empty(
                    "STREAMER_DATASET_PATH",
                    dataset_defaults.path.display().to_string(),
                )?
                .into(),
            timestamp_column: env.non_empty(
                "STREAMER_TIMESTAMP_COLUMN",
                dataset_defaults.timestamp_column,
            )?,
        };

        let channels = env
            .get("STREAMER_CHANNELS")
            .map_or(stream_defaults.channels, |list| ChannelSet::parse_list(&list));
        if channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }

        let stream = BroadcasterSettings {
            channels,
            send_delay: env.duration_millis("STREAMER_SEND_DELAY_MS", stream_defaults.send_delay),
            rejection_grace: env.duration_secs(
                "STREAMER_REJECT_GRACE_SECS",
                stream_defaults.rejection_grace,
            ),
            replay_start: env
                .get("STREAMER_REPLAY_START")
                .and_then(|v| ReplayStart::parse(&v))
                .unwrap_or(stream_defaults.replay_start),
            emit_first_group: env.flag("STREAMER_EMIT_FIRST_GROUP", stream_defaults.emit_first_group),
            notice_capacity: env
                .parse("STREAMER_NOTICE_CAPACITY", stream_defaults.notice_capacity)
                .max(1),
        };

        Ok(Self {
            server,
            dataset,
            stream,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// The channel list is empty after trimming.
    #[error("STREAMER_CHANNELS must name at least one channel")]
    NoChannels,
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn non_empty(&self, key: &str, default: String) -> Result<String, ConfigError> {
        match self.get(key) {
            Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(value) => Ok(value.trim().to_string()),
            None => Ok(default),
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map_or(default, |v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<StreamerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StreamerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, StreamerConfig::default());
        assert_eq!(config.server.bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.dataset.path, PathBuf::from("trades_sample.parquet"));
        assert_eq!(config.stream.rejection_grace, Duration::from_secs(10));
        assert!(config.stream.channels.contains("sample"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("STREAMER_HOST", "0.0.0.0"),
            ("STREAMER_PORT", "9001"),
            ("STREAMER_SEND_DELAY_MS", "250"),
            ("STREAMER_DATASET_PATH", "/data/trades.parquet"),
            ("STREAMER_TIMESTAMP_COLUMN", "ts"),
            ("STREAMER_CHANNELS", "live, sample"),
            ("STREAMER_REJECT_GRACE_SECS", "2"),
            ("STREAMER_REPLAY_START", "tail"),
            ("STREAMER_EMIT_FIRST_GROUP", "true"),
            ("STREAMER_NOTICE_CAPACITY", "8"),
            ("STREAMER_HEALTH_PORT", "0"),
        ])
        .unwrap();

        assert_eq!(config.server.bind_addr(), "0.0.0.0:9001");
        assert_eq!(config.server.health_port, 0);
        assert_eq!(config.stream.send_delay, Duration::from_millis(250));
        assert_eq!(config.dataset.timestamp_column, "ts");
        assert_eq!(config.stream.channels.to_string(), "live, sample");
        assert_eq!(config.stream.rejection_grace, Duration::from_secs(2));
        assert_eq!(config.stream.replay_start, ReplayStart::Tail);
        assert!(config.stream.emit_first_group);
        assert_eq!(config.stream.notice_capacity, 8);
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("STREAMER_PORT", "eighty"),
            ("STREAMER_SEND_DELAY_MS", "-5"),
            ("STREAMER_REPLAY_START", "sideways"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.stream.send_delay, Duration::ZERO);
        assert_eq!(config.stream.replay_start, ReplayStart::Beginning);
    }

    #[test_case("STREAMER_HOST")]
    #[test_case("STREAMER_DATASET_PATH")]
    #[test_case("STREAMER_TIMESTAMP_COLUMN")]
    fn empty_required_values_are_rejected(key: &str) {
        assert_eq!(
            config_from(&[(key, "  ")]),
            Err(ConfigError::EmptyValue(key.to_string()))
        );
    }

    #[test]
    fn empty_channel_list_is_rejected() {
        assert_eq!(
            config_from(&[("STREAMER_CHANNELS", " , ")]),
            Err(ConfigError::NoChannels)
        );
    }

    #[test]
    fn unset_stream_variables_give_broadcaster_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.stream, BroadcasterSettings::default());
    }
}
