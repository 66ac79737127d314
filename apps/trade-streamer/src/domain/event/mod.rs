//! Wire Event Model
//!
//! Closed set of events exchanged with clients:
//!
//! - `Info`: service notifications such as the channel-join acknowledgment
//! - `Trade`: every record sharing one timestamp, delivered together
//! - `Error`: terminal signal, e.g. end of stream
//!
//! # Wire Format
//!
//! ```text
//! {"type": "Info" | "Trade" | "Error", "timestamp": <number>, "data": <string | [record, ...]>}
//! ```
//!
//! A `Trade` always carries an array, even for a single record.

use chrono::Utc;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::domain::record::TradeRecord;

/// Message carried by the terminal event once a cursor runs out of data.
pub const STREAM_EXHAUSTED: &str = "stream exhausted";

// =============================================================================
// Event Kind
// =============================================================================

/// Discriminant of an `Event`, as written in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Service notification.
    Info,
    /// Stacked trade group.
    Trade,
    /// Terminal signal.
    Error,
}

impl EventKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Trade => "trade",
            Self::Error => "error",
        }
    }
}

// =============================================================================
// Event
// =============================================================================

/// An event delivered to one client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireEvent")]
pub enum Event {
    /// Service notification.
    Info {
        /// Server wall clock, epoch milliseconds.
        timestamp: i64,
        /// Human-readable notice.
        message: String,
    },
    /// All records sharing `timestamp`, in dataset order.
    Trade {
        /// Timestamp shared by every record.
        timestamp: i64,
        /// The stacked group.
        records: Vec<TradeRecord>,
    },
    /// Terminal signal.
    Error {
        /// Server wall clock, epoch milliseconds.
        timestamp: i64,
        /// Reason.
        message: String,
    },
}

impl Event {
    /// Service notification stamped with the current time.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            timestamp: now_millis(),
            message: message.into(),
        }
    }

    /// Stacked trade group.
    #[must_use]
    pub const fn trade(timestamp: i64, records: Vec<TradeRecord>) -> Self {
        Self::Trade { timestamp, records }
    }

    /// Terminal signal stamped with the current time.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            timestamp: now_millis(),
            message: message.into(),
        }
    }

    /// End-of-stream signal.
    #[must_use]
    pub fn exhausted() -> Self {
        Self::error(STREAM_EXHAUSTED)
    }

    /// Channel-join acknowledgment.
    #[must_use]
    pub fn joined(channel: &str) -> Self {
        Self::info(format!("joined {channel}"))
    }

    /// Variant discriminant.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Info { .. } => EventKind::Info,
            Self::Trade { .. } => EventKind::Trade,
            Self::Error { .. } => EventKind::Error,
        }
    }

    /// Event timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        match self {
            Self::Info { timestamp, .. }
            | Self::Trade { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Whether this event ends the session.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Records of a `Trade`, empty for other variants.
    #[must_use]
    pub fn records(&self) -> &[TradeRecord] {
        match self {
            Self::Trade { records, .. } => records,
            Self::Info { .. } | Self::Error { .. } => &[],
        }
    }

    /// Encode as a wire message.
    ///
    /// # Errors
    ///
    /// Returns an error if a record column cannot be encoded as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a wire message.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a well-formed event.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = match self {
            Self::Info { message, .. } | Self::Error { message, .. } => WireData::Message(message),
            Self::Trade { records, .. } => WireData::Records(records),
        };
        WireEventRef {
            kind: self.kind(),
            timestamp: self.timestamp(),
            data,
        }
        .serialize(serializer)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Wire Representation
// =============================================================================

#[derive(Serialize)]
struct WireEventRef<'a> {
    #[serde(rename = "type")]
    kind: EventKind,
    timestamp: i64,
    data: WireData<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireData<'a> {
    Message(&'a str),
    Records(&'a [TradeRecord]),
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    timestamp: i64,
    data: Value,
}

/// Decoding failures beyond plain JSON syntax.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// `data` has the wrong shape for the event type.
    #[error("{kind:?} event expects {expected} data")]
    UnexpectedData {
        /// Event type being decoded.
        kind: EventKind,
        /// Expected shape.
        expected: &'static str,
    },
}

impl TryFrom<WireEvent> for Event {
    type Error = WireError;

    fn try_from(wire: WireEvent) -> Result<Self, WireError> {
        let WireEvent {
            kind,
            timestamp,
            data,
        } = wire;

        match (kind, data) {
            (EventKind::Info, Value::String(message)) => Ok(Event::Info { timestamp, message }),
            (EventKind::Error, Value::String(message)) => Ok(Event::Error { timestamp, message }),
            (EventKind::Trade, Value::Array(rows)) => rows
                .into_iter()
                .map(|row| match row {
                    Value::Object(fields) => Ok(TradeRecord::new(timestamp, fields)),
                    _ => Err(WireError::UnexpectedData {
                        kind,
                        expected: "array-of-objects",
                    }),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|records| Event::Trade { timestamp, records }),
            (EventKind::Trade, _) => Err(WireError::UnexpectedData {
                kind,
                expected: "array",
            }),
            (EventKind::Info | EventKind::Error, _) => Err(WireError::UnexpectedData {
                kind,
                expected: "string",
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::record::DEFAULT_TIMESTAMP_COLUMN;

    fn record(value: Value) -> TradeRecord {
        TradeRecord::from_json(value, DEFAULT_TIMESTAMP_COLUMN).unwrap()
    }

    #[test]
    fn info_wire_shape() {
        let event = Event::Info {
            timestamp: 10,
            message: "joined sample".to_string(),
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({ "type": "Info", "timestamp": 10, "data": "joined sample" })
        );
    }

    #[test]
    fn single_record_trade_is_still_an_array() {
        let event = Event::trade(5, vec![record(json!({ "timestamp": 5, "symbol": "X" }))]);
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "Trade",
                "timestamp": 5,
                "data": [{ "timestamp": 5, "symbol": "X" }]
            })
        );
    }

    #[test]
    fn trade_preserves_field_and_record_order() {
        let event = Event::trade(
            5,
            vec![
                record(json!({ "timestamp": 5, "symbol": "X", "price": 1 })),
                record(json!({ "timestamp": 5, "symbol": "Y", "price": 2 })),
            ],
        );
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"type":"Trade","timestamp":5,"data":[{"timestamp":5,"symbol":"X","price":1},{"timestamp":5,"symbol":"Y","price":2}]}"#
        );
    }

    #[test]
    fn exhausted_is_terminal_error() {
        let event = Event::exhausted();
        assert_eq!(event.kind(), EventKind::Error);
        assert!(event.is_terminal());
        assert!(matches!(event, Event::Error { ref message, .. } if message == STREAM_EXHAUSTED));
    }

    #[test]
    fn joined_message() {
        let event = Event::joined("sample");
        assert!(matches!(event, Event::Info { ref message, .. } if message == "joined sample"));
        assert!(!event.is_terminal());
    }

    #[test]
    fn decode_trade_rebuilds_records() {
        let text = r#"{"type":"Trade","timestamp":3,"data":[{"symbol":"D","timestamp":3}]}"#;
        let event = Event::from_json(text).unwrap();

        assert_eq!(event.kind(), EventKind::Trade);
        assert_eq!(event.timestamp(), 3);
        assert_eq!(event.records().len(), 1);
        assert_eq!(event.records()[0].get("symbol"), Some(&json!("D")));
        assert_eq!(event.records()[0].timestamp(), 3);
    }

    #[test]
    fn decode_trade_with_custom_timestamp_column_uses_event_timestamp() {
        let text = r#"{"type":"Trade","timestamp":7,"data":[{"ts":7,"symbol":"X"}]}"#;
        let event = Event::from_json(text).unwrap();

        let record = &event.records()[0];
        assert_eq!(record.timestamp(), 7);
        assert_eq!(record.get("timestamp"), None);
        assert_eq!(record.get("ts"), Some(&json!(7)));
    }

    #[test]
    fn decode_rejects_mismatched_data() {
        assert!(Event::from_json(r#"{"type":"Trade","timestamp":1,"data":"oops"}"#).is_err());
        assert!(Event::from_json(r#"{"type":"Info","timestamp":1,"data":[]}"#).is_err());
        assert!(Event::from_json(r#"{"type":"Trade","timestamp":1,"data":[1]}"#).is_err());
        assert!(Event::from_json(r#"{"type":"Bogus","timestamp":1,"data":"x"}"#).is_err());
    }

    #[test]
    fn kind_labels() {
        assert_eq!(EventKind::Info.as_str(), "info");
        assert_eq!(EventKind::Trade.as_str(), "trade");
        assert_eq!(EventKind::Error.as_str(), "error");
    }

    #[test]
    fn non_trade_events_have_no_records() {
        assert!(Event::info("hi").records().is_empty());
        assert!(Event::exhausted().records().is_empty());
    }
}
