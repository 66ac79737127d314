//! Trade Records and Dataset
//!
//! A `TradeRecord` is one row of the source dataset: an ordering key
//! (`timestamp`) plus every column of the row, kept in dataset column
//! order. The column set is opaque to the replay logic; only the
//! timestamp is interpreted.
//!
//! A `Dataset` is the full sequence of records, sorted once by timestamp
//! and immutable afterwards.

use std::ops::Range;

use chrono::DateTime;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Default name of the timestamp column.
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "timestamp";

// =============================================================================
// Errors
// =============================================================================

/// Reasons a row cannot become a `TradeRecord`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The row has no timestamp column, or it is null.
    #[error("missing timestamp column {column:?}")]
    MissingTimestamp {
        /// Expected column name.
        column: String,
    },

    /// The timestamp value cannot be read as an integer instant.
    #[error("invalid timestamp in column {column:?}: {value}")]
    InvalidTimestamp {
        /// Column name.
        column: String,
        /// Offending value, rendered as JSON.
        value: String,
    },

    /// The row is not a JSON object.
    #[error("record must be an object, got {0}")]
    NotAnObject(String),
}

// =============================================================================
// Trade Record
// =============================================================================

/// One immutable trade row.
///
/// Serializes to its column object verbatim, so field order on the wire
/// matches the dataset column order.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    timestamp: i64,
    fields: Map<String, Value>,
}

impl TradeRecord {
    /// Create a record from an already-known timestamp and its columns.
    #[must_use]
    pub const fn new(timestamp: i64, fields: Map<String, Value>) -> Self {
        Self { timestamp, fields }
    }

    /// Build a record from a column object, reading the ordering key from
    /// `timestamp_column`.
    ///
    /// # Errors
    ///
    /// Returns `RecordError` if the column is missing, null, or not an
    /// integer instant.
    pub fn from_fields(
        fields: Map<String, Value>,
        timestamp_column: &str,
    ) -> Result<Self, RecordError> {
        let raw = fields
            .get(timestamp_column)
            .filter(|v| !v.is_null())
            .ok_or_else(|| RecordError::MissingTimestamp {
                column: timestamp_column.to_string(),
            })?;

        let timestamp =
            parse_timestamp(raw).ok_or_else(|| RecordError::InvalidTimestamp {
                column: timestamp_column.to_string(),
                value: raw.to_string(),
            })?;

        Ok(Self { timestamp, fields })
    }

    /// Build a record from a JSON value (must be an object).
    ///
    /// # Errors
    ///
    /// Returns `RecordError` if the value is not an object or has no usable
    /// timestamp.
    pub fn from_json(value: Value, timestamp_column: &str) -> Result<Self, RecordError> {
        match value {
            Value::Object(fields) => Self::from_fields(fields, timestamp_column),
            other => Err(RecordError::NotAnObject(other.to_string())),
        }
    }

    /// Ordering key.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// All columns in dataset order.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Look up a single column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }
}

impl Serialize for TradeRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// Read an integer instant out of a JSON value.
///
/// Integers pass through, integral floats are accepted, and RFC 3339
/// strings are converted to epoch milliseconds.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

// =============================================================================
// Dataset
// =============================================================================

/// Timestamp-ordered, immutable sequence of trade records.
///
/// Sorting is stable: records sharing a timestamp keep their source order
/// inside the stacked group.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<TradeRecord>,
}

impl Dataset {
    /// Sort `records` by timestamp and freeze them.
    #[must_use]
    pub fn new(mut records: Vec<TradeRecord>) -> Self {
        records.sort_by_key(TradeRecord::timestamp);
        Self { records }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TradeRecord> {
        self.records.get(index)
    }

    /// All records in replay order.
    #[must_use]
    pub fn records(&self) -> &[TradeRecord] {
        &self.records
    }

    /// Timestamp of the earliest record.
    #[must_use]
    pub fn first_timestamp(&self) -> Option<i64> {
        self.records.first().map(TradeRecord::timestamp)
    }

    /// Index range of every record carrying exactly `timestamp`.
    ///
    /// Empty when no record matches.
    #[must_use]
    pub fn group_bounds(&self, timestamp: i64) -> Range<usize> {
        let start = self.records.partition_point(|r| r.timestamp < timestamp);
        let end = self.records.partition_point(|r| r.timestamp <= timestamp);
        start..end
    }

    /// Number of distinct timestamps (stacked groups).
    #[must_use]
    pub fn distinct_timestamps(&self) -> usize {
        let mut count = 0;
        let mut last = None;
        for record in &self.records {
            if last != Some(record.timestamp) {
                count += 1;
                last = Some(record.timestamp);
            }
        }
        count
    }
}

// =============================================================================
// Tests
// =============================================================================
