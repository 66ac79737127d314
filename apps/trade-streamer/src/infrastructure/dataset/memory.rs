//! In-memory dataset source.

use serde_json::Value;

use crate::application::ports::{DatasetError, DatasetSource};
use crate::domain::record::TradeRecord;

/// Records held in memory, handed out on every `load`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    records: Vec<TradeRecord>,
}

impl InMemorySource {
    /// Source over already-built records.
    #[must_use]
    pub const fn new(records: Vec<TradeRecord>) -> Self {
        Self { records }
    }

    /// Build from JSON objects, reading the ordering key from
    /// `timestamp_column`.
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::InvalidRecord` for the first row that is not
    /// an object or lacks a usable timestamp.
    pub fn from_json_rows(
        rows: impl IntoIterator<Item = Value>,
        timestamp_column: &str,
    ) -> Result<Self, DatasetError> {
        let records = rows
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                TradeRecord::from_json(value, timestamp_column)
                    .map_err(|error| DatasetError::InvalidRecord { row, error })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { records })
    }
}

impl DatasetSource for InMemorySource {
    fn load(&self) -> Result<Vec<TradeRecord>, DatasetError> {
        Ok(self.records.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_rows_load_in_given_order() {
        let source = InMemorySource::from_json_rows(
            vec![
                json!({ "timestamp": 2, "symbol": "B" }),
                json!({ "timestamp": 1, "symbol": "A" }),
            ],
            "timestamp",
        )
        .unwrap();

        let timestamps: Vec<_> = source
            .load()
            .unwrap()
            .iter()
            .map(TradeRecord::timestamp)
            .collect();
        assert_eq!(timestamps, vec![2, 1]);
    }

    #[test]
    fn bad_row_reports_its_index() {
        let err = InMemorySource::from_json_rows(
            vec![json!({ "timestamp": 1 }), json!({ "symbol": "A" })],
            "timestamp",
        )
        .unwrap_err();
        assert!(matches!(err, DatasetError::InvalidRecord { row: 1, .. }));
    }
}
