//! Parquet dataset source.
//!
//! Reads every row group into Arrow record batches and converts each row to
//! an ordered JSON object through the Arrow JSON writer, so column order and
//! value rendering match the file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use arrow::json::WriterBuilder;
use arrow::json::writer::JsonArray;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map, Value};
use tracing::debug;

use crate::application::ports::{DatasetError, DatasetSource};
use crate::domain::record::{DEFAULT_TIMESTAMP_COLUMN, TradeRecord};

/// Dataset stored in a single Parquet file.
#[derive(Debug, Clone)]
pub struct ParquetSource {
    path: PathBuf,
    timestamp_column: String,
}

impl ParquetSource {
    /// Source reading `path`, ordering rows by the `timestamp` column.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
        }
    }

    /// Use a different ordering column.
    #[must_use]
    pub fn with_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = column.into();
        self
    }

    /// File being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> DatasetError {
        DatasetError::unavailable(self.path.display().to_string(), reason)
    }
}

impl DatasetSource for ParquetSource {
    fn load(&self) -> Result<Vec<TradeRecord>, DatasetError> {
        let file = File::open(&self.path).map_err(|err| self.unavailable(err))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|err| self.unavailable(err))?
            .build()
            .map_err(|err| self.unavailable(err))?;

        let mut records = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|err| self.unavailable(err))?;
            debug!(rows = batch.num_rows(), "Read record batch");

            let batch = normalize_timestamps(&batch).map_err(|err| self.unavailable(err))?;
            for fields in batch_rows(&batch).map_err(|err| self.unavailable(err))? {
                let row = records.len();
                let record = TradeRecord::from_fields(fields, &self.timestamp_column)
                    .map_err(|error| DatasetError::InvalidRecord { row, error })?;
                records.push(record);
            }
        }

        Ok(records)
    }

    fn name(&self) -> &'static str {
        "parquet"
    }
}

/// Rewrite every `Timestamp` column as epoch milliseconds (`Int64`).
fn normalize_timestamps(batch: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    let schema = batch.schema();
    if !schema
        .fields()
        .iter()
        .any(|field| matches!(field.data_type(), DataType::Timestamp(..)))
    {
        return Ok(batch.clone());
    }

    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut columns = Vec::with_capacity(batch.num_columns());
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        if let DataType::Timestamp(_, tz) = field.data_type() {
            let millis = cast(column, &DataType::Timestamp(TimeUnit::Millisecond, tz.clone()))?;
            columns.push(cast(&millis, &DataType::Int64)?);
            fields.push(Field::new(field.name(), DataType::Int64, field.is_nullable()));
        } else {
            columns.push(Arc::clone(column));
            fields.push(field.as_ref().clone());
        }
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

/// Convert a batch to one ordered JSON object per row, nulls included.
fn batch_rows(batch: &RecordBatch) -> Result<Vec<Map<String, Value>>, ArrowError> {
    if batch.num_rows() == 0 {
        return Ok(Vec::new());
    }

    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    writer.write(batch)?;
    writer.finish()?;

    serde_json::from_slice(&writer.into_inner())
        .map_err(|err| ArrowError::JsonError(err.to_string()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use arrow::array::{
        ArrayRef, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
    };
    use parquet::arrow::ArrowWriter;
    use tempfile::NamedTempFile;

    use super::*;

    fn write_parquet(batch: &RecordBatch) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let mut writer = ArrowWriter::try_new(file.reopen().unwrap(), batch.schema(), None).unwrap();
        writer.write(batch).unwrap();
        writer.close().unwrap();
        file
    }

    fn trades_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("symbol", DataType::Utf8, false),
            Field::new("timestamp", DataType::Int64, false),
            Field::new("price", DataType::Float64, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["B", "A", "C"])),
            Arc::new(Int64Array::from(vec![2, 1, 2])),
            Arc::new(Float64Array::from(vec![Some(10.5), None, Some(11.0)])),
        ];
        RecordBatch::try_new(schema, columns).unwrap()
    }

    #[test]
    fn loads_rows_in_file_order_with_column_order() {
        let file = write_parquet(&trades_batch());
        let records = ParquetSource::new(file.path()).load().unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].timestamp(), 2);
        let keys: Vec<_> = records[0].fields().keys().cloned().collect();
        assert_eq!(keys, vec!["symbol", "timestamp", "price"]);
        assert_eq!(records[1].get("price"), Some(&Value::Null));
    }

    #[test]
    fn timestamp_columns_become_epoch_millis() {
        let schema = Arc::new(Schema::new(vec![
            Field::new(
                "ts",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("symbol", DataType::Utf8, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(
                TimestampMicrosecondArray::from(vec![1_700_000_000_123_456, 1_700_000_001_000_000])
                    .with_timezone("UTC"),
            ),
            Arc::new(StringArray::from(vec!["X", "Y"])),
        ];
        let file = write_parquet(&RecordBatch::try_new(schema, columns).unwrap());

        let records = ParquetSource::new(file.path())
            .with_timestamp_column("ts")
            .load()
            .unwrap();

        assert_eq!(records[0].timestamp(), 1_700_000_000_123);
        assert_eq!(records[0].get("ts"), Some(&Value::from(1_700_000_000_123_i64)));
        assert_eq!(records[1].timestamp(), 1_700_000_001_000);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = ParquetSource::new("/nonexistent/trades.parquet")
            .load()
            .unwrap_err();
        assert!(matches!(err, DatasetError::Unavailable { .. }));
    }

    #[test]
    fn non_parquet_file_is_unavailable() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"symbol,timestamp\nA,1\n").unwrap();

        let err = ParquetSource::new(file.path()).load().unwrap_err();
        assert!(matches!(err, DatasetError::Unavailable { .. }));
    }

    #[test]
    fn missing_timestamp_column_is_rejected() {
        let file = write_parquet(&trades_batch());
        let err = ParquetSource::new(file.path())
            .with_timestamp_column("time")
            .load()
            .unwrap_err();
        assert!(matches!(err, DatasetError::InvalidRecord { row: 0, .. }));
    }
}
