//! Replay Cursor
//!
//! Deterministic, grouped replay of a `Dataset`.
//!
//! # Design
//!
//! `StreamCursor` owns the shared, read-only dataset. Each subscriber
//! holds its own `CursorState` (read position plus the last timestamp it
//! was shown), so sessions never disturb each other's ordering.
//!
//! Each call to `next` emits exactly one stacked timestamp group, or the
//! terminal `Error` once the dataset is exhausted. A group whose timestamp
//! is not strictly newer than the last emitted one is skipped whole.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::application::ports::{DatasetError, DatasetSource};
use crate::domain::event::Event;
use crate::domain::record::Dataset;

// =============================================================================
// Cursor State
// =============================================================================

/// Per-subscriber replay position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorState {
    position: usize,
    last_emitted: Option<i64>,
    terminal: bool,
}

impl CursorState {
    /// Index of the next record to read.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Timestamp of the last group shown, or the seed timestamp.
    #[must_use]
    pub const fn last_emitted_timestamp(&self) -> Option<i64> {
        self.last_emitted
    }

    /// Whether the cursor has reported end of stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.terminal
    }
}

// =============================================================================
// Stream Cursor
// =============================================================================

/// Ordered, grouped reader over a shared dataset.
///
/// Cloning is cheap; clones share the same dataset.
#[derive(Debug, Clone)]
pub struct StreamCursor {
    dataset: Arc<Dataset>,
}

impl StreamCursor {
    /// Wrap an already-loaded dataset.
    #[must_use]
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset: Arc::new(dataset),
        }
    }

    /// Read every record from `source` and sort it for replay.
    ///
    /// # Errors
    ///
    /// Returns `DatasetError` if the source cannot be read. Callers treat
    /// this as fatal to startup.
    pub fn load(source: &dyn DatasetSource) -> Result<Self, DatasetError> {
        let started = Instant::now();
        let records = source.load()?;
        let dataset = Dataset::new(records);

        info!(
            source = source.name(),
            records = dataset.len(),
            distinct_timestamps = dataset.distinct_timestamps(),
            elapsed_ms = started.elapsed().as_millis(),
            "Dataset loaded"
        );

        Ok(Self::new(dataset))
    }

    /// The shared dataset.
    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Fresh cursor at the start of the dataset.
    ///
    /// The seed timestamp is that of the first record, so the first
    /// stacked group is treated as already shown and emission begins with
    /// the second distinct timestamp.
    #[must_use]
    pub fn cursor(&self) -> CursorState {
        CursorState {
            position: 0,
            last_emitted: self.dataset.first_timestamp(),
            terminal: false,
        }
    }

    /// Cursor seeded before the first record; its first call emits the
    /// first stacked group.
    #[must_use]
    pub const fn cursor_before_start(&self) -> CursorState {
        CursorState {
            position: 0,
            last_emitted: None,
            terminal: false,
        }
    }

    /// Cursor that resumes at `position`, treating everything before it as
    /// already shown. Position zero behaves like [`Self::cursor`].
    #[must_use]
    pub fn cursor_at(&self, position: usize) -> CursorState {
        let position = position.min(self.dataset.len());
        if position == 0 {
            return self.cursor();
        }

        CursorState {
            position,
            last_emitted: self
                .dataset
                .get(position - 1)
                .map(|record| record.timestamp()),
            terminal: false,
        }
    }

    /// Return a cursor to the fresh state of [`Self::cursor`].
    pub fn reset(&self, cursor: &mut CursorState) {
        *cursor = self.cursor();
    }

    /// Advance `cursor` by one stacked group.
    ///
    /// Returns `Trade` with every record sharing the next strictly newer
    /// timestamp, or `Error("stream exhausted")` once no such group is
    /// left. After the first `Error`, every further call returns `Error`
    /// again until [`Self::reset`].
    pub fn next(&self, cursor: &mut CursorState) -> Event {
        loop {
            if cursor.terminal {
                return Event::exhausted();
            }

            let Some(head) = self.dataset.get(cursor.position) else {
                cursor.terminal = true;
                return Event::exhausted();
            };

            let timestamp = head.timestamp();
            let group = self.dataset.group_bounds(timestamp);
            cursor.position = group.end;

            if cursor.last_emitted.is_some_and(|last| timestamp <= last) {
                continue;
            }

            cursor.last_emitted = Some(timestamp);
            return Event::trade(timestamp, self.dataset.records()[group].to_vec());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
