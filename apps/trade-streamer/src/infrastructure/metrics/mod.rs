//! Prometheus Metrics Module
//!
//! Exposes streamer metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Counts of events sent to clients by type
//! - **Sessions**: Active sessions and how sessions ended
//! - **Handshakes**: Rejected channel requests
//! - **Dataset**: Size of the loaded dataset
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until `init_metrics` installs the recorder, so
//! tests can call into code that records metrics without setup.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::event::EventKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "trade_streamer_events_sent_total",
        "Total events sent to clients by event type"
    );
    describe_counter!(
        "trade_streamer_notices_dropped_total",
        "Total announcements dropped because a session's notice queue was full"
    );
    describe_counter!(
        "trade_streamer_connections_total",
        "Total client connections accepted"
    );
    describe_counter!(
        "trade_streamer_channel_rejections_total",
        "Total handshake attempts naming an unknown channel"
    );
    describe_counter!(
        "trade_streamer_sessions_ended_total",
        "Total connections ended, by outcome"
    );

    describe_gauge!(
        "trade_streamer_active_sessions",
        "Number of sessions that completed the channel handshake"
    );
    describe_gauge!(
        "trade_streamer_dataset_records",
        "Number of records in the loaded dataset"
    );

    describe_histogram!(
        "trade_streamer_session_duration_seconds",
        "Wall-clock duration of joined sessions"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one event sent to a client.
pub fn record_event_sent(kind: EventKind) {
    counter!(
        "trade_streamer_events_sent_total",
        "event_type" => kind.as_str()
    )
    .increment(1);
}

/// Record an announcement dropped for a slow session.
pub fn record_notice_dropped() {
    counter!("trade_streamer_notices_dropped_total").increment(1);
}

/// Record an accepted client connection.
pub fn record_connection_accepted() {
    counter!("trade_streamer_connections_total").increment(1);
}

/// Record a rejected channel request.
pub fn record_channel_rejected() {
    counter!("trade_streamer_channel_rejections_total").increment(1);
}

/// Record how a connection ended.
pub fn record_session_ended(outcome: &'static str) {
    counter!(
        "trade_streamer_sessions_ended_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Update the active session gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_sessions(count: usize) {
    gauge!("trade_streamer_active_sessions").set(count as f64);
}

/// Update the dataset size gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_dataset_records(count: usize) {
    gauge!("trade_streamer_dataset_records").set(count as f64);
}

/// Record how long a joined session lasted.
pub fn record_session_duration(duration: Duration) {
    histogram!("trade_streamer_session_duration_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_event_sent(EventKind::Trade);
        record_notice_dropped();
        record_session_ended("exhausted");
        set_active_sessions(3);
        record_session_duration(Duration::from_millis(5));
    }

    #[test]
    fn init_is_idempotent_and_renders_registered_metrics() {
        init_metrics().unwrap();
        init_metrics().unwrap();
        set_dataset_records(42);

        let rendered = get_metrics_handle().unwrap().render();
        assert!(rendered.contains("trade_streamer_dataset_records"));
    }
}
