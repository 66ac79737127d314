//! Broadcaster
//!
//! Owns the shared replay cursor and drives every client connection through
//! the channel handshake and the streaming loop.
//!
//! # Architecture
//!
//! One `Broadcaster` is shared (behind an `Arc`) by all connection tasks.
//! Each `serve` call runs one session to completion:
//!
//! ```text
//! Awaiting-Channel ──valid──▶ Streaming ──exhausted/closed/shutdown──▶ Closed
//!        ▲    │
//!        └────┘ unknown channel: rejection text, grace interval, retry
//! ```
//!
//! Sessions keep private `CursorState`s over one `Arc<Dataset>`, so a slow
//! client never delays another. Announcements reach sessions through small
//! bounded per-session queues that drop on overflow.

mod registry;
mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use registry::{SessionGuard, SessionId, SessionInfo, SessionRegistry};

use crate::application::ports::TransportError;
use crate::domain::cursor::{CursorState, StreamCursor};
use crate::domain::event::Event;
use crate::domain::subscription::ChannelSet;
use crate::infrastructure::metrics;

// =============================================================================
// Settings
// =============================================================================

/// Where a newly joined session starts replaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayStart {
    /// Full replay from the start of the dataset.
    #[default]
    Beginning,
    /// Start at the furthest position any session has reached so far.
    Tail,
}

impl ReplayStart {
    /// Parse `beginning` or `tail`, ignoring case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "beginning" => Some(Self::Beginning),
            "tail" => Some(Self::Tail),
            _ => None,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beginning => "beginning",
            Self::Tail => "tail",
        }
    }
}

/// Immutable broadcaster settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcasterSettings {
    /// Joinable channels.
    pub channels: ChannelSet,
    /// Pause after each streamed event.
    pub send_delay: Duration,
    /// Wait after a rejected handshake before reading the next attempt.
    pub rejection_grace: Duration,
    /// Where new sessions start.
    pub replay_start: ReplayStart,
    /// Whether a fresh session's first event is the first timestamp group.
    pub emit_first_group: bool,
    /// Per-session announcement queue capacity.
    pub notice_capacity: usize,
}

impl Default for BroadcasterSettings {
    fn default() -> Self {
        Self {
            channels: ChannelSet::new(["sample"]),
            send_delay: Duration::ZERO,
            rejection_grace: Duration::from_secs(10),
            replay_start: ReplayStart::Beginning,
            emit_first_group: false,
            notice_capacity: 64,
        }
    }
}

// =============================================================================
// Errors and Outcomes
// =============================================================================

/// Failures inside one session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The client named a channel that is not configured. The Display text
    /// is exactly what the client receives.
    #[error("unknown channel {requested:?}. Available channels: {available}")]
    ChannelRejected {
        /// What the client sent.
        requested: String,
        /// Comma-separated configured channels.
        available: String,
    },

    /// Sending or receiving failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// How a served connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Closed before a successful handshake.
    NeverJoined,
    /// The stream ran out and the terminal event was delivered.
    Exhausted,
    /// The client went away mid-stream.
    ClientClosed,
    /// The transport failed.
    TransportFailed(TransportError),
    /// The server is shutting down.
    Shutdown,
}

impl SessionOutcome {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NeverJoined => "never_joined",
            Self::Exhausted => "exhausted",
            Self::ClientClosed => "client_closed",
            Self::TransportFailed(_) => "transport_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Shared session driver.
#[derive(Debug)]
pub struct Broadcaster {
    settings: BroadcasterSettings,
    stream: StreamCursor,
    registry: Arc<SessionRegistry>,
    frontier: AtomicUsize,
    shutdown: CancellationToken,
}

impl Broadcaster {
    /// Create a broadcaster over a loaded stream.
    ///
    /// Cancelling `shutdown` ends every session served by it.
    #[must_use]
    pub fn new(
        settings: BroadcasterSettings,
        stream: StreamCursor,
        shutdown: CancellationToken,
    ) -> Self {
        metrics::set_dataset_records(stream.dataset().len());
        Self {
            settings,
            stream,
            registry: Arc::new(SessionRegistry::new()),
            frontier: AtomicUsize::new(0),
            shutdown,
        }
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &BroadcasterSettings {
        &self.settings
    }

    /// The shared stream.
    #[must_use]
    pub const fn stream(&self) -> &StreamCursor {
        &self.stream
    }

    /// Active sessions.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Token that stops every session.
    #[must_use]
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Furthest dataset position any session has streamed to.
    #[must_use]
    pub fn frontier(&self) -> usize {
        self.frontier.load(Ordering::Acquire)
    }

    /// Send an `Info` notice to every joined session.
    ///
    /// Sessions whose notice queue is full miss this notice. Returns the
    /// number of sessions it was queued for.
    pub fn announce(&self, message: &str) -> usize {
        let mut delivered = 0;
        for (session_id, notices) in self.registry.notice_senders() {
            match notices.try_send(Event::info(message)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%session_id, "Notice queue full, dropping announcement");
                    metrics::record_notice_dropped();
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%session_id, "Session ended before announcement");
                }
            }
        }
        delivered
    }

    fn channel_for(&self, requested: &str) -> Result<String, SessionError> {
        self.settings
            .channels
            .resolve(requested)
            .map(ToString::to_string)
            .ok_or_else(|| SessionError::ChannelRejected {
                requested: requested.to_string(),
                available: self.settings.channels.to_string(),
            })
    }

    fn new_cursor(&self) -> CursorState {
        let start = match self.settings.replay_start {
            ReplayStart::Beginning => 0,
            ReplayStart::Tail => self.frontier(),
        };

        if start > 0 {
            self.stream.cursor_at(start)
        } else if self.settings.emit_first_group {
            self.stream.cursor_before_start()
        } else {
            self.stream.cursor()
        }
    }

    fn advance_frontier(&self, position: usize) {
        self.frontier.fetch_max(position, Ordering::AcqRel);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::record::Dataset;

    #[test_case("beginning", Some(ReplayStart::Beginning))]
    #[test_case(" Tail ", Some(ReplayStart::Tail))]
    #[test_case("live", None)]
    fn replay_start_parse(input: &str, expected: Option<ReplayStart>) {
        assert_eq!(ReplayStart::parse(input), expected);
    }

    #[test]
    fn rejection_text_lists_available_channels() {
        let err = SessionError::ChannelRejected {
            requested: "nope".to_string(),
            available: "live, sample".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unknown channel \"nope\". Available channels: live, sample"
        );
    }

    #[test]
    fn announce_without_sessions_reaches_nobody() {
        let broadcaster = Broadcaster::new(
            BroadcasterSettings::default(),
            StreamCursor::new(Dataset::default()),
            CancellationToken::new(),
        );
        assert_eq!(broadcaster.announce("hello"), 0);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(SessionOutcome::Exhausted.as_str(), "exhausted");
        assert_eq!(
            SessionOutcome::TransportFailed(TransportError::Closed).as_str(),
            "transport_failed"
        );
    }
}
