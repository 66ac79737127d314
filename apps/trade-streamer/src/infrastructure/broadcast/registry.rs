//! Session Registry
//!
//! Tracks every joined session. Sessions are inserted on a successful
//! channel handshake and removed when their `SessionGuard` drops, which
//! covers normal termination, transport failure and task cancellation
//! alike.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::event::Event;
use crate::infrastructure::metrics;

/// Unique identifier for a joined session.
pub type SessionId = Uuid;

/// Public view of one registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Channel the client joined.
    pub channel: String,
    /// Peer description.
    pub peer: String,
    /// When the handshake completed.
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionEntry {
    info: SessionInfo,
    notices: mpsc::Sender<Event>,
}

/// Set of active sessions keyed by session ID.
///
/// The lock is only held for map operations; nothing awaits while holding
/// it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. It stays registered until the guard drops.
    #[must_use]
    pub fn register(
        self: &Arc<Self>,
        info: SessionInfo,
        notices: mpsc::Sender<Event>,
    ) -> SessionGuard {
        let id = info.id;
        let count = {
            let mut sessions = self.sessions.write();
            sessions.insert(id, SessionEntry { info, notices });
            sessions.len()
        };
        metrics::set_active_sessions(count);

        SessionGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    fn remove(&self, id: SessionId) -> bool {
        let (removed, count) = {
            let mut sessions = self.sessions.write();
            let removed = sessions.remove(&id).is_some();
            (removed, sessions.len())
        };
        metrics::set_active_sessions(count);
        removed
    }

    /// Number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Whether `id` is still registered.
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Snapshot of all sessions, oldest first.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .read()
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        out.sort_by_key(|info| info.joined_at);
        out
    }

    /// Snapshot of every session's notice queue.
    pub(crate) fn notice_senders(&self) -> Vec<(SessionId, mpsc::Sender<Event>)> {
        self.sessions
            .read()
            .iter()
            .map(|(id, entry)| (*id, entry.notices.clone()))
            .collect()
    }
}

/// Keeps a session registered; removes it on drop.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl SessionGuard {
    /// The guarded session's ID.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

// =============================================================================
// Tests
// =============================================================================
