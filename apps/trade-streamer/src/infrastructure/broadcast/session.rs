//! Session state machine: channel handshake, then paced streaming.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Broadcaster, SessionError, SessionInfo, SessionOutcome};
use crate::application::ports::{Connection, TransportError};
use crate::domain::event::Event;
use crate::infrastructure::metrics;

/// Result of the channel handshake.
enum Handshake {
    Joined(String),
    Closed,
    Shutdown,
}

/// One wait on the connection.
enum Incoming {
    Message(String),
    Closed,
    Shutdown,
}

/// End of a rejection grace interval.
enum Grace {
    Elapsed(Option<String>),
    Closed,
    Shutdown,
}

/// A send raced against shutdown.
enum Delivery {
    Sent,
    Shutdown,
}

/// Upper bound on the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// What woke the pacing wait.
enum Wake {
    Shutdown,
    Received(Option<String>),
    Notice(Event),
    Resume,
}

impl Broadcaster {
    /// Run one connection to completion.
    ///
    /// Waits for a valid channel name, then streams events until the
    /// dataset is exhausted, the client leaves, the transport fails, or the
    /// shutdown token fires. The connection is closed on every path.
    pub async fn serve<C: Connection>(&self, mut conn: C) -> SessionOutcome {
        let peer = conn.peer();

        let outcome = match self.await_channel(&mut conn, &peer).await {
            Ok(Handshake::Joined(channel)) => self.stream_session(&mut conn, channel, &peer).await,
            Ok(Handshake::Closed) => SessionOutcome::NeverJoined,
            Ok(Handshake::Shutdown) => SessionOutcome::Shutdown,
            Err(err) => outcome_from_error(err),
        };

        if tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await.is_err() {
            debug!(%peer, "Close handshake timed out");
        }
        metrics::record_session_ended(outcome.as_str());
        debug!(%peer, outcome = outcome.as_str(), "Connection closed");
        outcome
    }

    async fn await_channel<C: Connection>(
        &self,
        conn: &mut C,
        peer: &str,
    ) -> Result<Handshake, SessionError> {
        let mut pending: Option<String> = None;

        loop {
            let requested = match pending.take() {
                Some(message) => message,
                None => match self.receive_or_shutdown(conn).await? {
                    Incoming::Message(message) => message,
                    Incoming::Closed => return Ok(Handshake::Closed),
                    Incoming::Shutdown => return Ok(Handshake::Shutdown),
                },
            };

            match self.channel_for(&requested) {
                Ok(channel) => {
                    return Ok(match self.deliver(conn, &Event::joined(&channel)).await? {
                        Delivery::Sent => Handshake::Joined(channel),
                        Delivery::Shutdown => Handshake::Shutdown,
                    });
                }
                Err(rejection) => {
                    warn!(%peer, requested = %requested.trim(), "Unknown channel requested");
                    metrics::record_channel_rejected();
                    if let Delivery::Shutdown = self.send_text(conn, rejection.to_string()).await? {
                        return Ok(Handshake::Shutdown);
                    }

                    match self.rejection_grace(conn).await? {
                        Grace::Elapsed(early) => pending = early,
                        Grace::Closed => return Ok(Handshake::Closed),
                        Grace::Shutdown => return Ok(Handshake::Shutdown),
                    }
                }
            }
        }
    }

    async fn receive_or_shutdown<C: Connection>(
        &self,
        conn: &mut C,
    ) -> Result<Incoming, TransportError> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Ok(Incoming::Shutdown),
            received = conn.receive() => {
                received.map(|message| message.map_or(Incoming::Closed, Incoming::Message))
            }
        }
    }

    /// Wait out the grace interval while still noticing close and shutdown.
    /// The first message that arrives is held for the next attempt.
    async fn rejection_grace<C: Connection>(&self, conn: &mut C) -> Result<Grace, TransportError> {
        let deadline = tokio::time::sleep(self.settings.rejection_grace);
        tokio::pin!(deadline);
        let mut early: Option<String> = None;

        loop {
            let received = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Ok(Grace::Shutdown),
                () = &mut deadline => return Ok(Grace::Elapsed(early)),
                received = conn.receive(), if early.is_none() => received?,
            };

            match received {
                Some(message) => early = Some(message),
                None => return Ok(Grace::Closed),
            }
        }
    }

    async fn stream_session<C: Connection>(
        &self,
        conn: &mut C,
        channel: String,
        peer: &str,
    ) -> SessionOutcome {
        let (notice_tx, mut notices) = mpsc::channel(self.settings.notice_capacity.max(1));
        let guard = self.registry.register(
            SessionInfo {
                id: Uuid::new_v4(),
                channel: channel.clone(),
                peer: peer.to_string(),
                joined_at: Utc::now(),
            },
            notice_tx,
        );
        let session_id = guard.id();
        let started = Instant::now();
        let mut cursor = self.new_cursor();
        let mut events_sent: u64 = 0;

        info!(
            %session_id,
            %peer,
            %channel,
            start_position = cursor.position(),
            "Session joined"
        );

        let outcome = loop {
            let event = self.stream.next(&mut cursor);
            if !event.is_terminal() {
                self.advance_frontier(cursor.position());
            }

            match self.deliver(conn, &event).await {
                Ok(Delivery::Sent) => events_sent += 1,
                Ok(Delivery::Shutdown) => break SessionOutcome::Shutdown,
                Err(err) => break outcome_from_error(err.into()),
            }

            if event.is_terminal() {
                break SessionOutcome::Exhausted;
            }

            match self.pace(conn, &mut notices, &mut events_sent).await {
                Ok(None) => {}
                Ok(Some(outcome)) => break outcome,
                Err(err) => break outcome_from_error(err),
            }
        };

        drop(guard);
        metrics::record_session_duration(started.elapsed());
        info!(
            %session_id,
            %channel,
            events_sent,
            outcome = outcome.as_str(),
            "Session finished"
        );
        outcome
    }

    /// Wait out the send delay while serving notices and watching the
    /// connection. `Some` ends the session.
    async fn pace<C: Connection>(
        &self,
        conn: &mut C,
        notices: &mut mpsc::Receiver<Event>,
        events_sent: &mut u64,
    ) -> Result<Option<SessionOutcome>, SessionError> {
        let pause = pause_for(self.settings.send_delay);
        tokio::pin!(pause);

        loop {
            let wake = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => Wake::Shutdown,
                received = conn.receive() => Wake::Received(received?),
                Some(notice) = notices.recv() => Wake::Notice(notice),
                () = &mut pause => Wake::Resume,
            };

            match wake {
                Wake::Shutdown => return Ok(Some(SessionOutcome::Shutdown)),
                Wake::Received(None) => return Ok(Some(SessionOutcome::ClientClosed)),
                Wake::Received(Some(text)) => {
                    debug!(len = text.len(), "Ignoring client message while streaming");
                }
                Wake::Notice(notice) => {
                    if let Delivery::Shutdown = self.deliver(conn, &notice).await? {
                        return Ok(Some(SessionOutcome::Shutdown));
                    }
                    *events_sent += 1;
                }
                Wake::Resume => return Ok(None),
            }
        }
    }

    /// Encode and send one event.
    async fn deliver<C: Connection>(
        &self,
        conn: &mut C,
        event: &Event,
    ) -> Result<Delivery, TransportError> {
        let text = event
            .to_json()
            .map_err(|err| TransportError::Failed(format!("encode event: {err}")))?;
        let delivery = self.send_text(conn, text).await?;
        if let Delivery::Sent = delivery {
            metrics::record_event_sent(event.kind());
        }
        Ok(delivery)
    }

    /// Send unless shutdown fires first, so a client that stops reading
    /// cannot hold its session open past shutdown.
    async fn send_text<C: Connection>(
        &self,
        conn: &mut C,
        text: String,
    ) -> Result<Delivery, TransportError> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Ok(Delivery::Shutdown),
            sent = conn.send(text) => sent.map(|()| Delivery::Sent),
        }
    }
}

async fn pause_for(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn outcome_from_error(err: SessionError) -> SessionOutcome {
    match err {
        SessionError::Transport(TransportError::Closed) => SessionOutcome::ClientClosed,
        SessionError::Transport(err) => {
            warn!(error = %err, "Session transport failed");
            SessionOutcome::TransportFailed(err)
        }
        SessionError::ChannelRejected { .. } => SessionOutcome::NeverJoined,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::domain::cursor::StreamCursor;
    use crate::domain::event::{EventKind, STREAM_EXHAUSTED};
    use crate::domain::record::{Dataset, TradeRecord};
    use crate::domain::subscription::ChannelSet;
    use crate::infrastructure::broadcast::{BroadcasterSettings, ReplayStart};
    use crate::infrastructure::transport::MemoryConnection;

    const WAIT: Duration = Duration::from_secs(5);

    fn rec(timestamp: i64, symbol: &str) -> TradeRecord {
        TradeRecord::from_json(
            json!({ "timestamp": timestamp, "symbol": symbol, "price": 1.5 }),
            "timestamp",
        )
        .unwrap()
    }

    fn dataset() -> Dataset {
        Dataset::new(vec![
            rec(1, "A"),
            rec(1, "B"),
            rec(2, "C"),
            rec(3, "D"),
            rec(3, "E"),
        ])
    }

    fn settings() -> BroadcasterSettings {
        BroadcasterSettings {
            channels: ChannelSet::new(["sample", "live"]),
            rejection_grace: Duration::from_millis(30),
            ..BroadcasterSettings::default()
        }
    }

    fn broadcaster(settings: BroadcasterSettings) -> Arc<Broadcaster> {
        Arc::new(Broadcaster::new(
            settings,
            StreamCursor::new(dataset()),
            CancellationToken::new(),
        ))
    }

    fn spawn_session(
        broadcaster: &Arc<Broadcaster>,
    ) -> (MemoryConnection, JoinHandle<SessionOutcome>) {
        let (server, client) = MemoryConnection::pair(16);
        let broadcaster = Arc::clone(broadcaster);
        let handle = tokio::spawn(async move { broadcaster.serve(server).await });
        (client, handle)
    }

    async fn recv_text(client: &mut MemoryConnection) -> String {
        timeout(WAIT, client.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    async fn recv_event(client: &mut MemoryConnection) -> Event {
        Event::from_json(&recv_text(client).await).unwrap()
    }

    async fn drain_until_terminal(client: &mut MemoryConnection) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let event = recv_event(client).await;
            let done = event.is_terminal();
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn valid_channel_joins_and_streams_to_exhaustion() {
        let broadcaster = broadcaster(settings());
        let (mut client, handle) = spawn_session(&broadcaster);

        client.send("sample".to_string()).await.unwrap();
        let joined = recv_event(&mut client).await;
        assert_eq!(joined.kind(), EventKind::Info);
        assert!(matches!(&joined, Event::Info { message, .. } if message == "joined sample"));

        let events = drain_until_terminal(&mut client).await;
        let timestamps: Vec<_> = events.iter().map(Event::timestamp).collect();
        assert_eq!(&timestamps[..2], &[2, 3]);
        assert_eq!(events[1].records().len(), 2);
        assert!(matches!(&events[2], Event::Error { message, .. } if message == STREAM_EXHAUSTED));

        let outcome = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Exhausted);
        assert!(timeout(WAIT, client.receive()).await.unwrap().unwrap().is_none());
        assert!(broadcaster.registry().is_empty());
    }

    #[tokio::test]
    async fn channel_name_whitespace_is_ignored() {
        let broadcaster = broadcaster(settings());
        let (mut client, _handle) = spawn_session(&broadcaster);

        client.send(" live\n".to_string()).await.unwrap();
        let joined = recv_event(&mut client).await;
        assert!(matches!(&joined, Event::Info { message, .. } if message == "joined live"));
    }

    #[tokio::test]
    async fn unknown_channel_is_rejected_then_retried() {
        let broadcaster = broadcaster(settings());
        let (mut client, handle) = spawn_session(&broadcaster);

        client.send("nope".to_string()).await.unwrap();
        let rejection = recv_text(&mut client).await;
        assert_eq!(
            rejection,
            "unknown channel \"nope\". Available channels: live, sample"
        );
        assert!(Event::from_json(&rejection).is_err());
        assert!(broadcaster.registry().is_empty());
        assert_eq!(broadcaster.frontier(), 0);

        client.send("sample".to_string()).await.unwrap();
        let joined = recv_event(&mut client).await;
        assert_eq!(joined.kind(), EventKind::Info);

        drain_until_terminal(&mut client).await;
        assert_eq!(
            timeout(WAIT, handle).await.unwrap().unwrap(),
            SessionOutcome::Exhausted
        );
    }

    #[tokio::test]
    async fn close_during_grace_never_joins() {
        let broadcaster = broadcaster(BroadcasterSettings {
            rejection_grace: Duration::from_secs(60),
            ..settings()
        });
        let (mut client, handle) = spawn_session(&broadcaster);

        client.send("nope".to_string()).await.unwrap();
        recv_text(&mut client).await;
        assert!(broadcaster.registry().is_empty());
        assert_eq!(broadcaster.frontier(), 0);
        client.close().await;

        let outcome = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::NeverJoined);
        assert!(broadcaster.registry().is_empty());
        assert_eq!(broadcaster.frontier(), 0);
    }

    #[tokio::test]
    async fn close_before_handshake_never_joins() {
        let broadcaster = broadcaster(settings());
        let (mut client, handle) = spawn_session(&broadcaster);
        client.close().await;

        let outcome = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::NeverJoined);
        assert!(broadcaster.registry().is_empty());
    }

    #[tokio::test]
    async fn client_close_mid_stream_deregisters() {
        let broadcaster = broadcaster(BroadcasterSettings {
            send_delay: Duration::from_secs(60),
            ..settings()
        });
        let (mut client, handle) = spawn_session(&broadcaster);

        client.send("sample".to_string()).await.unwrap();
        recv_event(&mut client).await;
        let first = recv_event(&mut client).await;
        assert_eq!(first.timestamp(), 2);
        assert_eq!(broadcaster.registry().len(), 1);

        client.close().await;
        let outcome = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::ClientClosed);
        assert!(broadcaster.registry().is_empty());
    }

    #[tokio::test]
    async fn shutdown_ends_streaming_sessions() {
        let broadcaster = broadcaster(BroadcasterSettings {
            send_delay: Duration::from_secs(60),
            ..settings()
        });
        let (mut client, handle) = spawn_session(&broadcaster);

        client.send("sample".to_string()).await.unwrap();
        recv_event(&mut client).await;
        recv_event(&mut client).await;

        broadcaster.shutdown_token().cancel();
        let outcome = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Shutdown);
    }

    #[tokio::test]
    async fn shutdown_ends_session_blocked_on_stalled_reader() {
        let broadcaster = broadcaster(settings());
        let (server, mut client) = MemoryConnection::pair(1);
        let handle = tokio::spawn({
            let broadcaster = Arc::clone(&broadcaster);
            async move { broadcaster.serve(server).await }
        });

        // The join ack fills the buffer; the first trade send then blocks.
        client.send("sample".to_string()).await.unwrap();
        timeout(WAIT, async {
            while broadcaster.frontier() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        broadcaster.shutdown_token().cancel();
        let outcome = timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Shutdown);
        assert!(broadcaster.registry().is_empty());
        drop(client);
    }

    #[tokio::test]
    async fn shutdown_before_handshake() {
        let broadcaster = broadcaster(settings());
        let (_client, handle) = spawn_session(&broadcaster);

        broadcaster.shutdown_token().cancel();
        let outcome = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Shutdown);
    }

    #[tokio::test]
    async fn announce_reaches_streaming_session() {
        let broadcaster = broadcaster(BroadcasterSettings {
            send_delay: Duration::from_secs(60),
            ..settings()
        });
        let (mut client, _handle) = spawn_session(&broadcaster);

        client.send("sample".to_string()).await.unwrap();
        recv_event(&mut client).await;
        recv_event(&mut client).await;

        assert_eq!(broadcaster.announce("maintenance at noon"), 1);
        let notice = recv_event(&mut client).await;
        assert!(
            matches!(&notice, Event::Info { message, .. } if message == "maintenance at noon")
        );
    }

    #[tokio::test]
    async fn sessions_replay_independently() {
        let broadcaster = broadcaster(settings());
        let (mut first, _a) = spawn_session(&broadcaster);
        let (mut second, _b) = spawn_session(&broadcaster);

        first.send("sample".to_string()).await.unwrap();
        second.send("live".to_string()).await.unwrap();
        recv_event(&mut first).await;
        recv_event(&mut second).await;

        let a: Vec<_> = drain_until_terminal(&mut first)
            .await
            .iter()
            .map(Event::timestamp)
            .collect();
        let b: Vec<_> = drain_until_terminal(&mut second)
            .await
            .iter()
            .map(Event::timestamp)
            .collect();
        assert_eq!(a[..2], b[..2]);
    }

    #[tokio::test]
    async fn emit_first_group_includes_stacked_first_timestamp() {
        let broadcaster = broadcaster(BroadcasterSettings {
            emit_first_group: true,
            ..settings()
        });
        let (mut client, _handle) = spawn_session(&broadcaster);

        client.send("sample".to_string()).await.unwrap();
        recv_event(&mut client).await;
        let first = recv_event(&mut client).await;
        assert_eq!(first.timestamp(), 1);
        assert_eq!(first.records().len(), 2);
    }

    #[tokio::test]
    async fn tail_mode_starts_at_frontier() {
        let broadcaster = broadcaster(BroadcasterSettings {
            replay_start: ReplayStart::Tail,
            ..settings()
        });

        let (mut first, first_handle) = spawn_session(&broadcaster);
        first.send("sample".to_string()).await.unwrap();
        recv_event(&mut first).await;
        drain_until_terminal(&mut first).await;
        timeout(WAIT, first_handle).await.unwrap().unwrap();
        assert_eq!(broadcaster.frontier(), 5);

        let (mut late, _handle) = spawn_session(&broadcaster);
        late.send("sample".to_string()).await.unwrap();
        recv_event(&mut late).await;
        let events = drain_until_terminal(&mut late).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }
}
