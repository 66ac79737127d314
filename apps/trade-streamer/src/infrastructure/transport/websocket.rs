//! WebSocket Transport
//!
//! Accept loop and per-connection adapter over `tokio-tungstenite`.
//! Each accepted TCP stream is upgraded and handed to
//! `Broadcaster::serve` on its own task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::application::ports::{Connection, TransportError};
use crate::infrastructure::broadcast::Broadcaster;
use crate::infrastructure::metrics;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// =============================================================================
// Connection Adapter
// =============================================================================

/// One upgraded WebSocket connection.
#[derive(Debug)]
pub struct WsConnection {
    stream: WebSocketStream<TcpStream>,
    peer: SocketAddr,
}

impl WsConnection {
    /// Wrap an upgraded stream.
    #[must_use]
    pub const fn new(stream: WebSocketStream<TcpStream>, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(map_ws_error)
    }

    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Ping replies are queued by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    return match map_ws_error(err) {
                        TransportError::Closed => Ok(None),
                        other => Err(other),
                    };
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(peer = %self.peer, error = %err, "Close handshake incomplete");
        }
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => TransportError::Closed,
        WsError::Io(source)
            if matches!(
                source.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ) =>
        {
            TransportError::Closed
        }
        other => TransportError::Failed(other.to_string()),
    }
}

// =============================================================================
// Accept Loop
// =============================================================================

/// WebSocket server feeding accepted connections to a `Broadcaster`.
#[derive(Debug)]
pub struct WebSocketServer {
    listener: TcpListener,
    broadcaster: Arc<Broadcaster>,
}

impl WebSocketServer {
    /// Bind to `addr` (for example `127.0.0.1:8000`; port 0 picks one).
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the address cannot be bound.
    pub async fn bind(addr: &str, broadcaster: Arc<Broadcaster>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, broadcaster))
    }

    /// Serve on an already bound listener.
    #[must_use]
    pub const fn from_listener(listener: TcpListener, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            listener,
            broadcaster,
        }
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the broadcaster's shutdown token fires,
    /// then wait for every open session to finish.
    pub async fn run(self) {
        let shutdown = self.broadcaster.shutdown_token().clone();
        let mut sessions = JoinSet::new();

        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "WebSocket server listening");
        }

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        metrics::record_connection_accepted();
                        info!(%peer, "Connection accepted");
                        sessions.spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&self.broadcaster),
                        ));
                    }
                    Err(err) => {
                        warn!(error = %err, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        info!(open_sessions = sessions.len(), "Accept loop stopped");
        while sessions.join_next().await.is_some() {}
        info!("All sessions closed");
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, broadcaster: Arc<Broadcaster>) {
    let upgraded = tokio::select! {
        () = broadcaster.shutdown_token().cancelled() => return,
        upgraded = tokio_tungstenite::accept_async(stream) => upgraded,
    };

    match upgraded {
        Ok(ws) => {
            broadcaster.serve(WsConnection::new(ws, peer)).await;
        }
        Err(err) => {
            warn!(%peer, error = %err, "WebSocket upgrade failed");
        }
    }
}
