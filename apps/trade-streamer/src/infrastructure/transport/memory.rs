//! In-process connection pair over bounded channels.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::ports::{Connection, TransportError};

/// One end of an in-memory connection.
///
/// Closing an end drops its sender; the other end's `receive` returns
/// `Ok(None)` once it has drained what was already sent.
#[derive(Debug)]
pub struct MemoryConnection {
    outgoing: Option<mpsc::Sender<String>>,
    incoming: mpsc::Receiver<String>,
    peer: String,
}

impl MemoryConnection {
    /// Two connected ends: `(server, client)`.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (to_client, from_server) = mpsc::channel(capacity.max(1));
        let (to_server, from_client) = mpsc::channel(capacity.max(1));

        let server = Self {
            outgoing: Some(to_client),
            incoming: from_client,
            peer: "memory:client".to_string(),
        };
        let client = Self {
            outgoing: Some(to_server),
            incoming: from_server,
            peer: "memory:server".to_string(),
        };
        (server, client)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::Closed)?;
        outgoing
            .send(text)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.incoming.recv().await)
    }

    async fn close(&mut self) {
        self.outgoing = None;
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}
