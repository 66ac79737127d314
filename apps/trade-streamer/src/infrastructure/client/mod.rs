//! Stream Client
//!
//! Minimal WebSocket client for the streamer: connects, names a channel,
//! and decodes what the server sends back.
//!
//! # Protocol
//!
//! The first frame the client sends is the bare channel name. The server
//! answers with JSON events, or with a plaintext notice when the channel
//! is unknown, in which case the client may send another name.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::domain::event::Event;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the stream client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not open the WebSocket.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Target URL.
        url: String,
        /// Underlying cause.
        reason: String,
    },

    /// WebSocket error after connecting.
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// A JSON frame was not a valid event.
    #[error("malformed event: {0}")]
    Decode(#[from] serde_json::Error),
}

// =============================================================================
// Messages
// =============================================================================

/// One decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// A stream event.
    Event(Event),
    /// Plaintext notice, such as a channel rejection.
    Notice(String),
}

impl ServerMessage {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Decode` for a JSON object that is not a valid
    /// event. Anything that is not a JSON object is a notice.
    pub fn decode(text: &str) -> Result<Self, ClientError> {
        match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => Ok(Self::Event(serde_json::from_value(value)?)),
            Ok(_) | Err(_) => Ok(Self::Notice(text.to_string())),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// `ws://host:port` for a streamer.
#[must_use]
pub fn build_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}")
}

/// Connection parameters for one stream subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamClient {
    host: String,
    port: u16,
    channel: String,
}

impl StreamClient {
    /// Client for `channel` on `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, channel: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            channel: channel.into(),
        }
    }

    /// Server URL.
    #[must_use]
    pub fn url(&self) -> String {
        build_url(&self.host, self.port)
    }

    /// Channel this client joins.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Connect and send the channel name.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connect` if the WebSocket cannot be opened and
    /// `ClientError::Transport` if the channel name cannot be sent.
    pub async fn connect(&self) -> Result<ClientStream, ClientError> {
        let url = self.url();
        let (ws, _response) =
            tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|err| ClientError::Connect {
                    url: url.clone(),
                    reason: err.to_string(),
                })?;

        let mut stream = ClientStream { ws };
        stream.send_text(&self.channel).await?;
        debug!(%url, channel = %self.channel, "Channel requested");
        Ok(stream)
    }
}

/// An open client connection.
#[derive(Debug)]
pub struct ClientStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ClientStream {
    /// Send a text frame, for example another channel name after a
    /// rejection.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the frame cannot be sent.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.ws.send(Message::text(text.to_owned())).await?;
        Ok(())
    }

    /// Next decoded server frame; `None` once the server closed.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` on transport failure or a malformed event.
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>, ClientError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return ServerMessage::decode(&text).map(Some),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(
                    tokio_tungstenite::tungstenite::Error::ConnectionClosed
                    | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
                )) => return Ok(None),
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the close handshake fails.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use crate::domain::event::EventKind;

    use super::*;

    #[test]
    fn url_from_host_and_port() {
        assert_eq!(build_url("localhost", 8000), "ws://localhost:8000");
        assert_eq!(StreamClient::new("10.0.0.5", 9001, "sample").url(), "ws://10.0.0.5:9001");
    }

    #[test]
    fn json_frames_decode_as_events() {
        let text = r#"{"type":"Trade","timestamp":7,"data":[{"timestamp":7,"symbol":"A"}]}"#;
        let ServerMessage::Event(event) = ServerMessage::decode(text).unwrap() else {
            panic!("expected an event");
        };
        assert_eq!(event.kind(), EventKind::Trade);
        assert_eq!(event.timestamp(), 7);
        assert_eq!(event.records().len(), 1);
    }

    #[test]
    fn plaintext_frames_are_notices() {
        let text = "unknown channel \"x\". Available channels: sample";
        assert_eq!(
            ServerMessage::decode(text).unwrap(),
            ServerMessage::Notice(text.to_string())
        );
    }

    #[test_case(r#""stream paused""# ; "quoted string")]
    #[test_case("42" ; "number")]
    #[test_case("[1, 2]" ; "array")]
    #[test_case("null" ; "null")]
    fn json_values_that_are_not_objects_are_notices(text: &str) {
        assert_eq!(
            ServerMessage::decode(text).unwrap(),
            ServerMessage::Notice(text.to_string())
        );
    }

    #[test]
    fn json_object_that_is_not_an_event_is_an_error() {
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"Quote","timestamp":1,"data":"x"}"#),
            Err(ClientError::Decode(_))
        ));
    }
}
