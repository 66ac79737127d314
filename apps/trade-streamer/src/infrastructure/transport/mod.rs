//! Connection transports.
//!
//! - `websocket`: production WebSocket server and connection adapter
//! - `memory`: in-process connection pair for tests and embedding

mod memory;
mod websocket;

pub use memory::MemoryConnection;
pub use websocket::{WebSocketServer, WsConnection};
