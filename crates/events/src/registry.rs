//! Owner-keyed registry of live client connections.
//!
//! The registry knows nothing about the wire transport: each connection
//! is an unbounded channel of [`Outbound`] frames that the transport
//! task (WebSocket, SSE, ...) drains and writes to the socket.

use std::collections::HashMap;

use genforge_core::types::DbId;
use tokio::sync::{mpsc, RwLock};

/// A frame queued for delivery to one client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized JSON message.
    Text(String),
    /// Keep-alive probe.
    Ping,
    /// Ask the transport to close the connection.
    Close,
}

/// Channel sender half for pushing frames to a connection.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Metadata for a single live connection.
struct Connection {
    owner_id: DbId,
    sender: OutboundSender,
}

/// Manages all live client connections.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
}

impl ConnectionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection for `owner_id`.
    ///
    /// Returns the receiver half of the frame channel so the caller can
    /// forward frames to the socket.
    pub async fn add(&self, conn_id: String, owner_id: DbId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection {
            owner_id,
            sender: tx,
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Remove a connection by its ID.
    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Send a text frame to every connection of `owner_id`.
    ///
    /// Returns the number of connections the frame was queued on. Zero is
    /// normal: the owner simply has no live client.
    pub async fn send_to_owner(&self, owner_id: DbId, text: &str) -> usize {
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|conn| conn.owner_id == owner_id)
            .filter(|conn| conn.sender.send(Outbound::Text(text.to_string())).is_ok())
            .count()
    }

    /// Return the current number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Ping frame to every connection.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Outbound::Ping);
        }
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Outbound::Close);
        }
        conns.clear();
        tracing::info!(count, "Closed all client connections");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
