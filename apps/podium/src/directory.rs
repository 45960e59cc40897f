use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::ServerEvent;

/// Maps a connection id to its outbound delivery handle. Delivery is
/// best-effort: a missing or closed recipient is skipped, never
/// surfaced to the sender.
#[derive(Clone, Default)]
pub struct ConnectionDirectory {
    connections: Arc<DashMap<String, mpsc::UnboundedSender<ServerEvent>>>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn_id: String, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.connections.insert(conn_id, tx);
    }

    pub fn unregister(&self, conn_id: &str) {
        self.connections.remove(conn_id);
    }

    /// Deliver an event to one connection. Returns whether the event
    /// was handed to a live channel.
    pub fn send(&self, conn_id: &str, event: ServerEvent) -> bool {
        match self.connections.get(conn_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => {
                debug!(conn_id, "dropping event for unknown connection");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
