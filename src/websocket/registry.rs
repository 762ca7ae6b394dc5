/// WebSocket Connection Registry
///
/// Tracks every currently-open client connection and fans broadcast frames
/// out to all of them. Connections carry no identity at this layer: a
/// registration is just a channel sender for serialized frames.
///
/// The registry is an explicitly constructed instance (one per process,
/// created at startup and cloned into handlers), shared behind
/// `Arc<RwLock<..>>` because the actix runtime is multi-threaded. Broadcast
/// iterates a snapshot of the membership taken at call start, so concurrent
/// register/unregister from other connections' lifecycle events never
/// invalidates an in-flight broadcast.
use crate::metrics;
use crate::websocket::BroadcastMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Sender half of a connection's outbound frame channel
pub type ConnectionSender = mpsc::UnboundedSender<String>;

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionSender>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a newly-handshaken connection to the active set.
    ///
    /// No capacity limit is enforced. Returns the id used for cleanup.
    pub async fn register(&self, sender: ConnectionSender) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.write().await.insert(id, sender);
        metrics::set_active_connections(self.connection_count().await);
        id
    }

    /// Remove a connection from the active set.
    ///
    /// Idempotent: removing an already-absent connection is a no-op.
    pub async fn unregister(&self, id: ConnectionId) {
        self.connections.write().await.remove(&id);
        metrics::set_active_connections(self.connection_count().await);
    }

    /// Number of currently-open connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Deliver a message to every connection active at call time.
    ///
    /// Best-effort, fire-and-forget: a send failure on one connection never
    /// prevents delivery to the others. Failed senders are unregistered
    /// before returning, so a dead connection is gone from the active set
    /// once the broadcast completes. Returns the number of successful sends.
    pub async fn broadcast(&self, message: &BroadcastMessage) -> usize {
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to serialize broadcast frame");
                return 0;
            }
        };

        // Snapshot the membership so concurrent mutation cannot invalidate
        // the iteration.
        let snapshot: Vec<(ConnectionId, ConnectionSender)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .map(|(id, sender)| (*id, sender.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sender) in snapshot {
            if sender.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut connections = self.connections.write().await;
            for id in &dead {
                connections.remove(id);
            }
            debug!(pruned = dead.len(), "pruned dead connections during broadcast");
        }

        metrics::record_broadcast(delivered, dead.len());
        delivered
    }
}
