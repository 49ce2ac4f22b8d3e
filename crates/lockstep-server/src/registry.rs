//! Connection registry.
//!
//! Maps connection ids to the outbound queue of their writer task. The
//! session refers to participants by [`ConnectionId`] only; this is where an
//! id turns into something bytes can be pushed into.

use std::collections::HashMap;

use bytes::Bytes;
use lockstep_proto::ConnectionId;
use tokio::sync::mpsc::UnboundedSender;

/// Outbound queues of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, UnboundedSender<Bytes>>,
    next_id: ConnectionId,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outbound queue and return its fresh connection id.
    pub fn register(&mut self, outbound: UnboundedSender<Bytes>) -> ConnectionId {
        let conn_id = self.next_id;
        self.next_id += 1;
        self.connections.insert(conn_id, outbound);
        conn_id
    }

    /// Forget a connection. Dropping its sender ends the writer task.
    pub fn unregister(&mut self, conn_id: ConnectionId) -> bool {
        self.connections.remove(&conn_id).is_some()
    }

    /// Queue an encoded frame for a connection.
    ///
    /// Returns `false` if the connection is unknown or its writer has
    /// already exited.
    pub fn send(&self, conn_id: ConnectionId, frame: Bytes) -> bool {
        match self.connections.get(&conn_id) {
            Some(outbound) => outbound.send(frame).is_ok(),
            None => false,
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True if no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn ids_are_unique() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let a = registry.register(tx.clone());
        let b = registry.register(tx);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn send_reaches_the_writer_queue() {
        let mut registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx);

        assert!(registry.send(conn_id, Bytes::from_static(b"frame")));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"frame"));
    }

    #[test]
    fn send_to_unknown_or_closed_connection_fails() {
        let mut registry = ConnectionRegistry::new();
        assert!(!registry.send(7, Bytes::new()));

        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx);
        drop(rx);
        assert!(!registry.send(conn_id, Bytes::new()));
    }

    #[test]
    fn unregister_removes_connection() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx);

        assert!(registry.unregister(conn_id));
        assert!(!registry.unregister(conn_id));
        assert!(registry.is_empty());
    }
}
