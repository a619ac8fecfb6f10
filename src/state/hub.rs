use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    dto::ws::{EventFrame, ReplyFrame},
    state::poll::ConnectionId,
};

/// Message queued for one connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Server-pushed event.
    Event(EventFrame),
    /// Reply to an inbound intent.
    Reply(ReplyFrame),
    /// Close the socket after flushing what came before.
    Close,
}

/// Registry of open client connections, each drained by its own writer task.
///
/// Delivery is best-effort: a connection whose writer has gone away is dropped
/// from the registry on the next send.
#[derive(Default)]
pub struct ClientHub {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
}

impl ClientHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and hand back the queue its writer drains.
    pub fn register(&self, id: ConnectionId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);
        rx
    }

    /// Forget a connection. Returns whether it was registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    /// Whether the connection is still registered.
    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Queue `frame` for every connection. Returns how many accepted it.
    pub fn broadcast_to_all(&self, frame: EventFrame) -> usize {
        self.fan_out(frame, None)
    }

    /// Queue `frame` for every connection but `excluded`.
    pub fn broadcast_except(&self, excluded: ConnectionId, frame: EventFrame) -> usize {
        self.fan_out(frame, Some(excluded))
    }

    /// Queue a message for a single connection.
    pub fn send_to_one(&self, id: ConnectionId, outbound: Outbound) -> bool {
        let delivered = self
            .connections
            .get(&id)
            .is_some_and(|tx| tx.send(outbound).is_ok());
        if !delivered {
            self.drop_if_closed(id);
        }
        delivered
    }

    /// Ask the connection's writer to close the socket and forget the connection.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(Outbound::Close);
                true
            }
            None => false,
        }
    }

    fn fan_out(&self, frame: EventFrame, excluded: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.connections.iter() {
            if Some(*entry.key()) == excluded {
                continue;
            }
            if entry.value().send(Outbound::Event(frame.clone())).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.drop_if_closed(id);
        }
        delivered
    }

    fn drop_if_closed(&self, id: ConnectionId) {
        if self
            .connections
            .remove_if(&id, |_, tx| tx.is_closed())
            .is_some()
        {
            debug!(connection = %id, "dropped closed connection from hub");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn frame(name: &str) -> EventFrame {
        EventFrame {
            event: name.into(),
            data: json!({}),
        }
    }

    #[test]
    fn broadcast_except_skips_one_connection() {
        let hub = ClientHub::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = hub.register(a);
        let mut rx_b = hub.register(b);

        assert_eq!(hub.broadcast_except(a, frame("students:updated")), 1);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(
            rx_b.try_recv().unwrap(),
            Outbound::Event(frame("students:updated"))
        );
    }

    #[test]
    fn closed_receivers_are_pruned() {
        let hub = ClientHub::new();
        let gone = Uuid::new_v4();
        drop(hub.register(gone));
        let _alive = hub.register(Uuid::new_v4());

        assert_eq!(hub.broadcast_to_all(frame("poll:started")), 1);
        assert!(!hub.is_connected(gone));
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn disconnect_queues_close_and_unregisters() {
        let hub = ClientHub::new();
        let id = Uuid::new_v4();
        let mut rx = hub.register(id);

        assert!(hub.disconnect(id));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(!hub.send_to_one(id, Outbound::Event(frame("late"))));
        assert!(!hub.disconnect(id));
    }
}
