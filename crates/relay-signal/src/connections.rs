//! Outbound queues for every open transport session
//!
//! Each connection owns a bounded queue drained by its own task. Sending never
//! blocks: a full or closed queue drops the message and logs it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::messages::ServerMessage;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle for one live transport session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Queued message; broadcasts share one allocation across all receivers
pub type Outbound = Arc<ServerMessage>;

struct OutboundSender {
    connection: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

impl OutboundSender {
    fn deliver(&self, msg: Outbound) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    connection = %self.connection,
                    event = msg.event(),
                    "Send queue full, message dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection = %self.connection, "Send queue closed");
                false
            }
        }
    }
}

/// Send capability over all open connections
pub struct ConnectionDirectory {
    senders: DashMap<ConnectionId, OutboundSender>,
    queue_size: usize,
}

impl ConnectionDirectory {
    pub fn new(queue_size: usize) -> Self {
        Self {
            senders: DashMap::new(),
            queue_size: queue_size.max(1),
        }
    }

    /// Open a queue for `connection`; the caller drains the receiver
    pub fn attach(&self, connection: ConnectionId) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(self.queue_size);
        self.senders
            .insert(connection, OutboundSender { connection, tx });
        rx
    }

    /// Drop the queue for `connection`. Returns false if it was already gone.
    pub fn detach(&self, connection: ConnectionId) -> bool {
        self.senders.remove(&connection).is_some()
    }

    /// Queue a message for one connection
    pub fn send_to(&self, connection: ConnectionId, msg: ServerMessage) -> bool {
        match self.senders.get(&connection) {
            Some(sender) => sender.deliver(Arc::new(msg)),
            None => {
                debug!(%connection, "Send to unknown connection");
                false
            }
        }
    }

    /// Queue a message for every connection. Returns how many accepted it.
    pub fn broadcast_all(&self, msg: ServerMessage) -> usize {
        let msg: Outbound = Arc::new(msg);
        self.senders
            .iter()
            .filter(|sender| sender.deliver(msg.clone()))
            .count()
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.senders.contains_key(&connection)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(name: &str) -> ServerMessage {
        ServerMessage::ConnectionRejected {
            target_device_name: name.into(),
        }
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_send_to_attached() {
        let directory = ConnectionDirectory::new(8);
        let conn = ConnectionId::next();
        let mut rx = directory.attach(conn);

        assert!(directory.send_to(conn, rejected("B")));
        let msg = rx.try_recv().unwrap();
        assert!(matches!(
            msg.as_ref(),
            ServerMessage::ConnectionRejected { target_device_name } if target_device_name == "B"
        ));
    }

    #[test]
    fn test_send_to_unknown_connection() {
        let directory = ConnectionDirectory::new(8);
        assert!(!directory.send_to(ConnectionId::next(), rejected("B")));
    }

    #[test]
    fn test_full_queue_drops() {
        let directory = ConnectionDirectory::new(1);
        let conn = ConnectionId::next();
        let mut rx = directory.attach(conn);

        assert!(directory.send_to(conn, rejected("first")));
        assert!(!directory.send_to(conn, rejected("second")));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_drops() {
        let directory = ConnectionDirectory::new(4);
        let conn = ConnectionId::next();
        drop(directory.attach(conn));

        assert!(!directory.send_to(conn, rejected("B")));
    }

    #[test]
    fn test_broadcast_all_preserves_order() {
        let directory = ConnectionDirectory::new(8);
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        let mut rx_a = directory.attach(a);
        let mut rx_b = directory.attach(b);

        assert_eq!(directory.broadcast_all(rejected("one")), 2);
        assert!(directory.send_to(b, rejected("two")));

        for rx in [&mut rx_a, &mut rx_b] {
            let first = rx.try_recv().unwrap();
            assert!(matches!(
                first.as_ref(),
                ServerMessage::ConnectionRejected { target_device_name } if target_device_name == "one"
            ));
        }
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_detach_is_idempotent() {
        let directory = ConnectionDirectory::new(8);
        let conn = ConnectionId::next();
        let _rx = directory.attach(conn);

        assert!(directory.contains(conn));
        assert!(directory.detach(conn));
        assert!(!directory.detach(conn));
        assert!(directory.is_empty());
    }
}
