//! Registry of online devices
//!
//! Maps device ids to their live connection and back. The registry itself is
//! not synchronized; [`SignalHub`](crate::SignalHub) owns it behind a mutex so
//! a mutation and the broadcast that follows it are one critical section.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use relay_core::TunnelId;

use crate::connections::ConnectionId;

/// One online device
#[derive(Clone, Debug)]
pub struct DeviceSession {
    pub device_id: String,
    pub device_name: String,
    pub connection: ConnectionId,
    /// Address the device registered from
    pub source_addr: IpAddr,
    pub connected_at: DateTime<Utc>,
    /// Minted per registration
    pub tunnel_id: TunnelId,
    /// Registration order, used to sort snapshots
    seq: u64,
}

/// Result of [`Registry::register`]
#[derive(Debug)]
pub struct Registration {
    pub session: DeviceSession,
    /// Entries superseded by this registration: an older session with the
    /// same device id, and the connection's previous identity if it changed
    pub replaced: Vec<DeviceSession>,
}

#[derive(Default)]
pub struct Registry {
    devices: HashMap<String, DeviceSession>,
    by_connection: HashMap<ConnectionId, String>,
    next_seq: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, replacing any existing entry with the same id
    pub fn register(
        &mut self,
        connection: ConnectionId,
        device_id: &str,
        device_name: &str,
        source_addr: IpAddr,
    ) -> Registration {
        let mut replaced = Vec::new();

        // A connection owns one entry, so a new id retires the old one
        if let Some(previous_id) = self.by_connection.remove(&connection) {
            if previous_id != device_id {
                replaced.extend(self.devices.remove(&previous_id));
            }
        }

        if let Some(previous) = self.devices.remove(device_id) {
            if previous.connection != connection {
                self.by_connection.remove(&previous.connection);
            }
            replaced.push(previous);
        }

        self.next_seq += 1;
        let session = DeviceSession {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            connection,
            source_addr,
            connected_at: Utc::now(),
            tunnel_id: TunnelId::generate(),
            seq: self.next_seq,
        };

        self.devices.insert(session.device_id.clone(), session.clone());
        self.by_connection
            .insert(connection, session.device_id.clone());

        Registration { session, replaced }
    }

    /// Borrow the session for `device_id`
    pub fn get(&self, device_id: &str) -> Option<&DeviceSession> {
        self.devices.get(device_id)
    }

    /// Copy of the session for `device_id`
    pub fn lookup(&self, device_id: &str) -> Option<DeviceSession> {
        self.get(device_id).cloned()
    }

    /// Session currently owned by `connection`
    pub fn by_connection(&self, connection: ConnectionId) -> Option<&DeviceSession> {
        self.by_connection
            .get(&connection)
            .and_then(|id| self.devices.get(id))
    }

    /// Remove the session owned by `connection`, if any
    pub fn remove_by_connection(&mut self, connection: ConnectionId) -> Option<DeviceSession> {
        let device_id = self.by_connection.remove(&connection)?;
        self.devices.remove(&device_id)
    }

    /// Point-in-time copy of every session, in registration order
    pub fn snapshot(&self) -> Vec<DeviceSession> {
        let mut sessions: Vec<DeviceSession> = self.devices.values().cloned().collect();
        sessions.sort_by_key(|s| s.seq);
        sessions
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_register_and_lookup() {
        let mut registry = Registry::new();
        let conn = ConnectionId::next();

        let reg = registry.register(conn, "a", "Laptop", LOCALHOST);
        assert!(reg.replaced.is_empty());

        let found = registry.lookup("a").unwrap();
        assert_eq!(found.device_name, "Laptop");
        assert_eq!(found.connection, conn);
        assert_eq!(found.tunnel_id, reg.session.tunnel_id);
        assert_eq!(registry.by_connection(conn).unwrap().device_id, "a");
        assert!(registry.lookup("b").is_none());
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = Registry::new();
        let old_conn = ConnectionId::next();
        let new_conn = ConnectionId::next();

        let first = registry.register(old_conn, "a", "Old", LOCALHOST);
        let second = registry.register(new_conn, "a", "New", LOCALHOST);

        assert_eq!(second.replaced.len(), 1);
        assert_eq!(second.replaced[0].connection, old_conn);
        assert_ne!(first.session.tunnel_id, second.session.tunnel_id);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].device_name, "New");
        assert_eq!(snapshot[0].tunnel_id, second.session.tunnel_id);

        // The superseded connection no longer owns anything
        assert!(registry.by_connection(old_conn).is_none());
        assert!(registry.remove_by_connection(old_conn).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregister_same_connection() {
        let mut registry = Registry::new();
        let conn = ConnectionId::next();

        let first = registry.register(conn, "a", "A", LOCALHOST);
        let second = registry.register(conn, "a", "A", LOCALHOST);

        assert_eq!(second.replaced.len(), 1);
        assert_ne!(first.session.tunnel_id, second.session.tunnel_id);
        assert_eq!(registry.by_connection(conn).unwrap().tunnel_id, second.session.tunnel_id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_connection_changes_identity() {
        let mut registry = Registry::new();
        let conn = ConnectionId::next();

        registry.register(conn, "a", "A", LOCALHOST);
        let reg = registry.register(conn, "renamed", "A", LOCALHOST);

        assert_eq!(reg.replaced.len(), 1);
        assert_eq!(reg.replaced[0].device_id, "a");
        assert!(registry.lookup("a").is_none());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove_by_connection(conn).unwrap().device_id, "renamed");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_unique_and_ordered() {
        let mut registry = Registry::new();
        let ids = ["d1", "d2", "d3", "d4", "d5"];
        for id in ids {
            registry.register(ConnectionId::next(), id, id, LOCALHOST);
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), ids.len());
        let listed: Vec<&str> = snapshot.iter().map(|s| s.device_id.as_str()).collect();
        assert_eq!(listed, ids);

        // Re-registration moves a device to the end
        registry.register(ConnectionId::next(), "d2", "d2", LOCALHOST);
        let listed: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|s| s.device_id)
            .collect();
        assert_eq!(listed, ["d1", "d3", "d4", "d5", "d2"]);
    }

    #[test]
    fn test_remove_by_connection_idempotent() {
        let mut registry = Registry::new();
        let conn = ConnectionId::next();
        registry.register(conn, "a", "A", LOCALHOST);

        assert_eq!(registry.remove_by_connection(conn).unwrap().device_id, "a");
        assert!(registry.remove_by_connection(conn).is_none());
        assert!(registry.is_empty());
    }
}
