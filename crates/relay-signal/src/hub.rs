//! Shared signaling state
//!
//! [`SignalHub`] owns the registry of online devices and the outbound queues of
//! every open connection. Connection tasks hold it behind an `Arc` and feed it
//! decoded [`ClientMessage`]s. Registry mutations broadcast the new directory
//! while still holding the registry lock, so every connection sees directory
//! updates in mutation order.

use std::net::IpAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use relay_core::{AddressTemplates, Config};

use crate::connections::{ConnectionDirectory, ConnectionId, Outbound};
use crate::directory::{self, DeviceListing};
use crate::messages::{ClientMessage, ServerMessage};
use crate::negotiation::PendingNegotiations;
use crate::registry::{DeviceSession, Registration, Registry};

/// Transport-level identity of the sender of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Peer {
    pub connection: ConnectionId,
    pub source_addr: IpAddr,
}

pub struct SignalHub {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) connections: ConnectionDirectory,
    pub(crate) addresses: AddressTemplates,
    /// Present only when request tracking is enabled
    pub(crate) negotiations: Option<Mutex<PendingNegotiations>>,
}

impl SignalHub {
    pub fn new(config: &Config) -> Self {
        let negotiations = config.negotiation.track_requests.then(|| {
            Mutex::new(PendingNegotiations::new(Duration::from_secs(
                config.negotiation.request_ttl_secs,
            )))
        });

        Self {
            registry: Mutex::new(Registry::new()),
            connections: ConnectionDirectory::new(config.limits.send_queue_size),
            addresses: AddressTemplates::new(&config.tunnel),
            negotiations,
        }
    }

    /// Open the outbound queue for a new transport session
    pub fn connect(&self, connection: ConnectionId) -> mpsc::Receiver<Outbound> {
        debug!(%connection, "Connection attached");
        self.connections.attach(connection)
    }

    /// Route one decoded message from `peer`
    pub fn dispatch(&self, peer: Peer, msg: ClientMessage) {
        match msg {
            ClientMessage::RegisterDevice(d) => {
                self.register_device(peer.connection, &d.device_id, &d.device_name, peer.source_addr);
            }
            ClientMessage::RequestConnection(r) => {
                self.request_connection(&r.from_device_id, &r.from_device_name, &r.target_device_id);
            }
            ClientMessage::AcceptConnection(a) => {
                self.accept_connection(
                    peer.connection,
                    &a.from_device_id,
                    &a.target_device_id,
                    &a.target_device_name,
                );
            }
            ClientMessage::RejectConnection(r) => {
                self.reject_connection(peer.connection, &r.from_device_id, &r.target_device_name);
            }
            ClientMessage::RelaySignal(s) => {
                self.relay_signal(&s.from_device_id, &s.target_device_id, s.signal);
            }
        }
    }

    /// Register `device_id` on `connection`, replacing any earlier session for
    /// the same id. Replies `tunnel-created` and broadcasts the directory.
    pub fn register_device(
        &self,
        connection: ConnectionId,
        device_id: &str,
        device_name: &str,
        source_addr: IpAddr,
    ) -> DeviceSession {
        let mut registry = self.registry.lock();
        let Registration { session, replaced } =
            registry.register(connection, device_id, device_name, source_addr);

        for old in &replaced {
            debug!(
                device_id = %old.device_id,
                connection = %old.connection,
                "Superseded by new registration"
            );
            if old.device_id != session.device_id {
                self.forget_negotiations(&old.device_id);
            }
        }

        self.connections.send_to(
            connection,
            ServerMessage::TunnelCreated {
                tunnel_id: session.tunnel_id.clone(),
                public_url: self.addresses.public_url(&session.tunnel_id),
            },
        );
        self.connections
            .broadcast_all(directory::devices_updated(&registry));

        info!(
            device_id = %session.device_id,
            device_name = %session.device_name,
            tunnel_id = %session.tunnel_id,
            %connection,
            "Device registered"
        );
        session
    }

    /// Transport closed. Purges the connection's session and, if there was
    /// one, broadcasts the directory to everyone left. Safe to call twice.
    pub fn disconnect(&self, connection: ConnectionId) -> Option<DeviceSession> {
        self.connections.detach(connection);

        let mut registry = self.registry.lock();
        let Some(session) = registry.remove_by_connection(connection) else {
            debug!(%connection, "Connection closed without a registered device");
            return None;
        };
        self.connections
            .broadcast_all(directory::devices_updated(&registry));
        drop(registry);

        self.forget_negotiations(&session.device_id);
        info!(
            device_id = %session.device_id,
            device_name = %session.device_name,
            %connection,
            "Device disconnected"
        );
        Some(session)
    }

    /// Copy of the session for `device_id`, if online
    pub fn lookup(&self, device_id: &str) -> Option<DeviceSession> {
        self.registry.lock().lookup(device_id)
    }

    /// Current directory listing
    pub fn listing(&self) -> Vec<DeviceListing> {
        directory::listing(&self.registry.lock())
    }

    /// Number of registered devices (for monitoring)
    pub fn device_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Number of open transport sessions (for monitoring)
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn forget_negotiations(&self, device_id: &str) {
        if let Some(negotiations) = &self.negotiations {
            let dropped = negotiations.lock().forget_device(device_id);
            if dropped > 0 {
                debug!(%device_id, dropped, "Dropped pending negotiations");
            }
        }
    }
}
