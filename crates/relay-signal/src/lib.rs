//! Relay Signal Server
//!
//! Rendezvous and signaling relay for device discovery. Devices connect via
//! WebSocket, register, discover each other through the directory, and
//! exchange opaque signaling payloads so they can set up a direct data path.
//!
//! # Protocol
//!
//! 1. Device registers and receives its tunnel id
//! 2. Every device receives the full directory on each change
//! 3. Initiator requests a connection; the target accepts or rejects
//! 4. Server relays signaling payloads between the two devices
//! 5. Peers establish their direct connection; the server is not involved

pub mod connections;
pub mod directory;
pub mod error;
pub mod hub;
pub mod messages;
pub mod negotiation;
pub mod registry;
pub mod relay;
pub mod server;

pub use connections::{ConnectionDirectory, ConnectionId, Outbound};
pub use directory::DeviceListing;
pub use error::ServerError;
pub use hub::{Peer, SignalHub};
pub use messages::{ClientMessage, MessageError, ServerMessage};
pub use negotiation::{Negotiation, NegotiationState, PendingNegotiations};
pub use registry::{DeviceSession, Registry};
pub use server::{DevicesResponse, SignalServer};
