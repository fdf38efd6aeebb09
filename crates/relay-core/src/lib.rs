//! Relay Core - Configuration and tunnel addressing
//!
//! Shared by the signal server and anything embedding it. It has no
//! dependencies on networking code.

pub mod config;
pub mod tunnel;

pub use config::{Config, ConfigError, LimitsConfig, NegotiationConfig, ServerConfig, TunnelConfig};
pub use tunnel::{AddressTemplates, TunnelId};

/// Default listening port for the signal server
pub const DEFAULT_PORT: u16 = 3000;
