//! Tunnel identifiers and advertised addresses
//!
//! Every registration mints a fresh [`TunnelId`]. The addresses handed to
//! devices are built from configurable templates and are stable for a given
//! tunnel or device id for the lifetime of the process.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::TunnelConfig;

/// Number of random bytes in a tunnel id (hex-encoded on the wire)
pub const TUNNEL_ID_BYTES: usize = 16;

/// Placeholder replaced by the tunnel id in `public_url_template`
pub const TUNNEL_ID_PLACEHOLDER: &str = "{tunnel_id}";

/// Placeholder replaced by the device id in `peer_url_template`
pub const DEVICE_ID_PLACEHOLDER: &str = "{device_id}";

/// Opaque server-minted token identifying one registration of a device
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelId(String);

impl TunnelId {
    /// Mint a new random tunnel id
    ///
    /// # Panics
    /// Panics if the system random number generator fails (extremely rare).
    /// Use `try_generate` if you need to handle this case.
    pub fn generate() -> Self {
        Self::try_generate().expect("RNG failed - system entropy source unavailable")
    }

    /// Try to mint a new random tunnel id, returning an error if RNG fails
    pub fn try_generate() -> Result<Self, getrandom::Error> {
        let mut bytes = [0u8; TUNNEL_ID_BYTES];
        getrandom::fill(&mut bytes)?;
        Ok(Self(hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the `publicUrl` and `tunnelUrl` strings sent to devices
#[derive(Clone, Debug)]
pub struct AddressTemplates {
    public_url_template: String,
    peer_url_template: String,
}

impl AddressTemplates {
    pub fn new(config: &TunnelConfig) -> Self {
        Self {
            public_url_template: config.public_url_template.clone(),
            peer_url_template: config.peer_url_template.clone(),
        }
    }

    /// Address advertised to a device for its own tunnel
    pub fn public_url(&self, tunnel_id: &TunnelId) -> String {
        self.public_url_template
            .replace(TUNNEL_ID_PLACEHOLDER, tunnel_id.as_str())
    }

    /// Address handed to an initiator once `device_id` accepts
    pub fn peer_url(&self, device_id: &str) -> String {
        self.peer_url_template.replace(DEVICE_ID_PLACEHOLDER, device_id)
    }
}

impl Default for AddressTemplates {
    fn default() -> Self {
        Self::new(&TunnelConfig::default())
    }
}
