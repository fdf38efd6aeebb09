//! Configuration system for the relay server
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from an explicit path, or else from:
//! - macOS: ~/Library/Application Support/relay/config.toml
//! - Linux: ~/.config/relay/config.toml
//! - Windows: %APPDATA%/relay/config.toml

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::tunnel::{DEVICE_ID_PLACEHOLDER, TUNNEL_ID_PLACEHOLDER};
use crate::DEFAULT_PORT;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings
    pub server: ServerConfig,
    /// Advertised address templates
    pub tunnel: TunnelConfig,
    /// Per-connection limits
    pub limits: LimitsConfig,
    /// Negotiation tracking
    pub negotiation: NegotiationConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: IpAddr,
    /// Port shared by the WebSocket and HTTP surfaces
    pub port: u16,
    /// Take the device address from `X-Forwarded-For` when present
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            trust_forwarded_for: false,
        }
    }
}

/// Templates used to derive the addresses handed to devices
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// `publicUrl` sent in `tunnel-created`; `{tunnel_id}` is substituted
    pub public_url_template: String,
    /// `tunnelUrl` sent in `connection-accepted`; `{device_id}` is substituted
    pub peer_url_template: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            public_url_template: format!("finixdesk://{}.render.com", TUNNEL_ID_PLACEHOLDER),
            peer_url_template: format!("rdp://{}.finixdesk.com:3389", DEVICE_ID_PLACEHOLDER),
        }
    }
}

/// Per-connection limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Outbound messages queued per connection before new ones are dropped
    pub send_queue_size: usize,
    /// Largest inbound text frame accepted, in bytes
    pub max_message_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            send_queue_size: 64,
            max_message_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// Negotiation tracking configuration
///
/// With `track_requests` off, accept/reject messages are routed without
/// checking that a matching request was ever made.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Only route accept/reject answers to requests that are still pending
    pub track_requests: bool,
    /// How long a request stays pending, in seconds
    pub request_ttl_secs: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            track_requests: false,
            request_ttl_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.check_templates();

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "relay", "relay").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    fn check_templates(&self) {
        if !self.tunnel.public_url_template.contains(TUNNEL_ID_PLACEHOLDER) {
            warn!(
                "public_url_template has no {} placeholder; every device gets the same URL",
                TUNNEL_ID_PLACEHOLDER
            );
        }
        if !self.tunnel.peer_url_template.contains(DEVICE_ID_PLACEHOLDER) {
            warn!(
                "peer_url_template has no {} placeholder; every device gets the same URL",
                DEVICE_ID_PLACEHOLDER
            );
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
