//! Directory listings derived from registry snapshots
//!
//! The same listing is pushed in `devices-updated` and returned by the HTTP
//! `/api/devices` endpoint.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::messages::ServerMessage;
use crate::registry::{DeviceSession, Registry};

/// Public view of one online device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListing {
    pub device_id: String,
    pub device_name: String,
    pub public_ip: String,
    /// Only online devices are tracked, so this is always true
    pub is_online: bool,
    /// RFC 3339 with millisecond precision
    pub connection_time: String,
    pub has_tunnel: bool,
}

impl From<&DeviceSession> for DeviceListing {
    fn from(session: &DeviceSession) -> Self {
        Self {
            device_id: session.device_id.clone(),
            device_name: session.device_name.clone(),
            public_ip: session.source_addr.to_string(),
            is_online: true,
            connection_time: session
                .connected_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            // Every registration mints a tunnel
            has_tunnel: true,
        }
    }
}

/// Listing of every online device, in registration order
pub fn listing(registry: &Registry) -> Vec<DeviceListing> {
    registry.snapshot().iter().map(DeviceListing::from).collect()
}

/// Full-replace directory message for broadcasting
pub fn devices_updated(registry: &Registry) -> ServerMessage {
    ServerMessage::DevicesUpdated {
        devices: listing(registry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ConnectionId;
    use std::net::IpAddr;

    #[test]
    fn test_listing_fields() {
        let mut registry = Registry::new();
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        registry.register(ConnectionId::next(), "a", "Office PC", ip);

        let devices = listing(&registry);
        assert_eq!(devices.len(), 1);

        let device = &devices[0];
        assert_eq!(device.device_id, "a");
        assert_eq!(device.device_name, "Office PC");
        assert_eq!(device.public_ip, "203.0.113.7");
        assert!(device.is_online);
        assert!(device.has_tunnel);
        assert!(device.connection_time.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&device.connection_time).is_ok());
    }

    #[test]
    fn test_listing_json_shape() {
        let mut registry = Registry::new();
        registry.register(ConnectionId::next(), "a", "A", "::1".parse().unwrap());

        let value = serde_json::to_value(devices_updated(&registry)).unwrap();
        assert_eq!(value["event"], "devices-updated");

        let device = &value["data"]["devices"][0];
        for field in [
            "deviceId",
            "deviceName",
            "publicIp",
            "isOnline",
            "connectionTime",
            "hasTunnel",
        ] {
            assert!(device.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(device["publicIp"], "::1");
    }

    #[test]
    fn test_empty_listing() {
        let registry = Registry::new();
        assert!(listing(&registry).is_empty());
    }
}
