//! Signal protocol messages
//!
//! Every WebSocket text frame carries one envelope:
//! `{"event": "<name>", "data": {...}}` with camelCase payload fields.
//! Relayed signals are kept as raw JSON so they leave the server exactly as
//! they arrived.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use relay_core::TunnelId;

use crate::directory::DeviceListing;

/// Event names used on the wire
pub mod events {
    pub const REGISTER_DEVICE: &str = "register-device";
    pub const TUNNEL_CREATED: &str = "tunnel-created";
    pub const DEVICES_UPDATED: &str = "devices-updated";
    pub const REQUEST_CONNECTION: &str = "request-connection";
    pub const INCOMING_CONNECTION: &str = "incoming-connection";
    pub const ACCEPT_CONNECTION: &str = "accept-connection";
    pub const CONNECTION_ACCEPTED: &str = "connection-accepted";
    pub const REJECT_CONNECTION: &str = "reject-connection";
    pub const CONNECTION_REJECTED: &str = "connection-rejected";
    pub const RELAY_SIGNAL: &str = "relay-signal";
}

/// Messages a device sends to the server
#[derive(Clone, Debug)]
pub enum ClientMessage {
    RegisterDevice(RegisterDevice),
    RequestConnection(RequestConnection),
    AcceptConnection(AcceptConnection),
    RejectConnection(RejectConnection),
    RelaySignal(RelaySignal),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDevice {
    pub device_id: String,
    pub device_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConnection {
    pub from_device_id: String,
    pub from_device_name: String,
    pub target_device_id: String,
}

/// Sent by the target; `from_device_id` names the original initiator
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptConnection {
    pub from_device_id: String,
    pub target_device_id: String,
    pub target_device_name: String,
}

/// Sent by the target; `from_device_id` names the original initiator
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectConnection {
    pub from_device_id: String,
    pub target_device_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySignal {
    pub from_device_id: String,
    pub target_device_id: String,
    /// Opaque payload, never parsed past its JSON boundaries
    pub signal: Box<RawValue>,
}

/// Messages the server sends to devices
#[derive(Clone, Debug, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Reply to `register-device`
    TunnelCreated {
        tunnel_id: TunnelId,
        public_url: String,
    },

    /// Full directory; replaces whatever the device had before
    DevicesUpdated { devices: Vec<DeviceListing> },

    /// To the target of a `request-connection`
    IncomingConnection {
        from_device_id: String,
        from_device_name: String,
        tunnel_id: TunnelId,
    },

    /// To the initiator once the target accepts
    ConnectionAccepted {
        target_device_id: String,
        target_device_name: String,
        tunnel_url: String,
    },

    /// To the initiator once the target rejects
    ConnectionRejected { target_device_name: String },

    /// Relayed signal
    RelaySignal {
        from_device_id: String,
        signal: Box<RawValue>,
    },
}

/// Errors decoding an inbound frame
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("event {0} has no data")]
    MissingData(String),

    #[error("event {event} has an empty {field}")]
    EmptyField {
        event: &'static str,
        field: &'static str,
    },

    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

#[derive(Deserialize)]
struct InboundEnvelope {
    event: String,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a, T> {
    event: &'a str,
    data: &'a T,
}

impl ClientMessage {
    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let envelope: InboundEnvelope = serde_json::from_str(json)?;
        let data = || {
            envelope
                .data
                .as_deref()
                .ok_or_else(|| MessageError::MissingData(envelope.event.clone()))
        };

        let msg = match envelope.event.as_str() {
            events::REGISTER_DEVICE => Self::RegisterDevice(parse_data(data()?)?),
            events::REQUEST_CONNECTION => Self::RequestConnection(parse_data(data()?)?),
            events::ACCEPT_CONNECTION => Self::AcceptConnection(parse_data(data()?)?),
            events::REJECT_CONNECTION => Self::RejectConnection(parse_data(data()?)?),
            events::RELAY_SIGNAL => Self::RelaySignal(parse_data(data()?)?),
            other => return Err(MessageError::UnknownEvent(other.to_string())),
        };

        msg.validate()?;
        Ok(msg)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::RegisterDevice(d) => envelope(self.event(), d),
            Self::RequestConnection(d) => envelope(self.event(), d),
            Self::AcceptConnection(d) => envelope(self.event(), d),
            Self::RejectConnection(d) => envelope(self.event(), d),
            Self::RelaySignal(d) => envelope(self.event(), d),
        }
    }

    /// Wire name of this message
    pub fn event(&self) -> &'static str {
        match self {
            Self::RegisterDevice(_) => events::REGISTER_DEVICE,
            Self::RequestConnection(_) => events::REQUEST_CONNECTION,
            Self::AcceptConnection(_) => events::ACCEPT_CONNECTION,
            Self::RejectConnection(_) => events::REJECT_CONNECTION,
            Self::RelaySignal(_) => events::RELAY_SIGNAL,
        }
    }

    /// Device ids are routing keys, so none of them may be empty
    fn validate(&self) -> Result<(), MessageError> {
        let event = self.event();
        let required: Vec<(&'static str, &str)> = match self {
            Self::RegisterDevice(d) => vec![("deviceId", d.device_id.as_str())],
            Self::RequestConnection(d) => vec![
                ("fromDeviceId", d.from_device_id.as_str()),
                ("targetDeviceId", d.target_device_id.as_str()),
            ],
            Self::AcceptConnection(d) => vec![
                ("fromDeviceId", d.from_device_id.as_str()),
                ("targetDeviceId", d.target_device_id.as_str()),
            ],
            Self::RejectConnection(d) => vec![("fromDeviceId", d.from_device_id.as_str())],
            Self::RelaySignal(d) => vec![
                ("fromDeviceId", d.from_device_id.as_str()),
                ("targetDeviceId", d.target_device_id.as_str()),
            ],
        };

        match required.into_iter().find(|(_, value)| value.is_empty()) {
            Some((field, _)) => Err(MessageError::EmptyField { event, field }),
            None => Ok(()),
        }
    }
}

impl ServerMessage {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire name of this message
    pub fn event(&self) -> &'static str {
        match self {
            Self::TunnelCreated { .. } => events::TUNNEL_CREATED,
            Self::DevicesUpdated { .. } => events::DEVICES_UPDATED,
            Self::IncomingConnection { .. } => events::INCOMING_CONNECTION,
            Self::ConnectionAccepted { .. } => events::CONNECTION_ACCEPTED,
            Self::ConnectionRejected { .. } => events::CONNECTION_REJECTED,
            Self::RelaySignal { .. } => events::RELAY_SIGNAL,
        }
    }
}

fn parse_data<T: DeserializeOwned>(data: &RawValue) -> Result<T, MessageError> {
    Ok(serde_json::from_str(data.get())?)
}

fn envelope<T: Serialize>(event: &str, data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutboundEnvelope { event, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register() {
        let json = r#"{"event":"register-device","data":{"deviceId":"a","deviceName":"Laptop"}}"#;

        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::RegisterDevice(d) => {
                assert_eq!(d.device_id, "a");
                assert_eq!(d.device_name, "Laptop");
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_client_message_to_json() {
        let msg = ClientMessage::RequestConnection(RequestConnection {
            from_device_id: "a".into(),
            from_device_name: "A".into(),
            target_device_id: "b".into(),
        });

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "request-connection");
        assert_eq!(value["data"]["fromDeviceId"], "a");
        assert_eq!(value["data"]["fromDeviceName"], "A");
        assert_eq!(value["data"]["targetDeviceId"], "b");
    }

    #[test]
    fn test_relay_signal_is_kept_raw() {
        let signal = r#"{"sdp":"v=0\r\n","z":1,"a":[1.50,{"k":null}]}"#;
        let json = format!(
            r#"{{"event":"relay-signal","data":{{"fromDeviceId":"a","targetDeviceId":"b","signal":{}}}}}"#,
            signal
        );

        let msg = match ClientMessage::from_json(&json).unwrap() {
            ClientMessage::RelaySignal(d) => d,
            other => panic!("wrong message type: {:?}", other),
        };
        assert_eq!(msg.signal.get(), signal);

        let out = ServerMessage::RelaySignal {
            from_device_id: msg.from_device_id,
            signal: msg.signal,
        };
        let out_json = out.to_json().unwrap();
        assert!(out_json.contains(signal));
        assert!(out_json.starts_with(r#"{"event":"relay-signal","data":{"fromDeviceId":"a""#));
    }

    #[test]
    fn test_server_message_field_names() {
        let msg = ServerMessage::ConnectionAccepted {
            target_device_id: "b".into(),
            target_device_name: "B".into(),
            tunnel_url: "rdp://b.finixdesk.com:3389".into(),
        };

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], msg.event());
        assert_eq!(value["data"]["targetDeviceId"], "b");
        assert_eq!(value["data"]["targetDeviceName"], "B");
        assert_eq!(value["data"]["tunnelUrl"], "rdp://b.finixdesk.com:3389");
    }

    #[test]
    fn test_unknown_event() {
        let json = r#"{"event":"create-room","data":{}}"#;
        assert!(matches!(
            ClientMessage::from_json(json),
            Err(MessageError::UnknownEvent(e)) if e == "create-room"
        ));
    }

    #[test]
    fn test_missing_data_and_fields() {
        assert!(matches!(
            ClientMessage::from_json(r#"{"event":"register-device"}"#),
            Err(MessageError::MissingData(_))
        ));
        assert!(matches!(
            ClientMessage::from_json(r#"{"event":"register-device","data":null}"#),
            Err(MessageError::MissingData(_))
        ));
        assert!(matches!(
            ClientMessage::from_json(r#"{"event":"register-device","data":{"deviceId":"a"}}"#),
            Err(MessageError::Json(_))
        ));
        assert!(matches!(
            ClientMessage::from_json("not json"),
            Err(MessageError::Json(_))
        ));
    }

    #[test]
    fn test_empty_device_id_rejected() {
        let json = r#"{"event":"reject-connection","data":{"fromDeviceId":"","targetDeviceName":"B"}}"#;
        assert!(matches!(
            ClientMessage::from_json(json),
            Err(MessageError::EmptyField { field: "fromDeviceId", .. })
        ));
    }
}
