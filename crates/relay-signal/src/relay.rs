//! Opaque signal forwarding between registered devices

use serde_json::value::RawValue;
use tracing::debug;

use crate::hub::SignalHub;
use crate::messages::ServerMessage;

impl SignalHub {
    /// Forward `signal` untouched to `target_device_id`, attributed to
    /// `from_device_id`. Dropped if the target is offline.
    pub fn relay_signal(
        &self,
        from_device_id: &str,
        target_device_id: &str,
        signal: Box<RawValue>,
    ) -> bool {
        let registry = self.registry.lock();
        let Some(target) = registry.get(target_device_id) else {
            debug!(
                from = %from_device_id,
                to = %target_device_id,
                "Signal target offline, dropped"
            );
            return false;
        };

        let size = signal.get().len();
        let delivered = self.connections.send_to(
            target.connection,
            ServerMessage::RelaySignal {
                from_device_id: from_device_id.to_string(),
                signal,
            },
        );
        debug!(
            from = %from_device_id,
            to = %target_device_id,
            size,
            delivered,
            "Signal relayed"
        );
        delivered
    }
}
