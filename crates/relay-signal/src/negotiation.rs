//! Connection negotiation: request, then accept or reject
//!
//! By default the server keeps no negotiation state. Each message is routed by
//! a fresh registry lookup and dropped if the peer is offline. With request
//! tracking enabled, a request opens a pending [`Negotiation`] and answers are
//! only routed while a matching one is pending.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::connections::ConnectionId;
use crate::hub::SignalHub;
use crate::messages::ServerMessage;
use crate::registry::Registry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationState {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

/// One tracked request from `initiator` to `target`
#[derive(Clone, Debug)]
pub struct Negotiation {
    pub request_id: String,
    pub initiator: String,
    pub target: String,
    pub state: NegotiationState,
    created_at: Instant,
}

impl Negotiation {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Outcome of answering a tracked request
#[derive(Debug)]
pub enum Resolution {
    /// The request was pending; its state is now Accepted or Rejected
    Resolved(Negotiation),
    /// The request outlived its ttl
    Expired(Negotiation),
    /// No request from this initiator to this target
    Unknown,
}

/// Pending requests keyed by (initiator, target)
pub struct PendingNegotiations {
    ttl: Duration,
    pending: HashMap<(String, String), Negotiation>,
}

impl PendingNegotiations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: HashMap::new(),
        }
    }

    /// Record a request. A repeated request replaces the earlier one.
    pub fn open(&mut self, initiator: &str, target: &str) -> Negotiation {
        self.prune();

        let negotiation = Negotiation {
            request_id: generate_request_id(),
            initiator: initiator.to_string(),
            target: target.to_string(),
            state: NegotiationState::Pending,
            created_at: Instant::now(),
        };
        self.pending.insert(
            (initiator.to_string(), target.to_string()),
            negotiation.clone(),
        );
        negotiation
    }

    /// Answer the request from `initiator` to `target`, removing it
    pub fn resolve(&mut self, initiator: &str, target: &str, accepted: bool) -> Resolution {
        let key = (initiator.to_string(), target.to_string());
        let Some(mut negotiation) = self.pending.remove(&key) else {
            return Resolution::Unknown;
        };

        if negotiation.is_expired(self.ttl) {
            negotiation.state = NegotiationState::Expired;
            return Resolution::Expired(negotiation);
        }

        negotiation.state = if accepted {
            NegotiationState::Accepted
        } else {
            NegotiationState::Rejected
        };
        Resolution::Resolved(negotiation)
    }

    /// Drop every request involving `device_id`. Returns how many were dropped.
    pub fn forget_device(&mut self, device_id: &str) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|(initiator, target), _| initiator != device_id && target != device_id);
        before - self.pending.len()
    }

    /// Drop expired requests. Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.pending.len();
        self.pending.retain(|_, n| !n.is_expired(ttl));
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl SignalHub {
    /// Step 1: notify `target_device_id` of an incoming request.
    /// Dropped if the target is offline.
    pub fn request_connection(
        &self,
        from_device_id: &str,
        from_device_name: &str,
        target_device_id: &str,
    ) -> bool {
        let registry = self.registry.lock();
        let Some(target) = registry.get(target_device_id) else {
            debug!(
                from = %from_device_id,
                to = %target_device_id,
                "Request target offline, dropped"
            );
            return false;
        };

        let delivered = self.connections.send_to(
            target.connection,
            ServerMessage::IncomingConnection {
                from_device_id: from_device_id.to_string(),
                from_device_name: from_device_name.to_string(),
                tunnel_id: target.tunnel_id.clone(),
            },
        );

        if delivered {
            if let Some(negotiations) = &self.negotiations {
                let negotiation = negotiations.lock().open(from_device_id, target_device_id);
                debug!(request_id = %negotiation.request_id, "Request pending");
            }
        }

        debug!(
            from = %from_device_id,
            to = %target_device_id,
            delivered,
            "Connection requested"
        );
        delivered
    }

    /// Step 2: tell the initiator `from_device_id` that the target accepted.
    /// Dropped if the initiator is offline.
    pub fn accept_connection(
        &self,
        responder: ConnectionId,
        from_device_id: &str,
        target_device_id: &str,
        target_device_name: &str,
    ) -> bool {
        let registry = self.registry.lock();
        let Some(initiator) = registry.get(from_device_id) else {
            debug!(from = %from_device_id, "Accepting initiator offline, dropped");
            return false;
        };

        if !self.answer_pending(&registry, responder, from_device_id, Some(target_device_id), true) {
            return false;
        }

        let delivered = self.connections.send_to(
            initiator.connection,
            ServerMessage::ConnectionAccepted {
                target_device_id: target_device_id.to_string(),
                target_device_name: target_device_name.to_string(),
                tunnel_url: self.addresses.peer_url(target_device_id),
            },
        );
        debug!(
            from = %from_device_id,
            to = %target_device_id,
            delivered,
            "Connection accepted"
        );
        delivered
    }

    /// Step 3: tell the initiator `from_device_id` that the target rejected.
    /// Dropped if the initiator is offline.
    pub fn reject_connection(
        &self,
        responder: ConnectionId,
        from_device_id: &str,
        target_device_name: &str,
    ) -> bool {
        let registry = self.registry.lock();
        let Some(initiator) = registry.get(from_device_id) else {
            debug!(from = %from_device_id, "Rejected initiator offline, dropped");
            return false;
        };

        if !self.answer_pending(&registry, responder, from_device_id, None, false) {
            return false;
        }

        let delivered = self.connections.send_to(
            initiator.connection,
            ServerMessage::ConnectionRejected {
                target_device_name: target_device_name.to_string(),
            },
        );
        debug!(from = %from_device_id, delivered, "Connection rejected");
        delivered
    }

    /// With tracking enabled, checks that the responder's device has a
    /// pending request from `initiator` and resolves it. Always true otherwise.
    fn answer_pending(
        &self,
        registry: &Registry,
        responder: ConnectionId,
        initiator: &str,
        claimed_target: Option<&str>,
        accepted: bool,
    ) -> bool {
        let Some(negotiations) = &self.negotiations else {
            return true;
        };

        let Some(responder_id) = registry.by_connection(responder).map(|s| s.device_id.as_str())
        else {
            debug!(%responder, "Answer from unregistered connection, dropped");
            return false;
        };
        if claimed_target.is_some_and(|claimed| claimed != responder_id) {
            debug!(%responder, %responder_id, "Answer names another device, dropped");
            return false;
        }

        match negotiations.lock().resolve(initiator, responder_id, accepted) {
            Resolution::Resolved(negotiation) => {
                debug!(
                    request_id = %negotiation.request_id,
                    state = ?negotiation.state,
                    "Request answered"
                );
                true
            }
            Resolution::Expired(negotiation) => {
                debug!(request_id = %negotiation.request_id, "Answer to expired request, dropped");
                false
            }
            Resolution::Unknown => {
                debug!(%initiator, %responder_id, "Answer without a pending request, dropped");
                false
            }
        }
    }
}

/// Generate a request id for log correlation
fn generate_request_id() -> String {
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).expect("RNG failed");
    hex::encode(bytes)
}
