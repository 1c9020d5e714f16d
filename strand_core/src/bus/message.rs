//! Request, response and notification envelopes
//!
//! Requests travel from the controller into the stack, get dispatched
//! to the addressed plugin, and come back as [`Completion`]s through
//! the callback registered at send time. Notifications are unsolicited
//! and fan out to subscribers by class.

use crate::plugin::notify::NotifyLease;
use strand_types::{FaultEvent, NodeAddr, NotifyPayload, Opcode, ResponseStatus};

/// Identifier of one in-flight request, unique per stack instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(pub(crate) u64);

impl RequestToken {
    /// The raw token value (stable for the stack's lifetime).
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Response written by a plugin (or the discovery engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: ResponseStatus,
    pub payload: Vec<u8>,
}

impl Response {
    /// Successful response carrying `payload`.
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            payload,
        }
    }

    /// Payload-less response with the given status.
    pub fn status(status: ResponseStatus) -> Self {
        Self {
            status,
            payload: Vec::new(),
        }
    }
}

/// A request as seen by `NodePlugin::execute`.
///
/// For synchronous commands the plugin fills `response` before
/// returning `Complete`. For deferred commands it parks `token` and
/// completes later through the stack services.
#[derive(Debug)]
pub struct RequestMsg {
    pub token: RequestToken,
    pub target: NodeAddr,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
    pub response: Option<Response>,
}

impl RequestMsg {
    /// Fill the synchronous response.
    pub fn respond(&mut self, response: Response) {
        self.response = Some(response);
    }
}

/// Delivered to the completion callback registered at send time.
///
/// When `cancelled` is set (teardown reaped the request) the payload
/// carries no meaning and must not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub token: RequestToken,
    pub target: NodeAddr,
    pub status: ResponseStatus,
    pub payload: Vec<u8>,
    pub cancelled: bool,
}

/// Per-request completion callback.
pub type CompletionCallback = Box<dyn FnMut(&Completion) + Send>;

/// Notification classes subscribers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyClass {
    /// GPIO-class interrupt observed on a node.
    Interrupt,
    /// Power/line fault reported by the transceiver hardware.
    PowerFault,
}

enum NotifyBody {
    Fault(FaultEvent),
    Leased(NotifyLease),
}

/// Unsolicited event envelope.
///
/// Interrupt notifications reference a pooled payload item through a
/// [`NotifyLease`]; finalizing the envelope (dropping it after fan-out)
/// returns the item. Power-fault notifications carry their event
/// inline.
pub struct Notification {
    pub class: NotifyClass,
    pub source: NodeAddr,
    body: NotifyBody,
}

impl Notification {
    /// Interrupt notification referencing a leased payload item.
    pub fn interrupt(source: NodeAddr, lease: NotifyLease) -> Self {
        Self {
            class: NotifyClass::Interrupt,
            source,
            body: NotifyBody::Leased(lease),
        }
    }

    /// Power/line-fault notification.
    pub fn power_fault(event: FaultEvent) -> Self {
        Self {
            class: NotifyClass::PowerFault,
            source: event.node,
            body: NotifyBody::Fault(event),
        }
    }

    /// The fault event, for power-fault notifications.
    pub fn fault(&self) -> Option<FaultEvent> {
        match &self.body {
            NotifyBody::Fault(event) => Some(*event),
            NotifyBody::Leased(_) => None,
        }
    }

    /// The leased payload, for interrupt notifications.
    pub fn payload(&self) -> Option<NotifyPayload> {
        match &self.body {
            NotifyBody::Leased(lease) => Some(lease.payload()),
            NotifyBody::Fault(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_types::FaultKind;

    #[test]
    fn fault_notification_shape() {
        let event = FaultEvent {
            node: NodeAddr::Slave(1),
            kind: FaultKind::CableDisconnected,
        };
        let n = Notification::power_fault(event);
        assert_eq!(n.class, NotifyClass::PowerFault);
        assert_eq!(n.source, NodeAddr::Slave(1));
        assert_eq!(n.fault(), Some(event));
        assert!(n.payload().is_none());
    }

    #[test]
    fn token_display() {
        assert_eq!(RequestToken(7).to_string(), "req#7");
    }
}
