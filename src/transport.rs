//! Transport abstraction (component E, interface only).
//!
//! The core never owns a socket. An embedder implements `Transport` over
//! whatever UDP/TCP I/O it already runs and drives `Transaction`/`Dialog`
//! state from the inbound callback; see §5 for the concurrency contract
//! this interface assumes (single loop thread, no internal locking).

use async_trait::async_trait;

use crate::error::SipResult;
use crate::message::SipMessage;
use crate::types::TransportKind;

/// A remote peer address as the transaction layer sees it: enough to hand
/// back to `Transport::send` without the core needing to know the
/// underlying socket representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteAddr {
    pub host: String,
    pub port: u16,
    pub kind: TransportKind,
}

impl RemoteAddr {
    pub fn new(host: impl Into<String>, port: u16, kind: TransportKind) -> Self {
        RemoteAddr { host: host.into(), port, kind }
    }
}

impl std::fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.kind)
    }
}

/// Opaque handle the transport uses to tell the core which socket/connection
/// a message arrived on, without the core inspecting it.
pub type TransportId = u64;

/// Bidirectional framed-message channel, per §4.E.
///
/// Implementations provide UDP semantics (datagrams may be reordered or
/// dropped; each datagram is already a complete message) or TCP semantics
/// (in-order delivery; framing by `Content-Length`, buffering until a full
/// message is available before invoking the inbound callback).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which delivery semantics this instance provides.
    fn kind(&self) -> TransportKind;

    /// Send a fully-serialized message to `remote`.
    async fn send(&self, message: &SipMessage, remote: &RemoteAddr) -> SipResult<()>;

    /// The URI fragment (`host:port;transport=...`) this transport should
    /// be reachable at, used to populate outgoing Contact headers.
    fn local_contact(&self) -> String;
}

/// Inbound message notification, implemented by the transaction layer and
/// invoked by the transport (or its embedding event loop) for every
/// complete message it receives.
#[async_trait]
pub trait TransportCallback: Send + Sync {
    async fn on_message(&self, message: SipMessage, remote: RemoteAddr, transport_id: TransportId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_addr_displays_host_port_and_kind() {
        let addr = RemoteAddr::new("192.0.2.1", 5060, TransportKind::UDP);
        assert_eq!(addr.to_string(), "192.0.2.1:5060/UDP");
    }
}
