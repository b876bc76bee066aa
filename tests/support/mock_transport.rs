//! In-memory `Transport` used by the integration tests, modeled on the
//! teacher's integration-test fixtures: no sockets, just a queue of sent
//! messages the test can inspect after driving the state machines.

use std::sync::Mutex;

use async_trait::async_trait;
use sipua::{RemoteAddr, SipError, SipMessage, SipResult, Transport, TransportKind};

pub struct MockTransport {
    pub local_contact: String,
    pub sent: Mutex<Vec<(SipMessage, RemoteAddr)>>,
}

impl MockTransport {
    pub fn new(local_contact: impl Into<String>) -> Self {
        MockTransport { local_contact: local_contact.into(), sent: Mutex::new(Vec::new()) }
    }

    pub fn drain(&self) -> Vec<(SipMessage, RemoteAddr)> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::UDP
    }

    async fn send(&self, message: &SipMessage, remote: &RemoteAddr) -> SipResult<()> {
        if remote.host.is_empty() {
            return Err(SipError::TransportError { destination: remote.to_string(), reason: "empty host".into() });
        }
        self.sent.lock().unwrap().push((message.clone(), remote.clone()));
        Ok(())
    }

    fn local_contact(&self) -> String {
        self.local_contact.clone()
    }
}
