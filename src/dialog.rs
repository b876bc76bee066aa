//! Dialog layer (component G, RFC 3261 §12).
//!
//! A `Dialog` is identified by (Call-ID, local-tag, remote-tag) and tracks
//! the route-set, CSeq discipline, and target-refresh bookkeeping needed to
//! build in-dialog requests; it does not itself send anything — callers
//! take the `Request` it constructs and hand it to the transaction layer.

use rand::Rng;
use tracing::warn;

use crate::error::{SipError, SipResult};
use crate::headers::Headers;
use crate::ids::generate_branch;
use crate::message::Request;
use crate::types::Method;
use crate::uri::{NameAddr, Uri};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Early,
    Confirmed,
    Terminated,
}

/// Which end of the dialog this process is playing; determines which tag
/// is "local" and which route-set derivation applies (§4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogRole {
    Uas,
    Uac,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: DialogId,
    pub role: DialogRole,
    pub state: DialogState,
    pub local_uri: Uri,
    pub remote_uri: Uri,
    pub local_target: Uri,
    pub remote_target: Uri,
    pub route_set: Vec<Uri>,
    pub secure: bool,
    local_cseq: u32,
    remote_cseq: Option<u32>,
}

impl Dialog {
    /// Random 31-bit initial local CSeq, per §4.G.
    fn initial_cseq() -> u32 {
        rand::thread_rng().gen_range(1..=0x7FFF_FFFFu32)
    }

    /// Build a UAS-side dialog from the initial INVITE and the local
    /// to-tag chosen for the 180/200 that created it.
    pub fn new_uas(
        call_id: impl Into<String>,
        local_tag: impl Into<String>,
        caller: &NameAddr,
        callee: &NameAddr,
        record_route: &[NameAddr],
        remote_target: Uri,
    ) -> Self {
        let remote_tag = caller.tag().unwrap_or_default().to_string();
        Dialog {
            id: DialogId { call_id: call_id.into(), local_tag: local_tag.into(), remote_tag },
            role: DialogRole::Uas,
            state: DialogState::Early,
            local_uri: callee.uri.clone(),
            remote_uri: caller.uri.clone(),
            local_target: callee.uri.clone(),
            remote_target,
            route_set: record_route.iter().map(|na| na.uri.clone()).collect(),
            secure: false,
            local_cseq: Self::initial_cseq(),
            remote_cseq: None,
        }
    }

    /// Build a UAC-side dialog from the response that created it. The
    /// route-set is derived from the response's Record-Route in reverse
    /// order (§4.G).
    pub fn new_uac(
        call_id: impl Into<String>,
        remote_tag: impl Into<String>,
        local: &NameAddr,
        remote: &NameAddr,
        record_route: &[NameAddr],
        remote_target: Uri,
    ) -> Self {
        let local_tag = local.tag().unwrap_or_default().to_string();
        let mut route_set: Vec<Uri> = record_route.iter().map(|na| na.uri.clone()).collect();
        route_set.reverse();
        Dialog {
            id: DialogId { call_id: call_id.into(), local_tag, remote_tag: remote_tag.into() },
            role: DialogRole::Uac,
            state: DialogState::Early,
            local_uri: local.uri.clone(),
            remote_uri: remote.uri.clone(),
            local_target: local.uri.clone(),
            remote_target,
            route_set,
            secure: false,
            local_cseq: Self::initial_cseq(),
            remote_cseq: None,
        }
    }

    pub fn confirm(&mut self) {
        self.state = DialogState::Confirmed;
    }

    pub fn terminate(&mut self) {
        self.state = DialogState::Terminated;
    }

    /// Target refresh: a 2xx to INVITE/re-INVITE updates the remote target
    /// from the peer's Contact (§4.G).
    pub fn refresh_remote_target(&mut self, contact: Uri) {
        self.remote_target = contact;
    }

    /// The request-URI for the next in-dialog request, applying the
    /// loose/strict-route rule from §4.G: if the route-set's top URI
    /// carries `lr`, the request-URI is the remote target and the full
    /// route-set is sent as-is; otherwise strict-route rewriting pushes
    /// the remote target onto the end of the route and the top route
    /// entry becomes the request-URI.
    fn resolve_routing(&self) -> (Uri, Vec<Uri>) {
        match self.route_set.first() {
            Some(top) if top.has_lr() => (self.remote_target.clone(), self.route_set.clone()),
            Some(top) => {
                let mut route = self.route_set[1..].to_vec();
                route.push(self.remote_target.clone());
                (top.clone(), route)
            }
            None => (self.remote_target.clone(), Vec::new()),
        }
    }

    /// Build a new in-dialog request, consuming the next local CSeq
    /// (§4.G). `method` must not be ACK — use `build_ack` for that, since
    /// an ACK to a 2xx reuses the INVITE's CSeq number rather than
    /// incrementing.
    pub fn build_request(&mut self, method: Method) -> SipResult<Request> {
        if method == Method::ACK {
            return Err(SipError::state_error("build_request", "use build_ack for ACK"));
        }
        self.local_cseq += 1;
        Ok(self.build_request_with_cseq(method, self.local_cseq))
    }

    /// ACK to a 2xx: carries the INVITE's CSeq number with method ACK, and
    /// is an end-to-end request that bypasses the transaction layer
    /// (§4.F).
    pub fn build_ack(&self, invite_cseq: u32) -> Request {
        self.build_request_with_cseq(Method::ACK, invite_cseq)
    }

    fn build_request_with_cseq(&self, method: Method, cseq: u32) -> Request {
        let (request_uri, route) = self.resolve_routing();

        // RFC 3261 §12.2.1.1: From is always the dialog's local URI/tag and
        // To the remote URI/tag, regardless of which side originally sent
        // the INVITE — `role` only decided which tag was "local" at
        // dialog creation time.
        let mut from = NameAddr::new(self.local_uri.clone());
        from.set_tag(self.id.local_tag.clone());
        let mut to = NameAddr::new(self.remote_uri.clone());
        to.set_tag(self.id.remote_tag.clone());

        let mut headers = Headers::new();
        headers.append("Via", format!("SIP/2.0/UDP {};branch={}", self.local_target.host, generate_branch()));
        headers.append("Max-Forwards", "70");
        headers.append("From", from.serialize());
        headers.append("To", to.serialize());
        headers.append("Call-ID", self.id.call_id.clone());
        headers.append("CSeq", format!("{cseq} {method}"));
        for r in &route {
            headers.append("Route", NameAddr::new(r.clone()).serialize());
        }

        Request { method, request_uri, headers, body: Vec::new() }
    }

    /// Verify an in-dialog request's CSeq is acceptable: strictly greater
    /// than the last seen remote CSeq for this dialog (§8 invariant 5),
    /// except the very first in-dialog request.
    pub fn validate_remote_cseq(&mut self, cseq: u32) -> SipResult<()> {
        if let Some(last) = self.remote_cseq {
            if cseq <= last {
                warn!(call_id = %self.id.call_id, cseq, last, "in-dialog request CSeq did not increase");
                return Err(SipError::protocol_violation("CSeq did not increase for in-dialog request"));
            }
        }
        self.remote_cseq = Some(cseq);
        Ok(())
    }

    pub fn local_cseq(&self) -> u32 {
        self.local_cseq
    }
}
