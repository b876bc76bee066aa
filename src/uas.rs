//! UAS facade (component H): turns a new server INVITE transaction into an
//! `IncomingCall` handle, and dispatches in-dialog BYE/CANCEL/OPTIONS.
//!
//! Like the transaction layer, every operation returns the
//! `TransactionEvent`s the caller's event loop must execute rather than
//! performing transport I/O itself.

use tracing::debug;

use crate::dialog::{Dialog, DialogId};
use crate::error::{SipError, SipResult};
use crate::headers::Headers;
use crate::ids::generate_tag;
use crate::message::{Request, Response};
use crate::sdp::Session;
use crate::transaction::{Transaction, TransactionEvent, TransactionKey, TransactionType};
use crate::uri::{NameAddr, Uri};

/// Ties one server INVITE transaction to its (future) dialog, per §3.
pub struct IncomingCall {
    pub call_id: String,
    pub caller: NameAddr,
    pub callee: NameAddr,
    pub offer: Option<Session>,
    pub x_headers: Vec<(String, String)>,
    transaction: Transaction,
    local_tag: Option<String>,
    record_route: Vec<NameAddr>,
    accepted: bool,
    rejected: bool,
}

impl IncomingCall {
    /// Build an `IncomingCall` from a freshly-dispatched server INVITE
    /// transaction (§4.H: parsed offer, caller/callee, X-* headers).
    pub fn new(transaction: Transaction) -> SipResult<Self> {
        let headers = &transaction.request.headers;
        let call_id = headers.call_id()?;
        let caller = headers.from_addr()?;
        let callee = headers.to_addr()?;
        let record_route = headers.record_route()?;
        let offer = if transaction.request.body.is_empty() {
            None
        } else {
            let body = std::str::from_utf8(&transaction.request.body)
                .map_err(|_| SipError::malformed_sdp("offer body is not valid UTF-8"))?;
            Some(Session::parse(body)?)
        };
        Ok(IncomingCall {
            call_id,
            caller,
            callee,
            offer,
            x_headers: headers.x_headers(),
            transaction,
            local_tag: None,
            record_route,
            accepted: false,
            rejected: false,
        })
    }

    fn response(&self, status: u16, reason: &str) -> Response {
        Response { status, reason: reason.to_string(), headers: Headers::new(), body: Vec::new() }
    }

    fn with_to_tag(&mut self, mut response: Response) -> Response {
        let tag = self.local_tag.get_or_insert_with(generate_tag).clone();
        let mut to = self.callee.clone();
        to.set_tag(tag);
        response.headers.set_single("To", to.serialize());
        response.headers.set_single("From", self.caller.serialize());
        response.headers.set_single("Call-ID", self.call_id.clone());
        response
    }

    /// Send 100 Trying. The transaction layer also auto-emits this after
    /// 200 ms if the application has not responded (§4.H).
    pub fn trying(&mut self) -> SipResult<Vec<TransactionEvent>> {
        let response = self.response(100, "Trying");
        self.transaction.respond(response)
    }

    /// Send 180 Ringing with a To-tag (generated if this is the first
    /// provisional response sent).
    pub fn ringing(&mut self) -> SipResult<Vec<TransactionEvent>> {
        let response = self.response(180, "Ringing");
        let response = self.with_to_tag(response);
        self.transaction.respond(response)
    }

    /// Send 200 OK carrying `answer_sdp`, with Contact set to
    /// `local_contact`. Creates the (Early) dialog; `confirm` promotes it
    /// to `Confirmed` once the ACK arrives.
    pub fn accept(&mut self, answer_sdp: &Session, local_contact: Uri) -> SipResult<(Vec<TransactionEvent>, Dialog)> {
        if self.accepted || self.rejected {
            return Err(SipError::state_error("accept", "call already finalized"));
        }
        self.accepted = true;
        let mut response = self.response(200, "OK");
        response.body = answer_sdp.build().into_bytes();
        response.headers.set_single("Content-Type", "application/sdp");
        response.headers.append("Contact", NameAddr::new(local_contact).serialize());
        let response = self.with_to_tag(response);

        let local_tag = self.local_tag.clone().expect("with_to_tag always sets local_tag");
        let remote_target = self.caller_contact()?;
        let dialog = Dialog::new_uas(
            self.call_id.clone(),
            local_tag,
            &self.caller,
            &self.callee,
            &self.record_route,
            remote_target,
        );

        let events = self.transaction.respond(response)?;
        Ok((events, dialog))
    }

    fn caller_contact(&self) -> SipResult<Uri> {
        self.transaction
            .request
            .headers
            .contact()?
            .into_iter()
            .next()
            .map(|na| na.uri)
            .ok_or_else(|| SipError::protocol_violation("INVITE missing Contact header"))
    }

    /// Reject with a 3xx-6xx final response.
    pub fn reject(&mut self, code: u16, reason: &str) -> SipResult<Vec<TransactionEvent>> {
        if !(300..700).contains(&code) {
            return Err(SipError::state_error("reject", "status code must be 3xx-6xx"));
        }
        if self.accepted || self.rejected {
            return Err(SipError::state_error("reject", "call already finalized"));
        }
        self.rejected = true;
        let response = self.response(code, reason);
        let response = self.with_to_tag(response);
        self.transaction.respond(response)
    }

    /// Confirm the dialog and the underlying server transaction on receipt
    /// of ACK.
    pub fn on_ack(&mut self, dialog: &mut Dialog) -> Vec<TransactionEvent> {
        dialog.confirm();
        self.transaction.on_ack()
    }

    /// 487 Request Terminated on the INVITE, to be paired with a 200 OK on
    /// the CANCEL itself (§4.H).
    pub fn on_cancel(&mut self) -> SipResult<Vec<TransactionEvent>> {
        if self.accepted || self.rejected {
            return Err(SipError::state_error("on_cancel", "INVITE already finalized"));
        }
        self.rejected = true;
        let response = self.response(487, "Request Terminated");
        let response = self.with_to_tag(response);
        self.transaction.respond(response)
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction.transaction_type
    }
}

/// The 200 OK answer to an in-dialog CANCEL request itself (distinct from
/// the 487 delivered on the INVITE transaction).
pub fn cancel_ok_response() -> Response {
    Response { status: 200, reason: "OK".to_string(), headers: Headers::new(), body: Vec::new() }
}

/// Auto-respond 200 OK to an in-dialog BYE, after the dialog lookup
/// succeeds and `on_bye` has been invoked by the caller (§4.H).
pub fn bye_ok_response(request: &Request) -> Response {
    let mut response = Response { status: 200, reason: "OK".to_string(), headers: Headers::new(), body: Vec::new() };
    if let Some(via) = request.headers.get_first("Via") {
        response.headers.append("Via", via.to_string());
    }
    response
}

/// 200 OK carrying `Allow`, for an OPTIONS request (§4.H).
pub fn options_response(supported_methods: &[&str]) -> Response {
    let mut response = Response { status: 200, reason: "OK".to_string(), headers: Headers::new(), body: Vec::new() };
    response.headers.append("Allow", supported_methods.join(", "));
    response
}

/// Locate the dialog a received in-dialog request belongs to, erroring
/// with `UnknownDialog` (→ 481) if none matches (§4.G/§7).
pub fn dialog_id_for_request(request: &Request, local_is_uas: bool) -> SipResult<DialogId> {
    let call_id = request.headers.call_id()?;
    let from_tag = request
        .headers
        .from_addr()?
        .tag()
        .ok_or_else(|| SipError::protocol_violation("From header missing tag"))?
        .to_string();
    let to_tag = request
        .headers
        .to_addr()?
        .tag()
        .ok_or_else(|| SipError::UnknownDialog { call_id: call_id.clone() })?
        .to_string();
    let (local_tag, remote_tag) = if local_is_uas { (to_tag, from_tag) } else { (from_tag, to_tag) };
    debug!(%call_id, %local_tag, %remote_tag, "resolved in-dialog request to dialog id");
    Ok(DialogId { call_id, local_tag, remote_tag })
}

/// Locate the server INVITE transaction a received CANCEL targets (§4.F,
/// §4.H: "CANCEL before a final response causes a 487 ... on the INVITE").
/// A CANCEL never starts a transaction of its own against the INVITE
/// table; this resolves it to the key of the INVITE transaction whose
/// `IncomingCall` must receive `on_cancel`.
pub fn invite_key_for_cancel(cancel: &Request) -> SipResult<TransactionKey> {
    TransactionKey::for_incoming_request(cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::build_offer;
    use crate::transaction::TransactionKey;
    use crate::transport::RemoteAddr;
    use crate::types::{Direction, Method, TransportKind};

    fn invite_transaction(with_offer: bool) -> Transaction {
        let mut headers = Headers::new();
        headers.append("Via", "SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK1");
        headers.append("Max-Forwards", "70");
        headers.append("From", "Alice <sip:alice@atlanta.com>;tag=1928301774");
        headers.append("To", "Bob <sip:bob@biloxi.com>");
        headers.append("Call-ID", "a84b4c76e66710@pc33.atlanta.com");
        headers.append("CSeq", "314159 INVITE");
        headers.append("Contact", "<sip:alice@192.0.2.1:5060>");
        let body = if with_offer { build_offer("192.0.2.1", 20000, 0, Direction::Sendrecv).build().into_bytes() } else { Vec::new() };
        let request = Request { method: Method::INVITE, request_uri: Uri::parse("sip:bob@biloxi.com").unwrap(), headers, body };
        let key = TransactionKey::new("z9hG4bK1", "pc33.atlanta.com", Method::INVITE);
        Transaction::new_server(TransactionType::ServerInvite, key, request, RemoteAddr::new("192.0.2.1", 5060, TransportKind::UDP))
    }

    #[test]
    fn new_incoming_call_parses_offer_and_x_headers() {
        let mut txn = invite_transaction(true);
        txn.request.headers.append("X-Customer-Id", "42");
        let call = IncomingCall::new(txn).unwrap();
        assert!(call.offer.is_some());
        assert_eq!(call.x_headers, vec![("X-Customer-Id".to_string(), "42".to_string())]);
    }

    #[test]
    fn ringing_generates_to_tag_once() {
        let txn = invite_transaction(true);
        let mut call = IncomingCall::new(txn).unwrap();
        call.ringing().unwrap();
        let tag1 = call.local_tag.clone();
        call.ringing().unwrap();
        assert_eq!(call.local_tag, tag1);
    }

    #[test]
    fn accept_creates_early_dialog_and_sets_content_type() {
        let txn = invite_transaction(true);
        let mut call = IncomingCall::new(txn).unwrap();
        let answer = build_offer("203.0.113.5", 30000, 0, Direction::Sendrecv);
        let (events, dialog) = call.accept(&answer, Uri::parse("sip:server@203.0.113.5:5060").unwrap()).unwrap();
        assert_eq!(dialog.state, crate::dialog::DialogState::Early);
        assert!(events.iter().any(|e| matches!(e, TransactionEvent::Send(_, _))));
    }

    #[test]
    fn accept_twice_is_a_state_error() {
        let txn = invite_transaction(true);
        let mut call = IncomingCall::new(txn).unwrap();
        let answer = build_offer("203.0.113.5", 30000, 0, Direction::Sendrecv);
        call.accept(&answer, Uri::parse("sip:server@203.0.113.5:5060").unwrap()).unwrap();
        assert!(call.accept(&answer, Uri::parse("sip:server@203.0.113.5:5060").unwrap()).is_err());
    }

    #[test]
    fn cancel_before_final_response_sends_487() {
        let txn = invite_transaction(true);
        let mut call = IncomingCall::new(txn).unwrap();
        let events = call.on_cancel().unwrap();
        assert!(events.iter().any(|e| matches!(e, TransactionEvent::Send(crate::message::SipMessage::Response(r), _) if r.status == 487)));
    }

    #[test]
    fn options_response_carries_allow() {
        let response = options_response(&["INVITE", "ACK", "BYE", "CANCEL", "OPTIONS"]);
        assert_eq!(
            response.headers.allow(),
            vec!["INVITE".to_string(), "ACK".to_string(), "BYE".to_string(), "CANCEL".to_string(), "OPTIONS".to_string()]
        );
    }

    #[test]
    fn dialog_id_missing_to_tag_is_unknown_dialog() {
        let mut headers = Headers::new();
        headers.append("From", "<sip:alice@atlanta.com>;tag=1");
        headers.append("To", "<sip:bob@biloxi.com>");
        headers.append("Call-ID", "abc");
        let request = Request { method: Method::BYE, request_uri: Uri::parse("sip:bob@biloxi.com").unwrap(), headers, body: Vec::new() };
        assert!(matches!(dialog_id_for_request(&request, true), Err(SipError::UnknownDialog { .. })));
    }

    #[test]
    fn invite_key_for_cancel_matches_the_original_invites_key() {
        let txn = invite_transaction(false);
        let invite_key = crate::transaction::TransactionKey::for_incoming_request(&txn.request).unwrap();

        let mut cancel_headers = txn.request.headers.clone();
        cancel_headers.set_single("CSeq", "314159 CANCEL");
        let cancel = Request {
            method: Method::CANCEL,
            request_uri: txn.request.request_uri.clone(),
            headers: cancel_headers,
            body: Vec::new(),
        };

        assert_eq!(invite_key_for_cancel(&cancel).unwrap(), invite_key);
    }
}
