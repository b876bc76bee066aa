//! UAC facade (component I): constructs in-dialog requests and hands them
//! to client transaction machinery.
//!
//! Each operation returns the new `Transaction` (already carrying its
//! initial `TransactionEvent`s from `Transaction::initial_send_events`)
//! plus a `PendingRequest` handle the caller correlates against later
//! `TransactionEvent::Deliver`/`Terminated` events for that transaction's
//! key — there is no executor-owned future inside this crate (§5: the
//! core exposes state transitions, not suspension points).

use crate::dialog::Dialog;
use crate::error::{SipError, SipResult};
use crate::ids::generate_branch;
use crate::message::Request;
use crate::sdp::Session;
use crate::transaction::{Transaction, TransactionKey, TransactionType};
use crate::transport::RemoteAddr;
use crate::types::Method;

/// Correlates a UAC-initiated request with the transaction carrying its
/// eventual response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingRequest {
    pub key: TransactionKey,
}

fn start_transaction(request: Request, remote: RemoteAddr, kind: TransactionType) -> (Transaction, PendingRequest) {
    let branch = request
        .headers
        .via()
        .ok()
        .and_then(|v| v.first().and_then(|via| via.branch().map(str::to_string)))
        .unwrap_or_else(generate_branch);
    let sent_by = request
        .headers
        .via()
        .ok()
        .and_then(|v| v.first().map(|via| via.sent_by_host.clone()))
        .unwrap_or_default();
    let key = TransactionKey::new(branch, sent_by, request.method.clone());
    let txn = Transaction::new_client(kind, key.clone(), request, remote);
    (txn, PendingRequest { key })
}

/// Send a BYE on `dialog`, terminating it locally once the transaction
/// completes (the caller applies `dialog.terminate()` on the final
/// response, since this module only builds the request).
pub fn send_bye(dialog: &mut Dialog, remote: RemoteAddr) -> SipResult<(Transaction, PendingRequest)> {
    let request = dialog.build_request(Method::BYE)?;
    Ok(start_transaction(request, remote, TransactionType::ClientNonInvite))
}

/// Send a re-INVITE carrying a new offer.
pub fn send_reinvite(dialog: &mut Dialog, offer: &Session, remote: RemoteAddr) -> SipResult<(Transaction, PendingRequest)> {
    let mut request = dialog.build_request(Method::INVITE)?;
    request.body = offer.build().into_bytes();
    request.headers.set_single("Content-Type", "application/sdp");
    Ok(start_transaction(request, remote, TransactionType::ClientInvite))
}

/// Send an INFO request (e.g. for out-of-band DTMF relay).
pub fn send_info(dialog: &mut Dialog, body: Vec<u8>, content_type: &str, remote: RemoteAddr) -> SipResult<(Transaction, PendingRequest)> {
    let mut request = dialog.build_request(Method::INFO)?;
    request.body = body;
    request.headers.set_single("Content-Type", content_type);
    Ok(start_transaction(request, remote, TransactionType::ClientNonInvite))
}

/// Send a CANCEL for a pending client INVITE transaction. Only valid once
/// a provisional response has been received (§4.F); otherwise the caller
/// must queue the cancel and retry once `Transaction::can_cancel` is true.
pub fn send_cancel(invite_transaction: &Transaction) -> SipResult<(Transaction, PendingRequest)> {
    if !invite_transaction.can_cancel() {
        return Err(SipError::state_error("send_cancel", "no provisional response received yet for the INVITE"));
    }
    let invite = &invite_transaction.request;
    let mut headers = invite.headers.clone();
    headers.set_single("CSeq", format!("{} CANCEL", invite.headers.cseq()?.seq));
    let request = Request { method: Method::CANCEL, request_uri: invite.request_uri.clone(), headers, body: Vec::new() };
    Ok(start_transaction(request, invite_transaction.remote.clone(), TransactionType::ClientNonInvite))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::transaction::TransactionKey as TxKey;
    use crate::types::TransportKind;
    use crate::uri::{NameAddr, Uri};

    fn sample_dialog() -> Dialog {
        let local = NameAddr::parse("<sip:alice@atlanta.com>;tag=1").unwrap();
        let remote = NameAddr::parse("<sip:bob@biloxi.com>;tag=2").unwrap();
        Dialog::new_uac("callid", "2", &local, &remote, &[], Uri::parse("sip:bob@192.0.2.2:5060").unwrap())
    }

    fn remote() -> RemoteAddr {
        RemoteAddr::new("192.0.2.2", 5060, TransportKind::UDP)
    }

    #[test]
    fn send_bye_starts_a_non_invite_transaction() {
        let mut dialog = sample_dialog();
        let (txn, pending) = send_bye(&mut dialog, remote()).unwrap();
        assert_eq!(txn.transaction_type, TransactionType::ClientNonInvite);
        assert_eq!(pending.key.method, Method::BYE);
    }

    #[test]
    fn send_reinvite_attaches_sdp_body() {
        let mut dialog = sample_dialog();
        let offer = crate::sdp::build_offer("192.0.2.1", 20000, 0, crate::types::Direction::Sendrecv);
        let (txn, _) = send_reinvite(&mut dialog, &offer, remote()).unwrap();
        assert!(!txn.request.body.is_empty());
        assert_eq!(txn.request.headers.content_type().as_deref(), Some("application/sdp"));
    }

    #[test]
    fn send_cancel_rejected_before_provisional_response() {
        let mut headers = Headers::new();
        headers.append("Via", "SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK1");
        headers.append("From", "<sip:alice@atlanta.com>;tag=1");
        headers.append("To", "<sip:bob@biloxi.com>");
        headers.append("Call-ID", "abc");
        headers.append("CSeq", "1 INVITE");
        headers.append("Max-Forwards", "70");
        let request = Request { method: Method::INVITE, request_uri: Uri::parse("sip:bob@biloxi.com").unwrap(), headers, body: Vec::new() };
        let key = TxKey::new("z9hG4bK1", "pc33.atlanta.com", Method::INVITE);
        let txn = Transaction::new_client(TransactionType::ClientInvite, key, request, remote());
        assert!(send_cancel(&txn).is_err());
    }
}
