//! End-to-end scenarios against the public UAS/UAC facades, matching the
//! testable-properties table: call setup with negotiation, codec mismatch,
//! cancel-before-answer, and dialog-confirmed BYE CSeq discipline.

mod support;

use sipua::dialog::DialogState;
use sipua::headers::Headers;
use sipua::sdp::{negotiate, Session, SupportedCodecs};
use sipua::transaction::{Transaction, TransactionEvent, TransactionKey, TransactionType};
use sipua::transport::RemoteAddr;
use sipua::types::{Method, TransportKind};
use sipua::uas::IncomingCall;
use sipua::uri::Uri;
use sipua::{Request, SipMessage};
use support::mock_transport::MockTransport;

fn invite_with_offer(sdp_body: &str) -> Request {
    let mut headers = Headers::new();
    headers.append("Via", "SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds");
    headers.append("Max-Forwards", "70");
    headers.append("From", "Alice <sip:alice@atlanta.com>;tag=1928301774");
    headers.append("To", "Bob <sip:bob@biloxi.com>");
    headers.append("Call-ID", "a84b4c76e66710@pc33.atlanta.com");
    headers.append("CSeq", "314159 INVITE");
    headers.append("Contact", "<sip:alice@192.0.2.1:5060>");
    headers.append("Content-Type", "application/sdp");
    Request {
        method: Method::INVITE,
        request_uri: Uri::parse("sip:bob@biloxi.com").unwrap(),
        headers,
        body: sdp_body.as_bytes().to_vec(),
    }
}

fn server_invite_transaction(request: Request) -> Transaction {
    let key = TransactionKey::new("z9hG4bK776asdhds", "pc33.atlanta.com", Method::INVITE);
    let remote = RemoteAddr::new("192.0.2.1", 5060, TransportKind::UDP);
    Transaction::new_server(TransactionType::ServerInvite, key, request, remote)
}

fn status_of(event: &TransactionEvent) -> Option<u16> {
    match event {
        TransactionEvent::Send(SipMessage::Response(r), _) => Some(r.status),
        _ => None,
    }
}

#[tokio::test]
async fn scenario_1_matching_codec_yields_200_with_negotiated_answer() {
    let offer_sdp = "v=0\r\no=alice 1 1 IN IP4 atlanta.com\r\ns=-\r\nc=IN IP4 192.0.2.1\r\nt=0 0\r\nm=audio 20000 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\n";
    let request = invite_with_offer(offer_sdp);
    let transaction = server_invite_transaction(request);
    let mut call = IncomingCall::new(transaction).unwrap();

    let offer = call.offer.clone().expect("offer parsed");
    let supported = SupportedCodecs { payload_types: vec![0, 8], dtmf: false };
    let answer = negotiate(&offer, "203.0.113.5", 30000, &supported).unwrap();

    let local_contact = Uri::parse("sip:server@203.0.113.5:5060").unwrap();
    let (events, mut dialog) = call.accept(&answer, local_contact).unwrap();

    let transport = MockTransport::new("sip:server@203.0.113.5:5060");
    for event in &events {
        if let TransactionEvent::Send(message, remote) = event {
            transport.send(message, remote).await.unwrap();
        }
    }
    let sent = transport.drain();
    assert_eq!(sent.len(), 1);
    match &sent[0].0 {
        SipMessage::Response(r) => {
            assert_eq!(r.status, 200);
            let body = String::from_utf8(r.body.clone()).unwrap();
            let answered = Session::parse(&body).unwrap();
            let media = answered.audio().unwrap();
            assert_eq!(media.payload_types, vec![0]);
            assert_eq!(media.direction, sipua::types::Direction::Sendrecv);
        }
        _ => panic!("expected response"),
    }

    assert_eq!(dialog.state, DialogState::Early);
    call.on_ack(&mut dialog);
    assert_eq!(dialog.state, DialogState::Confirmed);
}

#[tokio::test]
async fn scenario_2_no_common_codec_rejects_with_488() {
    let offer_sdp = "v=0\r\no=alice 1 1 IN IP4 atlanta.com\r\ns=-\r\nc=IN IP4 192.0.2.1\r\nt=0 0\r\nm=audio 20000 RTP/AVP 9\r\na=rtpmap:9 G722/8000\r\n";
    let request = invite_with_offer(offer_sdp);
    let transaction = server_invite_transaction(request);
    let mut call = IncomingCall::new(transaction).unwrap();

    let offer = call.offer.clone().unwrap();
    let supported = SupportedCodecs { payload_types: vec![0, 8], dtmf: false };
    let err = negotiate(&offer, "203.0.113.5", 30000, &supported).unwrap_err();
    let status = err.status_code().expect("SDP errors map to a status code");
    assert_eq!(status, 488);

    let events = call.reject(status, "Not Acceptable Here").unwrap();
    assert!(events.iter().any(|e| status_of(e) == Some(488)));
}

#[tokio::test]
async fn scenario_3_cancel_before_final_response_yields_487_and_no_dialog() {
    let offer_sdp = "v=0\r\no=alice 1 1 IN IP4 atlanta.com\r\ns=-\r\nc=IN IP4 192.0.2.1\r\nt=0 0\r\nm=audio 20000 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
    let request = invite_with_offer(offer_sdp);
    let transaction = server_invite_transaction(request);
    let mut call = IncomingCall::new(transaction).unwrap();

    call.ringing().unwrap();
    let events = call.on_cancel().unwrap();
    assert!(events.iter().any(|e| status_of(e) == Some(487)));

    let cancel_ok = sipua::uas::cancel_ok_response();
    assert_eq!(cancel_ok.status, 200);

    assert!(call.accept(
        &Session::parse(offer_sdp).unwrap(),
        Uri::parse("sip:server@203.0.113.5:5060").unwrap()
    )
    .is_err());
}

#[tokio::test]
async fn scenario_4_confirmed_dialog_bye_uses_next_cseq_and_remote_contact() {
    let offer_sdp = "v=0\r\no=alice 1 1 IN IP4 atlanta.com\r\ns=-\r\nc=IN IP4 192.0.2.1\r\nt=0 0\r\nm=audio 20000 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
    let request = invite_with_offer(offer_sdp);
    let transaction = server_invite_transaction(request);
    let mut call = IncomingCall::new(transaction).unwrap();

    let offer = call.offer.clone().unwrap();
    let supported = SupportedCodecs { payload_types: vec![0], dtmf: false };
    let answer = negotiate(&offer, "203.0.113.5", 30000, &supported).unwrap();
    let (_, mut dialog) = call.accept(&answer, Uri::parse("sip:server@203.0.113.5:5060").unwrap()).unwrap();
    call.on_ack(&mut dialog);
    assert_eq!(dialog.state, DialogState::Confirmed);

    let initial_cseq = dialog.local_cseq();
    let remote = RemoteAddr::new("192.0.2.1", 5060, TransportKind::UDP);
    let (bye_txn, _pending) = sipua::uac::send_bye(&mut dialog, remote).unwrap();
    assert_eq!(bye_txn.request.headers.cseq().unwrap().seq, initial_cseq + 1);
    assert_eq!(bye_txn.request.request_uri.host, "192.0.2.1");
}

#[test]
fn scenario_6_compact_headers_reserialize_to_long_forms_only() {
    let raw = "INVITE sip:bob@biloxi.com SIP/2.0\r\nv: SIP/2.0/UDP host;branch=z9hG4bK1\r\nf: <sip:alice@atlanta.com>;tag=1\r\nt: <sip:bob@biloxi.com>\r\ni: a84b4c76e66710@pc33.atlanta.com\r\nl: 0\r\nMax-Forwards: 70\r\nCSeq: 1 INVITE\r\n\r\n";
    let message = SipMessage::parse(raw.as_bytes()).unwrap();
    let out = String::from_utf8(message.serialize()).unwrap();
    for compact in ["\nv:", "\nf:", "\nt:", "\ni:", "\nl:"] {
        assert!(!out.contains(compact), "compact form {compact} leaked into serialized output");
    }
    assert!(out.contains("Via:") && out.contains("From:") && out.contains("To:") && out.contains("Call-ID:") && out.contains("Content-Length:"));
}
