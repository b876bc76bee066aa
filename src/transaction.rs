//! Transaction layer (component F, RFC 3261 §17).
//!
//! Grounded on the teacher's `Transaction` (client/server state machines,
//! explicit `TransactionType`/`TransactionState`, Timer A/B/D/G/I/J/K
//! bookkeeping) generalized to this crate's owned-data message types and
//! adapted to a pure, synchronous state machine: every public method
//! returns the `TransactionEvent`s the caller (the event loop) must act on
//! — send bytes, (re)schedule a timer, or deliver a response to the
//! transaction user — rather than performing I/O itself, per §5's "no
//! internal locking" / "state-machine transitions are non-suspending".

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::{SipError, SipResult};
use crate::message::{Request, Response, SipMessage};
use crate::timer::Timer;
use crate::transport::RemoteAddr;
use crate::types::{Method, TransportKind};

pub const T1: Duration = Duration::from_millis(500);
pub const T2: Duration = Duration::from_secs(4);
/// 64 * T1, the point at which an un-answered INVITE client transaction
/// times out (§4.F, §8 scenario 5).
pub const TIMEOUT: Duration = Duration::from_millis(64 * 500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    ClientInvite,
    ClientNonInvite,
    ServerInvite,
    ServerNonInvite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Calling,
    Trying,
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

/// Matches server transactions on `(branch, top-Via sent-by, method)` and
/// client transactions on `(branch, method)` of the outgoing request, per
/// §4.F. CANCEL keys to the same tuple as the request it cancels by
/// substituting `Method::INVITE` for `Method::CANCEL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: String,
    pub sent_by: String,
    pub method: Method,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, sent_by: impl Into<String>, method: Method) -> Self {
        TransactionKey { branch: branch.into(), sent_by: sent_by.into(), method }
    }

    /// The key a CANCEL matches: the same branch/sent-by as the CANCEL
    /// itself, but the INVITE it is cancelling.
    pub fn for_cancel_target(branch: impl Into<String>, sent_by: impl Into<String>) -> Self {
        TransactionKey::new(branch, sent_by, Method::INVITE)
    }

    /// The key an incoming request matches against an existing transaction
    /// table, per §4.F: `(branch, top-Via sent-by, method)`, with CANCEL
    /// substituted for the INVITE it targets via [`Self::for_cancel_target`]
    /// so a CANCEL resolves to its INVITE transaction's key rather than a
    /// key of its own.
    pub fn for_incoming_request(request: &Request) -> SipResult<Self> {
        let via = request
            .headers
            .via()?
            .into_iter()
            .next()
            .ok_or_else(|| SipError::protocol_violation("request has no Via header"))?;
        let branch = via
            .branch()
            .ok_or_else(|| SipError::protocol_violation("Via header missing branch parameter"))?
            .to_string();
        let sent_by = via.sent_by_host;
        if request.method == Method::CANCEL {
            Ok(TransactionKey::for_cancel_target(branch, sent_by))
        } else {
            Ok(TransactionKey::new(branch, sent_by, request.method.clone()))
        }
    }
}

/// Named retransmission/timeout timers from §4.F/§9. `AutoTrying` is this
/// crate's 200 ms auto-100-Trying deadline (§4.H), not an RFC 3261 timer
/// name but scheduled through the same mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionTimer {
    /// Client INVITE retransmit (UDP only), doubling up to T2.
    A,
    /// Client INVITE transaction timeout, fixed at 64*T1.
    B,
    /// Client INVITE wait-for-retransmits-of-2xx-ACK after Completed.
    D,
    /// Server INVITE retransmit of the last non-2xx response (UDP only).
    G,
    /// Server INVITE wait-for-ACK-retransmits after Completed.
    H,
    /// Server INVITE Confirmed-to-Terminated delay.
    I,
    /// Client non-INVITE retransmit (UDP only).
    E,
    /// Client non-INVITE transaction timeout.
    F,
    /// Client non-INVITE Completed-to-Terminated delay.
    K,
    /// Server non-INVITE Completed-to-Terminated delay.
    J,
    /// UAS auto-100-Trying deadline.
    AutoTrying,
}

/// What the caller must do in response to a transaction state transition.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// Send this message to `remote` (initial send or retransmission).
    Send(SipMessage, RemoteAddr),
    /// Schedule `timer` to fire after `after`.
    ScheduleTimer { timer: TransactionTimer, after: Duration },
    /// Cancel a previously scheduled timer.
    CancelTimer(TransactionTimer),
    /// Deliver a response to the transaction user (client side).
    Deliver(Response),
    /// The transaction reached `Terminated`; the owner may drop it.
    Terminated,
    /// No caller action required.
    None,
}

/// An RFC 3261 §17 client or server transaction.
///
/// Retransmission is only scheduled over unreliable (UDP) transports; per
/// §4.F, Timer D/G/H/I/J/K collapse to zero delay over reliable transports.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub key: TransactionKey,
    pub transaction_type: TransactionType,
    pub state: TransactionState,
    pub remote: RemoteAddr,
    pub request: Request,
    pub last_response: Option<Response>,
    pub dialog_id: Option<String>,
    retransmit_interval: Duration,
    retransmit_elapsed: Duration,
    provisional_received: bool,
}

impl Transaction {
    fn reliable(&self) -> bool {
        !matches!(self.remote.kind, TransportKind::UDP)
    }

    pub fn new_client(transaction_type: TransactionType, key: TransactionKey, request: Request, remote: RemoteAddr) -> Self {
        let state = match transaction_type {
            TransactionType::ClientInvite => TransactionState::Calling,
            TransactionType::ClientNonInvite => TransactionState::Trying,
            _ => panic!("new_client used with a server transaction type"),
        };
        Transaction {
            key,
            transaction_type,
            state,
            remote,
            request,
            last_response: None,
            dialog_id: None,
            retransmit_interval: T1,
            retransmit_elapsed: Duration::ZERO,
            provisional_received: false,
        }
    }

    pub fn new_server(transaction_type: TransactionType, key: TransactionKey, request: Request, remote: RemoteAddr) -> Self {
        let state = match transaction_type {
            TransactionType::ServerInvite => TransactionState::Proceeding,
            TransactionType::ServerNonInvite => TransactionState::Trying,
            _ => panic!("new_server used with a client transaction type"),
        };
        Transaction {
            key,
            transaction_type,
            state,
            remote,
            request,
            last_response: None,
            dialog_id: None,
            retransmit_interval: T1,
            retransmit_elapsed: Duration::ZERO,
            provisional_received: false,
        }
    }

    /// The events to emit when a client transaction is first created: send
    /// the request and arm its retransmit/timeout timers.
    pub fn initial_send_events(&self) -> Vec<TransactionEvent> {
        let request = SipMessage::Request(self.request.clone());
        let mut events = vec![TransactionEvent::Send(request, self.remote.clone())];
        if !self.reliable() {
            let timer = match self.transaction_type {
                TransactionType::ClientInvite => TransactionTimer::A,
                TransactionType::ClientNonInvite => TransactionTimer::E,
                _ => unreachable!(),
            };
            events.push(TransactionEvent::ScheduleTimer { timer, after: T1 });
        }
        let timeout_timer = match self.transaction_type {
            TransactionType::ClientInvite => TransactionTimer::B,
            TransactionType::ClientNonInvite => TransactionTimer::F,
            _ => unreachable!(),
        };
        events.push(TransactionEvent::ScheduleTimer { timer: timeout_timer, after: TIMEOUT });
        events
    }

    /// Events to emit when a server INVITE transaction is created: arm the
    /// 200 ms auto-100-Trying deadline (§4.H).
    pub fn initial_receive_events(&self) -> Vec<TransactionEvent> {
        if self.transaction_type == TransactionType::ServerInvite {
            vec![TransactionEvent::ScheduleTimer { timer: TransactionTimer::AutoTrying, after: Duration::from_millis(200) }]
        } else {
            Vec::new()
        }
    }

    /// A final or provisional response arrived for a client transaction.
    pub fn on_response(&mut self, response: Response) -> SipResult<Vec<TransactionEvent>> {
        let mut events = Vec::new();
        let is_provisional = (100..200).contains(&response.status);
        let is_final = response.status >= 200;

        match self.transaction_type {
            TransactionType::ClientInvite => match self.state {
                TransactionState::Calling | TransactionState::Proceeding if is_provisional => {
                    self.provisional_received = true;
                    self.state = TransactionState::Proceeding;
                    if !self.reliable() {
                        events.push(TransactionEvent::CancelTimer(TransactionTimer::A));
                    }
                    events.push(TransactionEvent::Deliver(response));
                }
                TransactionState::Calling | TransactionState::Proceeding if response.status < 300 => {
                    self.state = TransactionState::Terminated;
                    events.push(TransactionEvent::CancelTimer(TransactionTimer::A));
                    events.push(TransactionEvent::CancelTimer(TransactionTimer::B));
                    events.push(TransactionEvent::Deliver(response));
                    events.push(TransactionEvent::Terminated);
                }
                TransactionState::Calling | TransactionState::Proceeding if is_final => {
                    self.state = TransactionState::Completed;
                    self.last_response = Some(response.clone());
                    events.push(TransactionEvent::CancelTimer(TransactionTimer::A));
                    events.push(TransactionEvent::CancelTimer(TransactionTimer::B));
                    let d = if self.reliable() { Duration::ZERO } else { Duration::from_secs(32) };
                    events.push(TransactionEvent::ScheduleTimer { timer: TransactionTimer::D, after: d });
                    events.push(TransactionEvent::Deliver(response));
                }
                TransactionState::Completed => {
                    // Retransmission of the final response while waiting for
                    // Timer D; the ACK has already been sent by the caller.
                    trace!(branch = %self.key.branch, "absorbing retransmitted final response");
                }
                _ => warn!(branch = %self.key.branch, state = ?self.state, "response in unexpected client INVITE state"),
            },
            TransactionType::ClientNonInvite => match self.state {
                TransactionState::Trying | TransactionState::Proceeding if is_provisional => {
                    self.state = TransactionState::Proceeding;
                    events.push(TransactionEvent::Deliver(response));
                }
                TransactionState::Trying | TransactionState::Proceeding if is_final => {
                    self.state = TransactionState::Completed;
                    self.last_response = Some(response.clone());
                    if !self.reliable() {
                        events.push(TransactionEvent::CancelTimer(TransactionTimer::E));
                    }
                    events.push(TransactionEvent::CancelTimer(TransactionTimer::F));
                    let k = if self.reliable() { Duration::ZERO } else { T2 };
                    events.push(TransactionEvent::ScheduleTimer { timer: TransactionTimer::K, after: k });
                    events.push(TransactionEvent::Deliver(response));
                }
                TransactionState::Completed => {
                    trace!(branch = %self.key.branch, "absorbing retransmitted final response");
                }
                _ => warn!(branch = %self.key.branch, state = ?self.state, "response in unexpected client non-INVITE state"),
            },
            _ => return Err(SipError::state_error("on_response", "called on a server transaction")),
        }
        Ok(events)
    }

    /// A retransmission of the original request arrived at a server
    /// transaction; retransmit the last response if one has been sent.
    pub fn on_request_retransmit(&self) -> Vec<TransactionEvent> {
        match &self.last_response {
            Some(resp) => vec![TransactionEvent::Send(SipMessage::Response(resp.clone()), self.remote.clone())],
            None => Vec::new(),
        }
    }

    /// The transaction user is sending a response on a server transaction.
    pub fn respond(&mut self, response: Response) -> SipResult<Vec<TransactionEvent>> {
        let mut events = Vec::new();
        let is_provisional = (100..200).contains(&response.status);
        self.last_response = Some(response.clone());

        match self.transaction_type {
            TransactionType::ServerInvite => {
                if is_provisional {
                    self.state = TransactionState::Proceeding;
                    events.push(TransactionEvent::CancelTimer(TransactionTimer::AutoTrying));
                    events.push(TransactionEvent::Send(SipMessage::Response(response), self.remote.clone()));
                } else if response.status < 300 {
                    self.state = TransactionState::Terminated;
                    events.push(TransactionEvent::CancelTimer(TransactionTimer::AutoTrying));
                    events.push(TransactionEvent::Send(SipMessage::Response(response), self.remote.clone()));
                    events.push(TransactionEvent::Terminated);
                } else {
                    self.state = TransactionState::Completed;
                    events.push(TransactionEvent::CancelTimer(TransactionTimer::AutoTrying));
                    events.push(TransactionEvent::Send(SipMessage::Response(response), self.remote.clone()));
                    if !self.reliable() {
                        events.push(TransactionEvent::ScheduleTimer { timer: TransactionTimer::G, after: T1 });
                    }
                    let h = if self.reliable() { Duration::ZERO } else { TIMEOUT };
                    events.push(TransactionEvent::ScheduleTimer { timer: TransactionTimer::H, after: h });
                }
            }
            TransactionType::ServerNonInvite => {
                self.state = if is_provisional { TransactionState::Proceeding } else { TransactionState::Completed };
                events.push(TransactionEvent::Send(SipMessage::Response(response), self.remote.clone()));
                if !is_provisional {
                    let j = if self.reliable() { Duration::ZERO } else { T2 };
                    events.push(TransactionEvent::ScheduleTimer { timer: TransactionTimer::J, after: j });
                }
            }
            _ => return Err(SipError::state_error("respond", "called on a client transaction")),
        }
        Ok(events)
    }

    /// ACK received for a server INVITE transaction's non-2xx final
    /// response. (ACK to a 2xx bypasses the transaction layer per §4.F and
    /// is handled by the dialog layer directly.)
    pub fn on_ack(&mut self) -> Vec<TransactionEvent> {
        if self.transaction_type != TransactionType::ServerInvite || self.state != TransactionState::Completed {
            return Vec::new();
        }
        self.state = TransactionState::Confirmed;
        let mut events = vec![TransactionEvent::CancelTimer(TransactionTimer::G), TransactionEvent::CancelTimer(TransactionTimer::H)];
        let i = if self.reliable() { Duration::ZERO } else { Duration::from_secs(5) };
        events.push(TransactionEvent::ScheduleTimer { timer: TransactionTimer::I, after: i });
        events
    }

    /// A timer named by `TransactionTimer` fired.
    pub fn on_timer(&mut self, timer: TransactionTimer) -> Vec<TransactionEvent> {
        match (self.transaction_type, timer, self.state) {
            (TransactionType::ClientInvite, TransactionTimer::A, TransactionState::Calling) => {
                self.retransmit_elapsed += self.retransmit_interval;
                if self.retransmit_elapsed >= TIMEOUT {
                    return Vec::new();
                }
                self.retransmit_interval = (self.retransmit_interval * 2).min(T2);
                debug!(branch = %self.key.branch, interval_ms = self.retransmit_interval.as_millis(), "retransmitting INVITE");
                vec![
                    TransactionEvent::Send(SipMessage::Request(self.request.clone()), self.remote.clone()),
                    TransactionEvent::ScheduleTimer { timer: TransactionTimer::A, after: self.retransmit_interval },
                ]
            }
            (TransactionType::ClientNonInvite, TransactionTimer::E, TransactionState::Trying | TransactionState::Proceeding) => {
                self.retransmit_elapsed += self.retransmit_interval;
                if self.retransmit_elapsed >= TIMEOUT {
                    return Vec::new();
                }
                self.retransmit_interval = (self.retransmit_interval * 2).min(T2);
                vec![
                    TransactionEvent::Send(SipMessage::Request(self.request.clone()), self.remote.clone()),
                    TransactionEvent::ScheduleTimer { timer: TransactionTimer::E, after: self.retransmit_interval },
                ]
            }
            (TransactionType::ClientInvite, TransactionTimer::B, TransactionState::Calling | TransactionState::Proceeding) => {
                self.state = TransactionState::Terminated;
                vec![TransactionEvent::Terminated]
            }
            (TransactionType::ClientNonInvite, TransactionTimer::F, TransactionState::Trying | TransactionState::Proceeding) => {
                self.state = TransactionState::Terminated;
                vec![TransactionEvent::Terminated]
            }
            (TransactionType::ClientInvite, TransactionTimer::D, TransactionState::Completed) => {
                self.state = TransactionState::Terminated;
                vec![TransactionEvent::Terminated]
            }
            (TransactionType::ClientNonInvite, TransactionTimer::K, TransactionState::Completed) => {
                self.state = TransactionState::Terminated;
                vec![TransactionEvent::Terminated]
            }
            (TransactionType::ServerInvite, TransactionTimer::G, TransactionState::Completed) => {
                self.retransmit_interval = (self.retransmit_interval * 2).min(T2);
                let resp = self.last_response.clone();
                let mut events = Vec::new();
                if let Some(resp) = resp {
                    events.push(TransactionEvent::Send(SipMessage::Response(resp), self.remote.clone()));
                }
                events.push(TransactionEvent::ScheduleTimer { timer: TransactionTimer::G, after: self.retransmit_interval });
                events
            }
            (TransactionType::ServerInvite, TransactionTimer::H, TransactionState::Completed) => {
                self.state = TransactionState::Terminated;
                vec![TransactionEvent::Terminated]
            }
            (TransactionType::ServerInvite, TransactionTimer::I, TransactionState::Confirmed) => {
                self.state = TransactionState::Terminated;
                vec![TransactionEvent::Terminated]
            }
            (TransactionType::ServerNonInvite, TransactionTimer::J, TransactionState::Completed) => {
                self.state = TransactionState::Terminated;
                vec![TransactionEvent::Terminated]
            }
            (TransactionType::ServerInvite, TransactionTimer::AutoTrying, TransactionState::Proceeding) => {
                let trying = Response {
                    status: 100,
                    reason: "Trying".to_string(),
                    headers: self.request.headers.clone(),
                    body: Vec::new(),
                };
                vec![TransactionEvent::Send(SipMessage::Response(trying), self.remote.clone())]
            }
            _ => Vec::new(),
        }
    }

    /// Whether `send_cancel` may be issued: only once a provisional
    /// response has been received for this INVITE (§4.F).
    pub fn can_cancel(&self) -> bool {
        self.transaction_type == TransactionType::ClientInvite && self.provisional_received
    }

    pub fn is_terminated(&self) -> bool {
        self.state == TransactionState::Terminated
    }
}

/// Applies a transaction's `ScheduleTimer`/`CancelTimer` events to a
/// [`Timer`] deadline heap, so an embedder's event loop has a ready-made
/// store rather than having to roll its own around the named
/// `TransactionTimer` variants. One `TransactionTimers` per live
/// `Transaction` is sufficient: each timer name is scheduled at most once
/// at a time for a given transaction, so re-arming (e.g. Timer A's
/// doubling retransmit) simply replaces the previous deadline.
#[derive(Default)]
pub struct TransactionTimers {
    heap: Timer<TransactionTimer>,
    active: HashMap<TransactionTimer, u64>,
}

impl TransactionTimers {
    pub fn new() -> Self {
        TransactionTimers::default()
    }

    /// Apply every `ScheduleTimer`/`CancelTimer` event in `events`, arming
    /// or cancelling deadlines in the underlying heap. Other event variants
    /// are ignored; the caller handles `Send`/`Deliver`/`Terminated`
    /// itself.
    pub fn apply(&mut self, events: &[TransactionEvent]) {
        for event in events {
            match event {
                TransactionEvent::ScheduleTimer { timer, after } => {
                    if let Some(old_id) = self.active.remove(timer) {
                        self.heap.cancel(old_id);
                    }
                    let id = self.heap.schedule(*after, *timer);
                    self.active.insert(*timer, id);
                }
                TransactionEvent::CancelTimer(timer) => {
                    if let Some(id) = self.active.remove(timer) {
                        self.heap.cancel(id);
                    }
                }
                _ => {}
            }
        }
    }

    /// Pop every timer due at or before `now`, in deadline order, for the
    /// caller to feed back into `Transaction::on_timer`.
    pub fn poll(&mut self, now: Instant) -> Vec<TransactionTimer> {
        let fired = self.heap.poll(now);
        for timer in &fired {
            self.active.remove(timer);
        }
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
