//! A minimal RFC 3261 SIP user-agent library for voice-AI backends.
//!
//! Signaling only: the caller supplies a [`transport::Transport`] for
//! socket I/O and a [`rtp_bridge::CallSession`] for media, and drives the
//! event loop from whatever async runtime it already runs. See
//! [`transaction`] and [`dialog`] for the state machines that make up the
//! core of the library.

pub mod dialog;
pub mod error;
pub mod headers;
pub mod ids;
pub mod message;
pub mod rtp_bridge;
pub mod sdp;
pub mod timer;
pub mod transaction;
pub mod transport;
pub mod types;
pub mod uac;
pub mod uas;
pub mod uri;

pub use dialog::{Dialog, DialogId, DialogRole, DialogState};
pub use error::{SipError, SipResult};
pub use headers::{Headers, Via};
pub use ids::{generate_branch, generate_call_id, generate_tag};
pub use message::{Request, Response, SipMessage};
pub use rtp_bridge::CallSession;
pub use sdp::{negotiate as negotiate_sdp, MediaDescription, Session, SupportedCodecs};
pub use transaction::{Transaction, TransactionEvent, TransactionKey, TransactionTimers, TransactionType};
pub use transport::{RemoteAddr, Transport, TransportCallback};
pub use types::{Direction, Method, TransportKind};
pub use uac::PendingRequest;
pub use uas::IncomingCall;
pub use uri::{NameAddr, Uri};
