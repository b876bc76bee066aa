//! Crate-wide error taxonomy.
//!
//! One flat enum covers every failure surface the library exposes to an
//! embedder: parsing, SDP negotiation, transaction/dialog bookkeeping and
//! transport delivery. Each variant carries enough context to build the
//! SIP response it maps to; `category()`/`is_recoverable()` let callers
//! branch without matching on the full variant.

use thiserror::Error;

/// Unified error type for all SIP user-agent operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SipError {
    #[error("malformed URI: {reason}")]
    MalformedUri { reason: String },

    #[error("malformed SIP message: {reason}")]
    MalformedMessage { reason: String },

    #[error("unsupported SIP version: {found}")]
    UnsupportedVersion { found: String },

    #[error("malformed SDP: {reason}")]
    MalformedSdp { reason: String },

    #[error("no codec in common between offer and supported list")]
    NoCommonCodec,

    #[error("offer contains no audio media")]
    NoAudio,

    #[error("no dialog matches call-id {call_id}")]
    UnknownDialog { call_id: String },

    #[error("transaction {branch} timed out waiting for a final response")]
    TransactionTimeout { branch: String },

    #[error("transport error sending to {destination}: {reason}")]
    TransportError { destination: String, reason: String },

    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("invalid call-control operation: {operation} ({reason})")]
    StateError { operation: String, reason: String },
}

/// Result alias used throughout the crate.
pub type SipResult<T> = Result<T, SipError>;

impl SipError {
    pub fn malformed_uri(reason: impl Into<String>) -> Self {
        SipError::MalformedUri { reason: reason.into() }
    }

    pub fn malformed_message(reason: impl Into<String>) -> Self {
        SipError::MalformedMessage { reason: reason.into() }
    }

    pub fn malformed_sdp(reason: impl Into<String>) -> Self {
        SipError::MalformedSdp { reason: reason.into() }
    }

    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        SipError::ProtocolViolation { reason: reason.into() }
    }

    pub fn state_error(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        SipError::StateError { operation: operation.into(), reason: reason.into() }
    }

    /// Coarse category, useful for log fields without a full match.
    pub fn category(&self) -> &'static str {
        match self {
            SipError::MalformedUri { .. }
            | SipError::MalformedMessage { .. }
            | SipError::UnsupportedVersion { .. } => "parsing",
            SipError::MalformedSdp { .. } | SipError::NoCommonCodec | SipError::NoAudio => "sdp",
            SipError::UnknownDialog { .. } => "dialog",
            SipError::TransactionTimeout { .. } => "transaction",
            SipError::TransportError { .. } => "transport",
            SipError::ProtocolViolation { .. } => "protocol",
            SipError::StateError { .. } => "state",
        }
    }

    /// Whether the condition stems from peer input (and should be answered
    /// with a SIP error response) rather than being fatal to the call.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SipError::StateError { .. } | SipError::TransportError { .. })
    }

    /// The status code this error maps to when responding on a server
    /// transaction, per the propagation policy in the spec's error design.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SipError::MalformedSdp { .. } | SipError::NoCommonCodec | SipError::NoAudio => {
                Some(488)
            }
            SipError::UnknownDialog { .. } => Some(481),
            SipError::ProtocolViolation { .. } => Some(400),
            _ => None,
        }
    }
}
