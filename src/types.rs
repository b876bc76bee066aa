//! Shared enums used across the message, transaction and SDP layers.

use strum_macros::{Display, EnumString};

/// SIP methods, RFC 3261 plus the common extensions the corpus recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Method {
    INVITE,
    ACK,
    OPTIONS,
    BYE,
    CANCEL,
    REGISTER,
    PRACK,     // RFC 3262
    SUBSCRIBE, // RFC 6665
    NOTIFY,    // RFC 6665
    PUBLISH,   // RFC 3903
    INFO,      // RFC 6086
    REFER,     // RFC 3515
    MESSAGE,   // RFC 3428
    UPDATE,    // RFC 3311
    #[strum(default)]
    Unknown(String),
}

/// Transport protocol carried in the Via `sent-protocol` and URI `transport`
/// parameter. TLS/WS are parsed (so a peer offering them doesn't fail to
/// parse) but the transport layer itself only implements UDP/TCP (non-goal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TransportKind {
    UDP,
    TCP,
    TLS,
    WS,
    WSS,
}

/// SDP media direction attribute, and its offer/answer inversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Sendrecv,
    Sendonly,
    Recvonly,
    Inactive,
}

impl Direction {
    /// RFC 3264 answerer-side direction inversion.
    pub fn inverted(self) -> Direction {
        match self {
            Direction::Sendonly => Direction::Recvonly,
            Direction::Recvonly => Direction::Sendonly,
            Direction::Sendrecv => Direction::Sendrecv,
            Direction::Inactive => Direction::Inactive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn method_parses_known_and_unknown() {
        assert_eq!(Method::from_str("INVITE").unwrap(), Method::INVITE);
        assert_eq!(Method::from_str("FOOBAR").unwrap(), Method::Unknown("FOOBAR".into()));
    }

    #[test]
    fn direction_inverts_per_rfc_3264() {
        assert_eq!(Direction::Sendonly.inverted(), Direction::Recvonly);
        assert_eq!(Direction::Recvonly.inverted(), Direction::Sendonly);
        assert_eq!(Direction::Sendrecv.inverted(), Direction::Sendrecv);
        assert_eq!(Direction::Inactive.inverted(), Direction::Inactive);
    }
}
