//! SIP message (request/response) codec (component C).
//!
//! Framing and header-ordering rules from §4.C: start-line, CRLF-terminated
//! header block, CRLF CRLF separator, body length from `Content-Length`.
//! `Content-Length` is always recomputed at serialization time, never taken
//! on faith from the parsed headers.

use std::fmt;

use crate::error::{SipError, SipResult};
use crate::headers::Headers;
use crate::types::Method;
use crate::uri::Uri;

/// Canonical header emission order (§4.C). Headers not named here keep
/// insertion order in the "remaining" slot; `Content-Length` is always last.
const HEADER_ORDER: &[&str] = &[
    "Via",
    "Max-Forwards",
    "From",
    "To",
    "Call-ID",
    "CSeq",
    "Contact",
    "Route",
    "Record-Route",
    "Allow",
    "Supported",
    "Content-Type",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub request_uri: Uri,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

impl SipMessage {
    pub fn headers(&self) -> &Headers {
        match self {
            SipMessage::Request(r) => &r.headers,
            SipMessage::Response(r) => &r.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            SipMessage::Request(r) => &mut r.headers,
            SipMessage::Response(r) => &mut r.headers,
        }
    }

    pub fn body(&self) -> &[u8] {
        match self {
            SipMessage::Request(r) => &r.body,
            SipMessage::Response(r) => &r.body,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, SipMessage::Request(_))
    }

    /// Verify the §3 "required headers present for dispatch" invariant:
    /// at least one Via, From with a tag, To, Call-ID, CSeq, and (on
    /// requests) Max-Forwards.
    pub fn validate_required_headers(&self) -> SipResult<()> {
        let headers = self.headers();
        if headers.via()?.is_empty() {
            return Err(SipError::protocol_violation("missing Via header"));
        }
        let from = headers.from_addr()?;
        if from.tag().is_none() {
            return Err(SipError::protocol_violation("From header missing tag"));
        }
        headers.to_addr()?;
        headers.call_id()?;
        headers.cseq()?;
        if self.is_request() && headers.max_forwards().is_none() {
            return Err(SipError::protocol_violation("missing Max-Forwards header"));
        }
        Ok(())
    }

    /// Parse a complete message from bytes already framed to their full
    /// length (the transport/stream reader is responsible for buffering
    /// stream transports until `Content-Length` bytes are available;
    /// see §4.E).
    ///
    /// CRLF/LF normalization only ever touches the header block: the body
    /// is sliced out of the raw input and copied verbatim, since per §4.C
    /// its bytes are opaque past the header/body separator and its length
    /// is defined by `Content-Length`, not by line-ending-sensitive text
    /// processing (an SDP body, for instance, uses CRLF line endings of its
    /// own that must not be collapsed before the length check).
    pub fn parse(input: &[u8]) -> SipResult<Self> {
        let (head_bytes, body_bytes) = split_header_block(input)
            .ok_or_else(|| SipError::malformed_message("missing header/body separator"))?;

        let head_text = std::str::from_utf8(head_bytes)
            .map_err(|_| SipError::malformed_message("header block is not valid UTF-8"))?;
        let normalized_head = head_text.replace("\r\n", "\n");

        let mut lines = normalized_head.split('\n');
        let start_line = lines.next().unwrap_or("");

        let mut headers = Headers::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| SipError::malformed_message(format!("malformed header line: {line}")))?;
            headers.append(name.trim(), value.trim());
        }

        let declared_len = headers.content_length();
        let body = match declared_len {
            Some(len) => {
                let len = len as usize;
                if body_bytes.len() < len {
                    return Err(SipError::malformed_message("body shorter than Content-Length"));
                }
                body_bytes[..len].to_vec()
            }
            None => Vec::new(),
        };

        if let Some(status_str) = start_line.strip_prefix("SIP/2.0 ") {
            let mut parts = status_str.splitn(2, ' ');
            let status: u16 = parts
                .next()
                .ok_or_else(|| SipError::malformed_message("missing status code"))?
                .parse()
                .map_err(|_| SipError::malformed_message("non-numeric status code"))?;
            if !(100..=699).contains(&status) {
                return Err(SipError::malformed_message("status code out of range"));
            }
            let reason = parts.next().unwrap_or("").to_string();
            Ok(SipMessage::Response(Response { status, reason, headers, body }))
        } else {
            let mut parts = start_line.split(' ');
            let method_str = parts
                .next()
                .ok_or_else(|| SipError::malformed_message("missing method"))?;
            let uri_str = parts
                .next()
                .ok_or_else(|| SipError::malformed_message("missing request-URI"))?;
            let version = parts
                .next()
                .ok_or_else(|| SipError::malformed_message("missing SIP version"))?;
            if version != "SIP/2.0" {
                return Err(SipError::UnsupportedVersion { found: version.to_string() });
            }
            let method: Method = method_str
                .parse()
                .map_err(|_| SipError::malformed_message("malformed method"))?;
            let request_uri = Uri::parse(uri_str)?;
            Ok(SipMessage::Request(Request { method, request_uri, headers, body }))
        }
    }

    /// Serialize per §4.C's canonical header order, recomputing
    /// `Content-Length` from the actual body length.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::new();
        match self {
            SipMessage::Request(r) => {
                out.push_str(&format!("{} {} SIP/2.0\r\n", r.method, r.request_uri));
            }
            SipMessage::Response(r) => {
                out.push_str(&format!("SIP/2.0 {} {}\r\n", r.status, r.reason));
            }
        }

        let headers = self.headers();
        let body = self.body();

        for name in HEADER_ORDER {
            for value in headers.get_all(name) {
                out.push_str(&format!("{}: {}\r\n", name, value));
            }
        }
        let ordered: std::collections::HashSet<&str> = HEADER_ORDER.iter().copied().collect();
        for (name, value) in headers.iter() {
            if ordered.contains(name.as_str()) || name == "Content-Length" {
                continue;
            }
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.serialize()))
    }
}

/// Locate the header/body separator on the raw bytes (CRLF CRLF, or LF LF
/// for the LF-only input §4.C accepts) and split there, leaving the body
/// slice untouched by any later text normalization.
fn split_header_block(input: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(idx) = find_subslice(input, b"\r\n\r\n") {
        return Some((&input[..idx], &input[idx + 4..]));
    }
    if let Some(idx) = find_subslice(input, b"\n\n") {
        return Some((&input[..idx], &input[idx + 2..]));
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
