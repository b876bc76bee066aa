//! Header field model and codec (component B).
//!
//! `Headers` is a case-insensitive, order-preserving multimap of raw values,
//! generalized from the teacher's line-oriented `extract_header_value`
//! helpers into a full structured store: `get_all`/`get_first`/`set_single`/
//! `append`/`remove` on the raw store, plus typed accessors (`via()`,
//! `from()`, `contact()`, ...) that parse lazily and cache the result until
//! the next mutation.

use std::cell::RefCell;

use crate::error::{SipError, SipResult};
use crate::types::Method;
use crate::uri::{NameAddr, OrderedParams, Uri};

/// Expand an RFC 3261 compact header name to its canonical long form.
/// Returns the canonical capitalization for any other recognized header,
/// or `None` if the name is not one this crate assigns special capitalization to.
fn canonical_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    let long = match lower.as_str() {
        "v" => "via",
        "f" => "from",
        "t" => "to",
        "m" => "contact",
        "i" => "call-id",
        "l" => "content-length",
        "c" => "content-type",
        "s" => "subject",
        "k" => "supported",
        "e" => "content-encoding",
        "x" => "session-expires",
        other => other,
    };
    match long {
        "via" => "Via".to_string(),
        "from" => "From".to_string(),
        "to" => "To".to_string(),
        "contact" => "Contact".to_string(),
        "call-id" => "Call-ID".to_string(),
        "content-length" => "Content-Length".to_string(),
        "content-type" => "Content-Type".to_string(),
        "subject" => "Subject".to_string(),
        "supported" => "Supported".to_string(),
        "content-encoding" => "Content-Encoding".to_string(),
        "session-expires" => "Session-Expires".to_string(),
        "cseq" => "CSeq".to_string(),
        "max-forwards" => "Max-Forwards".to_string(),
        "route" => "Route".to_string(),
        "record-route" => "Record-Route".to_string(),
        "allow" => "Allow".to_string(),
        "www-authenticate" => "WWW-Authenticate".to_string(),
        other => {
            // Title-case each hyphen-separated segment for unrecognized headers.
            other
                .split('-')
                .map(|seg| {
                    let mut c = seg.chars();
                    match c.next() {
                        Some(first) => first.to_ascii_uppercase().to_string() + c.as_str(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join("-")
        }
    }
}

/// Headers that may carry multiple comma-separated values on one line and
/// so are split into one store entry per value.
fn is_multi_value(canonical: &str) -> bool {
    matches!(
        canonical,
        "Via" | "Route" | "Record-Route" | "Contact" | "Allow" | "Supported"
    )
}

/// Split a header value on commas that are outside double-quotes and
/// outside angle brackets, per §4.B's tokenization rules.
pub fn split_outside_quotes_and_brackets(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut angle_depth = 0i32;
    for ch in value.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '<' if !in_quotes => {
                angle_depth += 1;
                current.push(ch);
            }
            '>' if !in_quotes => {
                angle_depth -= 1;
                current.push(ch);
            }
            ',' if !in_quotes && angle_depth <= 0 => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.into_iter().filter(|s| !s.is_empty()).collect()
}

#[derive(Default, Clone)]
struct HeaderCache {
    via: Option<Vec<Via>>,
    from: Option<NameAddr>,
    to: Option<NameAddr>,
    contact: Option<Vec<NameAddr>>,
    route: Option<Vec<NameAddr>>,
    record_route: Option<Vec<NameAddr>>,
    cseq: Option<CSeq>,
    call_id: Option<String>,
    max_forwards: Option<u32>,
    content_length: Option<u32>,
    content_type: Option<String>,
    allow: Option<Vec<String>>,
    supported: Option<Vec<String>>,
}

/// Case-insensitive, order-preserving header store. Raw entries use
/// canonical capitalization; multi-value headers (Via, Route, Record-Route,
/// Contact, Allow, Supported) are stored as one entry per value.
///
/// Structured accessors (`via()`, `from_addr()`, ...) parse lazily on first
/// call and cache the result; any mutating call (`append`/`set_single`/
/// `remove`) clears the whole cache rather than tracking per-name
/// dirtiness, which is cheap and impossible to get wrong.
#[derive(Debug, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
    cache: RefCell<HeaderCache>,
}

impl Clone for Headers {
    fn clone(&self) -> Self {
        Headers { entries: self.entries.clone(), cache: RefCell::new(HeaderCache::default()) }
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let canonical = canonical_name(name);
        self.entries
            .iter()
            .filter(|(k, _)| *k == canonical)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.get_all(name).into_iter().next()
    }

    /// Replace all existing values for `name` with a single value.
    pub fn set_single(&mut self, name: &str, value: impl Into<String>) {
        let canonical = canonical_name(name);
        self.entries.retain(|(k, _)| *k != canonical);
        self.entries.push((canonical, value.into()));
        self.invalidate_cache();
    }

    /// Append a value for `name`, keeping any existing ones.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let canonical = canonical_name(name);
        let value = value.into();
        if is_multi_value(&canonical) {
            for part in split_outside_quotes_and_brackets(&value) {
                self.entries.push((canonical.clone(), part));
            }
        } else {
            self.entries.push((canonical, value));
        }
        self.invalidate_cache();
    }

    pub fn remove(&mut self, name: &str) {
        let canonical = canonical_name(name);
        self.entries.retain(|(k, _)| *k != canonical);
        self.invalidate_cache();
    }

    fn invalidate_cache(&mut self) {
        *self.cache.borrow_mut() = HeaderCache::default();
    }

    pub fn names(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for (k, _) in &self.entries {
            if !seen.contains(&k.as_str()) {
                seen.push(k.as_str());
            }
        }
        seen
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.entries.iter()
    }

    // ---- structured accessors (lazy, cached until the next mutation) ----

    pub fn via(&self) -> SipResult<Vec<Via>> {
        if let Some(v) = &self.cache.borrow().via {
            return Ok(v.clone());
        }
        let parsed: Vec<Via> = self.get_all("Via").iter().map(|v| Via::parse(v)).collect::<SipResult<_>>()?;
        self.cache.borrow_mut().via = Some(parsed.clone());
        Ok(parsed)
    }

    pub fn from_addr(&self) -> SipResult<NameAddr> {
        if let Some(v) = &self.cache.borrow().from {
            return Ok(v.clone());
        }
        let raw = self
            .get_first("From")
            .ok_or_else(|| SipError::protocol_violation("missing From header"))?;
        let parsed = NameAddr::parse(raw)?;
        self.cache.borrow_mut().from = Some(parsed.clone());
        Ok(parsed)
    }

    pub fn to_addr(&self) -> SipResult<NameAddr> {
        if let Some(v) = &self.cache.borrow().to {
            return Ok(v.clone());
        }
        let raw = self
            .get_first("To")
            .ok_or_else(|| SipError::protocol_violation("missing To header"))?;
        let parsed = NameAddr::parse(raw)?;
        self.cache.borrow_mut().to = Some(parsed.clone());
        Ok(parsed)
    }

    pub fn contact(&self) -> SipResult<Vec<NameAddr>> {
        if let Some(v) = &self.cache.borrow().contact {
            return Ok(v.clone());
        }
        let parsed: Vec<NameAddr> =
            self.get_all("Contact").iter().map(|v| NameAddr::parse(v)).collect::<SipResult<_>>()?;
        self.cache.borrow_mut().contact = Some(parsed.clone());
        Ok(parsed)
    }

    pub fn route(&self) -> SipResult<Vec<NameAddr>> {
        if let Some(v) = &self.cache.borrow().route {
            return Ok(v.clone());
        }
        let parsed: Vec<NameAddr> =
            self.get_all("Route").iter().map(|v| NameAddr::parse(v)).collect::<SipResult<_>>()?;
        self.cache.borrow_mut().route = Some(parsed.clone());
        Ok(parsed)
    }

    pub fn record_route(&self) -> SipResult<Vec<NameAddr>> {
        if let Some(v) = &self.cache.borrow().record_route {
            return Ok(v.clone());
        }
        let parsed: Vec<NameAddr> = self
            .get_all("Record-Route")
            .iter()
            .map(|v| NameAddr::parse(v))
            .collect::<SipResult<_>>()?;
        self.cache.borrow_mut().record_route = Some(parsed.clone());
        Ok(parsed)
    }

    pub fn cseq(&self) -> SipResult<CSeq> {
        if let Some(v) = &self.cache.borrow().cseq {
            return Ok(v.clone());
        }
        let raw = self
            .get_first("CSeq")
            .ok_or_else(|| SipError::protocol_violation("missing CSeq header"))?;
        let parsed = CSeq::parse(raw)?;
        self.cache.borrow_mut().cseq = Some(parsed.clone());
        Ok(parsed)
    }

    pub fn call_id(&self) -> SipResult<String> {
        if let Some(v) = &self.cache.borrow().call_id {
            return Ok(v.clone());
        }
        let raw = self
            .get_first("Call-ID")
            .ok_or_else(|| SipError::protocol_violation("missing Call-ID header"))?
            .to_string();
        self.cache.borrow_mut().call_id = Some(raw.clone());
        Ok(raw)
    }

    pub fn max_forwards(&self) -> Option<u32> {
        if let Some(v) = self.cache.borrow().max_forwards {
            return Some(v);
        }
        let parsed = self.get_first("Max-Forwards").and_then(|v| v.trim().parse().ok())?;
        self.cache.borrow_mut().max_forwards = Some(parsed);
        Some(parsed)
    }

    pub fn content_length(&self) -> Option<u32> {
        if let Some(v) = self.cache.borrow().content_length {
            return Some(v);
        }
        let parsed = self.get_first("Content-Length").and_then(|v| v.trim().parse().ok())?;
        self.cache.borrow_mut().content_length = Some(parsed);
        Some(parsed)
    }

    pub fn content_type(&self) -> Option<String> {
        if let Some(v) = &self.cache.borrow().content_type {
            return Some(v.clone());
        }
        let parsed = self.get_first("Content-Type")?.to_string();
        self.cache.borrow_mut().content_type = Some(parsed.clone());
        Some(parsed)
    }

    pub fn allow(&self) -> Vec<String> {
        if let Some(v) = &self.cache.borrow().allow {
            return v.clone();
        }
        let parsed: Vec<String> = self.get_all("Allow").into_iter().map(str::to_string).collect();
        self.cache.borrow_mut().allow = Some(parsed.clone());
        parsed
    }

    pub fn supported(&self) -> Vec<String> {
        if let Some(v) = &self.cache.borrow().supported {
            return v.clone();
        }
        let parsed: Vec<String> = self.get_all("Supported").into_iter().map(str::to_string).collect();
        self.cache.borrow_mut().supported = Some(parsed.clone());
        parsed
    }

    /// All headers whose name starts with `X-` (case-insensitive), in
    /// first-seen order, as the UAS facade collects them for `IncomingCall`.
    pub fn x_headers(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (k, v) in &self.entries {
            if k.len() > 2 && k[..2].eq_ignore_ascii_case("x-") && !out.iter().any(|(n, _): &(String, String)| n == k) {
                out.push((k.clone(), v.clone()));
            }
        }
        out
    }
}

/// A parsed Via header: `SIP/2.0/<transport> <sent-by>;<params>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Via {
    pub transport: String,
    pub sent_by_host: String,
    pub sent_by_port: Option<u16>,
    pub params: OrderedParams,
}

impl Via {
    pub fn branch(&self) -> Option<&str> {
        self.param("branch")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    /// Whether `branch` begins with the RFC 3261 magic cookie.
    pub fn is_rfc3261_compliant(&self) -> bool {
        self.branch().map(|b| b.starts_with("z9hG4bK")).unwrap_or(false)
    }

    pub fn parse(input: &str) -> SipResult<Self> {
        let input = input.trim();
        let (proto, rest) = input
            .split_once(char::is_whitespace)
            .ok_or_else(|| SipError::malformed_message("malformed Via header"))?;
        let mut proto_parts = proto.splitn(3, '/');
        let _sip = proto_parts.next();
        let _version = proto_parts.next();
        let transport = proto_parts
            .next()
            .ok_or_else(|| SipError::malformed_message("malformed Via sent-protocol"))?
            .to_string();

        let mut segments = rest.trim().split(';');
        let sent_by = segments.next().unwrap_or("").trim();
        let (host, port) = match sent_by.rsplit_once(':') {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) => {
                (h.to_string(), p.parse::<u16>().ok())
            }
            _ => (sent_by.to_string(), None),
        };
        let params = segments
            .filter(|s| !s.trim().is_empty())
            .map(|s| match s.trim().split_once('=') {
                Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
                None => (s.trim().to_string(), None),
            })
            .collect();

        Ok(Via { transport, sent_by_host: host, sent_by_port: port, params })
    }

    pub fn serialize(&self) -> String {
        let mut out = format!("SIP/2.0/{}", self.transport);
        out.push(' ');
        out.push_str(&self.sent_by_host);
        if let Some(port) = self.sent_by_port {
            out.push(':');
            out.push_str(&port.to_string());
        }
        for (k, v) in &self.params {
            out.push(';');
            out.push_str(k);
            if let Some(v) = v {
                out.push('=');
                out.push_str(v);
            }
        }
        out
    }
}

/// A parsed CSeq header: `<seq> <METHOD>`.
#[derive(Debug, Clone, PartialEq)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn parse(input: &str) -> SipResult<Self> {
        let input = input.trim();
        let (seq_str, method_str) = input
            .split_once(char::is_whitespace)
            .ok_or_else(|| SipError::malformed_message("malformed CSeq header"))?;
        let seq = seq_str
            .trim()
            .parse::<u32>()
            .map_err(|_| SipError::malformed_message("malformed CSeq sequence number"))?;
        let method: Method = method_str
            .trim()
            .parse()
            .map_err(|_| SipError::malformed_message("malformed CSeq method"))?;
        Ok(CSeq { seq, method })
    }

    pub fn serialize(&self) -> String {
        format!("{} {}", self.seq, self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Headers {
        let mut h = Headers::new();
        h.append("Via", "SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds");
        h.append("From", "Alice <sip:alice@atlanta.com>;tag=1928301774");
        h.append("To", "Bob <sip:bob@biloxi.com>");
        h.append("Call-ID", "a84b4c76e66710@pc33.atlanta.com");
        h.append("CSeq", "314159 INVITE");
        h.append("Max-Forwards", "70");
        h
    }

    #[test]
    fn compact_forms_expand_to_canonical_names() {
        let mut h = Headers::new();
        h.append("v", "SIP/2.0/UDP host;branch=z9hG4bK1");
        h.append("f", "Alice <sip:alice@atlanta.com>;tag=1");
        h.append("t", "Bob <sip:bob@biloxi.com>");
        h.append("i", "callid@host");
        h.append("l", "0");
        assert_eq!(h.get_first("Via"), h.get_first("v"));
        assert_eq!(h.names(), vec!["Via", "From", "To", "Call-ID", "Content-Length"]);
    }

    #[test]
    fn via_header_parses_branch_and_transport() {
        let h = sample();
        let vias = h.via().unwrap();
        assert_eq!(vias.len(), 1);
        assert_eq!(vias[0].transport, "UDP");
        assert_eq!(vias[0].branch(), Some("z9hG4bK776asdhds"));
        assert!(vias[0].is_rfc3261_compliant());
    }

    #[test]
    fn from_to_parse_with_tags() {
        let h = sample();
        let from = h.from_addr().unwrap();
        assert_eq!(from.tag(), Some("1928301774"));
        let to = h.to_addr().unwrap();
        assert!(to.tag().is_none());
    }

    #[test]
    fn cseq_parses_number_and_method() {
        let h = sample();
        let cseq = h.cseq().unwrap();
        assert_eq!(cseq.seq, 314159);
        assert_eq!(cseq.method, Method::INVITE);
    }

    #[test]
    fn multi_value_header_splits_outside_quotes_and_brackets() {
        let mut h = Headers::new();
        h.append(
            "Contact",
            "\"Alice, A.\" <sip:alice@atlanta.com>, <sip:alice@192.0.2.1>",
        );
        assert_eq!(h.get_all("Contact").len(), 2);
    }

    #[test]
    fn set_single_replaces_all_prior_values() {
        let mut h = sample();
        h.set_single("Max-Forwards", "69");
        assert_eq!(h.get_all("Max-Forwards"), vec!["69"]);
    }

    #[test]
    fn x_headers_are_collected_in_order() {
        let mut h = sample();
        h.append("X-Customer-Id", "abc");
        h.append("X-Trace", "1-2-3");
        assert_eq!(
            h.x_headers(),
            vec![("X-Customer-Id".to_string(), "abc".to_string()), ("X-Trace".to_string(), "1-2-3".to_string())]
        );
    }
}
