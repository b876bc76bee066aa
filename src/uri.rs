//! URI and address parsing (component A).
//!
//! `sip:`/`sips:` URIs and the `NameAddr` (`"Display Name" <uri>;tag=...`)
//! wrapper used by From/To/Contact/Route headers. Parameters and headers
//! preserve insertion order so that `parse` then `serialize` round-trips
//! byte-for-byte modulo whitespace.

use std::fmt;

use crate::error::{SipError, SipResult};

/// SIP URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Sip,
    Sips,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Sip => write!(f, "sip"),
            Scheme::Sips => write!(f, "sips"),
        }
    }
}

/// An ordered `key[=value]` pair, used for both URI parameters and headers.
pub type OrderedParams = Vec<(String, Option<String>)>;

/// A parsed SIP/SIPS URI.
///
/// `user[:password]@host[:port][;params][?headers]`. Parameters and
/// headers are kept as ordered vectors rather than maps so that
/// `parse(serialize(uri)) == uri` even when order is not canonical.
#[derive(Debug, Clone, PartialEq)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: OrderedParams,
    pub headers: OrderedParams,
}

impl Uri {
    pub fn new(scheme: Scheme, host: impl Into<String>) -> Self {
        Uri {
            scheme,
            user: None,
            password: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// The `transport` URI parameter, if present.
    pub fn transport(&self) -> Option<&str> {
        self.param("transport")
    }

    /// Whether the `lr` (loose-route) parameter is present.
    pub fn has_lr(&self) -> bool {
        self.params.iter().any(|(k, _)| k.eq_ignore_ascii_case("lr"))
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn set_param(&mut self, name: &str, value: Option<String>) {
        if let Some(entry) = self.params.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            entry.1 = value;
        } else {
            self.params.push((name.to_string(), value));
        }
    }

    /// Parse `scheme:[user[:password]@]host[:port][;p=v]*[?h=v]*`.
    pub fn parse(input: &str) -> SipResult<Self> {
        let (scheme_str, rest) = input
            .split_once(':')
            .ok_or_else(|| SipError::malformed_uri("missing scheme"))?;
        let scheme = match scheme_str.to_ascii_lowercase().as_str() {
            "sip" => Scheme::Sip,
            "sips" => Scheme::Sips,
            other => return Err(SipError::malformed_uri(format!("unsupported scheme {other}"))),
        };

        // Split off ?headers first (headers may themselves contain ';' inside
        // quoted values in theory, but SIP header values in the headers
        // component are not quoted, so a plain split is sufficient).
        let (before_headers, headers_str) = match rest.find('?') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        let mut segments = before_headers.split(';');
        let userinfo_host = segments.next().unwrap_or("");
        let params = segments
            .map(parse_param)
            .collect::<SipResult<Vec<_>>>()?;

        let (userinfo, hostport) = match userinfo_host.rfind('@') {
            Some(idx) => (Some(&userinfo_host[..idx]), &userinfo_host[idx + 1..]),
            None => (None, userinfo_host),
        };

        let (user, password) = match userinfo {
            Some(ui) => match ui.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
                None => (Some(ui.to_string()), None),
            },
            None => (None, None),
        };

        let (host, port) = parse_hostport(hostport)?;

        let headers = match headers_str {
            Some(h) if !h.is_empty() => h
                .split('&')
                .map(parse_param)
                .collect::<SipResult<Vec<_>>>()?,
            _ => Vec::new(),
        };

        Ok(Uri { scheme, user, password, host, port, params, headers })
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.scheme.to_string());
        out.push(':');
        if let Some(user) = &self.user {
            out.push_str(user);
            if let Some(pw) = &self.password {
                out.push(':');
                out.push_str(pw);
            }
            out.push('@');
        }
        if self.host.contains(':') && !self.host.starts_with('[') {
            out.push('[');
            out.push_str(&self.host);
            out.push(']');
        } else {
            out.push_str(&self.host);
        }
        if let Some(port) = self.port {
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
        if !self.headers.is_empty() {
            out.push('?');
            let rendered: Vec<String> = self
                .headers
                .iter()
                .map(|(k, v)| match v {
                    Some(v) => format!("{k}={v}"),
                    None => k.clone(),
                })
                .collect();
            out.push_str(&rendered.join("&"));
        }
        out
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

fn parse_param(segment: &str) -> SipResult<(String, Option<String>)> {
    match segment.split_once('=') {
        Some((k, v)) => Ok((k.trim().to_string(), Some(v.trim().to_string()))),
        None => Ok((segment.trim().to_string(), None)),
    }
}

fn parse_hostport(hostport: &str) -> SipResult<(String, Option<u16>)> {
    if hostport.is_empty() {
        return Err(SipError::malformed_uri("empty host"));
    }
    if let Some(rest) = hostport.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| SipError::malformed_uri("unbalanced IPv6 bracket"))?;
        let host = rest[..end].to_string();
        let tail = &rest[end + 1..];
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|_| SipError::malformed_uri("invalid port"))?,
            ),
            None => None,
        };
        return Ok((host, port));
    }
    match hostport.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| SipError::malformed_uri("invalid port"))?;
            Ok((host.to_string(), Some(port)))
        }
        _ => Ok((hostport.to_string(), None)),
    }
}

/// `["Display Name"] <sip:uri>;param=value` as used by From/To/Contact/Route.
#[derive(Debug, Clone, PartialEq)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub params: OrderedParams,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        NameAddr { display_name: None, uri, params: Vec::new() }
    }

    pub fn tag(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("tag"))
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if let Some(entry) = self.params.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case("tag")) {
            entry.1 = Some(tag);
        } else {
            self.params.push(("tag".to_string(), Some(tag)));
        }
    }

    /// Parse `["name"] <uri>;p=v` or the bare `addr-spec` form (`sip:...`
    /// with no angle brackets, as RFC 3261 permits for From/To/Contact
    /// without parameters attached to the name-addr wrapper).
    pub fn parse(input: &str) -> SipResult<Self> {
        let input = input.trim();
        if let Some(lt) = input.find('<') {
            let display_raw = input[..lt].trim();
            let display_name = if display_raw.is_empty() {
                None
            } else {
                Some(unquote(display_raw))
            };
            let gt = input[lt..]
                .find('>')
                .map(|i| lt + i)
                .ok_or_else(|| SipError::malformed_uri("unbalanced '<' in name-addr"))?;
            let uri = Uri::parse(&input[lt + 1..gt])?;
            let after = input[gt + 1..].trim_start_matches(';').trim();
            let params = if after.is_empty() {
                Vec::new()
            } else {
                after
                    .split(';')
                    .filter(|s| !s.is_empty())
                    .map(parse_param)
                    .collect::<SipResult<Vec<_>>>()?
            };
            Ok(NameAddr { display_name, uri, params })
        } else {
            // bare addr-spec, optionally followed by ;params
            let mut parts = input.splitn(2, ';');
            let uri_part = parts.next().unwrap_or("").trim();
            let uri = Uri::parse(uri_part)?;
            let params = match parts.next() {
                Some(rest) => rest
                    .split(';')
                    .filter(|s| !s.is_empty())
                    .map(parse_param)
                    .collect::<SipResult<Vec<_>>>()?,
                None => Vec::new(),
            };
            Ok(NameAddr { display_name: None, uri, params })
        }
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.display_name {
            out.push('"');
            out.push_str(&escape(name));
            out.push_str("\" ");
        }
        out.push('<');
        out.push_str(&self.uri.serialize());
        out.push('>');
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

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        s[1..s.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\")
    } else {
        s.to_string()
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_uri() {
        let uri = Uri::parse("sip:alice@atlanta.com:5060;transport=tcp").unwrap();
        assert_eq!(uri.scheme, Scheme::Sip);
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host, "atlanta.com");
        assert_eq!(uri.port, Some(5060));
        assert_eq!(uri.transport(), Some("tcp"));
    }

    #[test]
    fn round_trips_parameter_order() {
        let raw = "sip:bob@biloxi.com;lr;ftag=xyz";
        let uri = Uri::parse(raw).unwrap();
        assert_eq!(uri.serialize(), raw);
        assert!(uri.has_lr());
    }

    #[test]
    fn parses_ipv6_host() {
        let uri = Uri::parse("sip:alice@[2001:db8::1]:5060").unwrap();
        assert_eq!(uri.host, "2001:db8::1");
        assert_eq!(uri.port, Some(5060));
        assert_eq!(uri.serialize(), "sip:alice@[2001:db8::1]:5060");
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(Uri::parse("alice@atlanta.com").is_err());
    }

    #[test]
    fn rejects_empty_host() {
        assert!(Uri::parse("sip:alice@").is_err());
    }

    #[test]
    fn parses_name_addr_with_display_name() {
        let na = NameAddr::parse("\"Alice A.\" <sip:alice@atlanta.com>;tag=1928301774").unwrap();
        assert_eq!(na.display_name.as_deref(), Some("Alice A."));
        assert_eq!(na.tag(), Some("1928301774"));
    }

    #[test]
    fn parses_bare_addr_spec() {
        let na = NameAddr::parse("sip:bob@biloxi.com").unwrap();
        assert!(na.display_name.is_none());
        assert_eq!(na.uri.host, "biloxi.com");
    }

    #[test]
    fn escapes_quoted_display_name_on_serialize() {
        let mut na = NameAddr::new(Uri::parse("sip:a@b.com").unwrap());
        na.display_name = Some("Alice \"Ally\"".to_string());
        let out = na.serialize();
        assert!(out.contains("\\\"Ally\\\""));
    }
}
