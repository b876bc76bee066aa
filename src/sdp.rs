//! SDP model, codec and offer/answer negotiation (component D, RFC 4566/3264).
//!
//! Parsing is line-oriented exactly like the teacher's simplified SDP
//! parser, generalized from "just enough for B2BUA address rewriting" to
//! the full session/media model the spec's data model calls for:
//! origin, bandwidth, session- and media-level attributes, codec maps,
//! direction, and answerer-side negotiation.

use std::fmt;

use crate::error::{SipError, SipResult};
use crate::types::Direction;

/// `o=<username> <sess-id> <sess-version> <nettype> <addrtype> <unicast-address>`
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    pub username: String,
    pub sess_id: String,
    pub sess_version: String,
    pub nettype: String,
    pub addrtype: String,
    pub unicast_address: String,
}

impl Default for Origin {
    fn default() -> Self {
        Origin {
            username: "-".to_string(),
            sess_id: "0".to_string(),
            sess_version: "0".to_string(),
            nettype: "IN".to_string(),
            addrtype: "IP4".to_string(),
            unicast_address: "127.0.0.1".to_string(),
        }
    }
}

/// `c=<nettype> <addrtype> <address>`
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub nettype: String,
    pub addrtype: String,
    pub address: String,
}

impl Connection {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let addrtype = if address.contains(':') { "IP6" } else { "IP4" };
        Connection { nettype: "IN".to_string(), addrtype: addrtype.to_string(), address }
    }
}

/// `a=rtpmap:<pt> <encoding>/<clock-rate>[/<channels>]`, with `fmtp` merged in.
#[derive(Debug, Clone, PartialEq)]
pub struct Codec {
    pub payload_type: u8,
    pub encoding_name: String,
    pub clock_rate: u32,
    pub channels: Option<u32>,
    pub fmtp: Option<String>,
}

impl Codec {
    pub fn is_dtmf(&self) -> bool {
        self.encoding_name.eq_ignore_ascii_case("telephone-event")
    }
}

/// Statically-assigned RTP payload types pre-seeded when absent from `rtpmap`.
fn static_codec(pt: u8) -> Option<Codec> {
    match pt {
        0 => Some(Codec { payload_type: 0, encoding_name: "PCMU".into(), clock_rate: 8000, channels: Some(1), fmtp: None }),
        8 => Some(Codec { payload_type: 8, encoding_name: "PCMA".into(), clock_rate: 8000, channels: Some(1), fmtp: None }),
        9 => Some(Codec { payload_type: 9, encoding_name: "G722".into(), clock_rate: 8000, channels: Some(1), fmtp: None }),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescription {
    pub media_type: String,
    pub port: u16,
    pub proto: String,
    pub payload_types: Vec<u8>,
    pub direction: Direction,
    pub codecs: Vec<Codec>,
    pub ptime: Option<u32>,
    pub connection: Option<Connection>,
    pub bandwidth: Vec<(String, u64)>,
    pub fingerprint: Option<String>,
    pub attributes: Vec<(String, Option<String>)>,
}

impl MediaDescription {
    fn new(media_type: impl Into<String>, port: u16, proto: impl Into<String>, payload_types: Vec<u8>) -> Self {
        MediaDescription {
            media_type: media_type.into(),
            port,
            proto: proto.into(),
            payload_types,
            direction: Direction::Sendrecv,
            codecs: Vec::new(),
            ptime: None,
            connection: None,
            bandwidth: Vec::new(),
            fingerprint: None,
            attributes: Vec::new(),
        }
    }

    pub fn codec_for(&self, pt: u8) -> Option<&Codec> {
        self.codecs.iter().find(|c| c.payload_type == pt)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub origin: Origin,
    pub session_name: String,
    pub connection: Option<Connection>,
    pub timing: Vec<(u64, u64)>,
    pub bandwidth: Vec<(String, u64)>,
    pub attributes: Vec<(String, Option<String>)>,
    pub media: Vec<MediaDescription>,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            origin: Origin::default(),
            session_name: "-".to_string(),
            connection: None,
            timing: vec![(0, 0)],
            bandwidth: Vec::new(),
            attributes: Vec::new(),
            media: Vec::new(),
        }
    }
}

impl Session {
    /// Parse an SDP body (RFC 4566 `<type>=<value>` records, CRLF or LF).
    pub fn parse(input: &str) -> SipResult<Self> {
        let mut session = Session { timing: Vec::new(), ..Session::default() };
        let mut current_media: Option<MediaDescription> = None;

        for raw_line in input.lines() {
            let line = raw_line.trim_end_matches('\r');
            if line.len() < 2 || line.as_bytes()[1] != b'=' {
                continue;
            }
            let field = line.as_bytes()[0] as char;
            let value = line[2..].trim();

            match field {
                'o' => session.origin = parse_origin(value)?,
                's' => session.session_name = value.to_string(),
                'c' => {
                    let conn = parse_connection(value)?;
                    match &mut current_media {
                        Some(m) => m.connection = Some(conn),
                        None => session.connection = Some(conn),
                    }
                }
                't' => session.timing.push(parse_timing(value)?),
                'b' => {
                    let bw = parse_bandwidth(value)?;
                    match &mut current_media {
                        Some(m) => m.bandwidth.push(bw),
                        None => session.bandwidth.push(bw),
                    }
                }
                'm' => {
                    if let Some(m) = current_media.take() {
                        session.media.push(m);
                    }
                    current_media = Some(parse_media(value)?);
                }
                'a' => {
                    let (name, val) = parse_attribute(value);
                    apply_attribute(&name, val.as_deref(), &mut current_media, &mut session);
                }
                _ => {}
            }
        }
        if let Some(m) = current_media.take() {
            session.media.push(m);
        }
        if session.timing.is_empty() {
            session.timing.push((0, 0));
        }
        Ok(session)
    }

    /// Serialize in RFC 4566 canonical field order.
    pub fn build(&self) -> String {
        let mut out = String::new();
        out.push_str("v=0\r\n");
        out.push_str(&format!(
            "o={} {} {} {} {} {}\r\n",
            self.origin.username,
            self.origin.sess_id,
            self.origin.sess_version,
            self.origin.nettype,
            self.origin.addrtype,
            self.origin.unicast_address
        ));
        out.push_str(&format!("s={}\r\n", self.session_name));
        if let Some(c) = &self.connection {
            out.push_str(&format!("c={} {} {}\r\n", c.nettype, c.addrtype, c.address));
        }
        for (start, stop) in &self.timing {
            out.push_str(&format!("t={} {}\r\n", start, stop));
        }
        for (kind, value) in &self.bandwidth {
            out.push_str(&format!("b={}:{}\r\n", kind, value));
        }
        for (name, value) in &self.attributes {
            out.push_str(&render_attr(name, value.as_deref()));
        }
        for media in &self.media {
            out.push_str(&format!(
                "m={} {} {} {}\r\n",
                media.media_type,
                media.port,
                media.proto,
                media
                    .payload_types
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            ));
            if let Some(c) = &media.connection {
                out.push_str(&format!("c={} {} {}\r\n", c.nettype, c.addrtype, c.address));
            }
            for (kind, value) in &media.bandwidth {
                out.push_str(&format!("b={}:{}\r\n", kind, value));
            }
            for codec in &media.codecs {
                out.push_str(&format!(
                    "a=rtpmap:{} {}/{}{}\r\n",
                    codec.payload_type,
                    codec.encoding_name,
                    codec.clock_rate,
                    codec.channels.map(|c| format!("/{c}")).unwrap_or_default()
                ));
                if let Some(fmtp) = &codec.fmtp {
                    out.push_str(&format!("a=fmtp:{} {}\r\n", codec.payload_type, fmtp));
                }
            }
            if let Some(ptime) = media.ptime {
                out.push_str(&format!("a=ptime:{}\r\n", ptime));
            }
            out.push_str(&format!("a={}\r\n", direction_str(media.direction)));
            for (name, value) in &media.attributes {
                out.push_str(&render_attr(name, value.as_deref()));
            }
        }
        out
    }

    /// First `audio` media description in the session, if any.
    pub fn audio(&self) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.media_type == "audio")
    }
}

fn render_attr(name: &str, value: Option<&str>) -> String {
    match value {
        Some(v) => format!("a={}:{}\r\n", name, v),
        None => format!("a={}\r\n", name),
    }
}

fn direction_str(dir: Direction) -> &'static str {
    match dir {
        Direction::Sendrecv => "sendrecv",
        Direction::Sendonly => "sendonly",
        Direction::Recvonly => "recvonly",
        Direction::Inactive => "inactive",
    }
}

fn parse_origin(value: &str) -> SipResult<Origin> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 6 {
        return Err(SipError::malformed_sdp("invalid origin (o=) line"));
    }
    Ok(Origin {
        username: parts[0].to_string(),
        sess_id: parts[1].to_string(),
        sess_version: parts[2].to_string(),
        nettype: parts[3].to_string(),
        addrtype: parts[4].to_string(),
        unicast_address: parts[5].to_string(),
    })
}

fn parse_connection(value: &str) -> SipResult<Connection> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(SipError::malformed_sdp("invalid connection (c=) line"));
    }
    Ok(Connection {
        nettype: parts[0].to_string(),
        addrtype: parts[1].to_string(),
        address: parts[2].to_string(),
    })
}

fn parse_timing(value: &str) -> SipResult<(u64, u64)> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(SipError::malformed_sdp("invalid timing (t=) line"));
    }
    let start = parts[0].parse().map_err(|_| SipError::malformed_sdp("invalid t= start"))?;
    let stop = parts[1].parse().map_err(|_| SipError::malformed_sdp("invalid t= stop"))?;
    Ok((start, stop))
}

fn parse_bandwidth(value: &str) -> SipResult<(String, u64)> {
    let (kind, num) = value.split_once(':').ok_or_else(|| SipError::malformed_sdp("invalid bandwidth (b=) line"))?;
    let num = num.trim().parse().map_err(|_| SipError::malformed_sdp("invalid bandwidth value"))?;
    Ok((kind.trim().to_string(), num))
}

fn parse_media(value: &str) -> SipResult<MediaDescription> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(SipError::malformed_sdp("invalid media (m=) line"));
    }
    let port = parts[1].parse().map_err(|_| SipError::malformed_sdp("invalid media port"))?;
    let payload_types = parts[3..]
        .iter()
        .filter_map(|s| s.parse::<u8>().ok())
        .collect();
    Ok(MediaDescription::new(parts[0], port, parts[2], payload_types))
}

fn parse_attribute(value: &str) -> (String, Option<String>) {
    match value.split_once(':') {
        Some((name, val)) => (name.trim().to_string(), Some(val.trim().to_string())),
        None => (value.trim().to_string(), None),
    }
}

fn apply_attribute(
    name: &str,
    value: Option<&str>,
    current_media: &mut Option<MediaDescription>,
    session: &mut Session,
) {
    let lower = name.to_ascii_lowercase();
    match (lower.as_str(), current_media.as_mut()) {
        ("sendrecv", Some(m)) => m.direction = Direction::Sendrecv,
        ("sendonly", Some(m)) => m.direction = Direction::Sendonly,
        ("recvonly", Some(m)) => m.direction = Direction::Recvonly,
        ("inactive", Some(m)) => m.direction = Direction::Inactive,
        ("ptime", Some(m)) => {
            m.ptime = value.and_then(|v| v.parse().ok());
        }
        ("fingerprint", Some(m)) => {
            m.fingerprint = value.map(|v| v.to_string());
        }
        ("rtpmap", Some(m)) => {
            if let Some(v) = value {
                if let Some(codec) = parse_rtpmap(v) {
                    m.codecs.retain(|c| c.payload_type != codec.payload_type);
                    m.codecs.push(codec);
                }
            }
        }
        ("fmtp", Some(m)) => {
            if let Some(v) = value {
                if let Some((pt_str, fmtp)) = v.split_once(' ') {
                    if let Ok(pt) = pt_str.trim().parse::<u8>() {
                        if let Some(c) = m.codecs.iter_mut().find(|c| c.payload_type == pt) {
                            c.fmtp = Some(fmtp.trim().to_string());
                        }
                    }
                }
            }
        }
        (_, Some(m)) => m.attributes.push((name.to_string(), value.map(str::to_string))),
        (_, None) => session.attributes.push((name.to_string(), value.map(str::to_string))),
    }
}

fn parse_rtpmap(value: &str) -> Option<Codec> {
    let (pt_str, rest) = value.split_once(' ')?;
    let payload_type = pt_str.trim().parse().ok()?;
    let mut fields = rest.trim().split('/');
    let encoding_name = fields.next()?.to_string();
    let clock_rate = fields.next()?.parse().ok()?;
    let channels = fields.next().and_then(|c| c.parse().ok());
    Some(Codec { payload_type, encoding_name, clock_rate, channels, fmtp: None })
}

/// Payload types this crate negotiates audio calls with, in preference
/// order, plus whether DTMF (`telephone-event`) should be offered/accepted.
#[derive(Debug, Clone)]
pub struct SupportedCodecs {
    pub payload_types: Vec<u8>,
    pub dtmf: bool,
}

/// Build a fresh (non-negotiated) offer for the given local parameters.
pub fn build_offer(local_ip: &str, rtp_port: u16, payload_type: u8, direction: Direction) -> Session {
    let codec = static_codec(payload_type).unwrap_or(Codec {
        payload_type,
        encoding_name: "unknown".into(),
        clock_rate: 8000,
        channels: Some(1),
        fmtp: None,
    });
    let mut session = Session {
        origin: Origin { unicast_address: local_ip.to_string(), ..Origin::default() },
        connection: Some(Connection::new(local_ip)),
        ..Session::default()
    };
    let mut media = MediaDescription::new("audio", rtp_port, "RTP/AVP", vec![payload_type]);
    media.direction = direction;
    media.codecs.push(codec);
    session.media.push(media);
    session
}

/// Answerer-side RFC 3264 negotiation.
///
/// 1. Locates the first `audio` media in the offer (only audio is negotiated).
/// 2. Intersects offered payload types with `supported`, in `supported`'s
///    preference order (first local match wins ties).
/// 3. Includes `telephone-event` in the answer, at the offered payload type,
///    when both the offer and `supported.dtmf` request it.
/// 4. Inverts direction.
/// 5. Builds the answer with `c=IN IP4/IP6 <local_ip>` and the chosen
///    codec(s) at `local_port`.
pub fn negotiate(offer: &Session, local_ip: &str, local_port: u16, supported: &SupportedCodecs) -> SipResult<Session> {
    let offered_audio = offer.audio().ok_or(SipError::NoAudio)?;

    let mut chosen_pt = None;
    for &pt in &supported.payload_types {
        if offered_audio.payload_types.contains(&pt) {
            chosen_pt = Some(pt);
            break;
        }
    }
    let chosen_pt = chosen_pt.ok_or(SipError::NoCommonCodec)?;

    let chosen_codec = offered_audio
        .codec_for(chosen_pt)
        .cloned()
        .or_else(|| static_codec(chosen_pt))
        .unwrap_or(Codec {
            payload_type: chosen_pt,
            encoding_name: "unknown".into(),
            clock_rate: 8000,
            channels: Some(1),
            fmtp: None,
        });

    let dtmf_codec = if supported.dtmf {
        offered_audio.codecs.iter().find(|c| c.is_dtmf()).cloned()
    } else {
        None
    };

    let mut payload_types = vec![chosen_pt];
    let mut codecs = vec![chosen_codec];
    if let Some(dtmf) = &dtmf_codec {
        payload_types.push(dtmf.payload_type);
        codecs.push(dtmf.clone());
    }

    let mut answer = Session {
        origin: Origin { unicast_address: local_ip.to_string(), ..Origin::default() },
        connection: Some(Connection::new(local_ip)),
        ..Session::default()
    };
    let mut media = MediaDescription::new("audio", local_port, offered_audio.proto.clone(), payload_types);
    media.direction = offered_audio.direction.inverted();
    media.codecs = codecs;
    answer.media.push(media);
    Ok(answer)
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=alice 2890844526 2890844526 IN IP4 atlanta.com\r\n\
s=-\r\n\
c=IN IP4 192.0.2.1\r\n\
t=0 0\r\n\
m=audio 20000 RTP/AVP 0 8\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:8 PCMA/8000\r\n\
a=sendrecv\r\n";

    #[test]
    fn parses_basic_offer() {
        let session = Session::parse(OFFER).unwrap();
        assert_eq!(session.origin.unicast_address, "atlanta.com");
        assert_eq!(session.media.len(), 1);
        assert_eq!(session.media[0].port, 20000);
        assert_eq!(session.media[0].codecs.len(), 2);
        assert_eq!(session.media[0].direction, Direction::Sendrecv);
    }

    #[test]
    fn negotiates_first_local_preference() {
        let offer = Session::parse(OFFER).unwrap();
        let supported = SupportedCodecs { payload_types: vec![0, 8], dtmf: false };
        let answer = negotiate(&offer, "203.0.113.5", 30000, &supported).unwrap();
        let media = answer.audio().unwrap();
        assert_eq!(media.payload_types, vec![0]);
        assert_eq!(media.port, 30000);
        assert_eq!(media.direction, Direction::Sendrecv);
        assert_eq!(answer.connection.as_ref().unwrap().address, "203.0.113.5");
    }

    #[test]
    fn negotiation_fails_with_no_common_codec() {
        let offer = Session::parse("v=0\r\no=a 1 1 IN IP4 h\r\ns=-\r\nt=0 0\r\nm=audio 10 RTP/AVP 9\r\n").unwrap();
        let supported = SupportedCodecs { payload_types: vec![0, 8], dtmf: false };
        let err = negotiate(&offer, "1.2.3.4", 10, &supported).unwrap_err();
        assert_eq!(err, SipError::NoCommonCodec);
    }

    #[test]
    fn negotiation_fails_with_no_audio() {
        let offer = Session::parse("v=0\r\no=a 1 1 IN IP4 h\r\ns=-\r\nt=0 0\r\nm=video 10 RTP/AVP 96\r\n").unwrap();
        let supported = SupportedCodecs { payload_types: vec![0], dtmf: false };
        assert_eq!(negotiate(&offer, "1.2.3.4", 10, &supported).unwrap_err(), SipError::NoAudio);
    }

    #[test]
    fn negotiation_includes_dtmf_and_inverts_direction() {
        let offer = Session::parse(
            "v=0\r\no=a 1 1 IN IP4 h\r\ns=-\r\nt=0 0\r\nm=audio 10 RTP/AVP 0 101\r\na=rtpmap:101 telephone-event/8000\r\na=sendonly\r\n",
        )
        .unwrap();
        let supported = SupportedCodecs { payload_types: vec![0, 8], dtmf: true };
        let answer = negotiate(&offer, "1.2.3.4", 20, &supported).unwrap();
        let media = answer.audio().unwrap();
        assert_eq!(media.payload_types, vec![0, 101]);
        assert_eq!(media.direction, Direction::Recvonly);
    }

    #[test]
    fn static_payload_types_are_preseeded_when_rtpmap_absent() {
        let offer = Session::parse("v=0\r\no=a 1 1 IN IP4 h\r\ns=-\r\nt=0 0\r\nm=audio 10 RTP/AVP 0 8\r\n").unwrap();
        let supported = SupportedCodecs { payload_types: vec![8], dtmf: false };
        let answer = negotiate(&offer, "1.2.3.4", 20, &supported).unwrap();
        let codec = &answer.audio().unwrap().codecs[0];
        assert_eq!(codec.encoding_name, "PCMA");
        assert_eq!(codec.clock_rate, 8000);
    }

    #[test]
    fn build_then_parse_round_trips_media_fields() {
        let session = build_offer("192.0.2.9", 40000, 0, Direction::Sendrecv);
        let rebuilt = Session::parse(&session.build()).unwrap();
        assert_eq!(rebuilt.media[0].port, 40000);
        assert_eq!(rebuilt.media[0].codecs[0].encoding_name, "PCMU");
    }

    #[test]
    fn unknown_attribute_is_preserved_verbatim() {
        let session = Session::parse(&format!("{OFFER}a=custom-thing:value\r\n")).unwrap();
        assert!(session.media[0]
            .attributes
            .iter()
            .any(|(k, v)| k == "custom-thing" && v.as_deref() == Some("value")));
    }
}
