// src/nat/ice/candidate.rs
//! ICE candidate representation and parsing
//!
//! All knowledge of the raw candidate line format lives here. Only a few
//! fields are load-bearing: the transport (field 3), the address (field 5),
//! the port (field 6) and the value following the `typ` token, wherever it
//! appears. Everything else is vendor-specific and ignored.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::nat::error::{NatError, NatResult};

/// Positions (0-based) of the fixed fields in a candidate line
const PROTOCOL_FIELD: usize = 2;
const ADDRESS_FIELD: usize = 4;
const PORT_FIELD: usize = 5;

/// ICE candidate type (RFC 8445 Section 5.1.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateType {
    /// Host candidate (local address)
    #[serde(rename = "host")]
    Host,
    /// Server reflexive (from STUN)
    #[serde(rename = "srflx")]
    ServerReflexive,
    /// Peer reflexive (discovered during connectivity checks)
    #[serde(rename = "prflx")]
    PeerReflexive,
    /// Relayed candidate (from TURN)
    #[serde(rename = "relay")]
    Relay,
}

impl CandidateType {
    /// Name as written after the `typ` token
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::PeerReflexive => "prflx",
            Self::Relay => "relay",
        }
    }

    /// Type preference, RFC 8445 Section 5.1.2.2
    pub fn preference(&self) -> u32 {
        match self {
            Self::Host => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Relay => 0,
        }
    }
}

impl FromStr for CandidateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Self::Host),
            "srflx" => Ok(Self::ServerReflexive),
            "prflx" => Ok(Self::PeerReflexive),
            "relay" => Ok(Self::Relay),
            other => Err(format!("unknown candidate type {:?}", other)),
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// Transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// UDP
    Udp,
    /// TCP (RFC 6544)
    Tcp,
}

impl TransportProtocol {
    /// Lowercase name
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

impl FromStr for TransportProtocol {
    type Err = String;

    /// Case-insensitive; vendors emit both `UDP` and `udp`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            other => Err(format!("unknown transport {:?}", other)),
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// One discovered network path endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// Address as written in the description (IP literal, or an mDNS name
    /// for privacy-masked host candidates)
    pub address: String,

    /// Port
    pub port: u16,

    /// Transport protocol
    pub protocol: TransportProtocol,

    /// Candidate type
    #[serde(rename = "type")]
    pub typ: CandidateType,

    /// Related address (`raddr`), when present
    pub related_address: Option<String>,

    /// Related port (`rport`), when present
    pub related_port: Option<u16>,

    /// The original description
    pub raw: String,
}

impl Candidate {
    /// Address parsed as an IP, if it is a literal
    pub fn ip(&self) -> Option<IpAddr> {
        self.address.parse().ok()
    }

    /// Whether this is a `srflx` candidate
    pub fn is_server_reflexive(&self) -> bool {
        self.typ == CandidateType::ServerReflexive
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{} {}", self.typ, self.address, self.port, self.protocol)
    }
}

/// What a single candidate notification turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSignal {
    /// A parsed candidate
    Candidate(Candidate),
    /// No more candidates will arrive
    EndOfCandidates,
}

/// Parse a raw candidate description.
///
/// `None` and blank descriptions are the end-of-candidates marker and pass
/// through as [`CandidateSignal::EndOfCandidates`].
pub fn parse_candidate(raw: Option<&str>) -> NatResult<CandidateSignal> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(CandidateSignal::EndOfCandidates),
    };

    let body = raw.trim();
    let body = body.strip_prefix("a=").unwrap_or(body);
    let fields: Vec<&str> = body.split_whitespace().collect();

    let typ_pos = fields
        .iter()
        .position(|&f| f == "typ")
        .ok_or_else(|| NatError::malformed(raw, "missing typ token"))?;
    let typ = fields
        .get(typ_pos + 1)
        .ok_or_else(|| NatError::malformed(raw, "typ token has no value"))?
        .parse::<CandidateType>()
        .map_err(|reason| NatError::malformed(raw, reason))?;

    if fields.len() <= PORT_FIELD {
        return Err(NatError::malformed(
            raw,
            format!("expected at least {} fields, got {}", PORT_FIELD + 1, fields.len()),
        ));
    }

    let protocol = fields[PROTOCOL_FIELD]
        .parse::<TransportProtocol>()
        .map_err(|reason| NatError::malformed(raw, reason))?;

    let port = fields[PORT_FIELD]
        .parse::<u16>()
        .map_err(|_| NatError::malformed(raw, format!("invalid port {:?}", fields[PORT_FIELD])))?;

    let mut candidate = Candidate {
        address: fields[ADDRESS_FIELD].to_string(),
        port,
        protocol,
        typ,
        related_address: None,
        related_port: None,
        raw: raw.to_string(),
    };

    // Optional extensions; anything unrecognized or malformed is skipped
    let mut i = typ_pos + 2;
    while i + 1 < fields.len() {
        match fields[i] {
            "raddr" => {
                candidate.related_address = Some(fields[i + 1].to_string());
                i += 2;
            }
            "rport" => {
                candidate.related_port = fields[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }

    Ok(CandidateSignal::Candidate(candidate))
}

/// Candidate priority, RFC 8445 Section 5.1.2
pub fn calculate_priority(typ: CandidateType, local_preference: u32, component_id: u32) -> u32 {
    let local_pref = local_preference.min(65535);
    let component = component_id.clamp(1, 256);
    (typ.preference() << 24) + (local_pref << 8) + (256 - component)
}

/// Foundation shared by candidates of the same type, base and server
pub fn calculate_foundation(typ: CandidateType, base: &IpAddr, server: Option<&IpAddr>) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(typ.to_str().as_bytes());
    hasher.update(base.to_string().as_bytes());
    if let Some(server) = server {
        hasher.update(server.to_string().as_bytes());
    }
    hasher.finalize().to_string()
}

/// Builder for candidate lines emitted by transports
#[derive(Debug, Clone)]
pub struct CandidateLine {
    /// Foundation, see [`calculate_foundation`]
    pub foundation: String,
    /// Component id (1 for RTP)
    pub component_id: u32,
    /// Transport protocol
    pub protocol: TransportProtocol,
    /// Priority, see [`calculate_priority`]
    pub priority: u32,
    /// Candidate address
    pub address: IpAddr,
    /// Candidate port
    pub port: u16,
    /// Candidate type
    pub typ: CandidateType,
    /// Base address and port for reflexive candidates
    pub related: Option<(IpAddr, u16)>,
}

impl CandidateLine {
    /// Render in the `candidate:<foundation> <component> <transport> ...` form
    pub fn to_candidate_line(&self) -> String {
        let mut line = format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component_id,
            self.protocol,
            self.priority,
            self.address,
            self.port,
            self.typ,
        );

        if let Some((ip, port)) = &self.related {
            line.push_str(&format!(" raddr {} rport {}", ip, port));
        }

        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(raw: &str) -> Candidate {
        match parse_candidate(Some(raw)).unwrap() {
            CandidateSignal::Candidate(c) => c,
            CandidateSignal::EndOfCandidates => panic!("unexpected end-of-candidates"),
        }
    }

    #[test]
    fn test_parse_srflx_scenario() {
        let raw = "1 1 UDP 2122260223 203.0.113.4 54321 typ srflx";
        let c = parse_ok(raw);
        assert_eq!(c.address, "203.0.113.4");
        assert_eq!(c.port, 54321);
        assert_eq!(c.protocol, TransportProtocol::Udp);
        assert_eq!(c.typ, CandidateType::ServerReflexive);
        assert_eq!(c.raw, raw);
    }

    #[test]
    fn test_parse_browser_format_with_trailing_fields() {
        let raw = "candidate:842163049 1 udp 1677729535 198.51.100.7 60010 typ srflx \
                   raddr 192.168.1.20 rport 51234 generation 0 ufrag EsAw network-cost 999";
        let c = parse_ok(raw);
        assert_eq!(c.address, "198.51.100.7");
        assert_eq!(c.port, 60010);
        assert_eq!(c.related_address.as_deref(), Some("192.168.1.20"));
        assert_eq!(c.related_port, Some(51234));
    }

    #[test]
    fn test_parse_typ_token_floats() {
        // Extra vendor field before typ shifts its position, not the fixed ones
        let c = parse_ok("a=candidate:1 1 TCP 1518280447 10.0.0.5 9 tcptype active typ host");
        assert_eq!(c.protocol, TransportProtocol::Tcp);
        assert_eq!(c.typ, CandidateType::Host);
        assert_eq!(c.port, 9);
    }

    #[test]
    fn test_parse_mdns_host_address_kept_verbatim() {
        let c = parse_ok("candidate:1 1 udp 2113937151 4b1c2f0e-7f3a.local 50000 typ host");
        assert_eq!(c.address, "4b1c2f0e-7f3a.local");
        assert!(c.ip().is_none());
    }

    #[test]
    fn test_parse_end_of_candidates() {
        assert_eq!(parse_candidate(None).unwrap(), CandidateSignal::EndOfCandidates);
        assert_eq!(parse_candidate(Some("")).unwrap(), CandidateSignal::EndOfCandidates);
        assert_eq!(parse_candidate(Some("  ")).unwrap(), CandidateSignal::EndOfCandidates);
    }

    #[test]
    fn test_parse_is_pure() {
        let raw = "candidate:7 1 udp 100 203.0.113.9 40000 typ srflx raddr 0.0.0.0 rport 0";
        assert_eq!(parse_candidate(Some(raw)).unwrap(), parse_candidate(Some(raw)).unwrap());
    }

    #[test]
    fn test_parse_rejects_missing_typ() {
        let err = parse_candidate(Some("1 1 UDP 2122260223 203.0.113.4 54321")).unwrap_err();
        assert!(matches!(err, NatError::MalformedCandidate { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_fields() {
        for raw in [
            "1 1 UDP 2122260223 203.0.113.4 54321 typ",
            "1 1 UDP 2122260223 203.0.113.4 54321 typ bogus",
            "1 1 UDP 2122260223 203.0.113.4 notaport typ srflx",
            "1 1 UDP 2122260223 203.0.113.4 70000 typ srflx",
            "1 1 SCTP 2122260223 203.0.113.4 54321 typ srflx",
            "1 typ srflx",
        ] {
            assert!(
                matches!(parse_candidate(Some(raw)), Err(NatError::MalformedCandidate { .. })),
                "accepted {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_candidate_line_parses_back() {
        let line = CandidateLine {
            foundation: calculate_foundation(
                CandidateType::ServerReflexive,
                &"192.168.1.20".parse().unwrap(),
                Some(&"74.125.250.129".parse().unwrap()),
            ),
            component_id: 1,
            protocol: TransportProtocol::Udp,
            priority: calculate_priority(CandidateType::ServerReflexive, 65535, 1),
            address: "203.0.113.4".parse().unwrap(),
            port: 54321,
            typ: CandidateType::ServerReflexive,
            related: Some(("192.168.1.20".parse().unwrap(), 51000)),
        }
        .to_candidate_line();

        let c = parse_ok(&line);
        assert_eq!(c.port, 54321);
        assert_eq!(c.related_port, Some(51000));
        assert!(c.is_server_reflexive());
    }

    #[test]
    fn test_priority_ordering() {
        let host = calculate_priority(CandidateType::Host, 65535, 1);
        let srflx = calculate_priority(CandidateType::ServerReflexive, 65535, 1);
        let relay = calculate_priority(CandidateType::Relay, 65535, 1);
        assert!(host > srflx);
        assert!(srflx > relay);
        assert_eq!(host, 2130706431);
    }
}
