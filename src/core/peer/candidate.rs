//! ICE candidate attribute parsing.
//!
//! Accepts the `candidate:` attribute value browsers send over signaling,
//! with or without the `a=` / `candidate:` prefixes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SignalingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateProtocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
}

impl fmt::Display for CandidateProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CandidateProtocol::Udp => "udp",
            CandidateProtocol::Tcp => "tcp",
        })
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Prflx => "prflx",
            CandidateType::Relay => "relay",
        })
    }
}

/// A parsed ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u16,
    pub protocol: CandidateProtocol,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    pub candidate_type: CandidateType,
    pub related_address: Option<String>,
    pub related_port: Option<u16>,
    pub tcp_type: Option<String>,
}

impl IceCandidate {
    /// Parse a candidate attribute.
    pub fn parse(raw: &str) -> Result<Self, SignalingError> {
        let invalid = |reason: &str| SignalingError::InvalidCandidate {
            candidate: raw.to_string(),
            reason: reason.to_string(),
        };

        let body = raw.trim();
        let body = body.strip_prefix("a=").unwrap_or(body);
        let body = body.strip_prefix("candidate:").unwrap_or(body);

        let fields: Vec<&str> = body.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(invalid("expected at least 8 fields"));
        }
        if fields[6] != "typ" {
            return Err(invalid("missing 'typ' keyword"));
        }

        let foundation = fields[0].to_string();
        let component = fields[1]
            .parse::<u16>()
            .map_err(|_| invalid("component is not a number"))?;
        let protocol = match fields[2].to_ascii_lowercase().as_str() {
            "udp" => CandidateProtocol::Udp,
            "tcp" => CandidateProtocol::Tcp,
            _ => return Err(invalid("unknown transport protocol")),
        };
        let priority = fields[3]
            .parse::<u32>()
            .map_err(|_| invalid("priority is not a number"))?;
        let address = fields[4].to_string();
        let port = fields[5]
            .parse::<u16>()
            .map_err(|_| invalid("port is not a number"))?;
        let candidate_type = match fields[7] {
            "host" => CandidateType::Host,
            "srflx" => CandidateType::Srflx,
            "prflx" => CandidateType::Prflx,
            "relay" => CandidateType::Relay,
            _ => return Err(invalid("unknown candidate type")),
        };

        let mut candidate = IceCandidate {
            foundation,
            component,
            protocol,
            priority,
            address,
            port,
            candidate_type,
            related_address: None,
            related_port: None,
            tcp_type: None,
        };

        let mut extensions = fields[8..].iter();
        while let Some(key) = extensions.next() {
            let Some(value) = extensions.next() else {
                return Err(invalid("extension without a value"));
            };
            match *key {
                "raddr" => candidate.related_address = Some(value.to_string()),
                "rport" => {
                    candidate.related_port = Some(
                        value
                            .parse::<u16>()
                            .map_err(|_| invalid("rport is not a number"))?,
                    )
                }
                "tcptype" => candidate.tcp_type = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(candidate)
    }
}

impl FromStr for IceCandidate {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IceCandidate {
    /// Canonical `candidate:` attribute value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol,
            self.priority,
            self.address,
            self.port,
            self.candidate_type
        )?;
        if let Some(addr) = &self.related_address {
            write!(f, " raddr {addr}")?;
        }
        if let Some(port) = self.related_port {
            write!(f, " rport {port}")?;
        }
        if let Some(tcp_type) = &self.tcp_type {
            write!(f, " tcptype {tcp_type}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_candidate() {
        let c = IceCandidate::parse(
            "candidate:842163049 1 udp 1677729535 192.168.1.20 54321 typ host generation 0 ufrag abcd network-cost 999",
        )
        .unwrap();
        assert_eq!(c.foundation, "842163049");
        assert_eq!(c.component, 1);
        assert_eq!(c.protocol, CandidateProtocol::Udp);
        assert_eq!(c.priority, 1677729535);
        assert_eq!(c.address, "192.168.1.20");
        assert_eq!(c.port, 54321);
        assert_eq!(c.candidate_type, CandidateType::Host);
        assert!(c.related_address.is_none());
    }

    #[test]
    fn test_parse_srflx_and_tcp() {
        let c = IceCandidate::parse(
            "a=candidate:1 1 UDP 1686052607 203.0.113.7 61000 typ srflx raddr 10.0.0.4 rport 61000",
        )
        .unwrap();
        assert_eq!(c.candidate_type, CandidateType::Srflx);
        assert_eq!(c.related_address.as_deref(), Some("10.0.0.4"));
        assert_eq!(c.related_port, Some(61000));

        let c = IceCandidate::parse("2 1 tcp 1518280447 10.0.0.4 9 typ host tcptype active").unwrap();
        assert_eq!(c.protocol, CandidateProtocol::Tcp);
        assert_eq!(c.tcp_type.as_deref(), Some("active"));
        assert_eq!(
            c.to_string(),
            "candidate:2 1 tcp 1518280447 10.0.0.4 9 typ host tcptype active"
        );
    }

    #[test]
    fn test_parse_mdns_address() {
        let c = IceCandidate::parse(
            "candidate:3 1 udp 2122260223 4f1a2b3c-1111-2222-3333-444455556666.local 50000 typ host",
        )
        .unwrap();
        assert!(c.address.ends_with(".local"));
    }

    #[test]
    fn test_malformed_candidates() {
        for raw in [
            "candidate:1 1 udp",
            "candidate:1 1 udp 100 10.0.0.1 5000 type host",
            "candidate:1 x udp 100 10.0.0.1 5000 typ host",
            "candidate:1 1 sctp 100 10.0.0.1 5000 typ host",
            "candidate:1 1 udp 100 10.0.0.1 99999 typ host",
            "candidate:1 1 udp 100 10.0.0.1 5000 typ bogus",
            "candidate:1 1 udp 100 10.0.0.1 5000 typ srflx raddr",
        ] {
            let err = IceCandidate::parse(raw).unwrap_err();
            assert!(
                matches!(err, SignalingError::InvalidCandidate { .. }),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_round_trips_fields() {
        let raw = "candidate:9 1 udp 41885439 198.51.100.2 3478 typ relay raddr 203.0.113.7 rport 61000";
        let c: IceCandidate = raw.parse().unwrap();
        assert_eq!(c.to_string(), raw);
    }
}
