use std::fmt;

use rtc_proto::{CoreError, CoreResult};

/// Transport protocol carried by a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }

    fn parse(s: &str) -> Option<Protocol> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Some(Protocol::Udp),
            "tcp" => Some(Protocol::Tcp),
            _ => None,
        }
    }
}

/// RFC 5245 candidate type. Ordering here is not significant; `type_pref`
/// below encodes the priority table from §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
}

impl CandidateType {
    fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Prflx => "prflx",
            CandidateType::Relay => "relay",
        }
    }

    fn parse(s: &str) -> Option<CandidateType> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Some(CandidateType::Host),
            "srflx" => Some(CandidateType::Srflx),
            "prflx" => Some(CandidateType::Prflx),
            "relay" => Some(CandidateType::Relay),
            _ => None,
        }
    }

    /// RFC 5245 type preference table.
    pub fn type_pref(&self) -> u32 {
        match self {
            CandidateType::Host => 126,
            CandidateType::Prflx => 110,
            CandidateType::Srflx => 100,
            CandidateType::Relay => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpType {
    Active,
    Passive,
    So,
}

impl TcpType {
    fn as_str(&self) -> &'static str {
        match self {
            TcpType::Active => "active",
            TcpType::Passive => "passive",
            TcpType::So => "so",
        }
    }

    fn parse(s: &str) -> Option<TcpType> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(TcpType::Active),
            "passive" => Some(TcpType::Passive),
            "so" => Some(TcpType::So),
            _ => None,
        }
    }
}

/// A parsed RFC 5245 candidate-attribute line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub foundation: String,
    pub component: u8,
    pub protocol: Protocol,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub typ: CandidateType,
    pub related_address: Option<String>,
    pub related_port: Option<u16>,
    pub tcp_type: Option<TcpType>,
    pub extensions: String,
}

impl Candidate {
    /// Parses a candidate-attribute line. Accepts an optional leading
    /// `"candidate:"` prefix (engines sometimes hand back selected-pair
    /// strings with it still attached). Parsing is atomic: on any grammar
    /// violation the whole call fails with `InvalidParam` and no partial
    /// result is produced.
    pub fn parse(line: &str) -> CoreResult<Candidate> {
        let line = line.strip_prefix("candidate:").unwrap_or(line);
        let mut tokens = line.split_whitespace();

        let invalid = |msg: &str| CoreError::InvalidParam(format!("malformed ICE candidate: {msg}"));

        let foundation = tokens.next().ok_or_else(|| invalid("missing foundation"))?.to_string();
        let component: u8 = tokens
            .next()
            .ok_or_else(|| invalid("missing component"))?
            .parse()
            .map_err(|_| invalid("component not a number"))?;
        let protocol = Protocol::parse(tokens.next().ok_or_else(|| invalid("missing protocol"))?)
            .ok_or_else(|| invalid("unknown protocol"))?;
        let priority: u32 = tokens
            .next()
            .ok_or_else(|| invalid("missing priority"))?
            .parse()
            .map_err(|_| invalid("priority not a number"))?;
        let ip = tokens.next().ok_or_else(|| invalid("missing ip"))?.to_string();
        let port: u16 = tokens
            .next()
            .ok_or_else(|| invalid("missing port"))?
            .parse()
            .map_err(|_| invalid("port not a number"))?;

        let typ_kw = tokens.next().ok_or_else(|| invalid("missing 'typ' keyword"))?;
        if !typ_kw.eq_ignore_ascii_case("typ") {
            return Err(invalid("expected 'typ' keyword"));
        }
        let typ = CandidateType::parse(tokens.next().ok_or_else(|| invalid("missing type"))?)
            .ok_or_else(|| invalid("unknown candidate type"))?;

        let mut related_address = None;
        let mut related_port = None;
        let mut tcp_type = None;
        let mut rest = Vec::new();

        while let Some(tok) = tokens.next() {
            if tok.eq_ignore_ascii_case("raddr") {
                let addr = tokens.next().ok_or_else(|| invalid("raddr missing address"))?;
                let rport_kw = tokens.next().ok_or_else(|| invalid("missing 'rport' keyword"))?;
                if !rport_kw.eq_ignore_ascii_case("rport") {
                    return Err(invalid("expected 'rport' keyword after raddr"));
                }
                let rport: u16 = tokens
                    .next()
                    .ok_or_else(|| invalid("rport missing port"))?
                    .parse()
                    .map_err(|_| invalid("rport not a number"))?;
                related_address = Some(addr.to_string());
                related_port = Some(rport);
            } else if tok.eq_ignore_ascii_case("tcptype") {
                let sub = tokens.next().ok_or_else(|| invalid("tcptype missing value"))?;
                tcp_type = Some(TcpType::parse(sub).ok_or_else(|| invalid("unknown tcptype"))?);
            } else {
                rest.push(tok);
            }
        }

        Ok(Candidate {
            foundation,
            component,
            protocol,
            priority,
            ip,
            port,
            typ,
            related_address,
            related_port,
            tcp_type,
            extensions: rest.join(" "),
        })
    }

    /// Formats the candidate back to its wire string form.
    pub fn format(&self) -> String {
        let mut out = format!(
            "{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol.as_str(),
            self.priority,
            self.ip,
            self.port,
            self.typ.as_str(),
        );

        if self.typ != CandidateType::Host {
            if let Some(ref raddr) = self.related_address {
                let rport = self.related_port.unwrap_or(0);
                out.push_str(&format!(" raddr {raddr} rport {rport}"));
            }
        }

        if self.protocol == Protocol::Tcp {
            let sub = self.tcp_type.unwrap_or(TcpType::Passive);
            out.push_str(&format!(" tcptype {}", sub.as_str()));
        }

        if !self.extensions.is_empty() {
            out.push(' ');
            out.push_str(&self.extensions);
        }

        out
    }

    /// Formats into a caller-supplied fixed buffer, for call sites mirroring
    /// the embedded engine's fixed-size candidate scratch buffers. Fails
    /// with `BufferOverflow` rather than truncating.
    pub fn format_into(&self, buf: &mut [u8]) -> CoreResult<usize> {
        let s = self.format();
        let bytes = s.as_bytes();
        if bytes.len() > buf.len() {
            return Err(CoreError::BufferOverflow(format!(
                "candidate line is {} bytes, buffer holds {}",
                bytes.len(),
                buf.len()
            )));
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    /// `local_pref` is the peer connection's per-address preference (engines
    /// typically assign one per local interface/allocation); this computes
    /// the RFC 5245 combined priority independent of what's already stored
    /// on `self.priority`, so callers can verify or recompute it.
    pub fn compute_priority(typ: CandidateType, local_pref: u16, component: u8) -> u32 {
        (typ.type_pref() << 24) | ((local_pref as u32) << 8) | (256 - component as u32)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_host_candidate() {
        let line = "1 1 udp 2130706431 192.168.1.1 54321 typ host";
        let c = Candidate::parse(line).unwrap();
        assert_eq!(c.typ, CandidateType::Host);
        assert_eq!(c.format(), line);
    }

    #[test]
    fn round_trip_srflx_with_raddr() {
        let line = "2 1 udp 1694498815 203.0.113.45 12345 typ srflx raddr 10.0.0.5 rport 54321";
        let c = Candidate::parse(line).unwrap();
        assert_eq!(c.typ, CandidateType::Srflx);
        assert_eq!(c.related_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(c.related_port, Some(54321));
        assert_eq!(c.format(), line);
    }

    #[test]
    fn round_trip_tcp_active() {
        let line = "2 1 tcp 1518280447 203.0.113.45 9 typ host tcptype active";
        let c = Candidate::parse(line).unwrap();
        assert_eq!(c.tcp_type, Some(TcpType::Active));
        assert_eq!(c.format(), line);
    }

    #[test]
    fn priority_formula_matches_scenario_3() {
        let p = Candidate::compute_priority(CandidateType::Host, 65535, 1);
        assert_eq!(p, 2130706431);
    }

    #[test]
    fn strips_candidate_colon_prefix() {
        let c = Candidate::parse("candidate:1 1 udp 2130706431 192.168.1.1 54321 typ host").unwrap();
        assert_eq!(c.ip, "192.168.1.1");
    }

    #[test]
    fn parse_is_atomic_on_malformed_input() {
        let err = Candidate::parse("1 1 udp 2130706431 192.168.1.1 54321 typ bogus");
        assert!(err.is_err());
    }

    #[test]
    fn format_into_reports_buffer_overflow() {
        let c = Candidate::parse("1 1 udp 2130706431 192.168.1.1 54321 typ host").unwrap();
        let mut tiny = [0u8; 4];
        let err = c.format_into(&mut tiny).unwrap_err();
        assert!(matches!(err, CoreError::BufferOverflow(_)));
    }
}
