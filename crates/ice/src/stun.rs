/// Parses a comma-separated STUN/TURN server list, trimming surrounding
/// whitespace and skipping empty entries. Falls back to `default_list` when
/// the input is empty or entirely whitespace.
pub fn parse_stun_list(input: &str, default_list: &[&str]) -> Vec<String> {
    if input.trim().is_empty() {
        return default_list.iter().map(|s| s.to_string()).collect();
    }

    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

use crate::candidate::{Candidate, CandidateType};

/// When `skip_host` is set, `host`-typed candidates are dropped before
/// reaching the outbound signaling callback (used to exercise relay/
/// server-reflexive paths in isolation).
pub fn should_signal(candidate: &Candidate, skip_host: bool) -> bool {
    !(skip_host && candidate.typ == CandidateType::Host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_skips_empty_segments() {
        let parsed = parse_stun_list("  stun:a:3478 , , stun:b:19302", &["stun:default:3478"]);
        assert_eq!(parsed, vec!["stun:a:3478", "stun:b:19302"]);
    }

    #[test]
    fn empty_input_falls_back_to_default() {
        let parsed = parse_stun_list("   ", &["stun:default:3478"]);
        assert_eq!(parsed, vec!["stun:default:3478"]);
    }

    #[test]
    fn skip_host_drops_only_host_candidates() {
        let host = Candidate::parse("1 1 udp 2130706431 192.168.1.1 54321 typ host").unwrap();
        let srflx =
            Candidate::parse("2 1 udp 1694498815 203.0.113.45 12345 typ srflx raddr 10.0.0.5 rport 54321")
                .unwrap();
        assert!(!should_signal(&host, true));
        assert!(should_signal(&srflx, true));
        assert!(should_signal(&host, false));
    }
}
