//! ICE candidate parsing/formatting, RFC 5245 priority computation, and the
//! STUN server URL list parser.

pub mod candidate;
pub mod stun;

pub use candidate::{Candidate, CandidateType, Protocol, TcpType};
pub use stun::{parse_stun_list, should_signal};
