use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A 16-byte session identifier shared by every participant in a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

/// A 16-byte remote-participant identifier, used as the Peer Manager's table
/// key. `ParticipantId::PROVISIONAL` is the all-zero placeholder a joiner
/// keys its entry with before the responder's real identifier is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub const PROVISIONAL: ParticipantId = ParticipantId(Uuid::nil());

    pub fn is_provisional(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Star-topology role. Exactly one `Creator` per session; any number of
/// `Joiner`s connect to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Creator,
    Joiner,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisional_id_is_nil() {
        assert!(ParticipantId::PROVISIONAL.is_provisional());
        let real = ParticipantId(Uuid::new_v4());
        assert!(!real.is_provisional());
    }
}
