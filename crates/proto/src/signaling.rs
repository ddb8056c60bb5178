use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::ids::{ParticipantId, SessionId};

/// SDP packet kind, as carried by the ACDS relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An inbound or outbound SDP exchange, addressed by session and sender.
/// The wire encoding of these fields on the ACDS link (length-prefixed,
/// NUL-terminated byte layout) is the signaling service's concern; the core
/// only ever sees the already-decoded typed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    Sdp {
        session_id: SessionId,
        sender_id: ParticipantId,
        kind: SdpKind,
        sdp: String,
    },
    Ice {
        session_id: SessionId,
        sender_id: ParticipantId,
        candidate: String,
        mid: String,
    },
}

/// The two outbound callbacks a Peer Manager is constructed with. Both are
/// invoked outside the manager's table lock; failures are logged by the
/// caller of the trait, never retried inside the core.
#[async_trait]
pub trait SignalingSink: Send + Sync {
    async fn send_sdp(
        &self,
        session_id: SessionId,
        peer_id: ParticipantId,
        kind: SdpKind,
        sdp: String,
    ) -> CoreResult<()>;

    async fn send_ice(
        &self,
        session_id: SessionId,
        peer_id: ParticipantId,
        candidate: String,
        mid: String,
    ) -> CoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn sdp_message_round_trips_through_json() {
        let msg = SignalingMessage::Sdp {
            session_id: SessionId(Uuid::nil()),
            sender_id: ParticipantId(Uuid::nil()),
            kind: SdpKind::Offer,
            sdp: "v=0".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"sdp\""));
        assert!(json.contains("\"kind\":\"offer\""));
        let back: SignalingMessage = serde_json::from_str(&json).unwrap();
        match back {
            SignalingMessage::Sdp { sdp, .. } => assert_eq!(sdp, "v=0"),
            _ => panic!("expected Sdp variant"),
        }
    }

    #[test]
    fn ice_message_tags_as_snake_case() {
        let msg = SignalingMessage::Ice {
            session_id: SessionId(Uuid::nil()),
            sender_id: ParticipantId(Uuid::nil()),
            candidate: "1 1 udp 2130706431 192.168.1.1 54321 typ host".to_string(),
            mid: "0".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ice\""));
    }
}
