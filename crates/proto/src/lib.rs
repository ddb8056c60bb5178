//! Shared vocabulary for the peer connection and ICE signaling core:
//! identifiers, the error taxonomy, configuration snapshots, and the typed
//! signaling packet shapes the Peer Manager consumes and produces.

pub mod config;
pub mod error;
pub mod ids;
pub mod signaling;

pub use config::{IceServerConfig, PeerManagerConfig};
pub use error::{CoreError, CoreResult};
pub use ids::{ParticipantId, Role, SessionId};
pub use signaling::{SdpKind, SignalingMessage, SignalingSink};
