//! Peer connection and ICE signaling core. `engine` owns the process-wide
//! embedded WebRTC engine; `peer_connection` wraps a single connection;
//! `data_channel` bridges its DataChannel into a blocking `Transport`; and
//! `manager` ties the three together against a signaling sink.

pub mod data_channel;
pub mod engine;
pub mod manager;
pub mod peer_connection;

pub use data_channel::{DataChannelTransport, Transport, TransportKind};
pub use manager::PeerManager;
pub use peer_connection::{PeerConnection, PeerConnectionState, SelectedPair};
