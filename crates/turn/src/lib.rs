//! Time-limited TURN long-term credentials (RFC 5766).

pub mod credentials;

pub use credentials::{generate_credentials, TurnCredentials};
