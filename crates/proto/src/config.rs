use serde::{Deserialize, Serialize};

use crate::ids::Role;

fn default_stun_urls() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

fn default_gathering_timeout_ms() -> u64 {
    10_000
}

fn default_turn_credential_ttl_secs() -> u64 {
    86_400
}

/// One STUN or TURN server entry, flattened into the engine's ICE-server
/// list at `PeerConnection::create` time. A TURN entry built with
/// [`IceServerConfig::turn_ephemeral`] carries no credentials of its own —
/// the Peer Manager derives a fresh RFC 5766 long-term credential pair for it
/// per connection, via `PeerManagerConfig::turn_secret`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub ephemeral_turn: bool,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        IceServerConfig {
            urls: vec![url.into()],
            username: None,
            credential: None,
            ephemeral_turn: false,
        }
    }

    pub fn turn(url: impl Into<String>, username: impl Into<String>, credential: impl Into<String>) -> Self {
        IceServerConfig {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
            ephemeral_turn: false,
        }
    }

    /// A TURN server whose username/password are derived fresh for each
    /// connection from `PeerManagerConfig::turn_secret`, rather than fixed at
    /// construction time.
    pub fn turn_ephemeral(url: impl Into<String>) -> Self {
        IceServerConfig {
            urls: vec![url.into()],
            username: None,
            credential: None,
            ephemeral_turn: true,
        }
    }
}

/// Configuration snapshot handed to both the Peer Manager and each Peer
/// Connection it creates. Loading this from a TOML file or CLI flags is the
/// embedding application's concern; this type only carries the already-
/// resolved values and their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerManagerConfig {
    pub role: Role,
    #[serde(default)]
    pub ice_servers: Vec<IceServerConfig>,
    /// Drop `host`-typed candidates at the outbound signaling point (used to
    /// exercise relay/server-reflexive paths in tests).
    #[serde(default)]
    pub skip_host: bool,
    #[serde(default = "default_gathering_timeout_ms")]
    pub gathering_timeout_ms: u64,
    /// Shared secret used to derive credentials for any `ephemeral_turn`
    /// entry in `ice_servers`. `None` means no ephemeral TURN entry can be
    /// resolved; the Peer Manager rejects connection attempts that need one.
    #[serde(default)]
    pub turn_secret: Option<String>,
    #[serde(default = "default_turn_credential_ttl_secs")]
    pub turn_credential_ttl_secs: u64,
}

impl PeerManagerConfig {
    pub fn new(role: Role) -> Self {
        PeerManagerConfig {
            role,
            ice_servers: default_stun_urls()
                .into_iter()
                .map(IceServerConfig::stun)
                .collect(),
            skip_host: false,
            gathering_timeout_ms: default_gathering_timeout_ms(),
            turn_secret: None,
            turn_credential_ttl_secs: default_turn_credential_ttl_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_carries_stun_fallback() {
        let cfg = PeerManagerConfig::new(Role::Joiner);
        assert_eq!(cfg.ice_servers.len(), 2);
        assert_eq!(cfg.gathering_timeout_ms, 10_000);
        assert!(!cfg.skip_host);
    }
}
