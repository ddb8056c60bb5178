use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use rtc_proto::{CoreError, CoreResult};

const MAX_CREDENTIAL_LEN: usize = 128;

/// A time-limited TURN long-term credential pair, RFC 5766 style:
/// `username = "<expiry>:<session_id>"`, `password = base64(HMAC-SHA1(secret, username))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCredentials {
    pub username: String,
    pub password: String,
    pub expiry: u64,
}

impl TurnCredentials {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now_secs >= self.expiry
    }
}

/// Derives a TURN credential pair valid for `validity_secs` starting at `now`.
pub fn generate_credentials(
    session_id: &str,
    secret: &str,
    validity_secs: u64,
    now: SystemTime,
) -> CoreResult<TurnCredentials> {
    let now_secs = now
        .duration_since(UNIX_EPOCH)
        .map_err(|e| CoreError::InvalidParam(format!("system time before epoch: {e}")))?
        .as_secs();
    let expiry = now_secs + validity_secs;

    let username = format!("{expiry}:{session_id}");
    if username.len() > MAX_CREDENTIAL_LEN {
        return Err(CoreError::BufferOverflow(format!(
            "TURN username {} bytes exceeds {} byte buffer",
            username.len(),
            MAX_CREDENTIAL_LEN
        )));
    }

    let password = hmac_sha1_base64(secret, &username)?;
    if password.len() > MAX_CREDENTIAL_LEN {
        return Err(CoreError::BufferOverflow(format!(
            "TURN password {} bytes exceeds {} byte buffer",
            password.len(),
            MAX_CREDENTIAL_LEN
        )));
    }

    Ok(TurnCredentials {
        username,
        password,
        expiry,
    })
}

fn hmac_sha1_base64(secret: &str, message: &str) -> CoreResult<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::Crypto(format!("HMAC key setup failed: {e}")))?;
    mac.update(message.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(BASE64.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn username_carries_expiry_and_session_id() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let creds = generate_credentials("swift-river-mountain", "my-turn-secret", 86_400, now).unwrap();
        assert_eq!(creds.username, "1700086400:swift-river-mountain");
        assert_eq!(creds.expiry, 1_700_086_400);
        // Decodable, 20-byte SHA-1 digest.
        let decoded = BASE64.decode(&creds.password).unwrap();
        assert_eq!(decoded.len(), 20);
    }

    #[test]
    fn expiry_equals_now_plus_validity() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let creds = generate_credentials("s", "secret", 60, now).unwrap();
        assert_eq!(creds.expiry, 1_060);
    }

    #[test]
    fn is_expired_flips_at_expiry_boundary() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let creds = generate_credentials("s", "secret", 60, now).unwrap();
        assert!(!creds.is_expired(UNIX_EPOCH + Duration::from_secs(1_059)));
        assert!(creds.is_expired(UNIX_EPOCH + Duration::from_secs(1_060)));
        assert!(creds.is_expired(UNIX_EPOCH + Duration::from_secs(1_061)));
    }

    #[test]
    fn same_inputs_are_deterministic() {
        let now = UNIX_EPOCH + Duration::from_secs(42);
        let a = generate_credentials("x", "secret", 10, now).unwrap();
        let b = generate_credentials("x", "secret", 10, now).unwrap();
        assert_eq!(a, b);
    }
}
