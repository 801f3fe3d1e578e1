//! Stateless admin tokens: `"<issuedAtMillis>.<base64 hmac-sha256(secret, issuedAtMillis)>"`.
//!
//! Nothing is stored server-side; a token is valid while its signature checks
//! out under the current secret and it is younger than [`TOKEN_TTL_MS`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::now_millis;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_TTL_MS: i64 = 24 * 60 * 60 * 1000;

fn sign(secret: &str, payload: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    mac
}

pub fn issue(secret: &str) -> String {
    issue_at(secret, now_millis())
}

pub fn issue_at(secret: &str, issued_at_ms: i64) -> String {
    let ts = issued_at_ms.to_string();
    let sig = STANDARD.encode(sign(secret, &ts).finalize().into_bytes());
    format!("{ts}.{sig}")
}

pub fn verify(token: &str, secret: Option<&str>) -> bool {
    verify_at(token, secret, now_millis())
}

/// Fails closed on every malformed input; never panics.
pub fn verify_at(token: &str, secret: Option<&str>, now_ms: i64) -> bool {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return false;
    };

    let mut parts = token.split('.');
    let (Some(ts), Some(sig), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let Ok(issued_at) = ts.parse::<i64>() else {
        return false;
    };
    if now_ms.saturating_sub(issued_at) > TOKEN_TTL_MS {
        return false;
    }
    let Ok(sig) = STANDARD.decode(sig) else {
        return false;
    };

    // constant-time comparison
    sign(secret, ts).verify_slice(&sig).is_ok()
}

/// Holds the server's signing secret, if one is configured.
#[derive(Clone, Debug, Default)]
pub struct TokenCodec {
    secret: Option<String>,
}

impl TokenCodec {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// `None` when no secret is configured.
    pub fn issue(&self) -> Option<String> {
        self.secret.as_deref().map(issue)
    }

    pub fn verify(&self, token: &str) -> bool {
        verify(token, self.secret.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "hunter2";
    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn fresh_token_verifies() {
        let token = issue(SECRET);
        assert!(verify(&token, Some(SECRET)));

        let token = issue_at(SECRET, NOW);
        assert!(token.starts_with("1700000000000."));
        assert!(verify_at(&token, Some(SECRET), NOW));
        assert!(verify_at(&token, Some(SECRET), NOW + TOKEN_TTL_MS));
    }

    #[test]
    fn expired_token_rejected() {
        let token = issue_at(SECRET, NOW);
        assert!(!verify_at(&token, Some(SECRET), NOW + TOKEN_TTL_MS + 1));
    }

    #[test]
    fn other_secret_or_missing_secret_rejected() {
        let token = issue_at(SECRET, NOW);
        assert!(!verify_at(&token, Some("letmein"), NOW));
        assert!(!verify_at(&token, None, NOW));
        assert!(!verify_at(&token, Some(""), NOW));
    }

    #[test]
    fn malformed_tokens_rejected() {
        let token = issue_at(SECRET, NOW);
        let (ts, sig) = token.split_once('.').unwrap();

        for bad in [
            String::new(),
            ts.to_string(),
            format!("{ts}.{sig}.extra"),
            format!("{ts}."),
            format!("abc.{sig}"),
            format!("{ts}.!!not-base64!!"),
        ] {
            assert!(!verify_at(&bad, Some(SECRET), NOW), "accepted {bad:?}");
        }
    }

    #[test]
    fn tampered_timestamp_rejected() {
        let token = issue_at(SECRET, NOW);
        let (_, sig) = token.split_once('.').unwrap();
        let forged = format!("{}.{sig}", NOW + 1);
        assert!(!verify_at(&forged, Some(SECRET), NOW));
    }

    #[test]
    fn codec_without_secret_issues_nothing() {
        let codec = TokenCodec::new(Some(String::new()));
        assert!(!codec.is_configured());
        assert_eq!(codec.issue(), None);

        let codec = TokenCodec::new(Some(SECRET.into()));
        let token = codec.issue().unwrap();
        assert!(codec.verify(&token));
    }
}
