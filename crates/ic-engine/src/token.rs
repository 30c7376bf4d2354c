// token.rs — Single-use friend-verification tokens.
//
// Friend proof is decided by the goal's designated verifier, who has
// no account credentials here — they act through a single-use token
// delivered out of band (the notification collaborator). Only the
// SHA-256 digest of the token is stored; the cleartext is returned
// exactly once at issuance and cannot be recovered afterwards.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Token length in characters.
const TOKEN_LEN: usize = 32;

/// How long a token stays valid.
pub const TOKEN_TTL_DAYS: i64 = 7;

/// Generate a fresh random token string.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Lowercase hex SHA-256 digest of a token.
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A stored verification token: digest only, single use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationToken {
    /// Unique identifier for this token record.
    pub id: Uuid,

    /// The submission this token decides.
    pub submission_id: Uuid,

    /// The designated verifier's identity, checked against the goal
    /// owner on decision.
    pub verifier_id: String,

    /// SHA-256 hex digest of the cleartext token.
    pub digest: String,

    /// When the token was issued.
    pub issued_at: DateTime<Utc>,

    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,

    /// Set once the token has decided its submission.
    pub used: bool,
}

impl VerificationToken {
    /// Issue a token for a submission. Returns the record to persist
    /// and the cleartext to hand to the verifier — the only time the
    /// cleartext exists.
    pub fn issue(
        submission_id: Uuid,
        verifier_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> (Self, String) {
        let cleartext = generate_token();
        let record = Self {
            id: Uuid::new_v4(),
            submission_id,
            verifier_id: verifier_id.into(),
            digest: token_digest(&cleartext),
            issued_at: now,
            expires_at: now + Duration::days(TOKEN_TTL_DAYS),
            used: false,
        };
        (record, cleartext)
    }

    /// Whether the token is past its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique_and_alphanumeric() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn digest_is_deterministic_hex() {
        let token = "abc123";
        let d1 = token_digest(token);
        let d2 = token_digest(token);
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
        assert_ne!(d1, token_digest("abc124"));
    }

    #[test]
    fn issue_returns_matching_cleartext() {
        let now = Utc::now();
        let (record, cleartext) = VerificationToken::issue(Uuid::new_v4(), "friend-1", now);
        assert_eq!(record.digest, token_digest(&cleartext));
        assert!(!record.used);
        assert!(!record.is_expired(now));
    }

    #[test]
    fn token_expires_after_ttl() {
        let now = Utc::now();
        let (record, _) = VerificationToken::issue(Uuid::new_v4(), "friend-1", now);
        assert!(!record.is_expired(now + Duration::days(TOKEN_TTL_DAYS)));
        assert!(record.is_expired(now + Duration::days(TOKEN_TTL_DAYS) + Duration::seconds(1)));
    }
}
