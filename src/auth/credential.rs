//! Renewable access credential.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::remote::{MAX_EXPIRES_IN_SECS, RenewedToken, TokenGrant};

/// Safety margin subtracted from the nominal expiry.
pub const DEFAULT_CREDENTIAL_BUFFER: Duration = Duration::from_secs(5);

/// Access token + renewal token + nominal expiry. Lives only in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub renewal_token: String,
    pub expires_at: Instant,
}

/// Lifetimes from any source are capped, so the addition cannot overflow.
fn expiry(now: Instant, expires_in_secs: u64) -> Instant {
    now + Duration::from_secs(expires_in_secs.min(MAX_EXPIRES_IN_SECS))
}

impl Credential {
    pub fn from_grant(grant: TokenGrant, now: Instant) -> Self {
        Self {
            access_token: grant.access_token,
            renewal_token: grant.renewal_token,
            expires_at: expiry(now, grant.expires_in_secs),
        }
    }

    /// Replace the access token in place; the renewal token is kept.
    pub fn apply_renewal(&mut self, renewed: RenewedToken, now: Instant) {
        self.access_token = renewed.access_token;
        self.expires_at = expiry(now, renewed.expires_in_secs);
    }

    /// True while `now < expires_at - buffer`.
    pub fn is_usable(&self, now: Instant, buffer: Duration) -> bool {
        !self.access_token.is_empty() && now.checked_add(buffer).is_some_and(|t| t < self.expires_at)
    }
}

// Tokens stay out of logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("renewal_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(expires_in_secs: u64) -> TokenGrant {
        TokenGrant {
            access_token: "access-1".into(),
            renewal_token: "renew-1".into(),
            expires_in_secs,
        }
    }

    #[test]
    fn test_usable_until_buffer() {
        let now = Instant::now();
        let cred = Credential::from_grant(grant(60), now);
        let buffer = Duration::from_secs(5);

        assert!(cred.is_usable(now, buffer));
        assert!(cred.is_usable(now + Duration::from_secs(54), buffer));
        assert!(!cred.is_usable(now + Duration::from_secs(55), buffer));
        assert!(!cred.is_usable(now + Duration::from_secs(61), buffer));
    }

    #[test]
    fn test_empty_access_token_is_never_usable() {
        let now = Instant::now();
        let mut cred = Credential::from_grant(grant(3600), now);
        cred.access_token.clear();
        assert!(!cred.is_usable(now, Duration::ZERO));
    }

    #[test]
    fn test_renewal_keeps_renewal_token() {
        let now = Instant::now();
        let mut cred = Credential::from_grant(grant(10), now);
        let later = now + Duration::from_secs(8);
        cred.apply_renewal(
            RenewedToken { access_token: "access-2".into(), expires_in_secs: 3600 },
            later,
        );

        assert_eq!(cred.access_token, "access-2");
        assert_eq!(cred.renewal_token, "renew-1");
        assert_eq!(cred.expires_at, later + Duration::from_secs(3600));
    }

    #[test]
    fn test_huge_lifetime_is_capped() {
        let now = Instant::now();
        let mut cred = Credential::from_grant(grant(u64::MAX), now);
        assert_eq!(cred.expires_at, now + Duration::from_secs(MAX_EXPIRES_IN_SECS));

        cred.apply_renewal(
            RenewedToken { access_token: "access-2".into(), expires_in_secs: i64::MAX as u64 },
            now,
        );
        assert!(cred.is_usable(now, Duration::from_secs(5)));
        assert!(!cred.is_usable(now, Duration::MAX));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let cred = Credential::from_grant(grant(10), Instant::now());
        let shown = format!("{:?}", cred);
        assert!(!shown.contains("access-1"));
        assert!(!shown.contains("renew-1"));
    }
}
