//! An authenticated session with the object store.

use chrono::{DateTime, Duration, Utc};

/// Tokens this close to expiry are treated as already expired.
const EXPIRY_SLACK_SECS: i64 = 60;

/// Token and storage endpoint obtained from the auth service.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Value for the `X-Auth-Token` header.
    pub token: String,

    /// Base URL of the account, e.g. `https://swift.example.com/v1/AUTH_abc`.
    pub storage_url: String,

    /// Expiry reported by Keystone. Auth v1 tokens carry none.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        token: impl Into<String>,
        storage_url: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            token: token.into(),
            storage_url: storage_url.into(),
            expires_at,
        }
    }

    /// Whether the token can still be used at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(EXPIRY_SLACK_SECS) < expires_at,
            None => true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("storage_url", &self.storage_url)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_without_expiry_stays_valid() {
        let session = Session::new("tok", "http://store/v1/AUTH_a", None);
        assert!(session.is_valid());
    }

    #[test]
    fn session_expires_with_slack() {
        let now = Utc::now();
        let session = Session::new("tok", "http://store", Some(now + Duration::seconds(30)));
        assert!(!session.is_valid_at(now));

        let session = Session::new("tok", "http://store", Some(now + Duration::hours(1)));
        assert!(session.is_valid_at(now));
    }
}
