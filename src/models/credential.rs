use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// A bearer credential for the upstream.
///
/// Never mutated after construction: a refresh produces a new value that
/// replaces the old one in the [`TokenStore`](crate::proxy::TokenStore).
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub ttl: Duration,
    pub mock: bool,
}

impl Credential {
    pub fn new(
        token: impl Into<String>,
        issued_at: DateTime<Utc>,
        ttl: Duration,
        mock: bool,
    ) -> Self {
        Self {
            token: token.into(),
            issued_at,
            ttl,
            mock,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        self.issued_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = self.token.chars().take(8).collect();
        f.debug_struct("Credential")
            .field("token", &format!("{}...", preview))
            .field("issued_at", &self.issued_at)
            .field("ttl", &self.ttl)
            .field("mock", &self.mock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_freshness_window() {
        let issued = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let cred = Credential::new("abc", issued, Duration::from_secs(60), false);

        assert!(cred.is_fresh_at(issued + chrono::Duration::seconds(59)));
        assert!(!cred.is_fresh_at(issued + chrono::Duration::seconds(60)));
        assert_eq!(cred.bearer(), "Bearer abc");
    }

    #[test]
    fn test_debug_truncates_token() {
        let cred = Credential::new(
            "eyJhbGciOiJSUzI1NiJ9.secret-part",
            Utc::now(),
            Duration::from_secs(60),
            false,
        );
        let rendered = format!("{:?}", cred);
        assert!(rendered.contains("eyJhbGci..."));
        assert!(!rendered.contains("secret-part"));
    }
}
