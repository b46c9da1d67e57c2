use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A bearer token together with the instant it stops being accepted upstream
#[derive(Clone)]
pub struct AccessToken {
    value: Arc<str>,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<Arc<str>>, expires_at: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Raw token text
    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// A token inside the safety margin of its expiry counts as expired
    pub fn is_valid_for(&self, safety_margin: Duration) -> bool {
        Instant::now()
            .checked_add(safety_margin)
            .is_some_and(|deadline| deadline < self.expires_at)
    }

    /// Value for the upstream `Authorization` header
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of one credential exchange with the identity provider
#[derive(Clone)]
pub struct AcquiredToken {
    pub access_token: String,
    pub expires_in: Duration,
}

impl fmt::Debug for AcquiredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_inside_safety_margin_is_invalid() {
        let token = AccessToken::new("abc", Instant::now() + Duration::from_secs(30));
        assert!(!token.is_valid_for(Duration::from_secs(300)));
        assert!(token.is_valid_for(Duration::from_secs(5)));
    }

    #[test]
    fn test_overflowing_margin_is_invalid_not_a_panic() {
        let token = AccessToken::new("abc", Instant::now() + Duration::from_secs(3600));
        assert!(!token.is_valid_for(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_bearer_header_and_redacted_debug() {
        let token = AccessToken::new("abc", Instant::now() + Duration::from_secs(3600));
        assert_eq!(token.bearer_header(), "Bearer abc");
        assert!(!format!("{:?}", token).contains("abc"));
    }
}
