//! Session credentials supplied by the application on each connection attempt.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::{Error, Result};

// ============================================================================
// SessionCredentials
// ============================================================================

/// Immutable credentials for one connection attempt.
///
/// Supplied by the application in response to the controller's
/// credentials request and never mutated afterwards. All fields except the
/// server-affinity token are mandatory; construction fails when any of them
/// is empty.
///
/// Equality and hashing are structural across all fields, so a credential
/// rotation on the server side always compares unequal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionCredentials {
    /// STOMP login principal.
    principal: String,
    /// STOMP passcode.
    secret: String,
    /// Server-issued session identifier; also names the subscription queue.
    session: String,
    /// Correlation id issued alongside the session (sent as the
    /// `um_session` keep-alive cookie).
    correlation: String,
    /// Backend host, without scheme.
    host: String,
    /// Cookie domain for the affinity cookie.
    domain: String,
    /// Optional server-affinity token pinning reconnects to one backend
    /// instance.
    affinity: Option<String>,
}

impl SessionCredentials {
    /// Creates a validated credentials value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when any mandatory field is empty.
    pub fn new(
        principal: impl Into<String>,
        secret: impl Into<String>,
        session: impl Into<String>,
        correlation: impl Into<String>,
        host: impl Into<String>,
        domain: impl Into<String>,
        affinity: Option<String>,
    ) -> Result<Self> {
        let credentials = Self {
            principal: principal.into(),
            secret: secret.into(),
            session: session.into(),
            correlation: correlation.into(),
            host: host.into(),
            domain: domain.into(),
            affinity,
        };

        for (name, value) in [
            ("principal", &credentials.principal),
            ("secret", &credentials.secret),
            ("session", &credentials.session),
            ("correlation", &credentials.correlation),
            ("host", &credentials.host),
            ("domain", &credentials.domain),
        ] {
            if value.is_empty() {
                return Err(Error::invalid_argument(format!("{name} must not be empty")));
            }
        }

        Ok(credentials)
    }

    /// STOMP login principal.
    #[inline]
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// STOMP passcode.
    #[inline]
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Server-issued session identifier.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Correlation id for keep-alive requests.
    #[inline]
    #[must_use]
    pub fn correlation(&self) -> &str {
        &self.correlation
    }

    /// Backend host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Cookie domain.
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Optional server-affinity token.
    #[inline]
    #[must_use]
    pub fn affinity(&self) -> Option<&str> {
        self.affinity.as_deref()
    }
}

impl fmt::Debug for SessionCredentials {
    // Secret never reaches logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .field("session", &self.session)
            .field("correlation", &self.correlation)
            .field("host", &self.host)
            .field("domain", &self.domain)
            .field("affinity", &self.affinity)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionCredentials {
        SessionCredentials::new("u", "p", "s1", "m1", "h", "d", None).expect("valid credentials")
    }

    #[test]
    fn test_construction() {
        let creds = sample();
        assert_eq!(creds.principal(), "u");
        assert_eq!(creds.secret(), "p");
        assert_eq!(creds.session(), "s1");
        assert_eq!(creds.correlation(), "m1");
        assert_eq!(creds.host(), "h");
        assert_eq!(creds.domain(), "d");
        assert_eq!(creds.affinity(), None);
    }

    #[test]
    fn test_empty_mandatory_field_rejected() {
        let result = SessionCredentials::new("u", "", "s1", "m1", "h", "d", None);
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_affinity_optional() {
        let creds =
            SessionCredentials::new("u", "p", "s1", "m1", "h", "d", Some("srv-3".to_string()))
                .expect("valid credentials");
        assert_eq!(creds.affinity(), Some("srv-3"));
    }

    #[test]
    fn test_structural_equality_and_hash() {
        use std::collections::HashSet;

        let a = sample();
        let b = sample();
        let rotated =
            SessionCredentials::new("u", "p2", "s1", "m1", "h", "d", None).expect("valid");

        assert_eq!(a, b);
        assert_ne!(a, rotated);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&rotated));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", sample());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("\"p\""));
    }
}
