//! Session model
//!
//! The dispatcher never upgrades or downgrades an identity itself; it
//! only requires that *some* identity exists before an alert attempt.

use std::fmt;

/// How the caller is identified to the alert endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Signed-in user with a bearer token
    Authenticated,
    /// Temporary anonymous identity minted via `POST /guest-sessions`
    Guest,
}

/// An established identity for the current browsing session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub kind: SessionKind,
    identifier: String,
}

impl SessionContext {
    #[must_use]
    pub fn authenticated(token: impl Into<String>) -> Self {
        Self {
            kind: SessionKind::Authenticated,
            identifier: token.into(),
        }
    }

    #[must_use]
    pub fn guest(session_id: impl Into<String>) -> Self {
        Self {
            kind: SessionKind::Guest,
            identifier: session_id.into(),
        }
    }

    /// Bearer token to attach, present only for authenticated sessions.
    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        match self.kind {
            SessionKind::Authenticated => Some(&self.identifier),
            SessionKind::Guest => None,
        }
    }

    /// Guest session id to embed in the payload, when anonymous.
    #[must_use]
    pub fn guest_session_id(&self) -> Option<&str> {
        match self.kind {
            SessionKind::Guest => Some(&self.identifier),
            SessionKind::Authenticated => None,
        }
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identifier: &dyn fmt::Debug = match self.kind {
            SessionKind::Authenticated => &"[REDACTED]",
            SessionKind::Guest => &self.identifier,
        };
        formatter
            .debug_struct("SessionContext")
            .field("kind", &self.kind)
            .field("identifier", identifier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_session_exposes_bearer_only() {
        let session = SessionContext::authenticated("token-123");
        assert_eq!(session.bearer(), Some("token-123"));
        assert_eq!(session.guest_session_id(), None);
    }

    #[test]
    fn guest_session_exposes_id_only() {
        let session = SessionContext::guest("guest-abc");
        assert_eq!(session.bearer(), None);
        assert_eq!(session.guest_session_id(), Some("guest-abc"));
    }

    #[test]
    fn debug_redacts_bearer_token() {
        let session = SessionContext::authenticated("super-secret");
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
