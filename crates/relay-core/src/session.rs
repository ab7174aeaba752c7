//! Session and connection identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier of one logical broadcast.
///
/// Supplied by the broadcasting browser as `streamKey` and appended to the
/// RTMP base URL to form the publish destination. The relay treats it as
/// opaque; the only requirement is that it is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new SessionId from a string without validation.
    ///
    /// Use [`SessionId::parse`] for input coming off the wire.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a SessionId, rejecting empty input.
    pub fn parse(id: impl Into<String>) -> DomainResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::EmptyIdentifier { field: "streamKey" });
        }
        Ok(Self(id))
    }

    /// Returns true if the identifier is empty (and therefore invalid).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of one transport connection (a viewer or a broadcaster).
///
/// Assigned by the server when a peer connects, e.g. `conn-7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the identifier for the n-th accepted connection.
    pub fn from_sequence(n: u64) -> Self {
        Self(format!("conn-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_parse_rejects_empty() {
        let err = SessionId::parse("").unwrap_err();
        assert_eq!(err, DomainError::EmptyIdentifier { field: "streamKey" });
        assert_eq!(err.to_string(), "streamKey must not be empty");
    }

    #[test]
    fn test_session_id_parse_accepts_opaque_values() {
        let id = SessionId::parse("abc-123 xyz").unwrap();
        assert_eq!(id.as_str(), "abc-123 xyz");
        assert!(!id.is_empty());
    }

    #[test]
    fn test_session_id_serializes_transparently() {
        let id = SessionId::new("s1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"s1\"");

        let parsed: SessionId = serde_json::from_str("\"s2\"").unwrap();
        assert_eq!(parsed, SessionId::new("s2"));
    }

    #[test]
    fn test_default_session_id_is_empty() {
        assert!(SessionId::default().is_empty());
    }

    #[test]
    fn test_connection_id_from_sequence() {
        assert_eq!(ConnectionId::from_sequence(7).as_str(), "conn-7");
        assert_eq!(ConnectionId::from_sequence(0).to_string(), "conn-0");
    }
}
