//! Identifier and timestamp newtypes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// UserId
// ============================================================================

/// Identity string a connection registers under and messages are addressed to.
///
/// The relay treats identities as opaque: no normalization, no validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a new UserId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// ElementId
// ============================================================================

/// Unique identifier of a single element.
///
/// Producers normally generate a UUIDv4; any string is accepted on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Creates an ElementId from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// SessionToken
// ============================================================================

/// Opaque session token carried by `Identity` elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Timestamp
// ============================================================================

/// Producer-assigned time in fractional seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Creates a timestamp from raw seconds.
    pub const fn from_secs_f64(secs: f64) -> Self {
        Self(secs)
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Converts a chrono datetime, keeping microsecond precision.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_micros() as f64 / 1_000_000.0)
    }

    /// Returns the raw seconds value.
    pub fn as_secs_f64(&self) -> f64 {
        self.0
    }

    /// Converts back to a chrono datetime.
    ///
    /// Returns `None` for values chrono cannot represent (NaN, out of range).
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        if !self.0.is_finite() {
            return None;
        }
        let micros = (self.0 * 1_000_000.0).round();
        if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
            return None;
        }
        DateTime::from_timestamp_micros(micros as i64)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(at) => write!(f, "{}", at.to_rfc3339()),
            None => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_transparent_serde() {
        let id = UserId::new("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        let parsed: UserId = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(parsed.as_str(), "bob");
    }

    #[test]
    fn test_generated_element_ids_are_unique() {
        let a = ElementId::generate();
        let b = ElementId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_timestamp_datetime_roundtrip() {
        let at = DateTime::from_timestamp_micros(1_718_000_000_250_000).unwrap();
        let ts = Timestamp::from_datetime(at);
        assert_eq!(ts.as_secs_f64(), 1_718_000_000.25);
        assert_eq!(ts.to_datetime(), Some(at));
    }

    #[test]
    fn test_timestamp_nan_has_no_datetime() {
        assert!(Timestamp::from_secs_f64(f64::NAN).to_datetime().is_none());
        assert_eq!(Timestamp::from_secs_f64(f64::NAN).to_string(), "NaN");
    }

    #[test]
    fn test_session_token_from_owned_string() {
        let user = "alice";
        let token = SessionToken::from(format!("{user}-session"));
        assert_eq!(token, SessionToken::from("alice-session"));
    }
}
