//! Identifier types shared across the workspace.
//!
//! Principal ids are issued by the hosted identity provider, so they are kept
//! as opaque strings rather than generated locally.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Stable identifier of an authenticated principal.
///
/// The same value keys the principal's profile row, so a session and its
/// profile are joined on it directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Parses a principal id, rejecting empty or whitespace-only input.
    ///
    /// # Errors
    ///
    /// Returns [`ParseIdError`] when the trimmed input is empty.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ParseIdError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseIdError {
                id_type: "PrincipalId",
                reason: "principal id must not be empty".to_string(),
            });
        }
        if trimmed.len() == raw.len() {
            Ok(Self(raw))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PrincipalId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PrincipalId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PrincipalId> for String {
    fn from(id: PrincipalId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_provider_ids() {
        let id = PrincipalId::parse("7f1c2a9e-3c55-4c1e-9a53-0d6f5b1e2c44").expect("should parse");
        assert_eq!(id.as_str(), "7f1c2a9e-3c55-4c1e-9a53-0d6f5b1e2c44");
        assert_eq!(id.to_string(), "7f1c2a9e-3c55-4c1e-9a53-0d6f5b1e2c44");
    }

    #[test]
    fn parse_trims_surrounding_whitespace() {
        let id: PrincipalId = "  abc  ".parse().expect("should parse");
        assert_eq!(id.as_str(), "abc");
    }

    #[test]
    fn parse_rejects_empty() {
        let err = PrincipalId::parse("   ").unwrap_err();
        assert_eq!(err.id_type, "PrincipalId");
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn deserialize_rejects_empty_id() {
        let result: Result<PrincipalId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = PrincipalId::parse("usr-1").expect("should parse");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"usr-1\"");
    }
}
