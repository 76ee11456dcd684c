//! Foundation types for the NTS core.
//!
//! Validated newtypes used throughout the crate: session identifiers, stable
//! file identities, and 32-bit content checksums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// A validated session identifier.
///
/// Session IDs are opaque names chosen by the client. They become directory
/// names under `.nts/sessions/`, so path separators and traversal sequences
/// are rejected. The reserved name [`SessionId::DEFAULT`] addresses the
/// fallback session that is never persisted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// The fallback session for callers that do not bind a session.
    pub const DEFAULT: &'static str = "default";

    /// The maximum length of a session identifier.
    pub const MAX_LEN: usize = 64;

    /// Create a new `SessionId` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the name is empty, too long, or contains
    /// characters unsafe for a directory name.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// The fallback session ID.
    #[must_use]
    pub fn default_session() -> Self {
        Self(Self::DEFAULT.to_owned())
    }

    /// Return the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the non-persisted fallback session.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.is_empty() {
            return Err(ValidationError {
                kind: ErrorKind::SessionId,
                value: s.to_owned(),
                reason: "session ID must not be empty".to_owned(),
            });
        }
        if s.len() > Self::MAX_LEN {
            return Err(ValidationError {
                kind: ErrorKind::SessionId,
                value: s.to_owned(),
                reason: format!(
                    "session ID must be at most {} characters, got {}",
                    Self::MAX_LEN,
                    s.len()
                ),
            });
        }
        if s.starts_with('.') {
            return Err(ValidationError {
                kind: ErrorKind::SessionId,
                value: s.to_owned(),
                reason: "session ID must not start with a dot".to_owned(),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ValidationError {
                kind: ErrorKind::SessionId,
                value: s.to_owned(),
                reason:
                    "session ID must contain only letters, digits, hyphens, underscores, and dots"
                        .to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// FileId
// ---------------------------------------------------------------------------

/// A stable, opaque file identity assigned on first registration of a path.
///
/// The ID survives across moves, renames, and external relocations detected
/// via content-hash match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    /// Assign a fresh identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for FileId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self).map_err(|e| ValidationError {
            kind: ErrorKind::FileId,
            value: s.to_owned(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// ContentHash
// ---------------------------------------------------------------------------

/// A 32-bit content checksum used for equality comparison only, never
/// cryptography. The checksum of an absent or unreadable file is
/// [`ContentHash::ZERO`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub u32);

impl ContentHash {
    /// The hash recorded for absent or unreadable files.
    pub const ZERO: Self = Self(0);

    /// The raw checksum value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether this is the absent-file sentinel.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parse from the 8-character lowercase hex form produced by `Display`.
    ///
    /// # Errors
    /// Returns an error when the input is not exactly 8 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
        if s.len() != 8 {
            return Err(ValidationError {
                kind: ErrorKind::ContentHash,
                value: s.to_owned(),
                reason: format!("expected 8 hex characters, got {}", s.len()),
            });
        }
        u32::from_str_radix(s, 16).map(Self).map_err(|e| ValidationError {
            kind: ErrorKind::ContentHash,
            value: s.to_owned(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Which newtype rejected a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A session identifier.
    SessionId,
    /// A stable file identity.
    FileId,
    /// A 32-bit content checksum in hex form.
    ContentHash,
}

/// A value failed newtype validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Which newtype rejected the value.
    pub kind: ErrorKind,
    /// The rejected input.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ErrorKind::SessionId => "session ID",
            ErrorKind::FileId => "file ID",
            ErrorKind::ContentHash => "content hash",
        };
        write!(f, "invalid {what} '{}': {}", self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- SessionId --

    #[test]
    fn session_id_accepts_typical_names() {
        for name in ["default", "agent-1", "run_42", "a.b.c", "X9"] {
            assert!(SessionId::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn session_id_rejects_empty() {
        assert!(SessionId::new("").is_err());
    }

    #[test]
    fn session_id_rejects_path_like_names() {
        for name in ["a/b", "..", ".hidden", "a\\b", "a b"] {
            assert!(SessionId::new(name).is_err(), "{name} should be rejected");
        }
    }

    #[test]
    fn session_id_rejects_overlong() {
        let name = "x".repeat(SessionId::MAX_LEN + 1);
        assert!(SessionId::new(&name).is_err());
    }

    #[test]
    fn session_id_default_flag() {
        assert!(SessionId::default_session().is_default());
        assert!(!SessionId::new("other").unwrap().is_default());
    }

    #[test]
    fn session_id_serde_round_trip() {
        let id = SessionId::new("agent-7").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"agent-7\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn session_id_serde_rejects_invalid() {
        let res: Result<SessionId, _> = serde_json::from_str("\"../../etc\"");
        assert!(res.is_err());
    }

    // -- FileId --

    #[test]
    fn file_id_is_unique_per_generate() {
        assert_ne!(FileId::generate(), FileId::generate());
    }

    #[test]
    fn file_id_display_parse_round_trip() {
        let id = FileId::generate();
        let parsed: FileId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn file_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<FileId>().is_err());
    }

    // -- ContentHash --

    #[test]
    fn content_hash_hex_round_trip() {
        let h = ContentHash(0xdead_beef);
        assert_eq!(h.to_string(), "deadbeef");
        assert_eq!(ContentHash::from_hex("deadbeef").unwrap(), h);
    }

    #[test]
    fn content_hash_zero_sentinel() {
        assert!(ContentHash::ZERO.is_zero());
        assert_eq!(ContentHash::ZERO.to_string(), "00000000");
        assert!(!ContentHash(1).is_zero());
    }

    #[test]
    fn content_hash_rejects_bad_hex() {
        assert!(ContentHash::from_hex("zzzz").is_err());
        assert!(ContentHash::from_hex("0123456789").is_err());
    }
}
