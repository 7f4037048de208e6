//! Participant display names.

use crate::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Maximum length of a display name, in characters.
pub const MAX_IDENTITY_LEN: usize = 20;

/// Display name under which a participant publishes and is tracked as online.
///
/// Always 1-20 ASCII letters, digits or underscores. Construct one with
/// [`Identity::parse`]; deserialization runs the same validation, so an
/// inbound event carrying an invalid sender never becomes a `ChatEvent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Validates a raw display name.
    ///
    /// Surrounding whitespace is trimmed first, so `"  alice "` is `alice`
    /// and a whitespace-only name is rejected as empty.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let name = raw.trim();

        if name.is_empty() {
            return Err(DomainError::invalid_identity(raw, "must not be empty"));
        }

        if name.chars().count() > MAX_IDENTITY_LEN {
            return Err(DomainError::invalid_identity(
                raw,
                &format!("must be {MAX_IDENTITY_LEN} characters or less"),
            ));
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DomainError::invalid_identity(
                raw,
                "may only contain letters, digits and underscores",
            ));
        }

        Ok(Self(name.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Derived `Hash`/`Ord` match `String`, so lookups by `&str` agree.
impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Identity {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identity {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
