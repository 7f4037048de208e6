//! Protocol versioning for client/relay negotiation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Protocol version carried in every client frame and in the relay's
/// handshake reply.
///
/// Peers interoperate when their major versions match; minor bumps are
/// additive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Version spoken by this build.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Returns true if a peer speaking `other` can be served.
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = VersionError;

    /// Parses `"major.minor"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidFormat(s.to_string());

        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        let major = major.parse::<u16>().map_err(|_| invalid())?;
        let minor = minor.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self { major, minor })
    }
}

/// Errors that can occur with version handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        let v: ProtocolVersion = "1.3".parse().unwrap();
        assert_eq!(v, ProtocolVersion::new(1, 3));
    }

    #[test]
    fn test_version_parse_invalid() {
        for bad in ["1", "1.0.0", "abc", "1.x", ""] {
            assert!(bad.parse::<ProtocolVersion>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_major_version_decides_compatibility() {
        let current = ProtocolVersion::CURRENT;
        assert!(current.is_compatible_with(&ProtocolVersion::new(1, 7)));
        assert!(!current.is_compatible_with(&ProtocolVersion::new(2, 0)));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(ProtocolVersion::new(1, 2).to_string(), "1.2");
    }
}
